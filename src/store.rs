use crate::domain_policy;
use crate::models::{
    Availability, FetchEvent, FlaggedPayload, RuntimeDomainEntry, SearchResultRecord,
};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS search_requests (
    id          TEXT PRIMARY KEY,
    query       TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS search_results (
    result_id    TEXT PRIMARY KEY,
    request_id   TEXT NOT NULL,
    query        TEXT NOT NULL,
    rank         INTEGER NOT NULL,
    url          TEXT NOT NULL,
    domain       TEXT NOT NULL,
    title        TEXT NOT NULL,
    snippet      TEXT NOT NULL,
    source       TEXT NOT NULL,
    availability TEXT NOT NULL,
    block_reason TEXT,
    created_at   INTEGER NOT NULL,
    expires_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_search_results_expiry ON search_results(expires_at);

CREATE TABLE IF NOT EXISTS fetch_events (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    result_id         TEXT,
    url               TEXT NOT NULL,
    domain            TEXT NOT NULL,
    decision          TEXT NOT NULL,
    score             INTEGER NOT NULL,
    flags             TEXT NOT NULL,
    reason            TEXT,
    blocked_by        TEXT,
    allowed_by        TEXT,
    domain_action     TEXT NOT NULL,
    medium_threshold  INTEGER NOT NULL,
    block_threshold   INTEGER NOT NULL,
    bypassed          INTEGER NOT NULL,
    duration_ms       INTEGER NOT NULL,
    trace_kind        TEXT NOT NULL,
    search_request_id TEXT,
    search_query      TEXT,
    search_rank       INTEGER,
    created_at        INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fetch_events_created ON fetch_events(created_at);

CREATE TABLE IF NOT EXISTS flagged_payloads (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    fetch_event_id INTEGER NOT NULL,
    result_id      TEXT,
    url            TEXT NOT NULL,
    domain         TEXT NOT NULL,
    score          INTEGER NOT NULL,
    flags          TEXT NOT NULL,
    evidence       TEXT NOT NULL,
    reason         TEXT NOT NULL,
    content        TEXT NOT NULL,
    created_at     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_flagged_payloads_created ON flagged_payloads(created_at);

CREATE TABLE IF NOT EXISTS runtime_domains (
    list     TEXT NOT NULL,
    domain   TEXT NOT NULL,
    note     TEXT,
    added_at INTEGER NOT NULL,
    PRIMARY KEY (list, domain)
);
"#;

/// Rows removed by one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub expired_results: usize,
    pub old_requests: usize,
    pub old_events: usize,
    pub old_payloads: usize,
}

/// SQLite-backed persistence adapter. All records are owned here; mutations
/// are serialized through the connection mutex.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed opening database: {}", path.as_ref().display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // journal_mode reports the resulting mode, so it cannot go through
        // execute_batch.
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .context("failed enabling WAL")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .context("failed applying pragmas")?;
        conn.execute_batch(SCHEMA).context("failed applying schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_healthy(&self) -> bool {
        self.lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    pub fn store_search_request(&self, id: Uuid, query: &str, created_at: DateTime<Utc>) -> Result<()> {
        self.lock()
            .execute(
                "INSERT INTO search_requests (id, query, created_at) VALUES (?1, ?2, ?3)",
                params![id.to_string(), query, created_at.timestamp_millis()],
            )
            .context("failed storing search request")?;
        Ok(())
    }

    pub fn store_search_result(&self, rec: &SearchResultRecord) -> Result<()> {
        if rec.expires_at <= rec.created_at {
            bail!("search result must expire after creation");
        }
        self.lock()
            .execute(
                "INSERT INTO search_results (result_id, request_id, query, rank, url, domain, title,
                     snippet, source, availability, block_reason, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    rec.result_id.to_string(),
                    rec.request_id.to_string(),
                    rec.query,
                    rec.rank,
                    rec.url,
                    rec.domain,
                    rec.title,
                    rec.snippet,
                    rec.source,
                    enum_text(&rec.availability)?,
                    rec.block_reason,
                    rec.created_at.timestamp_millis(),
                    rec.expires_at.timestamp_millis(),
                ],
            )
            .context("failed storing search result")?;
        Ok(())
    }

    /// Read a cached search result, expired rows excluded.
    pub fn get_search_result(&self, id: Uuid) -> Result<Option<SearchResultRecord>> {
        self.lock()
            .query_row(
                "SELECT result_id, request_id, query, rank, url, domain, title, snippet, source,
                        availability, block_reason, created_at, expires_at
                 FROM search_results WHERE result_id = ?1 AND expires_at > ?2",
                params![id.to_string(), Utc::now().timestamp_millis()],
                search_result_from_row,
            )
            .optional()
            .context("failed reading search result")
    }

    /// Persist a fetch event and hand back its assigned id.
    pub fn store_fetch_event(&self, ev: &FetchEvent) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO fetch_events (result_id, url, domain, decision, score, flags, reason,
                 blocked_by, allowed_by, domain_action, medium_threshold, block_threshold,
                 bypassed, duration_ms, trace_kind, search_request_id, search_query, search_rank,
                 created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                ev.result_id.map(|u| u.to_string()),
                ev.url,
                ev.domain,
                enum_text(&ev.decision)?,
                ev.score,
                serde_json::to_string(&ev.flags)?,
                ev.reason,
                ev.blocked_by.map(|b| enum_text(&b)).transpose()?,
                ev.allowed_by.map(|a| enum_text(&a)).transpose()?,
                enum_text(&ev.domain_action)?,
                ev.medium_threshold,
                ev.block_threshold,
                ev.bypassed,
                ev.duration_ms as i64,
                enum_text(&ev.trace_kind)?,
                ev.search_request_id.map(|u| u.to_string()),
                ev.search_query,
                ev.search_rank,
                ev.created_at.timestamp_millis(),
            ],
        )
        .context("failed storing fetch event")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_fetch_event(&self, id: i64) -> Result<Option<FetchEvent>> {
        self.lock()
            .query_row(
                "SELECT id, result_id, url, domain, decision, score, flags, reason, blocked_by,
                        allowed_by, domain_action, medium_threshold, block_threshold, bypassed,
                        duration_ms, trace_kind, search_request_id, search_query, search_rank,
                        created_at
                 FROM fetch_events WHERE id = ?1",
                params![id],
                fetch_event_from_row,
            )
            .optional()
            .context("failed reading fetch event")
    }

    pub fn store_flagged_payload(&self, payload: &FlaggedPayload) -> Result<()> {
        self.lock()
            .execute(
                "INSERT INTO flagged_payloads (fetch_event_id, result_id, url, domain, score,
                     flags, evidence, reason, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    payload.fetch_event_id,
                    payload.result_id.map(|u| u.to_string()),
                    payload.url,
                    payload.domain,
                    payload.score,
                    serde_json::to_string(&payload.flags)?,
                    serde_json::to_string(&payload.evidence)?,
                    payload.reason,
                    payload.content,
                    payload.created_at.timestamp_millis(),
                ],
            )
            .context("failed storing flagged payload")?;
        Ok(())
    }

    pub fn count_flagged_payloads(&self) -> Result<usize> {
        let n: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM flagged_payloads", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn add_runtime_allowlist_domain(&self, domain: &str, note: Option<&str>) -> Result<RuntimeDomainEntry> {
        self.add_runtime_domain("allow", domain, note)
    }

    pub fn add_runtime_blocklist_domain(&self, domain: &str, note: Option<&str>) -> Result<RuntimeDomainEntry> {
        self.add_runtime_domain("block", domain, note)
    }

    fn add_runtime_domain(&self, list: &str, domain: &str, note: Option<&str>) -> Result<RuntimeDomainEntry> {
        let normalized = domain_policy::normalize_domain(domain)
            .ok_or_else(|| anyhow!("empty domain"))?;
        if !domain_policy::is_valid_domain(&normalized) {
            bail!("invalid domain: {domain}");
        }
        let entry = RuntimeDomainEntry {
            domain: normalized,
            note: note.map(str::to_string),
            added_at: Utc::now(),
        };
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO runtime_domains (list, domain, note, added_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![list, entry.domain, entry.note, entry.added_at.timestamp_millis()],
            )
            .context("failed storing runtime domain")?;
        Ok(entry)
    }

    pub fn list_runtime_allowlist_domains(&self) -> Result<Vec<RuntimeDomainEntry>> {
        self.list_runtime_domains("allow")
    }

    pub fn list_runtime_blocklist_domains(&self) -> Result<Vec<RuntimeDomainEntry>> {
        self.list_runtime_domains("block")
    }

    fn list_runtime_domains(&self, list: &str) -> Result<Vec<RuntimeDomainEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT domain, note, added_at FROM runtime_domains WHERE list = ?1 ORDER BY domain",
        )?;
        let rows = stmt
            .query_map(params![list], |row| {
                Ok(RuntimeDomainEntry {
                    domain: row.get(0)?,
                    note: row.get(1)?,
                    added_at: millis_to_utc(row.get(2)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Static config entries unioned with the persisted runtime list.
    pub fn effective_allowlist(&self, static_entries: &[String]) -> Result<Vec<String>> {
        let runtime: Vec<String> = self
            .list_runtime_allowlist_domains()?
            .into_iter()
            .map(|e| e.domain)
            .collect();
        Ok(domain_policy::effective_list(static_entries, &runtime))
    }

    pub fn effective_blocklist(&self, static_entries: &[String]) -> Result<Vec<String>> {
        let runtime: Vec<String> = self
            .list_runtime_blocklist_domains()?
            .into_iter()
            .map(|e| e.domain)
            .collect();
        Ok(domain_policy::effective_list(static_entries, &runtime))
    }

    /// Drop expired search results and trim audit rows past the retention
    /// horizon.
    pub fn purge_expired(&self, retention_days: i64, now: DateTime<Utc>) -> Result<PurgeStats> {
        let now_ms = now.timestamp_millis();
        let horizon_ms = now_ms - retention_days.max(0) * 24 * 60 * 60 * 1000;
        let conn = self.lock();

        let expired_results = conn.execute(
            "DELETE FROM search_results WHERE expires_at <= ?1",
            params![now_ms],
        )?;
        let old_requests = conn.execute(
            "DELETE FROM search_requests WHERE created_at < ?1",
            params![horizon_ms],
        )?;
        let old_events = conn.execute(
            "DELETE FROM fetch_events WHERE created_at < ?1",
            params![horizon_ms],
        )?;
        let old_payloads = conn.execute(
            "DELETE FROM flagged_payloads WHERE created_at < ?1",
            params![horizon_ms],
        )?;

        Ok(PurgeStats {
            expired_results,
            old_requests,
            old_events,
            old_payloads,
        })
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Serde-tag round trip for the closed enums stored as TEXT columns.
fn enum_text<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => bail!("expected string tag, got {other}"),
    }
}

fn enum_from_text<T: DeserializeOwned>(s: String) -> rusqlite::Result<T> {
    serde_json::from_value(serde_json::Value::String(s))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn uuid_from_text(s: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn json_from_text<T: DeserializeOwned>(s: String) -> rusqlite::Result<T> {
    serde_json::from_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn search_result_from_row(row: &Row<'_>) -> rusqlite::Result<SearchResultRecord> {
    Ok(SearchResultRecord {
        result_id: uuid_from_text(row.get(0)?)?,
        request_id: uuid_from_text(row.get(1)?)?,
        query: row.get(2)?,
        rank: row.get(3)?,
        url: row.get(4)?,
        domain: row.get(5)?,
        title: row.get(6)?,
        snippet: row.get(7)?,
        source: row.get(8)?,
        availability: enum_from_text::<Availability>(row.get(9)?)?,
        block_reason: row.get(10)?,
        created_at: millis_to_utc(row.get(11)?),
        expires_at: millis_to_utc(row.get(12)?),
    })
}

fn fetch_event_from_row(row: &Row<'_>) -> rusqlite::Result<FetchEvent> {
    Ok(FetchEvent {
        id: row.get(0)?,
        result_id: row.get::<_, Option<String>>(1)?.map(uuid_from_text).transpose()?,
        url: row.get(2)?,
        domain: row.get(3)?,
        decision: enum_from_text(row.get(4)?)?,
        score: row.get(5)?,
        flags: json_from_text(row.get(6)?)?,
        reason: row.get(7)?,
        blocked_by: row.get::<_, Option<String>>(8)?.map(enum_from_text).transpose()?,
        allowed_by: row.get::<_, Option<String>>(9)?.map(enum_from_text).transpose()?,
        domain_action: enum_from_text(row.get(10)?)?,
        medium_threshold: row.get(11)?,
        block_threshold: row.get(12)?,
        bypassed: row.get(13)?,
        duration_ms: row.get::<_, i64>(14)? as u64,
        trace_kind: enum_from_text(row.get(15)?)?,
        search_request_id: row.get::<_, Option<String>>(16)?.map(uuid_from_text).transpose()?,
        search_query: row.get(17)?,
        search_rank: row.get(18)?,
        created_at: millis_to_utc(row.get(19)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Decision, DomainAction, TraceKind};
    use chrono::Duration;

    fn sample_result(expires_in_minutes: i64) -> SearchResultRecord {
        let now = Utc::now();
        SearchResultRecord {
            result_id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            query: "bun runtime".to_string(),
            rank: 1,
            url: "https://example.com/a".to_string(),
            domain: "example.com".to_string(),
            title: "A".to_string(),
            snippet: "about bun".to_string(),
            source: "brave".to_string(),
            availability: Availability::Allowed,
            block_reason: None,
            created_at: now,
            expires_at: now + Duration::minutes(expires_in_minutes),
        }
    }

    fn sample_event() -> FetchEvent {
        FetchEvent {
            id: 0,
            result_id: Some(Uuid::new_v4()),
            url: "https://example.com/a".to_string(),
            domain: "example.com".to_string(),
            decision: Decision::Block,
            score: 11,
            flags: vec!["instruction_override".to_string()],
            reason: Some("Rule score 11 ≥ block threshold 10".to_string()),
            blocked_by: Some(crate::models::BlockedBy::RuleThreshold),
            allowed_by: None,
            domain_action: DomainAction::Inspect,
            medium_threshold: 6,
            block_threshold: 10,
            bypassed: false,
            duration_ms: 87,
            trace_kind: TraceKind::SearchResultFetch,
            search_request_id: Some(Uuid::new_v4()),
            search_query: Some("bun runtime".to_string()),
            search_rank: Some(1),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn search_result_round_trips_and_expires() {
        let store = Store::open_in_memory().unwrap();

        let live = sample_result(30);
        store.store_search_result(&live).unwrap();
        let got = store.get_search_result(live.result_id).unwrap().unwrap();
        assert_eq!(got.url, live.url);
        assert_eq!(got.availability, Availability::Allowed);

        let dead = sample_result(-1);
        store.store_search_result(&dead).unwrap();
        assert!(store.get_search_result(dead.result_id).unwrap().is_none());
    }

    #[test]
    fn rejects_results_that_never_lived() {
        let store = Store::open_in_memory().unwrap();
        let mut rec = sample_result(30);
        rec.expires_at = rec.created_at;
        assert!(store.store_search_result(&rec).is_err());
    }

    #[test]
    fn fetch_event_round_trips_with_enums() {
        let store = Store::open_in_memory().unwrap();
        let ev = sample_event();
        let id = store.store_fetch_event(&ev).unwrap();
        assert!(id > 0);

        let got = store.get_fetch_event(id).unwrap().unwrap();
        assert_eq!(got.decision, Decision::Block);
        assert_eq!(got.blocked_by, Some(crate::models::BlockedBy::RuleThreshold));
        assert_eq!(got.trace_kind, TraceKind::SearchResultFetch);
        assert_eq!(got.flags, ev.flags);
        assert_eq!(got.search_rank, Some(1));
    }

    #[test]
    fn runtime_lists_validate_normalize_and_merge() {
        let store = Store::open_in_memory().unwrap();
        store
            .add_runtime_blocklist_domain("*.Evil.Example.", Some("seen in the wild"))
            .unwrap();
        store.add_runtime_allowlist_domain("docs.example.com", None).unwrap();
        assert!(store.add_runtime_blocklist_domain("not a domain", None).is_err());
        assert!(store.add_runtime_allowlist_domain("", None).is_err());

        let blocked = store.list_runtime_blocklist_domains().unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].domain, "evil.example");

        let effective = store
            .effective_blocklist(&["static.example".to_string(), "evil.example".to_string()])
            .unwrap();
        assert_eq!(effective, vec!["static.example".to_string(), "evil.example".to_string()]);

        let allow = store.effective_allowlist(&[]).unwrap();
        assert_eq!(allow, vec!["docs.example.com".to_string()]);
    }

    #[test]
    fn purge_trims_expired_and_old_rows() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        let dead = sample_result(-5);
        store.store_search_result(&dead).unwrap();
        let live = sample_result(30);
        store.store_search_result(&live).unwrap();

        let mut old_event = sample_event();
        old_event.created_at = now - Duration::days(40);
        let old_id = store.store_fetch_event(&old_event).unwrap();
        store
            .store_flagged_payload(&FlaggedPayload {
                fetch_event_id: old_id,
                result_id: old_event.result_id,
                url: old_event.url.clone(),
                domain: old_event.domain.clone(),
                score: old_event.score,
                flags: old_event.flags.clone(),
                evidence: vec![],
                reason: "old".to_string(),
                content: "old content".to_string(),
                created_at: old_event.created_at,
            })
            .unwrap();

        let fresh_id = store.store_fetch_event(&sample_event()).unwrap();

        let stats = store.purge_expired(30, now).unwrap();
        assert_eq!(stats.expired_results, 1);
        assert_eq!(stats.old_events, 1);
        assert_eq!(stats.old_payloads, 1);

        assert!(store.get_search_result(live.result_id).unwrap().is_some());
        assert!(store.get_fetch_event(old_id).unwrap().is_none());
        assert!(store.get_fetch_event(fresh_id).unwrap().is_some());
    }

    #[test]
    fn health_check() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.is_healthy());
    }
}
