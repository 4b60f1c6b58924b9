use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Block,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Allowed,
    Blocked,
}

/// Why a fetch was blocked, in precedence order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BlockedBy {
    DomainPolicy,
    RuleThreshold,
    FailClosed,
    LlmJudge,
    Policy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AllowedBy {
    DomainAllowlistBypass,
    LanguageException,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DomainAction {
    AllowBypass,
    Block,
    Inspect,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TraceKind {
    SearchResultFetch,
    DirectWebFetch,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Detector {
    Rule,
    Encoding,
    Typoglycemia,
    Normalization,
}

/// Which text an evidence span's offsets reference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchBasis {
    Raw,
    Normalized,
}

/// A cached result of a prior search. Immutable after creation; readable
/// only before `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultRecord {
    pub result_id: Uuid,
    pub request_id: Uuid,
    pub query: String,
    pub rank: u32,
    pub url: String,
    pub domain: String,
    pub title: String,
    pub snippet: String,
    pub source: String,
    pub availability: Availability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One trace of the fetch pipeline. `id` is 0 until the store assigns one.
///
/// At most one of `blocked_by` / `allowed_by` is set; both may be absent for
/// an unclassified allow. `bypassed` implies `allowed_by = DomainAllowlistBypass`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchEvent {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<Uuid>,
    pub url: String,
    pub domain: String,
    pub decision: Decision,
    pub score: u32,
    pub flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<BlockedBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_by: Option<AllowedBy>,
    pub domain_action: DomainAction,
    pub medium_threshold: u32,
    pub block_threshold: u32,
    pub bypassed: bool,
    pub duration_ms: u64,
    pub trace_kind: TraceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_request_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_rank: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Maximum sanitized-text prefix persisted with a flagged payload.
pub const FLAGGED_CONTENT_MAX_CHARS: usize = 30_000;

/// Persisted evidence for a block decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedPayload {
    pub fetch_event_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<Uuid>,
    pub url: String,
    pub domain: String,
    pub score: u32,
    pub flags: Vec<String>,
    pub evidence: Vec<EvidenceMatch>,
    pub reason: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// The structured record of why a flag fired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvidenceMatch {
    pub flag: String,
    pub detector: Detector,
    pub basis: MatchBasis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
    pub matched_text: String,
    pub excerpt: String,
    pub weight: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A runtime allow/block list entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeDomainEntry {
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// Result of a judge adjudication over sanitized text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeResult {
    pub label: JudgeLabel,
    pub confidence: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JudgeLabel {
    Benign,
    Suspicious,
    Malicious,
}

impl JudgeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            JudgeLabel::Benign => "benign",
            JudgeLabel::Suspicious => "suspicious",
            JudgeLabel::Malicious => "malicious",
        }
    }
}
