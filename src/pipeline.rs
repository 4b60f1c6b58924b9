use crate::domain_policy;
use crate::fetcher::FetchBackend;
use crate::judge::JUDGE_INPUT_MAX_CHARS;
use crate::models::{
    DomainAction, FetchEvent, FlaggedPayload, JudgeResult, TraceKind, FLAGGED_CONTENT_MAX_CHARS,
};
use crate::policy::{self, PolicyDecision, PolicyInput};
use crate::sanitize::{self, ExtractMode, Extracted};
use crate::scorer::{self, ScoreOutcome};
use crate::state::AppState;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

const SUMMARY_MAX_WORDS: usize = 120;
const SUMMARY_MAX_CHARS: usize = 600;

/// Where a fetch came from, when it traces back to a prior search.
#[derive(Debug, Clone)]
pub struct SearchContext {
    pub request_id: Uuid,
    pub query: String,
    pub rank: u32,
}

/// One fetch to run through the pipeline.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Result id (search-result fetch) or generated fetch id (direct fetch).
    pub id: Uuid,
    pub url: String,
    pub domain: String,
    pub output_mode: ExtractMode,
    pub output_max_chars: Option<usize>,
    pub trace_kind: TraceKind,
    pub search: Option<SearchContext>,
}

/// Provenance of the bytes a decision was made over.
#[derive(Debug, Clone, Serialize)]
pub struct SourceMeta {
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_backend: Option<FetchBackend>,
    pub rendered: bool,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl SourceMeta {
    fn unfetched(domain: String) -> Self {
        Self {
            domain,
            fetch_backend: None,
            rendered: false,
            fallback_used: false,
            final_url: None,
            content_type: None,
        }
    }
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub decision: PolicyDecision,
    pub source: SourceMeta,
    /// Extracted content, present on allow.
    pub content: Option<Extracted>,
    pub content_summary: Option<String>,
    pub normalization_applied: Vec<String>,
    pub obfuscation_signals: Vec<String>,
    pub event_id: i64,
    pub duration_ms: u64,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Retrieval failed; no fetch event is written for these.
    #[error("page fetch failed")]
    Fetch(#[source] anyhow::Error),
    #[error("pipeline persistence failed")]
    Internal(#[source] anyhow::Error),
}

/// Run one fetch end-to-end: domain policy, retrieval, post-fetch domain
/// recheck, sanitization, scoring, optional adjudication, decision,
/// persistence.
pub async fn run_fetch(state: &AppState, req: FetchRequest) -> Result<PipelineOutcome, PipelineError> {
    let started = Instant::now();
    let profile = state.settings.profile_settings();

    let allowlist = state
        .store
        .effective_allowlist(&state.settings.static_allowlist)
        .map_err(PipelineError::Internal)?;
    let blocklist = state
        .store
        .effective_blocklist(&state.settings.static_blocklist)
        .map_err(PipelineError::Internal)?;

    let requested_domain = domain_policy::normalize_domain(&req.domain)
        .unwrap_or_else(|| req.domain.trim().to_lowercase());

    let mut eval = domain_policy::evaluate(&requested_domain, &allowlist, &blocklist);
    if eval.action == DomainAction::Block {
        let decision = decide(state, &eval, &ScoreOutcome::default(), None, &profile);
        let source = SourceMeta::unfetched(requested_domain);
        let (event_id, duration_ms) = persist(state, &req, &decision, eval.action, &source, started)?;
        info!(domain = %source.domain, "fetch blocked by domain policy before retrieval");
        return Ok(blocked_outcome(decision, source, event_id, duration_ms));
    }

    let page = state
        .fetcher
        .fetch_page(&req.url)
        .await
        .map_err(PipelineError::Fetch)?;

    let mut domain = requested_domain.clone();
    let final_domain = page
        .final_url
        .host_str()
        .map(|h| h.trim_end_matches('.').to_lowercase())
        .unwrap_or_else(|| requested_domain.clone());

    let scoring = sanitize::sanitize_to_text(&page.body, Some(profile.max_extracted_chars));

    if final_domain != requested_domain {
        domain = final_domain.clone();
        let recheck = domain_policy::evaluate(&final_domain, &allowlist, &blocklist);
        if recheck.action == DomainAction::Block {
            let redirected = domain_policy::DomainEvaluation {
                action: DomainAction::Block,
                reason: Some("Redirected final URL blocked".to_string()),
                matched_rule: recheck.matched_rule,
            };
            let decision = decide(state, &redirected, &ScoreOutcome::default(), None, &profile);
            let source = source_meta(domain, &page);
            let (event_id, duration_ms) =
                persist(state, &req, &decision, DomainAction::Block, &source, started)?;
            persist_payload(state, &req, event_id, &decision, &source, &scoring.content, &[]);
            warn!(url = %page.final_url, "redirected final url blocked");
            return Ok(blocked_outcome(decision, source, event_id, duration_ms));
        }
        eval = recheck;
    }

    let extracted = sanitize::extract_content(&page.body, req.output_mode, req.output_max_chars);

    let score_outcome = if eval.action == DomainAction::Inspect {
        scorer::score(&scoring.content, &state.settings.language_extras)
    } else {
        ScoreOutcome::default()
    };

    let judge_result = maybe_adjudicate(state, eval.action, &score_outcome, &scoring.content).await;

    let decision = decide(state, &eval, &score_outcome, judge_result.as_ref(), &profile);
    let source = source_meta(domain, &page);
    let (event_id, duration_ms) = persist(state, &req, &decision, eval.action, &source, started)?;

    if decision.is_block() {
        persist_payload(
            state,
            &req,
            event_id,
            &decision,
            &source,
            &scoring.content,
            &score_outcome.evidence,
        );
        return Ok(PipelineOutcome {
            normalization_applied: score_outcome.normalization.transformations,
            obfuscation_signals: score_outcome.normalization.signal_flags,
            ..blocked_outcome(decision, source, event_id, duration_ms)
        });
    }

    let summary = content_summary(&extracted.content);
    Ok(PipelineOutcome {
        decision,
        source,
        content: Some(extracted),
        content_summary: Some(summary),
        normalization_applied: score_outcome.normalization.transformations,
        obfuscation_signals: score_outcome.normalization.signal_flags,
        event_id,
        duration_ms,
    })
}

fn decide(
    state: &AppState,
    eval: &domain_policy::DomainEvaluation,
    score: &ScoreOutcome,
    judge: Option<&JudgeResult>,
    profile: &crate::config::ProfileSettings,
) -> PolicyDecision {
    policy::decide(
        PolicyInput {
            initial_score: score.score,
            initial_flags: &score.flags,
            allow_signals: &score.allow_signals,
            domain_action: eval.action,
            domain_reason: eval.reason.as_deref(),
            judge,
        },
        profile,
        state.settings.fail_closed,
    )
}

/// The judge only sees content the scorer put in the medium band.
async fn maybe_adjudicate(
    state: &AppState,
    action: DomainAction,
    score: &ScoreOutcome,
    scoring_text: &str,
) -> Option<JudgeResult> {
    let judge = state.judge.as_ref()?;
    if action != DomainAction::Inspect {
        return None;
    }
    let profile = state.settings.profile_settings();
    if score.score < profile.medium_threshold || score.score >= profile.block_threshold {
        return None;
    }
    let clipped: String = scoring_text.chars().take(JUDGE_INPUT_MAX_CHARS).collect();
    judge.adjudicate(&clipped, score.score, &score.flags).await
}

fn source_meta(domain: String, page: &crate::fetcher::FetchedPage) -> SourceMeta {
    SourceMeta {
        domain,
        fetch_backend: Some(page.backend_used),
        rendered: page.rendered,
        fallback_used: page.fallback_used,
        final_url: Some(page.final_url.to_string()),
        content_type: Some(page.content_type.clone()),
    }
}

fn blocked_outcome(
    decision: PolicyDecision,
    source: SourceMeta,
    event_id: i64,
    duration_ms: u64,
) -> PipelineOutcome {
    PipelineOutcome {
        decision,
        source,
        content: None,
        content_summary: None,
        normalization_applied: vec![],
        obfuscation_signals: vec![],
        event_id,
        duration_ms,
    }
}

fn persist(
    state: &AppState,
    req: &FetchRequest,
    decision: &PolicyDecision,
    domain_action: DomainAction,
    source: &SourceMeta,
    started: Instant,
) -> Result<(i64, u64), PipelineError> {
    let profile = state.settings.profile_settings();
    let duration_ms = started.elapsed().as_millis() as u64;
    let event = FetchEvent {
        id: 0,
        result_id: Some(req.id),
        url: req.url.clone(),
        domain: source.domain.clone(),
        decision: decision.decision,
        score: decision.score,
        flags: decision.flags.clone(),
        reason: decision.reason.clone(),
        blocked_by: decision.blocked_by,
        allowed_by: decision.allowed_by,
        domain_action,
        medium_threshold: profile.medium_threshold,
        block_threshold: profile.block_threshold,
        bypassed: decision.bypassed,
        duration_ms,
        trace_kind: req.trace_kind,
        search_request_id: req.search.as_ref().map(|s| s.request_id),
        search_query: req.search.as_ref().map(|s| s.query.clone()),
        search_rank: req.search.as_ref().map(|s| s.rank),
        created_at: Utc::now(),
    };
    let event_id = state
        .store
        .store_fetch_event(&event)
        .map_err(PipelineError::Internal)?;
    Ok((event_id, duration_ms))
}

/// Best-effort evidence persistence for blocks; failures are logged and do
/// not change the decision.
fn persist_payload(
    state: &AppState,
    req: &FetchRequest,
    event_id: i64,
    decision: &PolicyDecision,
    source: &SourceMeta,
    scoring_text: &str,
    evidence: &[crate::models::EvidenceMatch],
) {
    let (content, _) = sanitize::truncate_chars(scoring_text.to_string(), FLAGGED_CONTENT_MAX_CHARS);
    let payload = FlaggedPayload {
        fetch_event_id: event_id,
        result_id: Some(req.id),
        url: req.url.clone(),
        domain: source.domain.clone(),
        score: decision.score,
        flags: decision.flags.clone(),
        evidence: evidence.to_vec(),
        reason: decision.reason.clone().unwrap_or_default(),
        content,
        created_at: Utc::now(),
    };
    if let Err(e) = state.store.store_flagged_payload(&payload) {
        warn!(event_id, "failed persisting flagged payload: {e:#}");
    }
}

/// First 120 whitespace-separated words, capped at 600 chars.
pub fn content_summary(content: &str) -> String {
    let joined = content
        .split_whitespace()
        .take(SUMMARY_MAX_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    sanitize::truncate_chars(joined, SUMMARY_MAX_CHARS).0
}
