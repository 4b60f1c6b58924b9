use crate::api_error::ApiError;
use crate::domain_policy;
use crate::models::{Decision, DomainAction, TraceKind};
use crate::pipeline::{self, FetchRequest, PipelineError, PipelineOutcome, SearchContext};
use crate::queue::QueueError;
use crate::sanitize::ExtractMode;
use crate::search::{Safesearch, SearchQuery};
use crate::server_config::Settings;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

type ApiResult<T> = Result<T, ApiError>;

const MAX_WEB_FETCH_CHARS: usize = 5_000_000;
const DEFAULT_SEARCH_COUNT: u32 = 10;

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    match body {
        Ok(Json(v)) => Ok(v),
        Err(rejection) => Err(ApiError::invalid_input("invalid request body")
            .with_details(json!({ "reason": rejection.body_text() }))),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchRequestBody {
    pub query: String,
    pub count: Option<u32>,
    pub country: Option<String>,
    #[serde(alias = "searchLang")]
    pub search_lang: Option<String>,
    pub safesearch: Option<Safesearch>,
    pub freshness: Option<String>,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SearchRequestBody>, JsonRejection>,
) -> ApiResult<Response> {
    let body = parse_body(body)?;
    let query = body.query.trim().to_string();
    if query.is_empty() {
        return Err(ApiError::invalid_input("query must not be empty"));
    }
    let count = body.count.unwrap_or(DEFAULT_SEARCH_COUNT);
    if !(1..=20).contains(&count) {
        return Err(ApiError::invalid_input("count must be between 1 and 20")
            .with_details(json!({ "count": count })));
    }

    let upstream_query = SearchQuery {
        query: query.clone(),
        count,
        country: body.country,
        search_lang: body.search_lang,
        safesearch: body.safesearch.unwrap_or_default(),
        freshness: body.freshness,
    };

    let provider = Arc::clone(&state.provider);
    let scheduled_query = upstream_query.clone();
    let upstream = state
        .queue
        .schedule(move || async move { provider.search(&scheduled_query).await })
        .await;

    let results = match upstream {
        Err(QueueError::Overflow) => {
            return Err(ApiError::overloaded("search queue is saturated"));
        }
        Err(QueueError::Closed) => {
            return Err(ApiError::overloaded("search queue is not running"));
        }
        Ok(Err(err)) => {
            warn!("search upstream failed: {err:#}");
            return Err(ApiError::upstream("search upstream failed"));
        }
        Ok(Ok(results)) => results,
    };

    let request_id = Uuid::new_v4();
    let now = Utc::now();
    state
        .store
        .store_search_request(request_id, &query, now)
        .map_err(ApiError::internal)?;

    let allowlist = state
        .store
        .effective_allowlist(&state.settings.static_allowlist)
        .map_err(ApiError::internal)?;
    let blocklist = state
        .store
        .effective_blocklist(&state.settings.static_blocklist)
        .map_err(ApiError::internal)?;

    let expires_at = now + Duration::minutes(state.settings.result_ttl_minutes.max(1));
    let mut items: Vec<Value> = Vec::new();
    let mut urls_exposed = 0usize;
    let mut rank = 0u32;

    for result in results {
        let Ok(url) = url::Url::parse(&result.url) else {
            continue;
        };
        if url.scheme() != "https" {
            continue;
        }
        let Some(host) = url.host_str() else { continue };
        let Some(domain) = domain_policy::normalize_domain(host) else {
            continue;
        };
        rank += 1;

        let eval = domain_policy::evaluate(&domain, &allowlist, &blocklist);
        let blocked = eval.action == DomainAction::Block;
        let record = crate::models::SearchResultRecord {
            result_id: Uuid::new_v4(),
            request_id,
            query: query.clone(),
            rank,
            url: result.url.clone(),
            domain,
            title: result.title.clone(),
            snippet: result.snippet.clone(),
            source: result.source.clone(),
            availability: if blocked {
                crate::models::Availability::Blocked
            } else {
                crate::models::Availability::Allowed
            },
            block_reason: if blocked { eval.reason.clone() } else { None },
            created_at: now,
            expires_at,
        };
        state
            .store
            .store_search_result(&record)
            .map_err(ApiError::internal)?;

        let mut item = json!({
            "result_id": record.result_id,
            "title": record.title,
            "snippet": record.snippet,
            "source": record.source,
            "rank": record.rank,
            "availability": record.availability,
        });
        if blocked {
            item["risk_hint"] = json!("high");
        } else if !state.settings.redact_urls {
            item["url"] = json!(record.url);
            urls_exposed += 1;
        }
        items.push(item);
    }

    let body = json!({
        "request_id": request_id,
        "results": items,
        "meta": { "total_returned": items.len(), "urls_exposed": urls_exposed },
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct FetchRequestBody {
    #[serde(alias = "resultId")]
    pub result_id: Uuid,
}

pub async fn fetch(
    State(state): State<Arc<AppState>>,
    body: Result<Json<FetchRequestBody>, JsonRejection>,
) -> ApiResult<Response> {
    let body = parse_body(body)?;

    let record = state
        .store
        .get_search_result(body.result_id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("unknown or expired result"))?;

    let request = FetchRequest {
        id: record.result_id,
        url: record.url.clone(),
        domain: record.domain.clone(),
        output_mode: ExtractMode::Markdown,
        output_max_chars: None,
        trace_kind: TraceKind::SearchResultFetch,
        search: Some(SearchContext {
            request_id: record.request_id,
            query: record.query.clone(),
            rank: record.rank,
        }),
    };

    let outcome = run_pipeline(&state, request).await?;
    Ok(pipeline_response(
        "result_id",
        record.result_id,
        Some(record.url.as_str()),
        None,
        outcome,
        &state.settings,
    ))
}

#[derive(Debug, Deserialize)]
pub struct WebFetchRequestBody {
    pub url: String,
    #[serde(default, alias = "extractMode")]
    pub extract_mode: ExtractMode,
    #[serde(alias = "maxChars")]
    pub max_chars: Option<usize>,
}

pub async fn web_fetch(
    State(state): State<Arc<AppState>>,
    body: Result<Json<WebFetchRequestBody>, JsonRejection>,
) -> ApiResult<Response> {
    let body = parse_body(body)?;

    let url = url::Url::parse(body.url.trim())
        .map_err(|e| ApiError::invalid_input("invalid url").with_details(json!({ "reason": e.to_string() })))?;
    if url.scheme() != "https" {
        return Err(ApiError::invalid_input("only https urls are supported"));
    }
    let domain = url
        .host_str()
        .ok_or_else(|| ApiError::invalid_input("url has no host"))?
        .to_string();
    if let Some(max_chars) = body.max_chars {
        if max_chars == 0 || max_chars > MAX_WEB_FETCH_CHARS {
            return Err(ApiError::invalid_input(format!(
                "max_chars must be between 1 and {MAX_WEB_FETCH_CHARS}"
            )));
        }
    }

    let fetch_id = Uuid::new_v4();
    let request = FetchRequest {
        id: fetch_id,
        url: url.to_string(),
        domain,
        output_mode: body.extract_mode,
        output_max_chars: body.max_chars,
        trace_kind: TraceKind::DirectWebFetch,
        search: None,
    };

    let outcome = run_pipeline(&state, request).await?;
    Ok(pipeline_response(
        "fetch_id",
        fetch_id,
        Some(url.as_str()),
        Some(body.extract_mode),
        outcome,
        &state.settings,
    ))
}

async fn run_pipeline(state: &AppState, request: FetchRequest) -> ApiResult<PipelineOutcome> {
    pipeline::run_fetch(state, request).await.map_err(|err| match err {
        PipelineError::Fetch(cause) => {
            warn!("page fetch failed: {cause:#}");
            ApiError::upstream("page fetch failed")
                .with_details(json!({ "reason": cause.to_string() }))
        }
        PipelineError::Internal(cause) => ApiError::internal(cause),
    })
}

fn safety_json(outcome: &PipelineOutcome) -> Value {
    let d = &outcome.decision;
    let mut safety = json!({
        "decision": d.decision,
        "score": d.score,
        "flags": d.flags,
        "normalization_applied": outcome.normalization_applied,
        "obfuscation_signals": outcome.obfuscation_signals,
    });
    match d.decision {
        Decision::Allow => {
            safety["bypassed"] = json!(d.bypassed);
            if let Some(allowed_by) = d.allowed_by {
                safety["allowed_by"] = json!(allowed_by);
            }
        }
        Decision::Block => {
            safety["reason"] = json!(d.reason);
            if let Some(blocked_by) = d.blocked_by {
                safety["blocked_by"] = json!(blocked_by);
            }
        }
    }
    safety
}

fn pipeline_response(
    id_key: &str,
    id: Uuid,
    requested_url: Option<&str>,
    extract_mode: Option<ExtractMode>,
    outcome: PipelineOutcome,
    settings: &Settings,
) -> Response {
    let expose = settings.expose_safe_content_urls;
    let mut source = serde_json::to_value(&outcome.source).expect("source meta serializes");
    if !expose {
        if let Some(obj) = source.as_object_mut() {
            obj.remove("final_url");
        }
    }

    let mut body = json!({
        id_key: id,
        "safety": safety_json(&outcome),
        "source": source,
    });
    if let Some(mode) = extract_mode {
        body["extract_mode"] = json!(mode);
    }

    match outcome.decision.decision {
        Decision::Allow => {
            let content = outcome.content.unwrap_or(crate::sanitize::Extracted {
                content: String::new(),
                truncated: false,
            });
            body["content"] = json!(content.content);
            body["content_summary"] = json!(outcome.content_summary.unwrap_or_default());
            body["truncated"] = json!(content.truncated);
            if expose {
                if let Some(u) = requested_url {
                    body["url"] = json!(u);
                }
                if let Some(final_url) = &outcome.source.final_url {
                    body["final_url"] = json!(final_url);
                }
            }
            (StatusCode::OK, Json(body)).into_response()
        }
        Decision::Block => (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RuntimeDomainBody {
    pub domain: String,
    pub note: Option<String>,
}

fn require_write_api(settings: &Settings) -> ApiResult<()> {
    if settings.dashboard_write_api {
        Ok(())
    } else {
        Err(ApiError::not_found("route not found"))
    }
}

pub async fn add_allowlist_domain(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RuntimeDomainBody>, JsonRejection>,
) -> ApiResult<Response> {
    require_write_api(&state.settings)?;
    let body = parse_body(body)?;
    let entry = state
        .store
        .add_runtime_allowlist_domain(&body.domain, body.note.as_deref())
        .map_err(|e| ApiError::invalid_input(e.to_string()))?;
    Ok((StatusCode::OK, Json(json!({ "added": entry }))).into_response())
}

pub async fn add_blocklist_domain(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RuntimeDomainBody>, JsonRejection>,
) -> ApiResult<Response> {
    require_write_api(&state.settings)?;
    let body = parse_body(body)?;
    let entry = state
        .store
        .add_runtime_blocklist_domain(&body.domain, body.note.as_deref())
        .map_err(|e| ApiError::invalid_input(e.to_string()))?;
    Ok((StatusCode::OK, Json(json!({ "added": entry }))).into_response())
}

pub async fn list_allowlist_domains(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let entries = state
        .store
        .list_runtime_allowlist_domains()
        .map_err(ApiError::internal)?;
    Ok((StatusCode::OK, Json(json!({ "domains": entries }))).into_response())
}

pub async fn list_blocklist_domains(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let entries = state
        .store
        .list_runtime_blocklist_domains()
        .map_err(ApiError::internal)?;
    Ok((StatusCode::OK, Json(json!({ "domains": entries }))).into_response())
}

pub async fn healthz() -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
        .into_response()
}

pub async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    let store_healthy = state.store.is_healthy();
    let search_configured = std::env::var(&state.settings.search_api_key_env)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);

    let ready = store_healthy && search_configured;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": ready,
            "dependencies": {
                "store": store_healthy,
                "search_configured": search_configured,
            },
        })),
    )
        .into_response()
}
