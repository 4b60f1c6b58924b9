#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use claw_rubber::fetcher::{FetchBackend, FetchedPage, PageFetcher};
use claw_rubber::queue::SearchQueue;
use claw_rubber::search::{SearchProvider, SearchQuery, UpstreamResult};
use claw_rubber::server_config::{effective_settings, CliOverrides, Settings};
use claw_rubber::state::AppState;
use claw_rubber::store::Store;
use claw_rubber::{app, domain_policy};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use url::Url;

pub struct StubFetcher {
    pub body: String,
    pub final_url: String,
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch_page(&self, _url: &str) -> anyhow::Result<FetchedPage> {
        Ok(FetchedPage {
            final_url: Url::parse(&self.final_url).unwrap(),
            content_type: "text/html".to_string(),
            body: self.body.clone(),
            backend_used: FetchBackend::Http,
            rendered: false,
            fallback_used: false,
        })
    }
}

pub struct FailingFetcher;

#[async_trait]
impl PageFetcher for FailingFetcher {
    async fn fetch_page(&self, _url: &str) -> anyhow::Result<FetchedPage> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

pub struct StubProvider {
    pub results: Vec<UpstreamResult>,
}

#[async_trait]
impl SearchProvider for StubProvider {
    async fn search(&self, _query: &SearchQuery) -> anyhow::Result<Vec<UpstreamResult>> {
        Ok(self.results.clone())
    }
}

pub struct FailingProvider;

#[async_trait]
impl SearchProvider for FailingProvider {
    async fn search(&self, _query: &SearchQuery) -> anyhow::Result<Vec<UpstreamResult>> {
        Err(anyhow::anyhow!("upstream unavailable"))
    }
}

pub fn upstream_result(url: &str, title: &str) -> UpstreamResult {
    UpstreamResult {
        url: url.to_string(),
        title: title.to_string(),
        snippet: format!("snippet for {title}"),
        source: "brave".to_string(),
        published: None,
    }
}

pub fn test_settings() -> Settings {
    effective_settings(&CliOverrides::default(), None)
}

pub fn settings_with_lists(blocklist: &str, allowlist: &str) -> Settings {
    let mut s = test_settings();
    s.static_blocklist = domain_policy::parse_csv_list(blocklist);
    s.static_allowlist = domain_policy::parse_csv_list(allowlist);
    s
}

pub fn build_state(
    settings: Settings,
    fetcher: Arc<dyn PageFetcher>,
    provider: Arc<dyn SearchProvider>,
) -> Arc<AppState> {
    Arc::new(AppState {
        queue: SearchQueue::new(settings.rps, settings.queue_max),
        store: Arc::new(Store::open_in_memory().unwrap()),
        provider,
        fetcher,
        judge: None,
        settings,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    app::build_router(state)
}

pub async fn send_json(
    router: Router,
    method: &str,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(path);
    let request = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = router.oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = http_body_util::BodyExt::collect(resp.into_body())
        .await
        .unwrap()
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}
