use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Validated input for one upstream search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_lang: Option<String>,
    pub safesearch: Safesearch,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Safesearch {
    Off,
    #[default]
    Moderate,
    Strict,
}

impl Safesearch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Safesearch::Off => "off",
            Safesearch::Moderate => "moderate",
            Safesearch::Strict => "strict",
        }
    }
}

/// Provider-agnostic search result, before policy vetting.
#[derive(Debug, Clone)]
pub struct UpstreamResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub source: String,
    pub published: Option<String>,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<UpstreamResult>>;
}

/// 429 retry discipline shared by search adapters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retry_on_429: bool,
    pub retry_max: u32,
}

const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const RETRY_JITTER_MS: u64 = 250;
/// Reset values at or below this are delta-seconds; larger ones are epochs.
const EPOCH_CUTOVER: u64 = 1_000_000_000;

/// Delay before retrying a 429, from `Retry-After` (seconds), falling back
/// to `X-RateLimit-Reset` (delta- or epoch-seconds), else one second.
/// Jitter is added by the caller.
pub fn retry_delay_ms(headers: &HeaderMap, now_epoch_secs: u64) -> u64 {
    if let Some(secs) = header_u64(headers, RETRY_AFTER.as_str()) {
        return secs * 1000;
    }
    if let Some(reset) = header_u64(headers, "x-ratelimit-reset") {
        if reset <= EPOCH_CUTOVER {
            return reset * 1000;
        }
        return reset.saturating_sub(now_epoch_secs) * 1000;
    }
    DEFAULT_RETRY_DELAY_MS
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn jitter_ms() -> u64 {
    rand::thread_rng().gen_range(0..RETRY_JITTER_MS)
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Brave-style web search adapter.
pub struct BraveSearchClient {
    http: Client,
    endpoint: String,
    api_key: String,
    retry: RetryPolicy,
}

impl BraveSearchClient {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.search.brave.com/res/v1/web/search";

    pub fn new(http: Client, endpoint: String, api_key: String, retry: RetryPolicy) -> Self {
        Self {
            http,
            endpoint,
            api_key,
            retry,
        }
    }

    fn map_results(body: &Value) -> Vec<UpstreamResult> {
        let Some(results) = body.pointer("/web/results").and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        results
            .iter()
            .filter_map(|r| {
                let url = r.get("url")?.as_str()?.to_string();
                Some(UpstreamResult {
                    source: r
                        .pointer("/profile/name")
                        .or_else(|| r.pointer("/meta_url/hostname"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("brave")
                        .to_string(),
                    title: r.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    snippet: r
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    published: r.get("age").and_then(|v| v.as_str()).map(String::from),
                    url,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for BraveSearchClient {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<UpstreamResult>> {
        let mut attempt = 0u32;
        let count = query.count.to_string();
        loop {
            let mut req = self
                .http
                .get(&self.endpoint)
                .header("Accept", "application/json")
                .header("X-Subscription-Token", &self.api_key)
                .query(&[
                    ("q", query.query.as_str()),
                    ("count", count.as_str()),
                    ("safesearch", query.safesearch.as_str()),
                ]);
            if let Some(country) = &query.country {
                req = req.query(&[("country", country.as_str())]);
            }
            if let Some(lang) = &query.search_lang {
                req = req.query(&[("search_lang", lang.as_str())]);
            }
            if let Some(freshness) = &query.freshness {
                req = req.query(&[("freshness", freshness.as_str())]);
            }

            let resp = req.send().await.context("search upstream request failed")?;
            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS
                && self.retry.retry_on_429
                && attempt < self.retry.retry_max
            {
                let delay = retry_delay_ms(resp.headers(), now_epoch_secs()) + jitter_ms();
                warn!(attempt, delay_ms = delay, "search upstream rate limited, retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
                continue;
            }
            if !status.is_success() {
                bail!("search upstream returned status {status}");
            }

            let body: Value = resp.json().await.context("search upstream response not json")?;
            let results = Self::map_results(&body);
            debug!(count = results.len(), "search upstream returned results");
            return Ok(results);
        }
    }
}
