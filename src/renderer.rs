use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Renderer backend settings, resolved from config at startup.
#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub endpoint: String,
    pub token: Option<String>,
    pub timeout_ms: u64,
    pub wait_until: Option<WaitUntil>,
    pub wait_for_selector: Option<String>,
    pub block_ads: bool,
    pub max_html_bytes: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Domcontentloaded,
    Load,
    Networkidle,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_until: Option<WaitUntil>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_selector: Option<&'a str>,
    block_ads: bool,
    timeout_ms: u64,
}

/// What the headless renderer hands back for a page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPage {
    #[serde(default)]
    pub final_url: Option<String>,
    pub html: String,
}

/// Client for the headless render service.
pub struct RendererClient {
    http: Client,
    settings: RendererSettings,
}

impl RendererClient {
    pub fn new(http: Client, settings: RendererSettings) -> Self {
        Self { http, settings }
    }

    pub fn max_html_bytes(&self) -> usize {
        self.settings.max_html_bytes
    }

    /// Submit a resolved URL for rendering. The caller is responsible for
    /// re-validating the returned final URL.
    pub async fn render(&self, url: &Url) -> Result<RenderedPage> {
        let body = RenderRequest {
            url: url.as_str(),
            wait_until: self.settings.wait_until,
            wait_for_selector: self.settings.wait_for_selector.as_deref(),
            block_ads: self.settings.block_ads,
            timeout_ms: self.settings.timeout_ms,
        };

        let mut req = self
            .http
            .post(&self.settings.endpoint)
            .timeout(Duration::from_millis(self.settings.timeout_ms))
            .json(&body);
        if let Some(token) = &self.settings.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .context("renderer request failed")?
            .error_for_status()
            .context("renderer non-2xx")?;

        let page: RenderedPage = resp.json().await.context("renderer response not json")?;
        if page.html.len() > self.settings.max_html_bytes {
            bail!(
                "renderer html exceeds {} bytes",
                self.settings.max_html_bytes
            );
        }
        Ok(page)
    }
}
