use crate::renderer::RendererClient;
use crate::ssrf;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, LOCATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const ACCEPT_HEADER: &str = "text/html,text/plain,application/xhtml+xml";
static CONTENT_TYPE_ALLOWLIST: &[&str] = &["text/html", "text/plain", "application/xhtml+xml"];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchBackend {
    Http,
    Browserless,
}

/// The sanitizer's input: one retrieved page with provenance.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: Url,
    pub content_type: String,
    pub body: String,
    pub backend_used: FetchBackend,
    pub rendered: bool,
    pub fallback_used: bool,
}

/// Per-fetch resource limits, taken from the active profile.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub max_fetch_bytes: usize,
    pub fetch_timeout: Duration,
    pub max_redirects: u32,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage>;
}

/// Build the outbound client for page retrieval. Redirects are handled
/// manually so every hop gets its own SSRF check.
pub fn build_fetch_client() -> Result<Client> {
    Ok(Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(5))
        .build()?)
}

/// SSRF-hardened page fetcher: https only, manual redirect walk, streamed
/// body with a byte ceiling, optional headless-render backend with
/// transparent HTTP fallback.
pub struct HttpFetcher {
    client: Client,
    limits: FetchLimits,
    user_agent: String,
    renderer: Option<RendererClient>,
    fallback_to_http: bool,
}

impl HttpFetcher {
    pub fn new(
        client: Client,
        limits: FetchLimits,
        user_agent: String,
        renderer: Option<RendererClient>,
        fallback_to_http: bool,
    ) -> Self {
        Self {
            client,
            limits,
            user_agent,
            renderer,
            fallback_to_http,
        }
    }

    fn parse_https(url: &str) -> Result<Url> {
        let parsed = Url::parse(url).with_context(|| format!("invalid url: {url}"))?;
        ensure_https(&parsed)?;
        Ok(parsed)
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(url.clone())
            .header(ACCEPT, ACCEPT_HEADER)
            .header(USER_AGENT, &self.user_agent)
            .timeout(self.limits.fetch_timeout)
            .send()
            .await
            .with_context(|| format!("request failed: {url}"))?)
    }

    /// Follow redirects manually, re-validating scheme and host at each hop.
    /// Returns the terminal response and the URL that produced it.
    async fn redirect_walk(&self, start: Url) -> Result<(reqwest::Response, Url)> {
        let mut url = start;
        for _ in 0..=self.limits.max_redirects {
            ensure_https(&url)?;
            ssrf::ensure_public_url(&url).await?;

            let resp = self.get(&url).await?;
            if !resp.status().is_redirection() {
                return Ok((resp, url));
            }

            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| anyhow!("redirect without location header from {url}"))?;
            let next = url
                .join(location)
                .with_context(|| format!("invalid redirect target: {location}"))?;
            debug!(from = %url, to = %next, "following redirect");
            url = next;
        }
        bail!("too many redirects (max {})", self.limits.max_redirects)
    }

    async fn fetch_http(&self, start: Url, fallback_used: bool) -> Result<FetchedPage> {
        let (resp, final_url) = self.redirect_walk(start).await?;

        let status = resp.status();
        if !status.is_success() {
            bail!("upstream returned status {status} for {final_url}");
        }

        let content_type = allowed_content_type(&resp)?;
        let body = self.read_capped(resp).await?;

        Ok(FetchedPage {
            final_url,
            content_type,
            body,
            backend_used: FetchBackend::Http,
            rendered: false,
            fallback_used,
        })
    }

    async fn read_capped(&self, mut resp: reqwest::Response) -> Result<String> {
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await.context("body read failed")? {
            if buf.len() + chunk.len() > self.limits.max_fetch_bytes {
                bail!(
                    "response body exceeds {} bytes",
                    self.limits.max_fetch_bytes
                );
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Resolve the terminal URL of a redirect chain without keeping bodies,
    /// so the renderer is pointed at the real page.
    async fn resolve_final_url(&self, start: Url) -> Result<Url> {
        let (resp, final_url) = self.redirect_walk(start).await?;
        let status = resp.status();
        drop(resp);
        if !status.is_success() && status != StatusCode::METHOD_NOT_ALLOWED {
            bail!("upstream returned status {status} for {final_url}");
        }
        Ok(final_url)
    }

    async fn fetch_rendered(&self, start: Url, renderer: &RendererClient) -> Result<FetchedPage> {
        let resolved = self.resolve_final_url(start).await?;
        let page = renderer.render(&resolved).await?;

        let final_url = match page.final_url.as_deref() {
            Some(raw) => Url::parse(raw).with_context(|| format!("renderer final url invalid: {raw}"))?,
            None => resolved,
        };
        ensure_https(&final_url)?;
        ssrf::ensure_public_url(&final_url).await?;

        Ok(FetchedPage {
            final_url,
            content_type: "text/html".to_string(),
            body: page.html,
            backend_used: FetchBackend::Browserless,
            rendered: true,
            fallback_used: false,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage> {
        let start = Self::parse_https(url)?;

        let Some(renderer) = &self.renderer else {
            return self.fetch_http(start, false).await;
        };

        match self.fetch_rendered(start.clone(), renderer).await {
            Ok(page) => Ok(page),
            Err(err) if self.fallback_to_http => {
                warn!(url, error = %format!("{err:#}"), "renderer failed, falling back to http");
                self.fetch_http(start, true).await
            }
            Err(err) => Err(err),
        }
    }
}

fn ensure_https(url: &Url) -> Result<()> {
    if url.scheme() != "https" {
        bail!("only https urls are fetched (got {})", url.scheme());
    }
    Ok(())
}

fn allowed_content_type(resp: &reqwest::Response) -> Result<String> {
    let raw = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let essence = raw.split(';').next().unwrap_or("").trim().to_lowercase();
    if !CONTENT_TYPE_ALLOWLIST.contains(&essence.as_str()) {
        bail!("content type not allowed: {raw}");
    }
    Ok(essence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(
            build_fetch_client().unwrap(),
            FetchLimits {
                max_fetch_bytes: 1024,
                fetch_timeout: Duration::from_millis(500),
                max_redirects: 2,
            },
            "claw-rubber-test".to_string(),
            None,
            false,
        )
    }

    #[tokio::test]
    async fn rejects_non_https_schemes() {
        let f = fetcher();
        for u in ["http://example.com/", "ftp://example.com/", "file:///etc/passwd"] {
            let err = f.fetch_page(u).await.unwrap_err();
            assert!(err.to_string().contains("https"), "{u}: {err}");
        }
    }

    #[tokio::test]
    async fn rejects_blocked_ip_literals_before_connecting() {
        let f = fetcher();
        for u in [
            "https://127.0.0.1/",
            "https://10.0.0.8/path",
            "https://[::1]/x",
            "https://192.168.1.1/admin",
            "https://[::ffff:169.254.169.254]/",
        ] {
            let err = f.fetch_page(u).await.unwrap_err();
            assert!(
                format!("{err:#}").contains("non-public host"),
                "{u}: {err:#}"
            );
        }
    }

    #[test]
    fn content_type_allowlist_strips_parameters() {
        // Exercised indirectly: the essence comparison is what matters.
        for (raw, ok) in [
            ("text/html; charset=utf-8", true),
            ("TEXT/HTML", true),
            ("application/xhtml+xml", true),
            ("text/plain;charset=us-ascii", true),
            ("application/json", false),
            ("image/png", false),
            ("", false),
        ] {
            let essence = raw.split(';').next().unwrap_or("").trim().to_lowercase();
            assert_eq!(CONTENT_TYPE_ALLOWLIST.contains(&essence.as_str()), ok, "{raw}");
        }
    }
}
