use crate::config::{Config, Profile, ProfileSettings};
use crate::renderer::{RendererSettings, WaitUntil};
use crate::search::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8484;
pub const DEFAULT_DB_PATH: &str = "claw-rubber.db";
pub const DEFAULT_USER_AGENT: &str = "claw-rubber/0.1 (+safety-proxy)";
pub const DEFAULT_QUEUE_MAX: usize = 10;
pub const DEFAULT_RETRY_MAX: u32 = 1;
pub const DEFAULT_RESULT_TTL_MINUTES: i64 = 30;
pub const DEFAULT_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_SWEEP_INTERVAL_MINUTES: u64 = 30;
pub const DEFAULT_RENDERER_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_RENDERER_MAX_HTML_BYTES: usize = 3_000_000;
pub const DEFAULT_SEARCH_API_KEY_ENV: &str = "CLAW_RUBBER_SEARCH_API_KEY";
pub const DEFAULT_RENDERER_TOKEN_ENV: &str = "CLAW_RUBBER_RENDERER_TOKEN";
pub const DEFAULT_JUDGE_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const DEFAULT_JUDGE_MODEL: &str = "claude-3-5-haiku-latest";

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub profile: Option<Profile>,
    pub db: Option<PathBuf>,
}

/// The immutable runtime settings snapshot, CLI over config over defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub profile: Profile,
    pub fail_closed: bool,
    pub redact_urls: bool,
    pub expose_safe_content_urls: bool,
    pub static_allowlist: Vec<String>,
    pub static_blocklist: Vec<String>,
    pub language_extras: Vec<String>,
    pub rps: u32,
    pub queue_max: usize,
    pub retry: RetryPolicy,
    pub search_endpoint: String,
    pub search_api_key_env: String,
    pub renderer: Option<RendererSettings>,
    pub renderer_fallback_to_http: bool,
    pub judge_enabled: bool,
    pub judge_model: String,
    pub judge_api_key_env: String,
    pub db_path: PathBuf,
    pub result_ttl_minutes: i64,
    pub retention_days: i64,
    pub sweep_interval: Duration,
    pub user_agent: String,
    pub dashboard_write_api: bool,
}

impl Settings {
    pub fn profile_settings(&self) -> ProfileSettings {
        self.profile.settings()
    }
}

fn split_csv(csv: Option<&String>) -> Vec<String> {
    csv.map(|s| {
        s.split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

pub fn effective_settings(cli: &CliOverrides, cfg: Option<&Config>) -> Settings {
    let server = cfg.and_then(|c| c.server.as_ref());
    let policy = cfg.and_then(|c| c.policy.as_ref());
    let lists = cfg.and_then(|c| c.lists.as_ref());
    let search = cfg.and_then(|c| c.search.as_ref());
    let renderer = cfg.and_then(|c| c.renderer.as_ref());
    let judge = cfg.and_then(|c| c.judge.as_ref());
    let storage = cfg.and_then(|c| c.storage.as_ref());
    let fetch = cfg.and_then(|c| c.fetch.as_ref());
    let dashboard = cfg.and_then(|c| c.dashboard.as_ref());

    let tier = search
        .and_then(|s| s.tier.clone())
        .unwrap_or_default();

    let renderer_backend = renderer
        .and_then(|r| r.backend.as_deref())
        .unwrap_or("none")
        .trim()
        .to_lowercase();
    let renderer_settings = if renderer_backend == "none" || renderer_backend.is_empty() {
        None
    } else {
        renderer.and_then(|r| r.url.as_ref()).map(|url| RendererSettings {
            endpoint: url.clone(),
            token: renderer
                .and_then(|r| r.token_env.as_deref())
                .or(Some(DEFAULT_RENDERER_TOKEN_ENV))
                .and_then(|env| std::env::var(env).ok()),
            timeout_ms: renderer
                .and_then(|r| r.timeout_ms)
                .unwrap_or(DEFAULT_RENDERER_TIMEOUT_MS),
            wait_until: renderer.and_then(|r| r.wait_until).or(Some(WaitUntil::Load)),
            wait_for_selector: renderer.and_then(|r| r.wait_for_selector.clone()),
            block_ads: renderer.and_then(|r| r.block_ads).unwrap_or(false),
            max_html_bytes: renderer
                .and_then(|r| r.max_html_bytes)
                .unwrap_or(DEFAULT_RENDERER_MAX_HTML_BYTES),
        })
    };

    Settings {
        host: cli
            .host
            .clone()
            .or_else(|| server.and_then(|s| s.host.clone()))
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: cli
            .port
            .or_else(|| server.and_then(|s| s.port))
            .unwrap_or(DEFAULT_PORT),
        profile: cli
            .profile
            .or_else(|| policy.and_then(|p| p.profile))
            .unwrap_or(Profile::Strict),
        fail_closed: policy.and_then(|p| p.fail_closed).unwrap_or(true),
        redact_urls: policy.and_then(|p| p.redact_urls).unwrap_or(true),
        expose_safe_content_urls: policy
            .and_then(|p| p.expose_safe_content_urls)
            .unwrap_or(true),
        static_allowlist: split_csv(lists.and_then(|l| l.allowlist.as_ref())),
        static_blocklist: split_csv(lists.and_then(|l| l.blocklist.as_ref())),
        language_extras: split_csv(lists.and_then(|l| l.language_name_allowlist_extra.as_ref())),
        rps: tier.rps(),
        queue_max: search.and_then(|s| s.queue_max).unwrap_or(DEFAULT_QUEUE_MAX),
        retry: RetryPolicy {
            retry_on_429: search.and_then(|s| s.retry_on_429).unwrap_or(true),
            retry_max: search.and_then(|s| s.retry_max).unwrap_or(DEFAULT_RETRY_MAX),
        },
        search_endpoint: search
            .and_then(|s| s.endpoint.clone())
            .unwrap_or_else(|| crate::search::BraveSearchClient::DEFAULT_ENDPOINT.to_string()),
        search_api_key_env: search
            .and_then(|s| s.api_key_env.clone())
            .unwrap_or_else(|| DEFAULT_SEARCH_API_KEY_ENV.to_string()),
        renderer: renderer_settings,
        renderer_fallback_to_http: renderer.and_then(|r| r.fallback_to_http).unwrap_or(true),
        judge_enabled: judge.and_then(|j| j.enabled).unwrap_or(false),
        judge_model: judge
            .and_then(|j| j.model.clone())
            .unwrap_or_else(|| DEFAULT_JUDGE_MODEL.to_string()),
        judge_api_key_env: judge
            .and_then(|j| j.api_key_env.clone())
            .unwrap_or_else(|| DEFAULT_JUDGE_API_KEY_ENV.to_string()),
        db_path: cli
            .db
            .clone()
            .or_else(|| storage.and_then(|s| s.db_path.as_ref()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
        result_ttl_minutes: storage
            .and_then(|s| s.result_ttl_minutes)
            .unwrap_or(DEFAULT_RESULT_TTL_MINUTES),
        retention_days: storage
            .and_then(|s| s.retention_days)
            .unwrap_or(DEFAULT_RETENTION_DAYS),
        sweep_interval: Duration::from_secs(
            storage
                .and_then(|s| s.sweep_interval_minutes)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_MINUTES)
                * 60,
        ),
        user_agent: fetch
            .and_then(|f| f.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        dashboard_write_api: dashboard.and_then(|d| d.write_api).unwrap_or(false),
    }
}
