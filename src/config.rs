use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

/// On-disk configuration. Every section and key is optional; defaults are
/// applied when the effective settings are computed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub server: Option<ServerSection>,
    pub policy: Option<PolicySection>,
    pub lists: Option<ListsSection>,
    pub search: Option<SearchSection>,
    pub renderer: Option<RendererSection>,
    pub judge: Option<JudgeSection>,
    pub storage: Option<StorageSection>,
    pub fetch: Option<FetchSection>,
    pub dashboard: Option<DashboardSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicySection {
    pub profile: Option<Profile>,
    pub fail_closed: Option<bool>,
    pub redact_urls: Option<bool>,
    pub expose_safe_content_urls: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListsSection {
    /// Comma-separated domains.
    pub allowlist: Option<String>,
    pub blocklist: Option<String>,
    pub language_name_allowlist_extra: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    /// Rate tier name (`free`, `paid`, `base`, `pro`) or a positive integer
    /// requests-per-second override.
    pub tier: Option<RateTier>,
    pub queue_max: Option<usize>,
    pub retry_on_429: Option<bool>,
    pub retry_max: Option<u32>,
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RendererSection {
    /// `none` or `browserless`.
    pub backend: Option<String>,
    pub url: Option<String>,
    pub token_env: Option<String>,
    pub timeout_ms: Option<u64>,
    pub wait_until: Option<crate::renderer::WaitUntil>,
    pub wait_for_selector: Option<String>,
    pub max_html_bytes: Option<usize>,
    pub fallback_to_http: Option<bool>,
    pub block_ads: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JudgeSection {
    pub enabled: Option<bool>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub db_path: Option<String>,
    pub result_ttl_minutes: Option<i64>,
    pub retention_days: Option<i64>,
    pub sweep_interval_minutes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchSection {
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardSection {
    pub write_api: Option<bool>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let cfg: Self = toml::from_str(&raw)?;
        Ok(cfg)
    }
}

/// Fetch/scoring posture. Thresholds and resource caps move together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Baseline,
    Strict,
    Paranoid,
}

impl Profile {
    pub fn settings(self) -> ProfileSettings {
        match self {
            Profile::Baseline => ProfileSettings {
                medium_threshold: 8,
                block_threshold: 14,
                max_fetch_bytes: 1_500_000,
                max_extracted_chars: 22_000,
                fetch_timeout_ms: 8000,
                max_redirects: 4,
            },
            Profile::Strict => ProfileSettings {
                medium_threshold: 6,
                block_threshold: 10,
                max_fetch_bytes: 1_000_000,
                max_extracted_chars: 16_000,
                fetch_timeout_ms: 7000,
                max_redirects: 3,
            },
            Profile::Paranoid => ProfileSettings {
                medium_threshold: 4,
                block_threshold: 7,
                max_fetch_bytes: 750_000,
                max_extracted_chars: 10_000,
                fetch_timeout_ms: 6000,
                max_redirects: 2,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Baseline => "baseline",
            Profile::Strict => "strict",
            Profile::Paranoid => "paranoid",
        }
    }
}

impl std::str::FromStr for Profile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "baseline" => Ok(Profile::Baseline),
            "strict" => Ok(Profile::Strict),
            "paranoid" => Ok(Profile::Paranoid),
            other => Err(anyhow::anyhow!("unknown profile: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSettings {
    pub medium_threshold: u32,
    pub block_threshold: u32,
    pub max_fetch_bytes: usize,
    pub max_extracted_chars: usize,
    pub fetch_timeout_ms: u64,
    pub max_redirects: u32,
}

/// Upstream search rate tier: a named plan or an explicit rps override.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RateTier {
    Rps(u32),
    Named(String),
}

impl Default for RateTier {
    fn default() -> Self {
        RateTier::Named("free".to_string())
    }
}

impl RateTier {
    pub fn rps(&self) -> u32 {
        match self {
            RateTier::Rps(n) if *n > 0 => *n,
            RateTier::Rps(_) => 1,
            RateTier::Named(name) => match name.trim().to_lowercase().as_str() {
                "paid" | "base" => 20,
                "pro" => 50,
                _ => 1,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_table_matches_posture() {
        let s = Profile::Strict.settings();
        assert_eq!((s.medium_threshold, s.block_threshold), (6, 10));
        assert_eq!(s.max_redirects, 3);

        let p = Profile::Paranoid.settings();
        assert!(p.block_threshold < s.block_threshold);
        assert!(p.max_fetch_bytes < s.max_fetch_bytes);

        let b = Profile::Baseline.settings();
        assert_eq!((b.medium_threshold, b.block_threshold), (8, 14));
        assert_eq!(b.fetch_timeout_ms, 8000);
    }

    #[test]
    fn rate_tier_table() {
        assert_eq!(RateTier::Named("free".into()).rps(), 1);
        assert_eq!(RateTier::Named("paid".into()).rps(), 20);
        assert_eq!(RateTier::Named("base".into()).rps(), 20);
        assert_eq!(RateTier::Named("pro".into()).rps(), 50);
        assert_eq!(RateTier::Rps(7).rps(), 7);
        assert_eq!(RateTier::Rps(0).rps(), 1);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [policy]
            profile = "paranoid"
            fail_closed = false

            [search]
            tier = 25
            queue_max = 4

            [lists]
            blocklist = "evil.example, also-evil.example"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.policy.as_ref().unwrap().profile, Some(Profile::Paranoid));
        assert_eq!(cfg.search.as_ref().unwrap().tier, Some(RateTier::Rps(25)));
        assert!(cfg.server.is_none());
    }

    #[test]
    fn named_tier_parses_from_toml() {
        let cfg: Config = toml::from_str("[search]\ntier = \"pro\"\n").unwrap();
        assert_eq!(cfg.search.unwrap().tier.unwrap().rps(), 50);
    }
}
