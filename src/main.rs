use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use claw_rubber::{
    app, config, fetcher, judge, queue, renderer, search, server_config, state, store, sweep,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Bind host (default: 127.0.0.1)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (default: 8484)
    #[arg(long)]
    port: Option<u16>,

    /// Config TOML file (default: /etc/claw-rubber/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Safety profile: baseline, strict, paranoid
    #[arg(long, value_parser = parse_profile)]
    profile: Option<config::Profile>,
}

fn parse_profile(s: &str) -> Result<config::Profile, String> {
    s.parse::<config::Profile>().map_err(|e| e.to_string())
}

fn build_app_state(settings: server_config::Settings) -> anyhow::Result<Arc<state::AppState>> {
    let store = Arc::new(store::Store::open(&settings.db_path)?);

    let shared_http = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(5))
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let search_api_key = std::env::var(&settings.search_api_key_env).unwrap_or_default();
    if search_api_key.trim().is_empty() {
        warn!(
            env = %settings.search_api_key_env,
            "search api key not set; /v1/search will fail upstream"
        );
    }
    let provider: Arc<dyn search::SearchProvider> = Arc::new(search::BraveSearchClient::new(
        shared_http.clone(),
        settings.search_endpoint.clone(),
        search_api_key,
        settings.retry,
    ));

    let profile = settings.profile_settings();
    let renderer_client = settings
        .renderer
        .clone()
        .map(|r| renderer::RendererClient::new(shared_http.clone(), r));
    if renderer_client.is_some() {
        info!("renderer backend enabled");
    }
    let fetcher: Arc<dyn fetcher::PageFetcher> = Arc::new(fetcher::HttpFetcher::new(
        fetcher::build_fetch_client()?,
        fetcher::FetchLimits {
            max_fetch_bytes: profile.max_fetch_bytes,
            fetch_timeout: std::time::Duration::from_millis(profile.fetch_timeout_ms),
            max_redirects: profile.max_redirects,
        },
        settings.user_agent.clone(),
        renderer_client,
        settings.renderer_fallback_to_http,
    ));

    let judge: Option<Arc<dyn judge::JudgeClient>> = if settings.judge_enabled {
        match std::env::var(&settings.judge_api_key_env) {
            Ok(key) if !key.trim().is_empty() => Some(Arc::new(judge::AnthropicJudge::new(
                shared_http,
                settings.judge_model.clone(),
                key,
            ))),
            _ => {
                warn!(
                    env = %settings.judge_api_key_env,
                    "judge enabled but api key not set; running without adjudication"
                );
                None
            }
        }
    } else {
        None
    };

    Ok(Arc::new(state::AppState {
        queue: queue::SearchQueue::new(settings.rps, settings.queue_max),
        store,
        provider,
        fetcher,
        judge,
        settings,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .unwrap_or_else(|| PathBuf::from("/etc/claw-rubber/config.toml"));
    let config = match config::Config::load(&config_path) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            if let Some(ioe) = e.downcast_ref::<std::io::Error>() {
                if ioe.kind() == std::io::ErrorKind::NotFound {
                    info!("config file not found at {}; continuing", config_path.display());
                    None
                } else {
                    return Err(e);
                }
            } else {
                return Err(e);
            }
        }
    };

    let cli = server_config::CliOverrides {
        host: args.host,
        port: args.port,
        profile: args.profile,
        db: args.db,
    };
    let settings = server_config::effective_settings(&cli, config.as_ref());
    info!(
        profile = settings.profile.as_str(),
        fail_closed = settings.fail_closed,
        rps = settings.rps,
        "effective settings resolved"
    );

    let state = build_app_state(settings)?;

    let _sweeper = sweep::spawn_retention_sweep(
        Arc::clone(&state.store),
        state.settings.retention_days,
        state.settings.sweep_interval,
    );

    let addr: SocketAddr = format!("{}:{}", state.settings.host, state.settings.port).parse()?;
    let router = app::build_router(state);

    info!("listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
