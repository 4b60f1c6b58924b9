use crate::fetcher::PageFetcher;
use crate::judge::JudgeClient;
use crate::queue::SearchQueue;
use crate::search::SearchProvider;
use crate::server_config::Settings;
use crate::store::Store;
use std::sync::Arc;

/// Everything a request handler needs, passed as one `Arc` value. No
/// process-wide singletons beyond the tracing sinks.
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<Store>,
    pub queue: SearchQueue,
    pub provider: Arc<dyn SearchProvider>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub judge: Option<Arc<dyn JudgeClient>>,
}
