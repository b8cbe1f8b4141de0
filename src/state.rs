use crate::config::Config;
use crate::services::IdentityFlow;

/// Shared application state available to all request handlers via Axum's `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Config,
    pub flow: IdentityFlow,
}
