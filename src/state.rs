use sqlx::PgPool;

use crate::config::Config;
use crate::pubsub::UpstreamBus;

/// Shared application state passed to every handler and extractor.
///
/// `UpstreamBus` is cheaply cloneable (it wraps an `Arc` internally), so
/// cloning `AppState` for each request/connection is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: std::sync::Arc<Config>,
    pub bus: UpstreamBus,
}
