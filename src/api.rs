//! HTTP API for Disappearo

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::db::Database;
use crate::moderation::Moderator;
use crate::runtime::RuntimeManager;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeManager>,
    pub moderator: Arc<Moderator>,
    /// Lifetime given to newly accepted sessions
    pub session_ttl: Duration,
}

impl AppState {
    pub fn new(
        db: Database,
        moderator: Arc<Moderator>,
        app_name: impl Into<String>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            runtime: Arc::new(RuntimeManager::new(db, app_name)),
            moderator,
            session_ttl,
        }
    }
}
