//! Shared application state injected into the status handlers.

use crate::link::ConnectionManager;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The process-wide connection manager.
    pub manager: ConnectionManager,
}
