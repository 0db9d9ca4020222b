//! Status surface: read-only HTTP endpoints over the connection manager.

pub mod handlers;

use axum::Router;

use crate::app_state::AppState;

/// Builds the status router.
pub fn build_router() -> Router<AppState> {
    Router::new().merge(handlers::system::routes())
}
