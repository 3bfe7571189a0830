//! API router.
//!
//! Returns a composable `Router` with every endpoint under `/api/`.
//! Path params use `:param` syntax (matchit 0.7 / axum 0.7).

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Build the API router over shared state.
pub fn api_router(core: Arc<CoreState>) -> Router {
    let ctx = ApiContext::new(core);

    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/ai/health-check", post(endpoints::ai::health_check))
        .route("/ai/topics", post(endpoints::ai::topics))
        .route("/ai/drafts", post(endpoints::ai::drafts))
        .route("/jobs/:id", get(endpoints::jobs::poll))
        .route("/jobs/:id/stream", get(endpoints::jobs::stream))
        .route("/content/:id", get(endpoints::content::read))
        .with_state(ctx);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}
