use axum::{routing::get, Router};
use deferd_core::config::DeferdConfig;
use deferd_scheduler::SchedulerHandle;
use std::sync::Arc;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: DeferdConfig,
    pub scheduler: SchedulerHandle,
}

impl AppState {
    pub fn new(config: DeferdConfig, scheduler: SchedulerHandle) -> Self {
        Self { config, scheduler }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/jobs",
            get(crate::http::jobs::list_jobs).post(crate::http::jobs::create_job),
        )
        .route(
            "/jobs/{id}",
            get(crate::http::jobs::get_job).delete(crate::http::jobs::cancel_job),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
