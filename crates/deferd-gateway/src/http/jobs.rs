//! Job endpoints.
//!
//! | method & path       | success          | errors                    |
//! |---------------------|------------------|---------------------------|
//! | `POST /jobs`        | 201 + job        | 400, 413, 500             |
//! | `GET /jobs`         | 200 + jobs       |                           |
//! | `GET /jobs/{id}`    | 200 + job        | 404                       |
//! | `DELETE /jobs/{id}` | 200 + job        | 404, 409, 500             |
//!
//! Errors are returned as `{ "error": "...", "code": "..." }`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use deferd_core::JobId;
use deferd_scheduler::{Job, SchedulerError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Seconds from now until the first run.
    #[serde(default)]
    pub delay: f64,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub recurring: bool,
    /// Seconds between runs of a recurring job.
    #[serde(default)]
    pub interval: f64,
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub code: &'static str,
}

/// Scheduler error carried out of a handler.
pub struct ApiError(SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        Self(e)
    }
}

/// A body that is not valid JSON, or not shaped like a job request.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(SchedulerError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SchedulerError::Validation(_) => StatusCode::BAD_REQUEST,
            SchedulerError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SchedulerError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            SchedulerError::AlreadyRunning { .. } | SchedulerError::AlreadyTerminal { .. } => {
                StatusCode::CONFLICT
            }
            SchedulerError::Database(_)
            | SchedulerError::Persistence(_)
            | SchedulerError::InvalidStatus(_) => {
                error!(code = self.0.code(), "job request failed: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ApiErrorBody {
            error: self.0.to_string(),
            code: self.0.code(),
        };
        (status, Json(body)).into_response()
    }
}

/// POST /jobs: submit a delayed (optionally recurring) job.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let Json(req) = body?;
    let job = state
        .scheduler
        .create_job(req.delay, req.payload, req.recurring, req.interval)?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /jobs: every job the scheduler knows about.
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<Job>> {
    Json(state.scheduler.list_jobs())
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.scheduler.get_job(&JobId::from(id))?))
}

/// DELETE /jobs/{id}: cancel a job that has not started yet.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.scheduler.cancel_job(&JobId::from(id))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{build_router, AppState};
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
        Router,
    };
    use deferd_core::config::DeferdConfig;
    use deferd_scheduler::{
        EngineOptions, JobPersistence, JobWork, MemoryPersistence, SchedulerEngine, WorkError,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct NoopWork;

    #[async_trait]
    impl JobWork for NoopWork {
        async fn execute(&self, _payload: &str) -> Result<(), WorkError> {
            Ok(())
        }
    }

    /// Accepts reads, refuses every write.
    struct ReadOnlyPersistence;

    impl JobPersistence for ReadOnlyPersistence {
        fn save_job(&self, _job: &Job) -> deferd_scheduler::Result<()> {
            Err(SchedulerError::Persistence("disk full".into()))
        }

        fn load_active_jobs(&self) -> deferd_scheduler::Result<Vec<Job>> {
            Ok(Vec::new())
        }
    }

    /// Router backed by an engine that is never started, so jobs stay put.
    fn router_with(persistence: Arc<dyn JobPersistence>) -> Router {
        let config = DeferdConfig::default();
        let mut options = EngineOptions::from(&config);
        options.max_payload_bytes = 16;
        let (_engine, handle) =
            SchedulerEngine::new(persistence, Arc::new(NoopWork), options).unwrap();
        build_router(Arc::new(AppState::new(config, handle)))
    }

    fn router() -> Router {
        router_with(Arc::new(MemoryPersistence::new()))
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn create_then_get_and_list() {
        let router = router();
        let (status, created) = send(
            &router,
            "POST",
            "/jobs",
            Some(json!({"delay": 30, "payload": "report", "recurring": true, "interval": 60})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "scheduled");
        assert_eq!(created["retries"], 0);
        assert_eq!(created["recurring"], true);
        let id = created["id"].as_str().unwrap().to_string();

        let (status, fetched) = send(&router, "GET", &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);

        let (status, listed) = send(&router, "GET", "/jobs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_defaults_missing_fields() {
        let (status, created) = send(&router(), "POST", "/jobs", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["payload"], "");
        assert_eq!(created["recurring"], false);
    }

    #[tokio::test]
    async fn invalid_submissions_are_rejected() {
        let router = router();
        let (status, body) =
            send(&router, "POST", "/jobs", Some(json!({"delay": -5, "payload": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (status, body) = send(
            &router,
            "POST",
            "/jobs",
            Some(json!({"payload": "this payload is far too long"})),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");

        let (_, listed) = send(&router, "GET", "/jobs", None).await;
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn malformed_bodies_get_the_json_error_shape() {
        let router = router();
        let (status, body) =
            send(&router, "POST", "/jobs", Some(json!({"delay": "abc"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let request = Request::builder()
            .method("POST")
            .uri("/jobs")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let request = Request::builder()
            .method("POST")
            .uri("/jobs")
            .body(Body::from("delay=5"))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (_, listed) = send(&router, "GET", "/jobs", None).await;
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn out_of_range_delay_is_rejected() {
        let (status, body) =
            send(&router(), "POST", "/jobs", Some(json!({"delay": 1e20}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let router = router();
        let (status, body) = send(&router, "GET", "/jobs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "JOB_NOT_FOUND");

        let (status, _) = send(&router, "DELETE", "/jobs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_twice_conflicts() {
        let router = router();
        let (_, created) = send(&router, "POST", "/jobs", Some(json!({"delay": 60}))).await;
        let uri = format!("/jobs/{}", created["id"].as_str().unwrap());

        let (status, cancelled) = send(&router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["status"], "cancelled");

        let (status, body) = send(&router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "ALREADY_TERMINAL");
    }

    #[tokio::test]
    async fn failed_write_is_500_and_nothing_is_stored() {
        let router = router_with(Arc::new(ReadOnlyPersistence));
        let (status, body) = send(&router, "POST", "/jobs", Some(json!({"delay": 1}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "PERSISTENCE_ERROR");

        let (_, listed) = send(&router, "GET", "/jobs", None).await;
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn health_reports_job_counts() {
        let router = router();
        send(&router, "POST", "/jobs", Some(json!({"delay": 60}))).await;
        let (status, body) = send(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["jobs"]["total"], 1);
        assert_eq!(body["jobs"]["scheduled"], 1);
        assert_eq!(body["jobs"]["queue_depth"], 1);
    }
}
