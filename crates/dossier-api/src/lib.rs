//! # dossier-api
//!
//! HTTP surface over the dossier ingestion pipeline.
//!
//! | Route | Operation |
//! |-------|-----------|
//! | `POST /api/v1/sources` | multipart file upload |
//! | `POST /api/v1/sources/text` | manual text |
//! | `POST /api/v1/identity` | identity connection |
//! | `GET /api/v1/sources/:id` | one record |
//! | `GET /api/v1/owners/:owner_id/sources` | records of an owner |
//! | `GET /api/v1/progress` | session progress snapshot |
//! | `DELETE /api/v1/progress` | end the session |
//! | `GET /api/v1/progress/stream` | session progress as SSE |
//! | `POST /api/v1/progress/:file_id/retry` | retry a failed upload |
//!
//! Callers authenticate with `Authorization: Bearer <token>` and identify
//! their upload session with `X-Session-Id`.

pub mod context;
pub mod error;
pub mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use dossier_core::defaults;
use dossier_jobs::IngestionService;

pub use context::RequestContext;
pub use error::ApiError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingestion: IngestionService,
}

impl AppState {
    pub fn new(ingestion: IngestionService) -> Self {
        Self { ingestion }
    }
}

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Request bodies above this are refused before reaching a handler.
///
/// Leaves room above the file size limit so oversized files still reach the
/// validator and get its error message.
pub fn body_limit() -> usize {
    (defaults::MAX_FILE_SIZE as usize) * 2
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    use handlers::{identity, progress, sources};

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/sources", post(sources::upload_source))
        .route("/api/v1/sources/text", post(sources::upload_text))
        .route("/api/v1/sources/:id", get(sources::get_source))
        .route(
            "/api/v1/owners/:owner_id/sources",
            get(sources::list_owner_sources),
        )
        .route("/api/v1/identity", post(identity::connect_identity))
        .route(
            "/api/v1/progress",
            get(progress::list_progress).delete(progress::end_session),
        )
        .route("/api/v1/progress/stream", get(progress::progress_stream))
        .route(
            "/api/v1/progress/:file_id/retry",
            post(progress::retry_upload),
        )
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit()))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
