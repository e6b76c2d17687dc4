//! Identity connection handler.

use axum::extract::State;
use axum::response::Response;
use axum::Json;

use dossier_jobs::IdentityRequest;

use crate::context::RequestContext;
use crate::error::upload_response;
use crate::AppState;

/// Connect a professional identity profile.
///
/// The body is an [`IdentityRequest`]; `access_token` is the identity
/// provider's OAuth token, separate from the API bearer token.
pub async fn connect_identity(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<IdentityRequest>,
) -> Response {
    let result = state
        .ingestion
        .connect_identity(&ctx.session_id, request, &ctx.token)
        .await;
    upload_response(result)
}
