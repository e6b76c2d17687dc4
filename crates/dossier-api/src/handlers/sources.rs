//! Source upload and record query handlers.

use axum::extract::{Multipart, Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use dossier_core::{defaults, SourceCategory, SourceRecord};
use dossier_jobs::FileUpload;

use crate::context::RequestContext;
use crate::error::{upload_response, ApiError};
use crate::AppState;

/// Upload a source file.
///
/// # Multipart Fields
/// - `file`: the document (required; file name and content type are taken from the part)
/// - `category`: `resume`, `coverLetter`, `linkedin` or `caseStudies` (required)
/// - `owner_id`: owning user (required)
///
/// # Returns
/// - 201 Created when processed inline, 202 Accepted when queued
/// - 4xx/5xx with the upload result body when rejected or failed
pub async fn upload_source(
    State(state): State<AppState>,
    ctx: RequestContext,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut file: Option<(Vec<u8>, String, String)> = None;
    let mut category: Option<String> = None;
    let mut owner_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let field_name = field.name().map(|n| n.to_string());
        match field_name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?
                    .to_vec();
                file = Some((data, file_name, mime_type));
            }
            Some("category") => {
                category = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?,
                );
            }
            Some("owner_id") => {
                owner_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?,
                );
            }
            _ => {}
        }
    }

    let (data, file_name, mime_type) =
        file.ok_or_else(|| ApiError::BadRequest("Missing file in multipart form".to_string()))?;
    let category = parse_category(category.as_deref())?;
    let owner_id = required("owner_id", owner_id)?;

    let result = state
        .ingestion
        .upload_file(
            &ctx.session_id,
            FileUpload {
                data,
                file_name,
                mime_type,
                owner_id,
                category,
            },
            &ctx.token,
        )
        .await;
    Ok(upload_response(result))
}

#[derive(Debug, Deserialize)]
pub struct ManualTextBody {
    pub text: String,
    pub category: String,
    pub owner_id: String,
}

/// Submit pasted text as a source.
pub async fn upload_text(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(body): Json<ManualTextBody>,
) -> Result<Response, ApiError> {
    let category = parse_category(Some(&body.category))?;
    let owner_id = required("owner_id", Some(body.owner_id))?;
    let result = state
        .ingestion
        .upload_manual_text(&ctx.session_id, &body.text, &owner_id, category, &ctx.token)
        .await;
    Ok(upload_response(result))
}

pub async fn get_source(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<Json<SourceRecord>, ApiError> {
    ctx.require_token()?;
    let record = state
        .ingestion
        .get_record(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Source record {} not found", id)))?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct ListSourcesQuery {
    pub limit: Option<i64>,
}

/// Most recent records of one owner, newest first.
pub async fn list_owner_sources(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(owner_id): Path<String>,
    Query(query): Query<ListSourcesQuery>,
) -> Result<Json<Vec<SourceRecord>>, ApiError> {
    ctx.require_token()?;
    let limit = query.limit.unwrap_or(defaults::PAGE_LIMIT);
    Ok(Json(state.ingestion.list_records(&owner_id, limit).await?))
}

fn parse_category(raw: Option<&str>) -> Result<SourceCategory, ApiError> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing category".to_string()))?
        .parse()
        .map_err(ApiError::BadRequest)
}

fn required(name: &str, value: Option<String>) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_category() {
        assert_eq!(
            parse_category(Some("coverLetter")).unwrap(),
            SourceCategory::CoverLetter
        );
        assert!(matches!(
            parse_category(Some("diary")),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(parse_category(None), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_required_trims() {
        assert_eq!(required("owner_id", Some(" u1 ".into())).unwrap(), "u1");
        assert!(required("owner_id", Some("  ".into())).is_err());
    }
}
