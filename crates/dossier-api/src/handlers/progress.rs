//! Session progress: snapshot, live stream and retry.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive};
use axum::response::{Response, Sse};
use axum::Json;
use futures::Stream;
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use dossier_core::{ProgressEntry, ProgressEvent};

use crate::context::RequestContext;
use crate::error::upload_response;
use crate::AppState;

pub async fn list_progress(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Json<Vec<ProgressEntry>> {
    Json(state.ingestion.progress_entries(&ctx.session_id).await)
}

/// Drop the session's progress entries and any stashed retry inputs.
pub async fn end_session(State(state): State<AppState>, ctx: RequestContext) -> StatusCode {
    state.ingestion.end_session(&ctx.session_id).await;
    StatusCode::NO_CONTENT
}

/// Retry a failed upload of this session.
pub async fn retry_upload(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(file_id): Path<Uuid>,
) -> Response {
    let result = state
        .ingestion
        .retry(&ctx.session_id, file_id, &ctx.token)
        .await;
    upload_response(result)
}

/// Server-Sent Events for one session.
///
/// Starts with a `progress.updated` event per current entry, then follows
/// live changes. Events of other sessions are filtered out; a lagging client
/// skips ahead and can re-read `/api/v1/progress`.
pub async fn progress_stream(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before the snapshot so no change falls in between.
    let rx = state.ingestion.subscribe_progress();
    let session_id = ctx.session_id;

    let snapshot: Vec<Result<Event, Infallible>> = state
        .ingestion
        .progress_entries(&session_id)
        .await
        .into_iter()
        .filter_map(|entry| {
            sse_event(&ProgressEvent::Updated {
                session_id: session_id.clone(),
                entry,
            })
        })
        .map(Ok)
        .collect();

    let live = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(
        move |result: Result<ProgressEvent, _>| match result {
            Ok(event) if event.session_id() == session_id => sse_event(&event).map(Ok),
            _ => None,
        },
    );

    Sse::new(tokio_stream::iter(snapshot).chain(live)).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

fn sse_event(event: &ProgressEvent) -> Option<Event> {
    let json = serde_json::to_string(event).ok()?;
    Some(Event::default().event(event.event_type()).data(json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_event_serializes_payload() {
        let event = ProgressEvent::SessionEnded {
            session_id: "s-1".to_string(),
        };
        assert!(sse_event(&event).is_some());
    }
}
