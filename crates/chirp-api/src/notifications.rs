use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, Version},
    response::{IntoResponse, Response},
};

use chirp_types::api::{Claims, PageQuery, UnreadCountResponse};

use crate::error::{ApiError, ApiResult, blocking};
use crate::state::AppState;
use crate::stream;

/// Lists the caller's notifications, newest first, or streams new ones when
/// the client asks for `text/event-stream`.
pub async fn notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    version: Version,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> ApiResult<Response> {
    if stream::wants_event_stream(&headers) {
        stream::ensure_streamable(version)?;
        let subscription = state
            .dispatcher
            .subscribe_notifications(claims.sub, &state.shutdown);
        return Ok(stream::event_stream("notification", subscription));
    }

    let db = state.db.clone();
    let (last, before) = (page.page_size(), page.before());
    let notifications = blocking(move || db.list_notifications(claims.sub, last, before)).await?;

    Ok(Json(notifications).into_response())
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UnreadCountResponse>> {
    let db = state.db.clone();
    let unread = blocking(move || db.unread_notification_count(claims.sub)).await?;
    Ok(Json(UnreadCountResponse { unread }))
}

pub async fn mark_as_read(
    State(state): State<AppState>,
    Path(notification_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    let db = state.db.clone();
    let marked = blocking(move || db.mark_notification_read(notification_id, claims.sub)).await?;
    if !marked {
        return Err(ApiError::NotFound("Notification not found".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_as_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    let db = state.db.clone();
    blocking(move || db.mark_all_notifications_read(claims.sub)).await?;
    Ok(StatusCode::NO_CONTENT)
}
