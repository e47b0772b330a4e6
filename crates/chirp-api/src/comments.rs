use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, Version},
    response::{IntoResponse, Response},
};

use chirp_gateway::Job;
use chirp_types::api::{Claims, CreateCommentRequest, PageQuery};

use crate::error::{ApiError, ApiResult, blocking};
use crate::posts::{MAX_CONTENT_CHARS, normalize_text};
use crate::state::AppState;
use crate::stream;

/// Lists a post's comments, newest first, or streams new ones when the
/// client asks for `text/event-stream`.
pub async fn comments(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    version: Version,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> ApiResult<Response> {
    if stream::wants_event_stream(&headers) {
        stream::ensure_streamable(version)?;
        let subscription = state.dispatcher.subscribe_comments(post_id, &state.shutdown);
        return Ok(stream::event_stream("comment", subscription));
    }

    let db = state.db.clone();
    let (last, before) = (page.page_size(), page.before());
    let comments = blocking(move || db.list_comments(claims.sub, post_id, last, before))
        .await?
        .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;

    Ok(Json(comments).into_response())
}

/// Comments on a post. The commenter is subscribed to the post as part of
/// the write; subscriber and mention notifications are queued.
pub async fn create_comment(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommentRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = normalize_text(&req.content, MAX_CONTENT_CHARS)
        .ok_or_else(|| ApiError::Validation("Invalid content".into()))?;

    let db = state.db.clone();
    let comment = blocking(move || db.create_comment(claims.sub, post_id, &content))
        .await?
        .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;

    state.fanout.submit(Job::CommentCreated(comment.clone()));

    Ok((StatusCode::CREATED, Json(comment)))
}
