use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use chirp_gateway::Job;
use chirp_types::api::{Claims, CreatePostRequest, ToggleSubscriptionResponse};

use crate::error::{ApiError, ApiResult, blocking};
use crate::state::AppState;

pub(crate) const MAX_CONTENT_CHARS: usize = 480;
const MAX_SPOILER_CHARS: usize = 64;

/// Trims `content` and checks it is non-empty and within `max` characters.
pub(crate) fn normalize_text(content: &str, max: usize) -> Option<String> {
    let content = content.trim();
    if content.is_empty() || content.chars().count() > max {
        return None;
    }
    Some(content.to_string())
}

/// Publishes a post. The author's own timeline row and subscription are part
/// of the same write; follower timelines and mentions are queued.
pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = normalize_text(&req.content, MAX_CONTENT_CHARS)
        .ok_or_else(|| ApiError::Validation("Invalid content".into()))?;
    let spoiler_of = match req.spoiler_of.as_deref() {
        Some(spoiler) => Some(
            normalize_text(spoiler, MAX_SPOILER_CHARS)
                .ok_or_else(|| ApiError::Validation("Invalid spoiler".into()))?,
        ),
        None => None,
    };

    let db = state.db.clone();
    let nsfw = req.nsfw;
    let item = blocking(move || db.create_post(claims.sub, &content, spoiler_of.as_deref(), nsfw)).await?;

    state.fanout.submit(Job::PostCreated(item.post.clone()));

    Ok((StatusCode::CREATED, Json(item)))
}

/// Turns comment notifications for a post on or off for the caller.
pub async fn toggle_subscription(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<ToggleSubscriptionResponse>> {
    let db = state.db.clone();
    let subscribed = blocking(move || db.toggle_post_subscription(claims.sub, post_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;

    Ok(Json(ToggleSubscriptionResponse { subscribed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_trimmed_and_bounded() {
        assert_eq!(normalize_text("  hi  ", 10).as_deref(), Some("hi"));
        assert_eq!(normalize_text("   ", 10), None);
        assert_eq!(normalize_text("abcdef", 5), None);
        // Limits count characters, not bytes.
        assert_eq!(normalize_text("ñññññ", 5).as_deref(), Some("ñññññ"));
    }
}
