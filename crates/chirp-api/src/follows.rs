use axum::{
    Extension, Json,
    extract::{Path, State},
};

use chirp_db::models::FollowOutcome;
use chirp_gateway::Job;
use chirp_types::api::{Claims, ToggleFollowResponse};
use chirp_types::mention::is_valid_username;

use crate::error::{ApiError, ApiResult, blocking};
use crate::state::AppState;

/// Follows `username`, or unfollows if already following. A new follow
/// queues the followee's notification; unfollowing never notifies.
pub async fn toggle_follow(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<ToggleFollowResponse>> {
    let username = username.trim().to_string();
    if !is_valid_username(&username) {
        return Err(ApiError::Validation("Invalid username".into()));
    }

    let db = state.db.clone();
    let follower_id = claims.sub;
    let outcome = blocking(move || db.toggle_follow(follower_id, &username)).await?;

    match outcome {
        FollowOutcome::UserNotFound => Err(ApiError::NotFound("User not found".into())),
        FollowOutcome::SelfFollow => Err(ApiError::Forbidden("Cannot follow yourself".into())),
        FollowOutcome::Toggled {
            followee_id,
            following,
            followers_count,
        } => {
            if following {
                state.fanout.submit(Job::Follow {
                    follower_id,
                    followee_id,
                });
            }
            Ok(Json(ToggleFollowResponse {
                following,
                followers_count,
            }))
        }
    }
}
