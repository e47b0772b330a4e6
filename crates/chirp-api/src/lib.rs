//! HTTP surface: auth, follows, posts, comments, notifications and the home
//! timeline, with server-sent events for the live feeds.

pub mod auth;
pub mod comments;
pub mod error;
pub mod follows;
pub mod health;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod state;
pub mod stream;
pub mod timeline;

use axum::{
    Router,
    routing::{get, post},
};

pub use error::{ApiError, ApiResult};
pub use state::{AppState, AppStateInner};

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health::health));

    let protected = Router::new()
        .route("/users/{username}/toggle_follow", post(follows::toggle_follow))
        .route("/posts", post(posts::create_post))
        .route(
            "/posts/{post_id}/comments",
            post(comments::create_comment).get(comments::comments),
        )
        .route("/posts/{post_id}/toggle_subscription", post(posts::toggle_subscription))
        .route("/notifications", get(notifications::notifications))
        .route("/notifications/unread_count", get(notifications::unread_count))
        .route(
            "/notifications/{notification_id}/mark_as_read",
            post(notifications::mark_as_read),
        )
        .route("/mark_notifications_as_read", post(notifications::mark_all_as_read))
        .route("/timeline", get(timeline::timeline))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    public.merge(protected).with_state(state)
}
