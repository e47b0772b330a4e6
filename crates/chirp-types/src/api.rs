use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// JWT claims shared by the auth handlers and the auth middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub username: String,
    pub token: String,
}

// -- Follows --

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleFollowResponse {
    pub following: bool,
    pub followers_count: i64,
}

// -- Posts & comments --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub content: String,
    #[serde(default)]
    pub spoiler_of: Option<String>,
    #[serde(default)]
    pub nsfw: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleSubscriptionResponse {
    pub subscribed: bool,
}

// -- Notifications --

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub unread: i64,
}

// -- Pagination --

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 99;

/// Clamps a requested page size into `[1, MAX_PAGE_SIZE]`; non-positive
/// values mean "use the default".
pub fn normalize_page_size(last: i64) -> i64 {
    if last <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        last.min(MAX_PAGE_SIZE)
    }
}

/// `?last=&before=` query parameters. Both are parsed leniently: garbage
/// falls back to the default page size and to "no cursor".
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub last: Option<String>,
    pub before: Option<String>,
}

impl PageQuery {
    pub fn page_size(&self) -> i64 {
        let last = self
            .last
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);
        normalize_page_size(last)
    }

    pub fn before(&self) -> Option<i64> {
        self.before
            .as_deref()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
    }
}
