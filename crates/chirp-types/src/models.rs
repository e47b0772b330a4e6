use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public view of a user. The numeric id stays server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(skip)]
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub content: String,
    pub spoiler_of: Option<String>,
    pub nsfw: bool,
    pub comments_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub mine: bool,
    pub subscribed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub post_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub mine: bool,
}

/// What produced a notification. Stored as its snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Follow,
    Comment,
    PostMention,
    CommentMention,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Comment => "comment",
            Self::PostMention => "post_mention",
            Self::CommentMention => "comment_mention",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "follow" => Ok(Self::Follow),
            "comment" => Ok(Self::Comment),
            "post_mention" => Ok(Self::PostMention),
            "comment_mention" => Ok(Self::CommentMention),
            other => Err(format!("unknown notification type: {}", other)),
        }
    }
}

/// A persisted notification. `actors` is most-recent-first and never holds
/// the same handle twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub actors: Vec<String>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<i64>,
    pub issued_at: DateTime<Utc>,
}

/// One row of a user's home timeline, carrying a snapshot of the post taken
/// at fan-out time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItem {
    pub id: i64,
    #[serde(skip)]
    pub user_id: i64,
    pub post_id: i64,
    pub post: Post,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_kind_roundtrips_through_its_name() {
        for kind in [
            NotificationKind::Follow,
            NotificationKind::Comment,
            NotificationKind::PostMention,
            NotificationKind::CommentMention,
        ] {
            assert_eq!(kind.as_str().parse::<NotificationKind>().unwrap(), kind);
        }
        assert!("like".parse::<NotificationKind>().is_err());
    }

    #[test]
    fn notification_json_hides_recipient() {
        let n = Notification {
            id: 7,
            user_id: 42,
            actors: vec!["bob".into(), "alice".into()],
            kind: NotificationKind::Follow,
            read: false,
            post_id: None,
            issued_at: Utc::now(),
        };

        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "follow");
        assert_eq!(json["actors"][0], "bob");
        assert!(json.get("user_id").is_none());
        assert!(json.get("post_id").is_none());
    }
}
