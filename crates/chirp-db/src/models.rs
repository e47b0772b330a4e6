//! Database row types and row-mapping helpers.
//! Rows that are served as-is (notifications, timeline items) map straight
//! into the `chirp-types` models; everything else gets its own row struct.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

use chirp_types::{Notification, NotificationKind};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub followers_count: i64,
    pub followees_count: i64,
    pub created_at: String,
}

/// Result of a follow toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowOutcome {
    UserNotFound,
    SelfFollow,
    Toggled {
        followee_id: i64,
        following: bool,
        followers_count: i64,
    },
}

/// Current time at the precision the database keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamps are stored as fixed-width RFC 3339 with microseconds so that
/// text ordering matches time ordering.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn actors_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn kind_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NotificationKind> {
    let raw: String = row.get(idx)?;
    raw.parse::<NotificationKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

/// Maps `id, user_id, actors, type, read, post_id, issued_at`.
pub(crate) fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        actors: actors_column(row, 2)?,
        kind: kind_column(row, 3)?,
        read: row.get(4)?,
        post_id: row.get(5)?,
        issued_at: ts_column(row, 6)?,
    })
}
