use anyhow::{Result, anyhow};
use rusqlite::Connection;

use chirp_types::{Post, TimelineItem};

use super::timeline::insert_for_author;
use super::users::query_user;
use crate::Database;
use crate::models::{format_ts, now};

impl Database {
    /// Creates a post, subscribes the author to its comments and puts it on
    /// the author's own timeline, all in one transaction. Followers' copies
    /// are made later by [`Database::fanout_post`].
    pub fn create_post(
        &self,
        user_id: i64,
        content: &str,
        spoiler_of: Option<&str>,
        nsfw: bool,
    ) -> Result<TimelineItem> {
        self.with_tx(|tx| {
            let author = query_user(tx, user_id)?.ok_or_else(|| anyhow!("Author not found: {}", user_id))?;
            let created_at = now();

            let post_id: i64 = tx.query_row(
                "INSERT INTO posts (user_id, content, spoiler_of, nsfw, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING id",
                rusqlite::params![user_id, content, spoiler_of, nsfw, format_ts(created_at)],
                |row| row.get(0),
            )?;

            tx.execute(
                "INSERT INTO post_subscriptions (user_id, post_id) VALUES (?1, ?2)",
                (user_id, post_id),
            )?;

            let timeline_id = insert_for_author(tx, user_id, post_id)?;

            Ok(TimelineItem {
                id: timeline_id,
                user_id,
                post_id,
                post: Post {
                    id: post_id,
                    user_id,
                    content: content.to_string(),
                    spoiler_of: spoiler_of.map(str::to_string),
                    nsfw,
                    comments_count: 0,
                    created_at,
                    user: Some(author),
                    mine: true,
                    subscribed: true,
                },
            })
        })
    }

    /// Toggles whether `user_id` receives comment notifications for a post.
    /// Returns `None` when the post does not exist.
    pub fn toggle_post_subscription(&self, user_id: i64, post_id: i64) -> Result<Option<bool>> {
        self.with_tx(|tx| {
            if !post_exists(tx, post_id)? {
                return Ok(None);
            }

            let subscribed: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM post_subscriptions WHERE user_id = ?1 AND post_id = ?2)",
                (user_id, post_id),
                |row| row.get(0),
            )?;

            if subscribed {
                tx.execute(
                    "DELETE FROM post_subscriptions WHERE user_id = ?1 AND post_id = ?2",
                    (user_id, post_id),
                )?;
            } else {
                tx.execute(
                    "INSERT INTO post_subscriptions (user_id, post_id) VALUES (?1, ?2)",
                    (user_id, post_id),
                )?;
            }

            Ok(Some(!subscribed))
        })
    }
}

pub(crate) fn post_exists(conn: &Connection, post_id: i64) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM posts WHERE id = ?1)",
        [post_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}
