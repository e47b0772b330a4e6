use anyhow::{Result, anyhow};
use rusqlite::Row;

use chirp_types::{Comment, User};

use super::posts::post_exists;
use super::users::query_user;
use crate::Database;
use crate::models::{format_ts, now, ts_column};

// Statement variants keyed by whether a cursor is present.
const COMMENTS_NEWEST: &str = "
    SELECT comments.id, comments.user_id, comments.post_id, users.username,
           comments.content, comments.created_at,
           comments.user_id = ?1 AS mine
    FROM comments
    INNER JOIN users ON users.id = comments.user_id
    WHERE comments.post_id = ?2
    ORDER BY comments.id DESC
    LIMIT ?3";

const COMMENTS_BEFORE: &str = "
    SELECT comments.id, comments.user_id, comments.post_id, users.username,
           comments.content, comments.created_at,
           comments.user_id = ?1 AS mine
    FROM comments
    INNER JOIN users ON users.id = comments.user_id
    WHERE comments.post_id = ?2 AND comments.id < ?4
    ORDER BY comments.id DESC
    LIMIT ?3";

impl Database {
    /// Inserts a comment, bumps the post's comment counter and subscribes the
    /// commenter to the thread. Returns `None` when the post does not exist.
    pub fn create_comment(&self, user_id: i64, post_id: i64, content: &str) -> Result<Option<Comment>> {
        self.with_tx(|tx| {
            if !post_exists(tx, post_id)? {
                return Ok(None);
            }
            let author = query_user(tx, user_id)?.ok_or_else(|| anyhow!("Commenter not found: {}", user_id))?;
            let created_at = now();

            let id: i64 = tx.query_row(
                "INSERT INTO comments (user_id, post_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING id",
                rusqlite::params![user_id, post_id, content, format_ts(created_at)],
                |row| row.get(0),
            )?;

            tx.execute(
                "UPDATE posts SET comments_count = comments_count + 1 WHERE id = ?1",
                [post_id],
            )?;

            tx.execute(
                "INSERT INTO post_subscriptions (user_id, post_id) VALUES (?1, ?2)
                 ON CONFLICT (user_id, post_id) DO NOTHING",
                (user_id, post_id),
            )?;

            Ok(Some(Comment {
                id,
                user_id,
                post_id,
                content: content.to_string(),
                created_at,
                user: Some(author),
                mine: true,
            }))
        })
    }

    /// A page of a post's comments as `viewer_id` sees them, newest first,
    /// older than `before` when given. `None` when the post does not exist.
    pub fn list_comments(
        &self,
        viewer_id: i64,
        post_id: i64,
        last: i64,
        before: Option<i64>,
    ) -> Result<Option<Vec<Comment>>> {
        self.with_conn(|conn| {
            if !post_exists(conn, post_id)? {
                return Ok(None);
            }
            let comments = match before {
                Some(before) => {
                    let mut stmt = conn.prepare(COMMENTS_BEFORE)?;
                    stmt.query_map((viewer_id, post_id, last, before), comment_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(COMMENTS_NEWEST)?;
                    stmt.query_map((viewer_id, post_id, last), comment_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };
            Ok(Some(comments))
        })
    }
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    let user_id: i64 = row.get(1)?;
    Ok(Comment {
        id: row.get(0)?,
        user_id,
        post_id: row.get(2)?,
        user: Some(User {
            id: user_id,
            username: row.get(3)?,
        }),
        content: row.get(4)?,
        created_at: ts_column(row, 5)?,
        mine: row.get(6)?,
    })
}
