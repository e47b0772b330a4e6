use anyhow::Result;
use rusqlite::Connection;

use chirp_types::User;

use super::OptionalExt;
use crate::Database;
use crate::models::{UserRow, format_ts, now};

impl Database {
    /// Inserts a user and returns its id, or `None` when the username
    /// (compared case-insensitively) is already taken.
    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (username, password, created_at) VALUES (?1, ?2, ?3)",
                (username, password_hash, format_ts(now())),
            );
            match inserted {
                Ok(_) => Ok(Some(conn.last_insert_rowid())),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }
}

const USER_COLUMNS: &str = "id, username, password, followers_count, followees_count, created_at";

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        followers_count: row.get(3)?,
        followees_count: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub(crate) fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS))?;
    stmt.query_row([username], user_from_row).optional()
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS))?;
    stmt.query_row([id], user_from_row).optional()
}

/// Public view of a user, for embedding into posts and comments.
pub(crate) fn query_user(conn: &Connection, id: i64) -> Result<Option<User>> {
    conn.query_row("SELECT id, username FROM users WHERE id = ?1", [id], |row| {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
        })
    })
    .optional()
}
