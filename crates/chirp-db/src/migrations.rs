use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                username        TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password        TEXT NOT NULL,
                followers_count INTEGER NOT NULL DEFAULT 0 CHECK (followers_count >= 0),
                followees_count INTEGER NOT NULL DEFAULT 0 CHECK (followees_count >= 0),
                created_at      TEXT NOT NULL
            );

            CREATE TABLE follows (
                follower_id INTEGER NOT NULL REFERENCES users(id),
                followee_id INTEGER NOT NULL REFERENCES users(id),
                PRIMARY KEY (follower_id, followee_id)
            );

            CREATE INDEX idx_follows_followee ON follows(followee_id);

            CREATE TABLE posts (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         INTEGER NOT NULL REFERENCES users(id),
                content         TEXT NOT NULL,
                spoiler_of      TEXT,
                nsfw            INTEGER NOT NULL DEFAULT 0,
                comments_count  INTEGER NOT NULL DEFAULT 0 CHECK (comments_count >= 0),
                created_at      TEXT NOT NULL
            );

            CREATE TABLE post_subscriptions (
                user_id INTEGER NOT NULL REFERENCES users(id),
                post_id INTEGER NOT NULL REFERENCES posts(id),
                PRIMARY KEY (user_id, post_id)
            );

            CREATE INDEX idx_post_subscriptions_post ON post_subscriptions(post_id);

            CREATE TABLE comments (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id),
                post_id     INTEGER NOT NULL REFERENCES posts(id),
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_comments_post ON comments(post_id, id);

            CREATE TABLE timeline (
                id      INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                post_id INTEGER NOT NULL REFERENCES posts(id),
                UNIQUE (user_id, post_id)
            );

            CREATE TABLE notifications (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id),
                actors      TEXT NOT NULL,
                type        TEXT NOT NULL
                            CHECK (type IN ('follow', 'comment', 'post_mention', 'comment_mention')),
                read        INTEGER NOT NULL DEFAULT 0,
                post_id     INTEGER REFERENCES posts(id),
                issued_at   TEXT NOT NULL
            );

            -- At most one unread notification per (user, type, post).
            -- Read rows are outside the index so they never block a fresh one.
            CREATE UNIQUE INDEX idx_notifications_unread
                ON notifications(user_id, type, IFNULL(post_id, 0))
                WHERE read = 0;

            CREATE INDEX idx_notifications_user
                ON notifications(user_id, issued_at, id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
