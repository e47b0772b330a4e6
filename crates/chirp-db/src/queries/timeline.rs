use anyhow::Result;
use rusqlite::{Connection, Row};

use chirp_types::{Post, TimelineItem, User};

use crate::Database;
use crate::models::ts_column;

// Statement variants keyed by whether a cursor is present.
const TIMELINE_NEWEST: &str = "
    SELECT timeline.id, timeline.user_id, posts.id, posts.user_id, users.username,
           posts.content, posts.spoiler_of, posts.nsfw, posts.comments_count, posts.created_at,
           posts.user_id = ?1 AS mine,
           subscriptions.user_id IS NOT NULL AS subscribed
    FROM timeline
    INNER JOIN posts ON posts.id = timeline.post_id
    INNER JOIN users ON users.id = posts.user_id
    LEFT JOIN post_subscriptions AS subscriptions
        ON subscriptions.user_id = ?1 AND subscriptions.post_id = posts.id
    WHERE timeline.user_id = ?1
    ORDER BY timeline.id DESC
    LIMIT ?2";

const TIMELINE_BEFORE: &str = "
    SELECT timeline.id, timeline.user_id, posts.id, posts.user_id, users.username,
           posts.content, posts.spoiler_of, posts.nsfw, posts.comments_count, posts.created_at,
           posts.user_id = ?1 AS mine,
           subscriptions.user_id IS NOT NULL AS subscribed
    FROM timeline
    INNER JOIN posts ON posts.id = timeline.post_id
    INNER JOIN users ON users.id = posts.user_id
    LEFT JOIN post_subscriptions AS subscriptions
        ON subscriptions.user_id = ?1 AND subscriptions.post_id = posts.id
    WHERE timeline.user_id = ?1 AND timeline.id < ?3
    ORDER BY timeline.id DESC
    LIMIT ?2";

impl Database {
    /// Copies a freshly committed post onto the timeline of every current
    /// follower of its author. Returns the created rows, each carrying the
    /// post snapshot as a follower sees it.
    pub fn fanout_post(&self, post: &Post) -> Result<Vec<TimelineItem>> {
        let snapshot = Post {
            mine: false,
            subscribed: false,
            ..post.clone()
        };

        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO timeline (user_id, post_id)
                 SELECT follower_id, ?1 FROM follows WHERE followee_id = ?2
                 ON CONFLICT (user_id, post_id) DO NOTHING
                 RETURNING id, user_id",
            )?;

            let items = stmt
                .query_map((post.id, post.user_id), |row| {
                    Ok(TimelineItem {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        post_id: post.id,
                        post: snapshot.clone(),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(items)
        })
    }

    /// The caller's timeline, newest first, older than `before` when given.
    pub fn list_timeline(&self, user_id: i64, last: i64, before: Option<i64>) -> Result<Vec<TimelineItem>> {
        self.with_conn(|conn| {
            let items = match before {
                Some(before) => {
                    let mut stmt = conn.prepare(TIMELINE_BEFORE)?;
                    stmt.query_map((user_id, last, before), timeline_item_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(TIMELINE_NEWEST)?;
                    stmt.query_map((user_id, last), timeline_item_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };
            Ok(items)
        })
    }
}

/// Author's own copy, written inside the post-creation transaction.
pub(crate) fn insert_for_author(conn: &Connection, user_id: i64, post_id: i64) -> Result<i64> {
    let id = conn.query_row(
        "INSERT INTO timeline (user_id, post_id) VALUES (?1, ?2) RETURNING id",
        (user_id, post_id),
        |row| row.get(0),
    )?;
    Ok(id)
}

fn timeline_item_from_row(row: &Row<'_>) -> rusqlite::Result<TimelineItem> {
    let post_id: i64 = row.get(2)?;
    let author_id: i64 = row.get(3)?;
    Ok(TimelineItem {
        id: row.get(0)?,
        user_id: row.get(1)?,
        post_id,
        post: Post {
            id: post_id,
            user_id: author_id,
            user: Some(User {
                id: author_id,
                username: row.get(4)?,
            }),
            content: row.get(5)?,
            spoiler_of: row.get(6)?,
            nsfw: row.get(7)?,
            comments_count: row.get(8)?,
            created_at: ts_column(row, 9)?,
            mine: row.get(10)?,
            subscribed: row.get(11)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use crate::queries::testing;

    #[test]
    fn fanout_reaches_every_follower_once() {
        let db = testing::db();
        let author = testing::user(&db, "author");
        let followers: Vec<i64> = ["a", "b", "c"]
            .iter()
            .map(|name| {
                let id = testing::user(&db, name);
                db.toggle_follow(id, "author").unwrap();
                id
            })
            .collect();
        assert_eq!(db.follower_ids(author).unwrap(), followers);

        let own = db.create_post(author, "hello world", None, false).unwrap();
        let fanned = db.fanout_post(&own.post).unwrap();

        assert_eq!(fanned.len(), 3);
        let mut owners: Vec<i64> = fanned.iter().map(|item| item.user_id).collect();
        owners.sort();
        assert_eq!(owners, followers);
        for item in &fanned {
            assert_eq!(item.post_id, own.post_id);
            assert!(!item.post.mine);
            assert!(!item.post.subscribed);
            assert_eq!(item.post.user.as_ref().unwrap().username, "author");
        }

        let total: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM timeline WHERE post_id = ?1",
                    [own.post_id],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(total, 4);

        // A second pass finds nothing new to insert.
        assert!(db.fanout_post(&own.post).unwrap().is_empty());
    }

    #[test]
    fn timeline_pages_by_insertion_order() {
        let db = testing::db();
        let alice = testing::user(&db, "alice");
        let ids: Vec<i64> = (0..5)
            .map(|i| db.create_post(alice, &format!("post {}", i), None, false).unwrap().id)
            .collect();

        let first = db.list_timeline(alice, 2, None).unwrap();
        assert_eq!(first.iter().map(|t| t.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

        // A newer post must not shift the next page.
        db.create_post(alice, "late", None, false).unwrap();

        let second = db.list_timeline(alice, 2, Some(first[1].id)).unwrap();
        assert_eq!(second.iter().map(|t| t.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    }

    #[test]
    fn follower_sees_mine_false() {
        let db = testing::db();
        let alice = testing::user(&db, "alice");
        let bob = testing::user(&db, "bob");
        db.toggle_follow(bob, "alice").unwrap();

        let own = db.create_post(alice, "hi", None, false).unwrap();
        db.fanout_post(&own.post).unwrap();

        let timeline = db.list_timeline(bob, 10, None).unwrap();
        assert_eq!(timeline.len(), 1);
        assert!(!timeline[0].post.mine);
        assert!(!timeline[0].post.subscribed);
    }
}
