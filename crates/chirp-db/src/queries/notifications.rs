//! Notification persistence.
//!
//! Unread notifications are deduplicated per `(user_id, type, post_id)`: a new
//! event of the same kind merges its actor into the existing unread row
//! instead of inserting another one (a partial unique index enforces this).
//! Read rows are never merged into; the next event starts a fresh row.
//!
//! Merges are read-modify-write on the `actors` JSON array and always run
//! inside an `IMMEDIATE` transaction, so two concurrent events for the same
//! key are applied one after the other and the later commit sees the
//! earlier actor.

use std::collections::BTreeSet;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use chirp_types::{Comment, Notification, NotificationKind, Post, collect_mentions};

use super::OptionalExt;
use crate::Database;
use crate::models::{format_ts, notification_from_row, now};

// Statement variants keyed by whether a cursor is present.
const NOTIFICATIONS_NEWEST: &str = "
    SELECT id, user_id, actors, type, read, post_id, issued_at
    FROM notifications
    WHERE user_id = ?1
    ORDER BY id DESC
    LIMIT ?2";

const NOTIFICATIONS_BEFORE: &str = "
    SELECT id, user_id, actors, type, read, post_id, issued_at
    FROM notifications
    WHERE user_id = ?1 AND id < ?3
    ORDER BY id DESC
    LIMIT ?2";

impl Database {
    /// Records that `follower_id` started following `followee_id`.
    ///
    /// Returns `None` when the follower already appears on any follow
    /// notification of the followee, read or unread; re-following never
    /// notifies twice.
    pub fn record_follow(&self, follower_id: i64, followee_id: i64) -> Result<Option<Notification>> {
        self.with_tx(|tx| {
            let actor = query_username(tx, follower_id)?;

            let notified: bool = tx.query_row(
                "SELECT EXISTS (
                    SELECT 1 FROM notifications, json_each(notifications.actors) AS actor
                    WHERE notifications.user_id = ?1
                      AND notifications.type = 'follow'
                      AND actor.value = ?2
                )",
                (followee_id, &actor),
                |row| row.get(0),
            )?;
            if notified {
                return Ok(None);
            }

            let notification = merge_actor(tx, followee_id, NotificationKind::Follow, None, &actor, now())?;
            Ok(Some(notification))
        })
    }

    /// Notifies everyone subscribed to the comment's post, except the
    /// commenter. The commenter moves to the front of an existing unread
    /// notification's actors instead of appearing twice.
    pub fn record_comment_notification(&self, comment: &Comment) -> Result<Vec<Notification>> {
        self.with_tx(|tx| {
            let actor = comment_actor(tx, comment)?;

            let recipients: Vec<i64> = {
                let mut stmt = tx.prepare(
                    "SELECT user_id FROM post_subscriptions
                     WHERE post_id = ?1 AND user_id != ?2
                     ORDER BY user_id",
                )?;
                stmt.query_map((comment.post_id, comment.user_id), |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            let issued_at = now();
            recipients
                .into_iter()
                .map(|user_id| {
                    merge_actor(tx, user_id, NotificationKind::Comment, Some(comment.post_id), &actor, issued_at)
                })
                .collect()
        })
    }

    /// Notifies every existing user mentioned in a post, except its author.
    /// Each mention is a distinct event and is inserted, never merged.
    pub fn record_post_mention(&self, post: &Post) -> Result<Vec<Notification>> {
        let mentions = collect_mentions(&post.content);
        if mentions.is_empty() {
            return Ok(vec![]);
        }

        self.with_tx(|tx| {
            let actor = match &post.user {
                Some(user) => user.username.clone(),
                None => query_username(tx, post.user_id)?,
            };
            let actors = serde_json::to_string(&[&actor])?;
            let issued_at = now();

            let mut inserted = Vec::new();
            for user_id in resolve_mentions(tx, &mentions, post.user_id)? {
                let id: Option<i64> = tx
                    .query_row(
                        "INSERT INTO notifications (user_id, actors, type, post_id, issued_at)
                         VALUES (?1, ?2, 'post_mention', ?3, ?4)
                         ON CONFLICT DO NOTHING
                         RETURNING id",
                        rusqlite::params![user_id, actors, post.id, format_ts(issued_at)],
                        |row| row.get(0),
                    )
                    .optional()?;

                if let Some(id) = id {
                    inserted.push(Notification {
                        id,
                        user_id,
                        actors: vec![actor.clone()],
                        kind: NotificationKind::PostMention,
                        read: false,
                        post_id: Some(post.id),
                        issued_at,
                    });
                }
            }
            Ok(inserted)
        })
    }

    /// Notifies every existing user mentioned in a comment, except the
    /// commenter, merging into an unread mention notification for the same
    /// post the same way comment notifications do.
    pub fn record_comment_mention(&self, comment: &Comment) -> Result<Vec<Notification>> {
        let mentions = collect_mentions(&comment.content);
        if mentions.is_empty() {
            return Ok(vec![]);
        }

        self.with_tx(|tx| {
            let actor = comment_actor(tx, comment)?;
            let issued_at = now();

            resolve_mentions(tx, &mentions, comment.user_id)?
                .into_iter()
                .map(|user_id| {
                    merge_actor(
                        tx,
                        user_id,
                        NotificationKind::CommentMention,
                        Some(comment.post_id),
                        &actor,
                        issued_at,
                    )
                })
                .collect()
        })
    }

    /// A page of the user's notifications, newest first.
    ///
    /// `before` is the id of the last notification of the previous page.
    /// Pages are keyed on the row id alone, which merges never change, so
    /// rows inserted or merged after the first page was read never show up
    /// again on later pages.
    pub fn list_notifications(&self, user_id: i64, last: i64, before: Option<i64>) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let rows = match before {
                Some(before) => {
                    let mut stmt = conn.prepare(NOTIFICATIONS_BEFORE)?;
                    stmt.query_map((user_id, last, before), notification_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(NOTIFICATIONS_NEWEST)?;
                    stmt.query_map((user_id, last), notification_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
    }

    /// Marks one of the user's notifications as read. Returns `false` when no
    /// such notification belongs to the user.
    pub fn mark_notification_read(&self, notification_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
                (notification_id, user_id),
            )?;
            Ok(updated > 0)
        })
    }

    /// Marks all of the user's notifications as read. Returns how many were
    /// unread.
    pub fn mark_all_notifications_read(&self, user_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                [user_id],
            )?;
            Ok(updated)
        })
    }

    pub fn unread_notification_count(&self, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

/// Puts `actor` at the front of the unread `(user_id, kind, post_id)`
/// notification, removing any earlier occurrence, or inserts a new one.
fn merge_actor(
    conn: &Connection,
    user_id: i64,
    kind: NotificationKind,
    post_id: Option<i64>,
    actor: &str,
    issued_at: DateTime<Utc>,
) -> Result<Notification> {
    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, actors FROM notifications
             WHERE user_id = ?1 AND type = ?2 AND IFNULL(post_id, 0) = IFNULL(?3, 0) AND read = 0",
            rusqlite::params![user_id, kind.as_str(), post_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (id, actors) = match existing {
        Some((id, raw)) => {
            let mut actors: Vec<String> = serde_json::from_str(&raw)?;
            actors.retain(|a| a != actor);
            actors.insert(0, actor.to_string());

            conn.execute(
                "UPDATE notifications SET actors = ?1, issued_at = ?2 WHERE id = ?3",
                rusqlite::params![serde_json::to_string(&actors)?, format_ts(issued_at), id],
            )?;
            (id, actors)
        }
        None => {
            let actors = vec![actor.to_string()];
            let id: i64 = conn.query_row(
                "INSERT INTO notifications (user_id, actors, type, post_id, issued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING id",
                rusqlite::params![
                    user_id,
                    serde_json::to_string(&actors)?,
                    kind.as_str(),
                    post_id,
                    format_ts(issued_at)
                ],
                |row| row.get(0),
            )?;
            (id, actors)
        }
    };

    Ok(Notification {
        id,
        user_id,
        actors,
        kind,
        read: false,
        post_id,
        issued_at,
    })
}

fn query_username(conn: &Connection, user_id: i64) -> Result<String> {
    conn.query_row("SELECT username FROM users WHERE id = ?1", [user_id], |row| row.get(0))
        .optional()?
        .ok_or_else(|| anyhow!("User not found: {}", user_id))
}

fn comment_actor(conn: &Connection, comment: &Comment) -> Result<String> {
    match &comment.user {
        Some(user) => Ok(user.username.clone()),
        None => query_username(conn, comment.user_id),
    }
}

/// Resolves handles to user ids, case-insensitively, dropping unknown
/// handles and `exclude`. Two spellings of one handle yield one id.
fn resolve_mentions(conn: &Connection, mentions: &[String], exclude: i64) -> Result<BTreeSet<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM users WHERE username = ?1")?;
    let mut ids = BTreeSet::new();
    for handle in mentions {
        let id: Option<i64> = stmt.query_row([handle], |row| row.get(0)).optional()?;
        if let Some(id) = id.filter(|id| *id != exclude) {
            ids.insert(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use chirp_types::NotificationKind;

    use crate::Database;
    use crate::queries::testing;

    fn notifications(db: &Database, user_id: i64) -> Vec<chirp_types::Notification> {
        db.list_notifications(user_id, 99, None).unwrap()
    }

    #[test]
    fn following_twice_while_unread_notifies_once() {
        let db = testing::db();
        let alice = testing::user(&db, "alice");
        let bob = testing::user(&db, "bob");

        let first = db.record_follow(bob, alice).unwrap().unwrap();
        assert_eq!(first.actors, vec!["bob"]);
        assert_eq!(first.kind, NotificationKind::Follow);
        assert_eq!(first.post_id, None);

        assert!(db.record_follow(bob, alice).unwrap().is_none());

        let all = notifications(&db, alice);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].actors, vec!["bob"]);
    }

    #[test]
    fn follow_is_not_renotified_after_read() {
        let db = testing::db();
        let alice = testing::user(&db, "alice");
        let bob = testing::user(&db, "bob");

        let n = db.record_follow(bob, alice).unwrap().unwrap();
        assert!(db.mark_notification_read(n.id, alice).unwrap());
        assert!(db.record_follow(bob, alice).unwrap().is_none());
        assert_eq!(notifications(&db, alice).len(), 1);
    }

    #[test]
    fn new_followers_merge_into_unread_follow_notification() {
        let db = testing::db();
        let alice = testing::user(&db, "alice");
        let bob = testing::user(&db, "bob");
        let carol = testing::user(&db, "carol");

        let first = db.record_follow(bob, alice).unwrap().unwrap();
        let second = db.record_follow(carol, alice).unwrap().unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.actors, vec!["carol", "bob"]);
        assert!(second.issued_at >= first.issued_at);
        assert_eq!(notifications(&db, alice).len(), 1);
    }

    #[test]
    fn commenters_merge_most_recent_first() {
        let db = testing::db();
        let owner = testing::user(&db, "owner");
        let bob = testing::user(&db, "bob");
        let carol = testing::user(&db, "carol");
        let post = db.create_post(owner, "thread", None, false).unwrap().post;

        let c1 = db.create_comment(bob, post.id, "one").unwrap().unwrap();
        let n1 = db.record_comment_notification(&c1).unwrap();
        assert_eq!(n1.len(), 1);
        assert_eq!(n1[0].user_id, owner);

        let c2 = db.create_comment(carol, post.id, "two").unwrap().unwrap();
        let n2 = db.record_comment_notification(&c2).unwrap();

        // owner and bob (auto-subscribed by commenting) are notified, carol is not.
        assert_eq!(n2.len(), 2);
        let for_owner = n2.iter().find(|n| n.user_id == owner).unwrap();
        assert_eq!(for_owner.id, n1[0].id);
        assert_eq!(for_owner.actors, vec!["carol", "bob"]);
        assert_eq!(for_owner.kind, NotificationKind::Comment);
        assert_eq!(for_owner.post_id, Some(post.id));

        let for_bob = n2.iter().find(|n| n.user_id == bob).unwrap();
        assert_eq!(for_bob.actors, vec!["carol"]);

        assert_eq!(notifications(&db, owner).len(), 1);
        assert!(notifications(&db, carol).is_empty());
    }

    #[test]
    fn repeat_commenter_moves_to_front_without_duplicating() {
        let db = testing::db();
        let owner = testing::user(&db, "owner");
        let bob = testing::user(&db, "bob");
        let carol = testing::user(&db, "carol");
        let post = db.create_post(owner, "thread", None, false).unwrap().post;

        for (user, text) in [(bob, "a"), (carol, "b"), (bob, "c")] {
            let c = db.create_comment(user, post.id, text).unwrap().unwrap();
            db.record_comment_notification(&c).unwrap();
        }

        let all = notifications(&db, owner);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].actors, vec!["bob", "carol"]);
    }

    #[test]
    fn unsubscribed_owner_gets_no_comment_notification() {
        let db = testing::db();
        let owner = testing::user(&db, "owner");
        let bob = testing::user(&db, "bob");
        let post = db.create_post(owner, "thread", None, false).unwrap().post;
        db.toggle_post_subscription(owner, post.id).unwrap();

        let c = db.create_comment(bob, post.id, "hi").unwrap().unwrap();
        assert!(db.record_comment_notification(&c).unwrap().is_empty());
    }

    #[test]
    fn read_notification_is_never_reopened() {
        let db = testing::db();
        let owner = testing::user(&db, "owner");
        let bob = testing::user(&db, "bob");
        let post = db.create_post(owner, "thread", None, false).unwrap().post;

        let c = db.create_comment(bob, post.id, "one").unwrap().unwrap();
        let first = db.record_comment_notification(&c).unwrap().remove(0);
        assert!(db.mark_notification_read(first.id, owner).unwrap());

        let c = db.create_comment(bob, post.id, "two").unwrap().unwrap();
        let second = db.record_comment_notification(&c).unwrap().remove(0);
        assert_ne!(second.id, first.id);
        assert!(!second.read);

        let all = notifications(&db, owner);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert!(all[1].read);

        // Reading the second one as well must not trip the unread index.
        assert_eq!(db.mark_all_notifications_read(owner).unwrap(), 1);
        assert_eq!(db.unread_notification_count(owner).unwrap(), 0);
    }

    #[test]
    fn mark_read_is_scoped_to_owner() {
        let db = testing::db();
        let alice = testing::user(&db, "alice");
        let bob = testing::user(&db, "bob");

        let n = db.record_follow(bob, alice).unwrap().unwrap();
        assert!(!db.mark_notification_read(n.id, bob).unwrap());
        assert_eq!(db.unread_notification_count(alice).unwrap(), 1);
        assert!(!db.mark_notification_read(12345, alice).unwrap());
    }

    #[test]
    fn post_mentions_skip_author_and_unknown_handles() {
        let db = testing::db();
        let alice = testing::user(&db, "alice");
        let bob = testing::user(&db, "bob");
        let carol = testing::user(&db, "carol");

        let post = db
            .create_post(alice, "hey @bob @Carol @alice @ghost and @BOB", None, false)
            .unwrap()
            .post;
        let inserted = db.record_post_mention(&post).unwrap();

        let mut recipients: Vec<i64> = inserted.iter().map(|n| n.user_id).collect();
        recipients.sort();
        assert_eq!(recipients, vec![bob, carol]);
        for n in &inserted {
            assert_eq!(n.kind, NotificationKind::PostMention);
            assert_eq!(n.actors, vec!["alice"]);
            assert_eq!(n.post_id, Some(post.id));
        }
        assert!(notifications(&db, alice).is_empty());
    }

    #[test]
    fn post_without_mentions_inserts_nothing() {
        let db = testing::db();
        let alice = testing::user(&db, "alice");
        let post = db.create_post(alice, "quiet post", None, false).unwrap().post;
        assert!(db.record_post_mention(&post).unwrap().is_empty());
    }

    #[test]
    fn comment_mentions_merge_per_post() {
        let db = testing::db();
        let owner = testing::user(&db, "owner");
        let bob = testing::user(&db, "bob");
        let carol = testing::user(&db, "carol");
        let dave = testing::user(&db, "dave");
        let post = db.create_post(owner, "thread", None, false).unwrap().post;

        let c = db.create_comment(bob, post.id, "@dave look").unwrap().unwrap();
        let first = db.record_comment_mention(&c).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].user_id, dave);

        let c = db.create_comment(carol, post.id, "@dave @bob too").unwrap().unwrap();
        let second = db.record_comment_mention(&c).unwrap();
        assert_eq!(second.len(), 2);

        let for_dave = second.iter().find(|n| n.user_id == dave).unwrap();
        assert_eq!(for_dave.id, first[0].id);
        assert_eq!(for_dave.actors, vec!["carol", "bob"]);
        assert_eq!(for_dave.kind, NotificationKind::CommentMention);

        let all = notifications(&db, dave);
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn cursor_pages_are_stable_under_inserts() {
        let db = testing::db();
        let alice = testing::user(&db, "alice");
        let posts: Vec<i64> = (0..8)
            .map(|i| db.create_post(alice, &format!("p{}", i), None, false).unwrap().post.id)
            .collect();
        let bob = testing::user(&db, "bob");

        // One unread comment notification per post, oldest first.
        let ids: Vec<i64> = posts[..5]
            .iter()
            .map(|post_id| {
                let c = db.create_comment(bob, *post_id, "x").unwrap().unwrap();
                db.record_comment_notification(&c).unwrap().remove(0).id
            })
            .collect();

        let first = db.list_notifications(alice, 2, None).unwrap();
        assert_eq!(first.iter().map(|n| n.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

        // Newer notifications arrive between the two page reads.
        for post_id in &posts[5..] {
            let c = db.create_comment(bob, *post_id, "y").unwrap().unwrap();
            db.record_comment_notification(&c).unwrap();
        }

        let second = db.list_notifications(alice, 2, Some(ids[3])).unwrap();
        assert_eq!(second.iter().map(|n| n.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);

        let third = db.list_notifications(alice, 2, Some(ids[1])).unwrap();
        assert_eq!(third.iter().map(|n| n.id).collect::<Vec<_>>(), vec![ids[0]]);
    }

    #[test]
    fn merging_into_a_served_row_does_not_repeat_it() {
        let db = testing::db();
        let alice = testing::user(&db, "alice");
        let bob = testing::user(&db, "bob");
        let carol = testing::user(&db, "carol");
        let posts: Vec<i64> = (0..4)
            .map(|i| db.create_post(alice, &format!("p{}", i), None, false).unwrap().post.id)
            .collect();

        let ids: Vec<i64> = posts
            .iter()
            .map(|post_id| {
                let c = db.create_comment(bob, *post_id, "x").unwrap().unwrap();
                db.record_comment_notification(&c).unwrap().remove(0).id
            })
            .collect();

        let first: Vec<i64> = db.list_notifications(alice, 2, None).unwrap().iter().map(|n| n.id).collect();
        assert_eq!(first, vec![ids[3], ids[2]]);

        // Carol's comment merges into the row the cursor points at.
        let c = db.create_comment(carol, posts[2], "y").unwrap().unwrap();
        let merged = db.record_comment_notification(&c).unwrap();
        let for_alice = merged.iter().find(|n| n.user_id == alice).unwrap();
        assert_eq!(for_alice.id, ids[2]);

        let second: Vec<i64> = db
            .list_notifications(alice, 2, Some(first[1]))
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(second, vec![ids[1], ids[0]]);
        assert!(second.iter().all(|id| !first.contains(id)));
    }

    #[test]
    fn concurrent_commenters_share_one_unread_row() {
        use std::sync::Arc;
        use std::thread;

        let db = Arc::new(testing::db());
        let owner = testing::user(&db, "owner");
        let post = db.create_post(owner, "thread", None, false).unwrap().post;
        let commenters: Vec<i64> = (0..8).map(|i| testing::user(&db, &format!("user{}", i))).collect();

        let handles: Vec<_> = commenters
            .iter()
            .map(|&user_id| {
                let db = db.clone();
                thread::spawn(move || {
                    let c = db.create_comment(user_id, post.id, "hi").unwrap().unwrap();
                    db.record_comment_notification(&c).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let all = notifications(&db, owner);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].actors.len(), commenters.len());
    }
}
