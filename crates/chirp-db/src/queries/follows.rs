use anyhow::Result;

use super::users::query_user_by_username;
use crate::Database;
use crate::models::FollowOutcome;

impl Database {
    /// Follows `followee_username` if not yet followed, unfollows otherwise,
    /// keeping both users' counters in step.
    pub fn toggle_follow(&self, follower_id: i64, followee_username: &str) -> Result<FollowOutcome> {
        self.with_tx(|tx| {
            let Some(followee) = query_user_by_username(tx, followee_username)? else {
                return Ok(FollowOutcome::UserNotFound);
            };
            if followee.id == follower_id {
                return Ok(FollowOutcome::SelfFollow);
            }

            let following: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM follows WHERE follower_id = ?1 AND followee_id = ?2)",
                (follower_id, followee.id),
                |row| row.get(0),
            )?;

            let delta: i64 = if following {
                tx.execute(
                    "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                    (follower_id, followee.id),
                )?;
                -1
            } else {
                tx.execute(
                    "INSERT INTO follows (follower_id, followee_id) VALUES (?1, ?2)",
                    (follower_id, followee.id),
                )?;
                1
            };

            tx.execute(
                "UPDATE users SET followees_count = followees_count + ?1 WHERE id = ?2",
                (delta, follower_id),
            )?;
            let followers_count: i64 = tx.query_row(
                "UPDATE users SET followers_count = followers_count + ?1 WHERE id = ?2
                 RETURNING followers_count",
                (delta, followee.id),
                |row| row.get(0),
            )?;

            Ok(FollowOutcome::Toggled {
                followee_id: followee.id,
                following: !following,
                followers_count,
            })
        })
    }

    /// Ids of everyone following `user_id`.
    pub fn follower_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT follower_id FROM follows WHERE followee_id = ?1 ORDER BY follower_id")?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }
}
