use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use chirp_types::{Comment, Notification, TimelineItem};

use crate::config::GatewayConfig;
use crate::registry::{Registry, RegistryStats, Subscription};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DispatchStats {
    pub notifications: RegistryStats,
    pub timeline: RegistryStats,
    pub comments: RegistryStats,
}

/// Routes produced notifications and timeline items to the live connections
/// of their recipient, and new comments to everyone watching the post.
/// Cheap to clone; clones share the same registries.
#[derive(Clone)]
pub struct Dispatcher {
    notifications: Registry<Notification>,
    timeline: Registry<TimelineItem>,
    comments: Registry<Comment>,
}

impl Dispatcher {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            notifications: Registry::new("notification", config.subscriber_buffer),
            timeline: Registry::new("timeline", config.subscriber_buffer),
            comments: Registry::new("comment", config.subscriber_buffer),
        }
    }

    pub fn subscribe_notifications(
        &self,
        user_id: i64,
        cancel: &CancellationToken,
    ) -> Subscription<Notification> {
        self.notifications.register(user_id, cancel)
    }

    pub fn subscribe_timeline(&self, user_id: i64, cancel: &CancellationToken) -> Subscription<TimelineItem> {
        self.timeline.register(user_id, cancel)
    }

    /// Watches the comment thread of `post_id`.
    pub fn subscribe_comments(&self, post_id: i64, cancel: &CancellationToken) -> Subscription<Comment> {
        self.comments.register(post_id, cancel)
    }

    /// Pushes a notification to every live connection of its recipient.
    /// Never waits on a subscriber.
    pub fn broadcast_notification(&self, notification: &Notification) -> usize {
        let delivered = self.notifications.deliver(notification);
        debug!(
            "notification {} ({}) delivered to {} connection(s) of user {}",
            notification.id, notification.kind, delivered, notification.user_id
        );
        delivered
    }

    pub fn broadcast_timeline_item(&self, item: &TimelineItem) -> usize {
        let delivered = self.timeline.deliver(item);
        debug!(
            "timeline item {} (post {}) delivered to {} connection(s) of user {}",
            item.id, item.post_id, delivered, item.user_id
        );
        delivered
    }

    pub fn broadcast_comment(&self, comment: &Comment) -> usize {
        let delivered = self.comments.deliver(comment);
        debug!(
            "comment {} delivered to {} connection(s) watching post {}",
            comment.id, delivered, comment.post_id
        );
        delivered
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            notifications: self.notifications.stats(),
            timeline: self.timeline.stats(),
            comments: self.comments.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use chirp_types::{NotificationKind, Post};

    fn notification(id: i64, user_id: i64) -> Notification {
        Notification {
            id,
            user_id,
            actors: vec!["alice".into()],
            kind: NotificationKind::Comment,
            read: false,
            post_id: Some(1),
            issued_at: Utc::now(),
        }
    }

    fn timeline_item(id: i64, user_id: i64) -> TimelineItem {
        TimelineItem {
            id,
            user_id,
            post_id: 1,
            post: Post {
                id: 1,
                user_id: 99,
                content: "hello".into(),
                spoiler_of: None,
                nsfw: false,
                comments_count: 0,
                created_at: Utc::now(),
                user: None,
                mine: false,
                subscribed: false,
            },
        }
    }

    #[tokio::test]
    async fn notifications_and_timeline_are_independent() {
        let dispatcher = Dispatcher::new(&GatewayConfig::default());
        let cancel = CancellationToken::new();
        let mut notifications = dispatcher.subscribe_notifications(1, &cancel);
        let mut timeline = dispatcher.subscribe_timeline(1, &cancel);

        assert_eq!(dispatcher.broadcast_notification(&notification(5, 1)), 1);
        assert_eq!(dispatcher.broadcast_timeline_item(&timeline_item(8, 1)), 1);

        let n = tokio::time::timeout(Duration::from_millis(100), notifications.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n.id, 5);
        let item = tokio::time::timeout(Duration::from_millis(100), timeline.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.id, 8);

        // Nothing crossed over.
        assert!(
            tokio::time::timeout(Duration::from_millis(50), notifications.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn comment_watchers_are_keyed_by_post() {
        let dispatcher = Dispatcher::new(&GatewayConfig::default());
        let cancel = CancellationToken::new();
        let mut thread = dispatcher.subscribe_comments(1, &cancel);
        // Same number, but as a user id on a different feed.
        let mut notifications = dispatcher.subscribe_notifications(1, &cancel);

        let comment = Comment {
            id: 3,
            user_id: 2,
            post_id: 1,
            content: "hi".into(),
            created_at: Utc::now(),
            user: None,
            mine: false,
        };
        assert_eq!(dispatcher.broadcast_comment(&comment), 1);
        assert_eq!(dispatcher.broadcast_comment(&Comment { post_id: 2, ..comment.clone() }), 0);

        let got = tokio::time::timeout(Duration::from_millis(100), thread.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.id, 3);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), notifications.recv())
                .await
                .is_err()
        );
        assert_eq!(dispatcher.stats().comments.delivered, 1);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_a_no_op() {
        let dispatcher = Dispatcher::new(&GatewayConfig::default());
        assert_eq!(dispatcher.broadcast_notification(&notification(1, 3)), 0);
        assert_eq!(dispatcher.broadcast_timeline_item(&timeline_item(1, 3)), 0);

        let stats = dispatcher.stats();
        assert_eq!(stats.notifications.subscribers, 0);
        assert_eq!(stats.notifications.delivered, 0);
        assert_eq!(stats.timeline.dropped, 0);
    }

    #[tokio::test]
    async fn clones_share_subscribers() {
        let dispatcher = Dispatcher::new(&GatewayConfig::default());
        let producer = dispatcher.clone();
        let cancel = CancellationToken::new();
        let _sub = dispatcher.subscribe_notifications(2, &cancel);

        assert_eq!(producer.broadcast_notification(&notification(1, 2)), 1);
        assert_eq!(dispatcher.stats().notifications.delivered, 1);
    }
}
