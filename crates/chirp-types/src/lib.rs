pub mod api;
pub mod mention;
pub mod models;

pub use mention::collect_mentions;
pub use models::{Comment, Notification, NotificationKind, Post, TimelineItem, User};
