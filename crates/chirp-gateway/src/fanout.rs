//! Background fan-out.
//!
//! API handlers commit their primary write, submit a [`Job`], and return. A
//! fixed set of worker tasks drains a bounded queue, performs the follow-up
//! writes (follower timelines, notifications) and hands every produced row,
//! along with new comments, to the [`Dispatcher`]. A failing job is logged and counted; it never touches
//! the write that triggered it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, error, info, warn};

use chirp_db::Database;
use chirp_types::{Comment, Notification, Post};

use crate::config::GatewayConfig;
use crate::dispatcher::Dispatcher;

/// Follow-up work for an action that has already been committed.
#[derive(Debug, Clone)]
pub enum Job {
    Follow { follower_id: i64, followee_id: i64 },
    PostCreated(Post),
    CommentCreated(Comment),
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::Follow { .. } => "follow",
            Job::PostCreated(_) => "post_created",
            Job::CommentCreated(_) => "comment_created",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FanoutStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub pending: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    pending: AtomicUsize,
    idle: Notify,
}

impl Counters {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Handle to the worker pool. Clones share the same queue; workers exit once
/// every handle is dropped and the queue is empty.
#[derive(Clone)]
pub struct FanoutPool {
    tx: mpsc::Sender<Job>,
    counters: Arc<Counters>,
}

impl FanoutPool {
    /// Spawns the workers. Must be called from within a Tokio runtime.
    pub fn start(db: Arc<Database>, dispatcher: Dispatcher, config: &GatewayConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(config.fanout_queue.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(Counters::default());
        let workers = config.fanout_workers.max(1);

        for worker in 0..workers {
            let rx = rx.clone();
            let db = db.clone();
            let dispatcher = dispatcher.clone();
            let counters = counters.clone();

            tokio::spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    let Some(job) = job else {
                        break;
                    };

                    let name = job.name();
                    match run(&db, &dispatcher, job).await {
                        Ok(()) => {
                            counters.completed.fetch_add(1, Ordering::Relaxed);
                            debug!("fan-out worker {} finished {} job", worker, name);
                        }
                        Err(e) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            error!("fan-out worker {} failed {} job: {:#}", worker, name, e);
                        }
                    }
                    counters.finish_one();
                }
                debug!("fan-out worker {} stopped", worker);
            });
        }

        info!(
            "Fan-out pool started: {} workers, queue of {}",
            workers,
            config.fanout_queue.max(1)
        );

        Self { tx, counters }
    }

    /// Queues a job without waiting. Returns `false` (and counts a rejection)
    /// when the queue is full.
    pub fn submit(&self, job: Job) -> bool {
        self.counters.pending.fetch_add(1, Ordering::AcqRel);

        match self.tx.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.counters.finish_one();
                warn!("fan-out queue unavailable, {} job rejected", job.name());
                false
            }
        }
    }

    /// Waits until every accepted job has finished.
    pub async fn drain(&self) {
        loop {
            let idle = self.counters.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.counters.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            pending: self.counters.pending.load(Ordering::Relaxed),
        }
    }
}

async fn run(db: &Arc<Database>, dispatcher: &Dispatcher, job: Job) -> Result<()> {
    match job {
        Job::Follow {
            follower_id,
            followee_id,
        } => {
            let db = db.clone();
            let notification = blocking(move || db.record_follow(follower_id, followee_id))
                .await
                .context("follow notification")?;
            if let Some(notification) = notification {
                dispatcher.broadcast_notification(&notification);
            }
            Ok(())
        }

        Job::PostCreated(post) => {
            let post = Arc::new(post);

            // Timeline copies and mention notifications are independent; one
            // failing does not skip the other.
            let timeline = {
                let (db, post) = (db.clone(), post.clone());
                blocking(move || db.fanout_post(&post))
            };
            let mentions = {
                let (db, post) = (db.clone(), post.clone());
                blocking(move || db.record_post_mention(&post))
            };
            let (timeline, mentions) = tokio::join!(timeline, mentions);

            let timeline = timeline.context("timeline fan-out").map(|items| {
                for item in &items {
                    dispatcher.broadcast_timeline_item(item);
                }
                debug!("post {} fanned out to {} follower(s)", post.id, items.len());
            });
            let mentions = mentions
                .context("post mention notifications")
                .map(|notifications| broadcast_all(dispatcher, &notifications));

            both(timeline, mentions)
        }

        Job::CommentCreated(comment) => {
            // Watchers of the thread see it as someone else's comment.
            dispatcher.broadcast_comment(&Comment {
                mine: false,
                ..comment.clone()
            });
            let comment = Arc::new(comment);

            let subscribers = {
                let (db, comment) = (db.clone(), comment.clone());
                blocking(move || db.record_comment_notification(&comment))
            };
            let mentions = {
                let (db, comment) = (db.clone(), comment.clone());
                blocking(move || db.record_comment_mention(&comment))
            };
            let (subscribers, mentions) = tokio::join!(subscribers, mentions);

            let subscribers = subscribers
                .context("comment notifications")
                .map(|notifications| broadcast_all(dispatcher, &notifications));
            let mentions = mentions
                .context("comment mention notifications")
                .map(|notifications| broadcast_all(dispatcher, &notifications));

            both(subscribers, mentions)
        }
    }
}

fn broadcast_all(dispatcher: &Dispatcher, notifications: &[Notification]) {
    for notification in notifications {
        dispatcher.broadcast_notification(notification);
    }
}

/// Combines two independent outcomes. When both failed, the first error is
/// logged here and the second is returned.
fn both(first: Result<()>, second: Result<()>) -> Result<()> {
    match (first, second) {
        (Err(first), Err(second)) => {
            error!("{:#}", first);
            Err(second)
        }
        (first, second) => first.and(second),
    }
}

async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        anyhow!("background task panicked")
    })?
}
