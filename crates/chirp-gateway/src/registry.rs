//! Live subscriber registry.
//!
//! Every open stream owns one entry: the key it watches (a user for
//! notifications and timeline items, a post for comments) and the sending
//! half of a bounded per-connection buffer. Delivery only ever `try_send`s into
//! that buffer, so a client that stops reading loses items (counted as
//! dropped) instead of holding up delivery to anyone else.
//!
//! An entry is removed exactly once, whichever comes first: the
//! [`Subscription`] is dropped (client went away), or the cancellation token
//! passed to [`Registry::register`] fires.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use chirp_types::{Comment, Notification, TimelineItem};

/// Items routed to the connections watching exactly one key.
pub trait Addressed {
    fn recipient(&self) -> i64;
}

impl Addressed for Notification {
    fn recipient(&self) -> i64 {
        self.user_id
    }
}

impl Addressed for TimelineItem {
    fn recipient(&self) -> i64 {
        self.user_id
    }
}

/// Comments go to everyone watching the thread, not to a single user.
impl Addressed for Comment {
    fn recipient(&self) -> i64 {
        self.post_id
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RegistryStats {
    pub subscribers: usize,
    pub delivered: u64,
    pub dropped: u64,
}

struct Entry<T> {
    key: i64,
    tx: mpsc::Sender<T>,
}

struct RegistryInner<T> {
    name: &'static str,
    buffer: usize,
    entries: RwLock<HashMap<Uuid, Entry<T>>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Connections currently watching one kind of item.
pub struct Registry<T> {
    inner: Arc<RegistryInner<T>>,
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new(name: &'static str, buffer: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                name,
                buffer: buffer.max(1),
                entries: RwLock::new(HashMap::new()),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Removes a connection's entry. Returns `false` if it was already gone.
    pub fn unregister(&self, conn_id: Uuid) -> bool {
        let removed = self
            .inner
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&conn_id);

        match removed {
            Some(entry) => {
                debug!("{} subscriber {} for {} removed", self.inner.name, conn_id, entry.key);
                true
            }
            None => false,
        }
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.inner.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of open connections watching `key`.
    pub fn subscriber_count(&self, key: i64) -> usize {
        self.inner
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|entry| entry.key == key)
            .count()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            subscribers: self.len(),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }
}

impl<T> Registry<T>
where
    T: Addressed + Clone + Send + 'static,
{
    /// Opens a subscription for `key`. It stays registered until the
    /// returned handle is dropped or `cancel` (or a parent of it) fires.
    pub fn register(&self, key: i64, cancel: &CancellationToken) -> Subscription<T> {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.buffer);

        self.inner
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conn_id, Entry { key, tx });
        debug!("{} subscriber {} for {} registered", self.inner.name, conn_id, key);

        let cancel = cancel.child_token();
        let watcher = cancel.clone();
        let registry = self.clone();
        tokio::spawn(async move {
            watcher.cancelled().await;
            registry.unregister(conn_id);
        });

        Subscription {
            conn_id,
            key,
            rx,
            registry: self.clone(),
            cancel,
        }
    }

    /// Queues `item` on every connection watching its recipient key without
    /// waiting.
    /// Returns how many connections accepted it.
    pub fn deliver(&self, item: &T) -> usize {
        let recipient = item.recipient();
        let entries = self.inner.entries.read().unwrap_or_else(|e| e.into_inner());

        let mut accepted = 0;
        for (conn_id, entry) in entries.iter().filter(|(_, entry)| entry.key == recipient) {
            match entry.tx.try_send(item.clone()) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "{} subscriber {} for {} is not keeping up, item dropped",
                        self.inner.name, conn_id, recipient
                    );
                }
                // Receiver already gone; its entry is being removed.
                Err(TrySendError::Closed(_)) => {}
            }
        }

        self.inner.delivered.fetch_add(accepted as u64, Ordering::Relaxed);
        accepted
    }
}

/// Receiving end of one live connection. Yields items until cancelled;
/// dropping it unregisters the connection.
pub struct Subscription<T> {
    conn_id: Uuid,
    key: i64,
    rx: mpsc::Receiver<T>,
    registry: Registry<T>,
    cancel: CancellationToken,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> Uuid {
        self.conn_id
    }

    /// The user or post this connection watches.
    pub fn key(&self) -> i64 {
        self.key
    }

    /// Next item, or `None` once the subscription is cancelled.
    pub async fn recv(&mut self) -> Option<T> {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            item = self.rx.recv() => return item,
        }
        self.rx.close();
        None
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            this.rx.close();
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.registry.unregister(self.conn_id);
    }
}
