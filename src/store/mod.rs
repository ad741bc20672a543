//! Storage abstraction for query records and knowledge entries.
//!
//! [`QueryQueue`] is the pending-queue collection shared with the external
//! indexing service. [`KnowledgeStore`] is the append-only collection filled
//! by the ingestion trigger. Both have a SQLite implementation for the
//! running service and an in-memory one for tests.
//!
//! # Change subscriptions
//!
//! [`QueryQueue::subscribe`] returns a [`Subscription`]: a channel of
//! [`SubscriptionEvent`]s for one record. The first event is always the
//! record's current snapshot, so a transition that lands between creation
//! and subscription is still observed. The feed runs until the subscription
//! is closed or dropped.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{KnowledgeEntry, QueryRequest};

/// One notification from a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// The record as it is now.
    Snapshot(QueryRequest),
    /// The feed itself failed; no further events follow.
    Failed(String),
}

type CloseHook = Box<dyn FnOnce() + Send>;

/// A live change feed for a single query record.
///
/// Closing is idempotent and never fails; dropping a subscription closes it.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
    on_close: Option<CloseHook>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<SubscriptionEvent>) -> Self {
        Self { rx, on_close: None }
    }

    /// Runs `hook` exactly once, when the subscription is first closed.
    pub fn with_close_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Waits for the next event. `None` means the feed ended.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.rx.recv().await
    }

    /// Stops the feed. Events already buffered are discarded.
    pub fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// The pending-queue collection, as seen by the broker.
#[async_trait]
pub trait QueryQueue: Send + Sync {
    /// Persist a new `pending` record. Returns its id.
    async fn create(&self, request: &QueryRequest) -> Result<String>;

    /// Open a change feed on the record with the given id.
    async fn subscribe(&self, id: &str) -> Result<Subscription>;
}

/// Append-only knowledge collection.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Store one entry. Returns its id.
    async fn append(&self, entry: &KnowledgeEntry) -> Result<String>;
}
