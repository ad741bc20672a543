//! In-memory [`QueryQueue`] and [`KnowledgeStore`] implementations.
//!
//! The in-memory queue also plays the role of the external indexing service
//! in tests: [`InMemoryQueryQueue::mutate`] rewrites a record without any
//! single-transition guard and pushes the new snapshot to every open
//! subscription, which makes out-of-order and duplicate deliveries easy to
//! reproduce.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{KnowledgeEntry, Match, QueryRequest, QueryStatus};

use super::{KnowledgeStore, QueryQueue, Subscription, SubscriptionEvent};

struct Listener {
    key: u64,
    record_id: String,
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
}

#[derive(Default)]
struct QueueState {
    records: HashMap<String, QueryRequest>,
    order: Vec<String>,
    listeners: Vec<Listener>,
    next_key: u64,
}

/// In-memory pending-queue collection with a push-based change feed.
#[derive(Default)]
pub struct InMemoryQueryQueue {
    state: Arc<Mutex<QueueState>>,
    creates: AtomicUsize,
    teardowns: Arc<AtomicUsize>,
    unavailable: AtomicBool,
}

impl InMemoryQueryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create` calls fail, as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Apply `change` to a record and notify its subscribers.
    ///
    /// Returns how many subscriptions received the new snapshot.
    pub fn mutate(&self, id: &str, change: impl FnOnce(&mut QueryRequest)) -> usize {
        let mut state = self.state.lock().unwrap();
        let Some(record) = state.records.get_mut(id) else {
            return 0;
        };
        change(record);
        let snapshot = record.clone();

        state.listeners.retain(|l| !l.tx.is_closed());
        state
            .listeners
            .iter()
            .filter(|l| l.record_id == id)
            .filter(|l| l.tx.send(SubscriptionEvent::Snapshot(snapshot.clone())).is_ok())
            .count()
    }

    pub fn complete(&self, id: &str, results: Vec<Match>) -> usize {
        self.mutate(id, |r| {
            r.status = QueryStatus::Complete;
            r.results = Some(results);
        })
    }

    pub fn fail(&self, id: &str, message: Option<&str>) -> usize {
        self.mutate(id, |r| {
            r.status = QueryStatus::Error;
            r.error_message = message.map(str::to_string);
        })
    }

    /// Report a transport failure on every feed watching `id`.
    pub fn break_feed(&self, id: &str, message: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .listeners
            .iter()
            .filter(|l| l.record_id == id)
            .filter(|l| l.tx.send(SubscriptionEvent::Failed(message.to_string())).is_ok())
            .count()
    }

    pub fn get(&self, id: &str) -> Option<QueryRequest> {
        self.state.lock().unwrap().records.get(id).cloned()
    }

    /// Record ids in creation order.
    pub fn ids(&self) -> Vec<String> {
        self.state.lock().unwrap().order.clone()
    }

    /// Number of successful `create` calls.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self, id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .listeners
            .iter()
            .filter(|l| l.record_id == id && !l.tx.is_closed())
            .count()
    }

    /// Number of subscriptions that have been closed.
    pub fn teardown_count(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryQueue for InMemoryQueryQueue {
    async fn create(&self, request: &QueryRequest) -> Result<String> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("query queue unavailable");
        }
        let mut state = self.state.lock().unwrap();
        state.records.insert(request.id.clone(), request.clone());
        state.order.push(request.id.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(request.id.clone())
    }

    async fn subscribe(&self, id: &str) -> Result<Subscription> {
        let mut state = self.state.lock().unwrap();
        let Some(snapshot) = state.records.get(id).cloned() else {
            bail!("query request not found: {}", id);
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(SubscriptionEvent::Snapshot(snapshot));

        let key = state.next_key;
        state.next_key += 1;
        state.listeners.push(Listener {
            key,
            record_id: id.to_string(),
            tx,
        });

        let shared = Arc::clone(&self.state);
        let teardowns = Arc::clone(&self.teardowns);
        Ok(Subscription::new(rx).with_close_hook(move || {
            shared.lock().unwrap().listeners.retain(|l| l.key != key);
            teardowns.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

/// In-memory knowledge collection.
#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    entries: RwLock<Vec<KnowledgeEntry>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<KnowledgeEntry> {
        self.entries.read().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn append(&self, entry: &KnowledgeEntry) -> Result<String> {
        self.entries.write().unwrap().push(entry.clone());
        Ok(entry.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_delivers_current_snapshot_first() {
        let queue = InMemoryQueryQueue::new();
        let req = QueryRequest::pending("bonus");
        let id = queue.create(&req).await.unwrap();

        let mut sub = queue.subscribe(&id).await.unwrap();
        assert_eq!(sub.next().await, Some(SubscriptionEvent::Snapshot(req)));
        assert_eq!(queue.active_subscriptions(&id), 1);
    }

    #[tokio::test]
    async fn closed_subscription_receives_nothing() {
        let queue = InMemoryQueryQueue::new();
        let id = queue.create(&QueryRequest::pending("q")).await.unwrap();

        let mut sub = queue.subscribe(&id).await.unwrap();
        sub.close();

        assert_eq!(queue.complete(&id, vec![]), 0);
        assert_eq!(queue.active_subscriptions(&id), 0);
        assert_eq!(queue.teardown_count(), 1);
    }

    #[tokio::test]
    async fn subscribe_to_unknown_record_fails() {
        let queue = InMemoryQueryQueue::new();
        assert!(queue.subscribe("missing").await.is_err());
    }

    #[tokio::test]
    async fn unavailable_queue_rejects_creates() {
        let queue = InMemoryQueryQueue::new();
        queue.set_unavailable(true);
        assert!(queue.create(&QueryRequest::pending("q")).await.is_err());
        assert_eq!(queue.create_count(), 0);
    }
}
