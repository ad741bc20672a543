//! SQLite-backed [`QueryQueue`] and [`KnowledgeStore`].
//!
//! SQLite has no push notifications, so the change feed is a polling task
//! per subscription: it re-reads the record every `poll_interval` and emits
//! a snapshot whenever the record differs from the last one sent. The task
//! exits as soon as the subscription is closed, the record disappears, or a
//! query fails.
//!
//! The external indexing service side of the contract ([`list_pending`],
//! [`complete`], [`fail`]) lives here too. Those writes only apply to
//! records that are still `pending`.
//!
//! [`list_pending`]: SqliteQueryQueue::list_pending
//! [`complete`]: SqliteQueryQueue::complete
//! [`fail`]: SqliteQueryQueue::fail

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::models::{KnowledgeEntry, Match, QueryRequest, QueryStatus};

use super::{KnowledgeStore, QueryQueue, Subscription, SubscriptionEvent};

const SELECT_REQUEST: &str = "SELECT id, query_text, submitted_at, status, results_json, error_message \
     FROM query_requests WHERE id = ?";

pub struct SqliteQueryQueue {
    pool: SqlitePool,
    poll_interval: Duration,
    feeds: Arc<AtomicUsize>,
}

impl SqliteQueryQueue {
    pub fn new(pool: SqlitePool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
            feeds: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of polling tasks still running.
    pub fn active_feeds(&self) -> usize {
        self.feeds.load(Ordering::SeqCst)
    }

    pub async fn get(&self, id: &str) -> Result<Option<QueryRequest>> {
        fetch_request(&self.pool, id).await
    }

    /// Records still waiting for the indexing service, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<QueryRequest>> {
        let rows = sqlx::query(
            "SELECT id, query_text, submitted_at, status, results_json, error_message \
             FROM query_requests WHERE status = 'pending' ORDER BY submitted_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_request).collect()
    }

    /// Mark a pending record `complete` with `results` ordered best first.
    ///
    /// Returns `false` if the record does not exist or is already terminal.
    pub async fn complete(&self, id: &str, results: &[Match]) -> Result<bool> {
        let results_json = serde_json::to_string(results)?;
        let done = sqlx::query(
            "UPDATE query_requests SET status = 'complete', results_json = ?, updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(results_json)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }

    /// Mark a pending record `error`.
    ///
    /// Returns `false` if the record does not exist or is already terminal.
    pub async fn fail(&self, id: &str, message: Option<&str>) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE query_requests SET status = 'error', error_message = ?, updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(message)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }
}

#[async_trait]
impl QueryQueue for SqliteQueryQueue {
    async fn create(&self, request: &QueryRequest) -> Result<String> {
        let results_json = request
            .results
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO query_requests (id, query_text, submitted_at, status, results_json, error_message, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.id)
        .bind(&request.query_text)
        .bind(request.submitted_at.timestamp_millis())
        .bind(request.status.as_str())
        .bind(results_json)
        .bind(&request.error_message)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert query request")?;

        Ok(request.id.clone())
    }

    async fn subscribe(&self, id: &str) -> Result<Subscription> {
        let initial = fetch_request(&self.pool, id)
            .await?
            .ok_or_else(|| anyhow!("query request not found: {}", id))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(SubscriptionEvent::Snapshot(initial.clone()));

        let guard = FeedGuard::new(self.feeds.clone());
        tokio::spawn(poll_record(
            self.pool.clone(),
            id.to_string(),
            self.poll_interval,
            initial,
            tx,
            guard,
        ));

        Ok(Subscription::new(rx))
    }
}

/// Counts a polling task as active until it is dropped.
struct FeedGuard(Arc<AtomicUsize>);

impl FeedGuard {
    fn new(feeds: Arc<AtomicUsize>) -> Self {
        feeds.fetch_add(1, Ordering::SeqCst);
        Self(feeds)
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn poll_record(
    pool: SqlitePool,
    id: String,
    poll_interval: Duration,
    mut last: QueryRequest,
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
    _guard: FeedGuard,
) {
    // Terminal records are never rewritten, so there is nothing to watch.
    if last.status.is_terminal() {
        return;
    }

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial snapshot was already sent.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            _ = ticker.tick() => {}
        }

        match fetch_request(&pool, &id).await {
            Ok(Some(current)) => {
                if current != last {
                    let terminal = current.status.is_terminal();
                    last = current.clone();
                    if tx.send(SubscriptionEvent::Snapshot(current)).is_err() || terminal {
                        break;
                    }
                }
            }
            Ok(None) => {
                let _ = tx.send(SubscriptionEvent::Failed(format!(
                    "query request {} no longer exists",
                    id
                )));
                break;
            }
            Err(e) => {
                tracing::warn!(request_id = %id, error = %e, "change feed poll failed");
                let _ = tx.send(SubscriptionEvent::Failed(e.to_string()));
                break;
            }
        }
    }

    tracing::debug!(request_id = %id, "change feed stopped");
}

async fn fetch_request(pool: &SqlitePool, id: &str) -> Result<Option<QueryRequest>> {
    let row = sqlx::query(SELECT_REQUEST)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_request).transpose()
}

fn row_to_request(row: &SqliteRow) -> Result<QueryRequest> {
    let status: String = row.get("status");
    let results_json: Option<String> = row.get("results_json");
    let submitted_at: i64 = row.get("submitted_at");

    let results = results_json
        .map(|json| serde_json::from_str::<Vec<Match>>(&json))
        .transpose()
        .context("Malformed results_json")?;

    Ok(QueryRequest {
        id: row.get("id"),
        query_text: row.get("query_text"),
        submitted_at: from_millis(submitted_at),
        status: status.parse::<QueryStatus>().map_err(|e| anyhow!(e))?,
        results,
        error_message: row.get("error_message"),
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
}

impl SqliteKnowledgeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Entries created from the given object path, oldest first.
    pub async fn find_by_source(&self, source_file_path: &str) -> Result<Vec<KnowledgeEntry>> {
        let rows = sqlx::query(
            "SELECT id, extracted_text, source_file_path, created_at FROM knowledge_entries \
             WHERE source_file_path = ? ORDER BY created_at ASC",
        )
        .bind(source_file_path)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| KnowledgeEntry {
                id: row.get("id"),
                extracted_text: row.get("extracted_text"),
                source_file_path: row.get("source_file_path"),
                created_at: from_millis(row.get("created_at")),
            })
            .collect())
    }
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn append(&self, entry: &KnowledgeEntry) -> Result<String> {
        sqlx::query(
            "INSERT INTO knowledge_entries (id, extracted_text, source_file_path, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.extracted_text)
        .bind(&entry.source_file_path)
        .bind(entry.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert knowledge entry")?;

        Ok(entry.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("kdesk.sqlite"))
            .await
            .unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        (tmp, pool)
    }

    fn hit(path: &str) -> Match {
        Match {
            source_document_path: path.to_string(),
            text_snippet: "snippet".to_string(),
            distance_score: 0.1,
        }
    }

    #[tokio::test]
    async fn create_and_read_back() {
        let (_tmp, pool) = setup().await;
        let queue = SqliteQueryQueue::new(pool, Duration::from_millis(10));
        let req = QueryRequest::pending("bonus");
        let id = queue.create(&req).await.unwrap();

        let stored = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.query_text, "bonus");
        assert_eq!(stored.status, QueryStatus::Pending);
        assert_eq!(queue.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn respond_applies_only_once() {
        let (_tmp, pool) = setup().await;
        let queue = SqliteQueryQueue::new(pool, Duration::from_millis(10));
        let id = queue.create(&QueryRequest::pending("q")).await.unwrap();

        assert!(queue.complete(&id, &[hit("a.xlsx")]).await.unwrap());
        assert!(!queue.fail(&id, Some("late")).await.unwrap());
        assert!(!queue.complete(&id, &[]).await.unwrap());

        let stored = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueryStatus::Complete);
        assert_eq!(stored.results.unwrap()[0].source_document_path, "a.xlsx");
        assert!(stored.error_message.is_none());
        assert!(queue.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn change_feed_emits_transition() {
        let (_tmp, pool) = setup().await;
        let queue = SqliteQueryQueue::new(pool, Duration::from_millis(10));
        let id = queue.create(&QueryRequest::pending("q")).await.unwrap();

        let mut sub = queue.subscribe(&id).await.unwrap();
        match sub.next().await {
            Some(SubscriptionEvent::Snapshot(r)) => assert_eq!(r.status, QueryStatus::Pending),
            other => panic!("unexpected event: {:?}", other),
        }

        queue.fail(&id, Some("index offline")).await.unwrap();
        match sub.next().await {
            Some(SubscriptionEvent::Snapshot(r)) => {
                assert_eq!(r.status, QueryStatus::Error);
                assert_eq!(r.error_message.as_deref(), Some("index offline"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        sub.close();
    }

    async fn wait_for_feeds(queue: &SqliteQueryQueue, expected: usize) {
        for _ in 0..200 {
            if queue.active_feeds() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} active feeds, found {}", expected, queue.active_feeds());
    }

    #[tokio::test]
    async fn closed_subscription_stops_polling() {
        let (_tmp, pool) = setup().await;
        let queue = SqliteQueryQueue::new(pool, Duration::from_millis(10));
        let id = queue.create(&QueryRequest::pending("q")).await.unwrap();

        let mut sub = queue.subscribe(&id).await.unwrap();
        assert_eq!(queue.active_feeds(), 1);
        sub.next().await;

        sub.close();
        wait_for_feeds(&queue, 0).await;

        assert!(queue.fail(&id, Some("too late")).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn terminal_snapshot_ends_the_feed() {
        let (_tmp, pool) = setup().await;
        let queue = SqliteQueryQueue::new(pool, Duration::from_millis(10));
        let id = queue.create(&QueryRequest::pending("q")).await.unwrap();

        let mut sub = queue.subscribe(&id).await.unwrap();
        sub.next().await;
        queue.complete(&id, &[hit("a.xlsx")]).await.unwrap();

        match sub.next().await {
            Some(SubscriptionEvent::Snapshot(r)) => assert_eq!(r.status, QueryStatus::Complete),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(sub.next().await.is_none());
        wait_for_feeds(&queue, 0).await;
    }

    #[tokio::test]
    async fn change_feed_reports_deleted_record() {
        let (_tmp, pool) = setup().await;
        let queue = SqliteQueryQueue::new(pool.clone(), Duration::from_millis(10));
        let id = queue.create(&QueryRequest::pending("q")).await.unwrap();

        let mut sub = queue.subscribe(&id).await.unwrap();
        sub.next().await;

        sqlx::query("DELETE FROM query_requests WHERE id = ?")
            .bind(&id)
            .execute(&pool)
            .await
            .unwrap();

        assert!(matches!(sub.next().await, Some(SubscriptionEvent::Failed(_))));
    }

    #[tokio::test]
    async fn knowledge_entries_are_appended() {
        let (_tmp, pool) = setup().await;
        let store = SqliteKnowledgeStore::new(pool);
        store
            .append(&KnowledgeEntry::new("a,b".into(), "uploads/report.xlsx"))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let found = store.find_by_source("uploads/report.xlsx").await.unwrap();
        assert_eq!(found[0].extracted_text, "a,b");
    }
}
