//! Asynchronous query broker.
//!
//! Turns a synchronous query into a bounded round trip against the external
//! indexing service. The service has no request/response channel: the broker
//! writes a `pending` [`QueryRequest`], subscribes to that record, and waits
//! until the service rewrites it to `complete` or `error`.
//!
//! ```text
//!   create(pending) ──▶ subscribe(id) ──▶ select! ─┬─ snapshot(complete) ─▶ Ok(outcome)
//!                                                  ├─ snapshot(error)    ─▶ ExternalService
//!                                                  ├─ feed failed/ended  ─▶ Subscription
//!                                                  └─ timer              ─▶ Timeout
//! ```
//!
//! The `select!` is the single-resolution latch: the first branch to fire
//! breaks the loop and the others are dropped. The subscription is closed on
//! every path, so no snapshot is delivered after the outcome is decided.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ScoreConvention;
use crate::error::QueryError;
use crate::models::{QueryOutcome, QueryRequest, QueryStatus};
use crate::store::{QueryQueue, SubscriptionEvent};
use crate::traits::QueryResolver;

pub struct QueryBroker {
    queue: Arc<dyn QueryQueue>,
    timeout: Duration,
    score: ScoreConvention,
}

impl QueryBroker {
    pub fn new(queue: Arc<dyn QueryQueue>, timeout: Duration) -> Self {
        Self {
            queue,
            timeout,
            score: ScoreConvention::default(),
        }
    }

    pub fn with_score_convention(mut self, score: ScoreConvention) -> Self {
        self.score = score;
        self
    }

    /// Submit `query_text` and wait at most `timeout` for a terminal state.
    pub async fn submit_and_await(
        &self,
        query_text: &str,
        timeout: Duration,
    ) -> Result<QueryOutcome, QueryError> {
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return Err(QueryError::invalid_argument("query must not be empty"));
        }

        let request = QueryRequest::pending(query_text);
        let id = self
            .queue
            .create(&request)
            .await
            .map_err(|e| QueryError::Store(e.to_string()))?;
        tracing::info!(request_id = %id, "query submitted");

        let mut subscription = self
            .queue
            .subscribe(&id)
            .await
            .map_err(|e| QueryError::Subscription(e.to_string()))?;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                event = subscription.next() => match event {
                    Some(SubscriptionEvent::Snapshot(record)) => {
                        if let Some(outcome) = settle(&record) {
                            break outcome;
                        }
                    }
                    Some(SubscriptionEvent::Failed(message)) => {
                        break Err(QueryError::Subscription(message));
                    }
                    None => {
                        break Err(QueryError::Subscription("change feed ended".to_string()));
                    }
                },
                _ = &mut deadline => break Err(QueryError::Timeout(timeout)),
            }
        };

        subscription.close();

        match &outcome {
            Ok(QueryOutcome::Match(m)) => {
                tracing::info!(request_id = %id, source = %m.source_document_path, "query resolved")
            }
            Ok(QueryOutcome::NoMatch) => tracing::info!(request_id = %id, "query resolved without match"),
            Err(e) => tracing::warn!(request_id = %id, error = %e, "query failed"),
        }

        outcome
    }
}

/// Maps a snapshot to an outcome, or `None` while the record is pending.
fn settle(record: &QueryRequest) -> Option<Result<QueryOutcome, QueryError>> {
    match record.status {
        QueryStatus::Pending => None,
        QueryStatus::Complete => {
            let best = record
                .results
                .as_ref()
                .and_then(|results| results.first())
                .cloned();
            Some(Ok(best.map_or(QueryOutcome::NoMatch, QueryOutcome::Match)))
        }
        QueryStatus::Error => Some(Err(QueryError::external_service(
            record.error_message.as_deref(),
        ))),
    }
}

#[async_trait]
impl QueryResolver for QueryBroker {
    fn name(&self) -> &str {
        "broker"
    }

    fn score_convention(&self) -> ScoreConvention {
        self.score
    }

    async fn resolve(&self, query_text: &str) -> Result<QueryOutcome, QueryError> {
        self.submit_and_await(query_text, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GENERIC_SERVICE_ERROR;
    use crate::models::Match;
    use crate::store::memory::InMemoryQueryQueue;

    const PATIENT: Duration = Duration::from_secs(5);

    fn hit(path: &str, score: f64) -> Match {
        Match {
            source_document_path: path.to_string(),
            text_snippet: format!("from {}", path),
            distance_score: score,
        }
    }

    fn broker(queue: &Arc<InMemoryQueryQueue>) -> QueryBroker {
        QueryBroker::new(queue.clone(), PATIENT)
    }

    /// Waits until the broker has created its record and subscribed to it.
    async fn watched_record(queue: &InMemoryQueryQueue) -> String {
        loop {
            if let Some(id) = queue.ids().first().cloned() {
                if queue.active_subscriptions(&id) > 0 {
                    return id;
                }
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn blank_query_is_rejected_without_writes() {
        let queue = Arc::new(InMemoryQueryQueue::new());
        let b = broker(&queue);

        for text in ["", "   ", "\t\n"] {
            let err = b.submit_and_await(text, PATIENT).await.unwrap_err();
            assert!(matches!(err, QueryError::InvalidArgument(_)));
        }
        assert_eq!(queue.create_count(), 0);
    }

    #[tokio::test]
    async fn complete_resolves_with_first_match_and_tears_down() {
        let queue = Arc::new(InMemoryQueryQueue::new());
        let b = broker(&queue);
        let task = tokio::spawn(async move { b.submit_and_await("  bonus 2023 ", PATIENT).await });

        let id = watched_record(&queue).await;
        assert_eq!(queue.get(&id).unwrap().query_text, "bonus 2023");
        queue.complete(&id, vec![hit("best.xlsx", 0.1), hit("other.docx", 0.7)]);

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, QueryOutcome::Match(hit("best.xlsx", 0.1)));

        assert_eq!(queue.active_subscriptions(&id), 0);
        assert_eq!(queue.teardown_count(), 1);
        assert_eq!(queue.fail(&id, Some("late")), 0);
    }

    #[tokio::test]
    async fn complete_with_empty_results_is_no_match() {
        let queue = Arc::new(InMemoryQueryQueue::new());
        let b = broker(&queue);
        let task = tokio::spawn(async move { b.submit_and_await("nothing", PATIENT).await });

        let id = watched_record(&queue).await;
        queue.complete(&id, vec![]);

        assert_eq!(task.await.unwrap().unwrap(), QueryOutcome::NoMatch);
    }

    #[tokio::test]
    async fn complete_without_results_field_is_no_match() {
        let queue = Arc::new(InMemoryQueryQueue::new());
        let b = broker(&queue);
        let task = tokio::spawn(async move { b.submit_and_await("nothing", PATIENT).await });

        let id = watched_record(&queue).await;
        queue.mutate(&id, |r| r.status = QueryStatus::Complete);

        assert_eq!(task.await.unwrap().unwrap(), QueryOutcome::NoMatch);
    }

    #[tokio::test]
    async fn service_error_carries_message() {
        let queue = Arc::new(InMemoryQueryQueue::new());
        let b = broker(&queue);
        let task = tokio::spawn(async move { b.submit_and_await("q", PATIENT).await });

        let id = watched_record(&queue).await;
        queue.fail(&id, Some("X"));

        assert_eq!(
            task.await.unwrap().unwrap_err(),
            QueryError::ExternalService("X".to_string())
        );
        assert_eq!(queue.teardown_count(), 1);
    }

    #[tokio::test]
    async fn service_error_without_message_uses_fallback() {
        let queue = Arc::new(InMemoryQueryQueue::new());
        let b = broker(&queue);
        let task = tokio::spawn(async move { b.submit_and_await("q", PATIENT).await });

        let id = watched_record(&queue).await;
        queue.fail(&id, None);

        assert_eq!(
            task.await.unwrap().unwrap_err(),
            QueryError::ExternalService(GENERIC_SERVICE_ERROR.to_string())
        );
    }

    #[tokio::test]
    async fn silence_times_out_and_tears_down_once() {
        let queue = Arc::new(InMemoryQueryQueue::new());
        let timeout = Duration::from_millis(40);

        let err = broker(&queue)
            .submit_and_await("q", timeout)
            .await
            .unwrap_err();

        assert_eq!(err, QueryError::Timeout(timeout));
        assert_eq!(queue.teardown_count(), 1);
        let id = queue.ids()[0].clone();
        assert_eq!(queue.active_subscriptions(&id), 0);
        assert_eq!(queue.complete(&id, vec![hit("late.xlsx", 0.0)]), 0);
    }

    #[tokio::test]
    async fn first_terminal_transition_wins() {
        let queue = Arc::new(InMemoryQueryQueue::new());
        let b = broker(&queue);
        let task = tokio::spawn(async move { b.submit_and_await("q", PATIENT).await });

        let id = watched_record(&queue).await;
        queue.complete(&id, vec![hit("first.xlsx", 0.2)]);
        queue.fail(&id, Some("out of order"));

        assert_eq!(
            task.await.unwrap().unwrap(),
            QueryOutcome::Match(hit("first.xlsx", 0.2))
        );
        assert_eq!(queue.teardown_count(), 1);
    }

    #[tokio::test]
    async fn pending_updates_keep_waiting() {
        let queue = Arc::new(InMemoryQueryQueue::new());
        let b = broker(&queue);
        let task = tokio::spawn(async move { b.submit_and_await("q", PATIENT).await });

        let id = watched_record(&queue).await;
        queue.mutate(&id, |r| r.results = Some(vec![hit("partial.xlsx", 0.9)]));
        queue.complete(&id, vec![hit("final.xlsx", 0.3)]);

        assert_eq!(
            task.await.unwrap().unwrap(),
            QueryOutcome::Match(hit("final.xlsx", 0.3))
        );
    }

    #[tokio::test]
    async fn feed_failure_is_a_subscription_error() {
        let queue = Arc::new(InMemoryQueryQueue::new());
        let b = broker(&queue);
        let task = tokio::spawn(async move { b.submit_and_await("q", PATIENT).await });

        let id = watched_record(&queue).await;
        queue.break_feed(&id, "connection reset");

        assert_eq!(
            task.await.unwrap().unwrap_err(),
            QueryError::Subscription("connection reset".to_string())
        );
        assert_eq!(queue.active_subscriptions(&id), 0);
    }

    #[tokio::test]
    async fn create_failure_is_a_store_error() {
        let queue = Arc::new(InMemoryQueryQueue::new());
        queue.set_unavailable(true);

        let err = broker(&queue)
            .submit_and_await("q", PATIENT)
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Store(_)));
        assert_eq!(queue.teardown_count(), 0);
    }

    #[tokio::test]
    async fn resolver_uses_configured_timeout() {
        let queue = Arc::new(InMemoryQueryQueue::new());
        let b = QueryBroker::new(queue.clone(), Duration::from_millis(20))
            .with_score_convention(ScoreConvention::Similarity);

        assert_eq!(b.score_convention(), ScoreConvention::Similarity);
        assert_eq!(
            b.resolve("q").await.unwrap_err(),
            QueryError::Timeout(Duration::from_millis(20))
        );
    }
}
