//! Core data models shared by the query broker, the ingestion trigger and
//! the HTTP layer.
//!
//! [`QueryRequest`] and [`Match`] are the wire contract with the external
//! indexing service: their serialized field names and the lowercase
//! [`QueryStatus`] values must not change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a [`QueryRequest`].
///
/// `Pending` is the only non-terminal state. A record moves from `Pending`
/// to exactly one of `Complete` or `Error` and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Pending,
    Complete,
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Complete => "complete",
            QueryStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueryStatus::Pending)
    }
}

impl std::str::FromStr for QueryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueryStatus::Pending),
            "complete" => Ok(QueryStatus::Complete),
            "error" => Ok(QueryStatus::Error),
            other => Err(format!("unknown query status: '{}'", other)),
        }
    }
}

/// A single hit reported by the indexing service.
///
/// The meaning of `distance_score` is owned by the service; see
/// [`ScoreConvention`](crate::config::ScoreConvention) for how it becomes a
/// confidence value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub source_document_path: String,
    pub text_snippet: String,
    pub distance_score: f64,
}

/// A query submitted to the pending-queue collection.
///
/// Created by the broker, mutated only by the external indexing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub id: String,
    pub query_text: String,
    pub submitted_at: DateTime<Utc>,
    pub status: QueryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Match>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl QueryRequest {
    /// A fresh `pending` record with a random id.
    pub fn pending(query_text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query_text: query_text.into(),
            submitted_at: Utc::now(),
            status: QueryStatus::Pending,
            results: None,
            error_message: None,
        }
    }
}

/// Extracted text of one processed upload. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub id: String,
    pub extracted_text: String,
    pub source_file_path: String,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn new(extracted_text: String, source_file_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            extracted_text,
            source_file_path: source_file_path.into(),
            created_at: Utc::now(),
        }
    }
}

/// Terminal result of a successful query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// The best-ranked match.
    Match(Match),
    /// The service completed the query without any result.
    NoMatch,
}
