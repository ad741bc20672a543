//! Seams between the HTTP/event layer and its collaborators.
//!
//! - [`QueryResolver`] answers a query. The [`QueryBroker`](crate::broker::QueryBroker)
//!   implements it against the external indexing service; the
//!   [`StaticLookup`](crate::lookup::StaticLookup) implements it when no
//!   service is configured.
//! - [`ObjectSource`] downloads uploaded objects for the ingestion trigger
//!   (S3 or a local directory).

use anyhow::Result;
use async_trait::async_trait;

use crate::config::ScoreConvention;
use crate::error::QueryError;
use crate::models::QueryOutcome;

/// Something that can turn query text into a [`QueryOutcome`].
#[async_trait]
pub trait QueryResolver: Send + Sync {
    /// Short identifier used in logs (e.g. `"broker"`, `"static"`).
    fn name(&self) -> &str;

    /// How this resolver's match scores translate to confidence.
    fn score_convention(&self) -> ScoreConvention {
        ScoreConvention::Distance
    }

    /// Answer `query_text`. Empty or whitespace-only input must fail with
    /// [`QueryError::InvalidArgument`] before any I/O.
    async fn resolve(&self, query_text: &str) -> Result<QueryOutcome, QueryError>;
}

/// Read access to uploaded objects.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Backend identifier used in logs (e.g. `"s3"`, `"filesystem"`).
    fn kind(&self) -> &str;

    /// Download the full object into memory.
    async fn fetch(&self, bucket: &str, path: &str) -> Result<Vec<u8>>;
}
