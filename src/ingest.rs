//! Ingestion trigger for finalized object uploads.
//!
//! Flow per event: object path → suffix classification → download →
//! extraction → one [`KnowledgeEntry`]. Every failure is logged and
//! contained: the caller only receives an [`IngestOutcome`] describing what
//! happened, never an error, and nothing is retried.

use std::sync::Arc;

use serde::Deserialize;

use crate::extract::{extract_text, DocumentKind};
use crate::models::KnowledgeEntry;
use crate::store::KnowledgeStore;
use crate::traits::ObjectSource;

/// Notification that an object finished uploading.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadEvent {
    pub bucket: String,
    /// Object path within the bucket. Some providers omit it for
    /// folder placeholders.
    #[serde(default)]
    pub name: Option<String>,
}

impl UploadEvent {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingPath,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored { entry_id: String, kind: DocumentKind },
    Skipped(SkipReason),
    /// Download, extraction or write failed; the message is also logged.
    Failed(String),
}

pub struct IngestionTrigger {
    objects: Arc<dyn ObjectSource>,
    store: Arc<dyn KnowledgeStore>,
}

impl IngestionTrigger {
    pub fn new(objects: Arc<dyn ObjectSource>, store: Arc<dyn KnowledgeStore>) -> Self {
        Self { objects, store }
    }

    pub async fn handle(&self, event: &UploadEvent) -> IngestOutcome {
        let path = match event.name.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => p,
            _ => {
                tracing::info!(bucket = %event.bucket, "upload event without object path, ignoring");
                return IngestOutcome::Skipped(SkipReason::MissingPath);
            }
        };

        let kind = match DocumentKind::from_path(path) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::info!(bucket = %event.bucket, path, reason = %e, "skipping upload");
                return IngestOutcome::Skipped(SkipReason::Unsupported);
            }
        };

        let bytes = match self.objects.fetch(&event.bucket, path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(
                    bucket = %event.bucket,
                    path,
                    source = self.objects.kind(),
                    error = %e,
                    "download failed"
                );
                return IngestOutcome::Failed(format!("download failed: {}", e));
            }
        };

        let text = match extract_text(&bytes, kind) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(bucket = %event.bucket, path, kind = kind.as_str(), error = %e, "extraction failed");
                return IngestOutcome::Failed(e.to_string());
            }
        };

        let entry = KnowledgeEntry::new(text, path);
        match self.store.append(&entry).await {
            Ok(entry_id) => {
                tracing::info!(
                    bucket = %event.bucket,
                    path,
                    kind = kind.as_str(),
                    chars = entry.extracted_text.chars().count(),
                    entry_id = %entry_id,
                    "knowledge entry stored"
                );
                IngestOutcome::Stored { entry_id, kind }
            }
            Err(e) => {
                tracing::error!(bucket = %event.bucket, path, error = %e, "failed to store knowledge entry");
                IngestOutcome::Failed(format!("store failed: {}", e))
            }
        }
    }
}
