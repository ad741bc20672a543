//! Process-wide application context.
//!
//! Built once at startup from the loaded [`Config`] and shared behind an
//! [`Arc`] by the HTTP server and the CLI commands. Everything in here is
//! immutable after construction.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::broker::QueryBroker;
use crate::config::{Config, StorageBackend};
use crate::db;
use crate::ingest::IngestionTrigger;
use crate::lookup::StaticLookup;
use crate::source_fs::LocalObjectSource;
use crate::source_s3::S3ObjectSource;
use crate::store::sqlite::{SqliteKnowledgeStore, SqliteQueryQueue};
use crate::traits::{ObjectSource, QueryResolver};

pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
    /// Present only when `[broker]` is configured.
    pub queue: Option<Arc<SqliteQueryQueue>>,
    pub resolver: Arc<dyn QueryResolver>,
    pub ingestion: Arc<IngestionTrigger>,
}

impl AppContext {
    /// Connects to the database and wires the resolver and ingestion
    /// trigger for the configured backends. Migrations are not applied
    /// here; run `kdesk init` first.
    pub async fn init(config: &Config) -> Result<Arc<Self>> {
        let pool = db::connect(config).await?;

        let (queue, resolver): (Option<Arc<SqliteQueryQueue>>, Arc<dyn QueryResolver>) =
            match &config.broker {
                Some(broker) => {
                    let queue = Arc::new(SqliteQueryQueue::new(
                        pool.clone(),
                        broker.poll_interval(),
                    ));
                    let resolver = QueryBroker::new(queue.clone(), broker.timeout())
                        .with_score_convention(broker.score);
                    (Some(queue), Arc::new(resolver))
                }
                None => (None, Arc::new(StaticLookup::new())),
            };

        let objects: Arc<dyn ObjectSource> = match config.storage.backend {
            StorageBackend::Filesystem => Arc::new(LocalObjectSource::new(
                config.storage.root.clone(),
                config.storage.max_object_bytes,
            )),
            StorageBackend::S3 => Arc::new(S3ObjectSource::new(&config.storage)),
        };

        let knowledge = Arc::new(SqliteKnowledgeStore::new(pool.clone()));
        let ingestion = Arc::new(IngestionTrigger::new(objects.clone(), knowledge));

        tracing::info!(
            resolver = resolver.name(),
            storage = objects.kind(),
            db = %config.db.path.display(),
            "application context ready"
        );

        Ok(Arc::new(Self {
            config: config.clone(),
            pool,
            queue,
            resolver,
            ingestion,
        }))
    }
}
