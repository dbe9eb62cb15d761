/// Service layer for image ingestion and retrieval
///
/// This module provides business logic for:
/// - Identifier generation
/// - Pending-state tracking
/// - Filesystem variant storage
/// - The background ingestion pipeline
/// - Read-time resolution and deletion
use bytes::Bytes;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::Result;
use crate::metrics::UPLOADS_TOTAL;
use crate::models::{Identifier, UploadOptions, VariantRequest};

pub mod deletion;
pub mod identifier;
pub mod ingest;
pub mod pending;
pub mod retrieval;
pub mod storage;

pub use deletion::DeletionHandler;
pub use identifier::IdentifierGenerator;
pub use ingest::{ImageProcessor, IngestJob, IngestOutcome, IngestReport, IngestionPipeline};
pub use pending::{PendingGuard, PendingRegistry};
pub use retrieval::{Resolution, RetrievalResolver};
pub use storage::{AssetLayout, VariantStore};

/// Accepted upload handed to the pipeline
pub struct Submission {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
    pub options: UploadOptions,
}

/// Entry point shared by the HTTP handlers
#[derive(Clone)]
pub struct ImageService {
    generator: IdentifierGenerator,
    registry: Arc<PendingRegistry>,
    store: Arc<VariantStore>,
    pipeline: Arc<IngestionPipeline>,
    resolver: RetrievalResolver,
    deletion: DeletionHandler,
    retry_after_secs: u64,
}

impl ImageService {
    /// Wire up the service from configuration
    pub fn new(config: &Config) -> Self {
        let store = Arc::new(VariantStore::new(config.storage.root.clone()));
        let registry = Arc::new(PendingRegistry::new());
        Self::with_parts(config, registry, store)
    }

    pub fn with_parts(
        config: &Config,
        registry: Arc<PendingRegistry>,
        store: Arc<VariantStore>,
    ) -> Self {
        let pipeline = Arc::new(IngestionPipeline::new(
            store.clone(),
            ImageProcessor::new(config.ingest.jpeg_quality),
            config.ingest.timeout,
        ));

        Self {
            generator: IdentifierGenerator::new(),
            resolver: RetrievalResolver::new(registry.clone(), store.clone()),
            deletion: DeletionHandler::new(
                registry.clone(),
                store.clone(),
                config.ingest.retry_after_secs,
            ),
            registry,
            store,
            pipeline,
            retry_after_secs: config.ingest.retry_after_secs,
        }
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<VariantStore> {
        &self.store
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_secs
    }

    /// Assign an identifier, mark it pending and start ingestion.
    ///
    /// The identifier is pending before this returns, so a client polling
    /// right after the upload response sees "pending", never "not found".
    pub fn submit(&self, submission: Submission) -> (Identifier, JoinHandle<IngestReport>) {
        let id = self.generator.generate(&submission.filename);
        let guard = self.registry.begin(id.clone());
        UPLOADS_TOTAL.inc();

        tracing::info!(
            image_id = %id,
            filename = %submission.filename,
            size = submission.data.len(),
            variants = submission.options.descriptors().len(),
            save_original = submission.options.save_original,
            "upload accepted"
        );

        let job = IngestJob {
            id: id.clone(),
            data: submission.data,
            content_type: submission.content_type,
            options: submission.options,
        };
        let handle = self.pipeline.spawn(guard, job);
        (id, handle)
    }

    pub async fn resolve(&self, id: &Identifier, request: VariantRequest) -> Result<Resolution> {
        Ok(self.resolver.resolve(id, request).await?)
    }

    pub async fn delete(&self, id: &Identifier) -> Result<()> {
        self.deletion.delete(id).await
    }
}
