//! Ingestion pipeline - persists an upload and derives its variants
//!
//! One run per upload, spawned after the identifier has been marked pending:
//! 1. Write the flat blob when no variants were requested, and stop
//! 2. Create the identifier's container
//! 3. Write the original verbatim, if requested (before any decoding)
//! 4. Decode; a decode failure ends the run
//! 5. Render and write each resize target, then the scale variant
//! 6. Clear pending (via `PendingGuard`) once every step has been attempted
//!
//! Steps after the container is created are best-effort: a failed write is
//! logged and the next step still runs. Nothing already written is rolled back.
//!
//! A run that outlives its timeout is asked to stop at the next step
//! boundary. The identifier stays pending until the step in flight has
//! settled, so no write can land after the pending flag is cleared.

use bytes::Bytes;
use image::DynamicImage;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::processor::{ImageProcessor, RenderedVariant, SourceFormat};
use crate::error::IngestError;
use crate::metrics::{INGEST_RUNS_TOTAL, INGEST_STEPS_TOTAL};
use crate::models::{Identifier, UploadOptions, VariantDescriptor, ORIGINAL_NAME};
use crate::services::pending::PendingGuard;
use crate::services::storage::VariantStore;

/// Everything a run needs besides the shared services
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub id: Identifier,
    pub data: Bytes,
    /// Declared content type of the upload, if any
    pub content_type: Option<String>,
    pub options: UploadOptions,
}

/// One pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStep {
    WriteFlat,
    CreateContainer,
    WriteOriginal,
    Decode,
    Variant(VariantDescriptor),
}

impl IngestStep {
    fn label(&self) -> &'static str {
        match self {
            Self::WriteFlat => "write_flat",
            Self::CreateContainer => "create_container",
            Self::WriteOriginal => "write_original",
            Self::Decode => "decode",
            Self::Variant(VariantDescriptor::Resize { .. }) => "resize",
            Self::Variant(VariantDescriptor::Scale(_)) => "scale",
        }
    }

    /// Steps that leave a blob behind on success
    fn writes_blob(&self) -> bool {
        !matches!(self, Self::CreateContainer | Self::Decode)
    }
}

impl fmt::Display for IngestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variant(descriptor) => write!(f, "variant {descriptor}"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug)]
pub struct StepRecord {
    pub step: IngestStep,
    pub result: Result<(), IngestError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Every requested step succeeded
    Complete,
    /// Some blobs were written, some steps failed
    PartiallyComplete,
    /// No blob was written
    Failed,
    /// The run exceeded its time budget and was dropped
    TimedOut,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::PartiallyComplete => "partial",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Per-step account of one run
#[derive(Debug)]
pub struct IngestReport {
    pub id: Identifier,
    pub steps: Vec<StepRecord>,
    pub outcome: IngestOutcome,
}

impl IngestReport {
    fn new(id: Identifier) -> Self {
        Self {
            id,
            steps: Vec::new(),
            outcome: IngestOutcome::Failed,
        }
    }

    fn record(&mut self, step: IngestStep, result: Result<(), IngestError>) -> bool {
        let ok = result.is_ok();
        let status = if ok { "ok" } else { "error" };
        INGEST_STEPS_TOTAL
            .with_label_values(&[step.label(), status])
            .inc();

        match &result {
            Ok(()) => debug!(image_id = %self.id, %step, "ingest step succeeded"),
            Err(e) => warn!(image_id = %self.id, %step, error = %e, "ingest step failed"),
        }

        self.steps.push(StepRecord { step, result });
        ok
    }

    fn finish(mut self) -> Self {
        let failed = self.steps.iter().any(|s| s.result.is_err());
        let wrote = self
            .steps
            .iter()
            .any(|s| s.step.writes_blob() && s.result.is_ok());

        self.outcome = match (failed, wrote) {
            (false, _) => IngestOutcome::Complete,
            (true, true) => IngestOutcome::PartiallyComplete,
            (true, false) => IngestOutcome::Failed,
        };
        self
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.result.is_err())
    }
}

/// Background decode/transform/persist pipeline
pub struct IngestionPipeline {
    store: Arc<VariantStore>,
    processor: Arc<ImageProcessor>,
    timeout: Duration,
}

impl IngestionPipeline {
    pub fn new(store: Arc<VariantStore>, processor: ImageProcessor, timeout: Duration) -> Self {
        Self {
            store,
            processor: Arc::new(processor),
            timeout,
        }
    }

    /// Run the job on its own task. The identifier stays pending until the
    /// run has settled, because the guard is dropped only then.
    pub fn spawn(self: &Arc<Self>, guard: PendingGuard, job: IngestJob) -> JoinHandle<IngestReport> {
        let pipeline = Arc::clone(self);

        tokio::spawn(async move {
            let id = job.id.clone();
            let cancel = Arc::new(AtomicBool::new(false));
            let mut work = {
                let pipeline = Arc::clone(&pipeline);
                let cancel = Arc::clone(&cancel);
                tokio::spawn(async move { pipeline.run_until(&job, &cancel).await })
            };

            let report = match tokio::time::timeout(pipeline.timeout, &mut work).await {
                Ok(joined) => settled(&id, joined),
                Err(_) => {
                    cancel.store(true, Ordering::Release);
                    let err = IngestError::TimedOut(pipeline.timeout);
                    error!(image_id = %id, error = %err, "ingestion aborted");

                    // Blocking-pool writes cannot be cancelled; wait for them
                    let mut report = settled(&id, work.await);
                    report.outcome = IngestOutcome::TimedOut;
                    report
                }
            };

            INGEST_RUNS_TOTAL
                .with_label_values(&[report.outcome.as_str()])
                .inc();
            info!(
                image_id = %report.id,
                outcome = report.outcome.as_str(),
                steps = report.steps.len(),
                failed_steps = report.failures().count(),
                "ingestion finished"
            );

            drop(guard);
            report
        })
    }

    /// Attempt every requested step in order. Does not touch pending state.
    pub async fn run(&self, job: &IngestJob) -> IngestReport {
        self.run_until(job, &AtomicBool::new(false)).await
    }

    /// Like `run`, but stops before the next step once `cancel` is set.
    async fn run_until(&self, job: &IngestJob, cancel: &AtomicBool) -> IngestReport {
        let mut report = IngestReport::new(job.id.clone());
        let id = &job.id;
        let stopped = || cancel.load(Ordering::Acquire);

        if stopped() {
            return report.finish();
        }

        if !job.options.has_variants() {
            let result = self
                .store
                .write_flat(id, &job.data)
                .await
                .map_err(|e| IngestError::storage("write_flat", e));
            report.record(IngestStep::WriteFlat, result);
            return report.finish();
        }

        let created = self
            .store
            .create_container(id)
            .await
            .map_err(|e| IngestError::storage("create_container", e));
        if !report.record(IngestStep::CreateContainer, created) {
            return report.finish();
        }

        if job.options.save_original && !stopped() {
            let result = self
                .store
                .write_blob(id, ORIGINAL_NAME, &job.data)
                .await
                .map_err(|e| IngestError::storage("write_original", e));
            report.record(IngestStep::WriteOriginal, result);
        }

        if stopped() {
            return report.finish();
        }
        let img = match self.decode(job).await {
            Ok(img) => {
                report.record(IngestStep::Decode, Ok(()));
                img
            }
            Err(e) => {
                report.record(IngestStep::Decode, Err(e));
                return report.finish();
            }
        };

        for descriptor in job.options.descriptors() {
            if stopped() {
                break;
            }
            let variant = match self.render(&img, descriptor).await {
                Ok(variant) => variant,
                Err(e) => {
                    report.record(IngestStep::Variant(descriptor), Err(e));
                    continue;
                }
            };
            if stopped() {
                break;
            }
            let result = self
                .store
                .write_blob(id, &descriptor.variant_name(), &variant.data)
                .await
                .map_err(|e| IngestError::storage(descriptor.variant_name(), e));
            report.record(IngestStep::Variant(descriptor), result);
        }

        report.finish()
    }

    async fn decode(&self, job: &IngestJob) -> Result<Arc<DynamicImage>, IngestError> {
        let content_type = job.content_type.clone().unwrap_or_default();
        let format = SourceFormat::from_content_type(&content_type)
            .ok_or(IngestError::UnsupportedFormat(content_type))?;

        let processor = Arc::clone(&self.processor);
        let data = job.data.clone();

        tokio::task::spawn_blocking(move || processor.decode(&data, format))
            .await
            .map_err(|e| IngestError::TaskFailed(format!("decode task failed: {e}")))?
            .map(Arc::new)
    }

    async fn render(
        &self,
        img: &Arc<DynamicImage>,
        descriptor: VariantDescriptor,
    ) -> Result<RenderedVariant, IngestError> {
        let processor = Arc::clone(&self.processor);
        let img = Arc::clone(img);

        tokio::task::spawn_blocking(move || processor.render(&img, descriptor))
            .await
            .map_err(|e| IngestError::TaskFailed(format!("render task failed: {e}")))?
    }
}

/// Report of a run task that has finished, or an empty failed one if it panicked
fn settled(
    id: &Identifier,
    joined: Result<IngestReport, tokio::task::JoinError>,
) -> IngestReport {
    joined.unwrap_or_else(|e| {
        error!(image_id = %id, error = %e, "ingestion task panicked");
        IngestReport::new(id.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::identifier::IdentifierGenerator;
    use crate::services::pending::PendingRegistry;
    use crate::services::storage::AssetLayout;
    use image::{GenericImageView, ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png_bytes(width: u32, height: u32) -> Bytes {
        let img = RgbImage::from_pixel(width, height, Rgb([10, 120, 200]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        Bytes::from(buf)
    }

    fn setup() -> (TempDir, Arc<VariantStore>, Arc<IngestionPipeline>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(VariantStore::new(dir.path()));
        let pipeline = Arc::new(IngestionPipeline::new(
            store.clone(),
            ImageProcessor::new(85),
            Duration::from_secs(30),
        ));
        (dir, store, pipeline)
    }

    fn job(data: Bytes, content_type: &str, options: UploadOptions) -> IngestJob {
        IngestJob {
            id: IdentifierGenerator::new().generate("cat.png"),
            data,
            content_type: Some(content_type.to_string()),
            options,
        }
    }

    #[tokio::test]
    async fn test_no_variants_writes_flat_blob() {
        let (_dir, store, pipeline) = setup();
        let data = Bytes::from_static(b"not even an image");
        let job = job(data.clone(), "application/octet-stream", UploadOptions::default());

        let report = pipeline.run(&job).await;

        assert_eq!(report.outcome, IngestOutcome::Complete);
        assert_eq!(store.locate(&job.id).await.unwrap(), AssetLayout::Flat);
        assert_eq!(store.read_flat(&job.id).await.unwrap().unwrap(), data);
    }

    #[tokio::test]
    async fn test_resize_scale_and_original() {
        let (_dir, store, pipeline) = setup();
        let data = png_bytes(100, 50);
        let job = job(
            data.clone(),
            "image/png",
            UploadOptions {
                save_original: true,
                resize_targets: vec![(200, 100), (20, 20)],
                scale_factor: Some(2),
            },
        );

        let report = pipeline.run(&job).await;
        assert_eq!(report.outcome, IngestOutcome::Complete);
        assert_eq!(
            store.list_blobs(&job.id).await.unwrap(),
            vec!["original", "resize200x100", "resize20x20", "scalex2"]
        );

        let original = store.read_blob(&job.id, "original").await.unwrap().unwrap();
        assert_eq!(original, data);

        let small = store.read_blob(&job.id, "resize20x20").await.unwrap().unwrap();
        assert_eq!(image::load_from_memory(&small).unwrap().dimensions(), (20, 20));

        let scaled = store.read_blob(&job.id, "scalex2").await.unwrap().unwrap();
        assert_eq!(image::load_from_memory(&scaled).unwrap().dimensions(), (200, 100));
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_original() {
        let (_dir, store, pipeline) = setup();
        let data = Bytes::from_static(b"garbage");
        let job = job(
            data.clone(),
            "image/jpeg",
            UploadOptions {
                save_original: true,
                resize_targets: vec![(10, 10)],
                scale_factor: None,
            },
        );

        let report = pipeline.run(&job).await;

        assert_eq!(report.outcome, IngestOutcome::PartiallyComplete);
        assert!(matches!(
            report.failures().next().map(|s| &s.result),
            Some(Err(IngestError::Decode(_)))
        ));
        assert_eq!(store.list_blobs(&job.id).await.unwrap(), vec!["original"]);
    }

    #[tokio::test]
    async fn test_failed_variant_does_not_stop_siblings() {
        let (_dir, store, pipeline) = setup();
        let job = job(
            png_bytes(8, 8),
            "image/png",
            UploadOptions {
                save_original: false,
                resize_targets: vec![(4, 4)],
                scale_factor: Some(u32::MAX),
            },
        );

        let report = pipeline.run(&job).await;

        assert_eq!(report.outcome, IngestOutcome::PartiallyComplete);
        assert_eq!(store.list_blobs(&job.id).await.unwrap(), vec!["resize4x4"]);
    }

    #[tokio::test]
    async fn test_spawn_clears_pending_after_run() {
        let (_dir, store, pipeline) = setup();
        let registry = Arc::new(PendingRegistry::new());
        let job = job(
            png_bytes(10, 10),
            "image/png",
            UploadOptions {
                save_original: false,
                resize_targets: vec![(5, 5)],
                scale_factor: None,
            },
        );
        let id = job.id.clone();

        let guard = registry.begin(id.clone());
        assert!(registry.is_pending(&id));

        let report = pipeline.spawn(guard, job).await.unwrap();

        assert_eq!(report.outcome, IngestOutcome::Complete);
        assert!(!registry.is_pending(&id));
        assert!(store.read_blob(&id, "resize5x5").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unsupported_content_type_fails_decode() {
        let (_dir, _store, pipeline) = setup();
        let job = job(
            png_bytes(4, 4),
            "image/gif",
            UploadOptions {
                save_original: false,
                resize_targets: vec![(2, 2)],
                scale_factor: None,
            },
        );

        let report = pipeline.run(&job).await;

        assert_eq!(report.outcome, IngestOutcome::Failed);
        assert!(matches!(
            report.failures().next().map(|s| &s.result),
            Some(Err(IngestError::UnsupportedFormat(_)))
        ));
    }

    #[tokio::test]
    async fn test_timed_out_run_clears_pending_without_late_writes() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(VariantStore::new(dir.path()));
        let pipeline = Arc::new(IngestionPipeline::new(
            store.clone(),
            ImageProcessor::new(85),
            Duration::from_millis(1),
        ));
        let registry = Arc::new(PendingRegistry::new());
        let job = job(
            png_bytes(1000, 1000),
            "image/png",
            UploadOptions {
                save_original: false,
                resize_targets: vec![(3000, 3000)],
                scale_factor: None,
            },
        );
        let id = job.id.clone();

        let guard = registry.begin(id.clone());
        let report = pipeline.spawn(guard, job).await.unwrap();

        assert_eq!(report.outcome, IngestOutcome::TimedOut);
        assert!(!registry.is_pending(&id));

        // Whatever was in flight has settled, so nothing more can appear
        let blobs_after_timeout = match store.locate(&id).await.unwrap() {
            AssetLayout::Container => store.list_blobs(&id).await.unwrap(),
            _ => Vec::new(),
        };
        assert!(!blobs_after_timeout.contains(&"resize3000x3000".to_string()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let blobs_later = match store.locate(&id).await.unwrap() {
            AssetLayout::Container => store.list_blobs(&id).await.unwrap(),
            _ => Vec::new(),
        };
        assert_eq!(blobs_after_timeout, blobs_later);
    }
}
