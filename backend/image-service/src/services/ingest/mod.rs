//! Asynchronous ingestion: decode, derive variants, persist
//!
//! - Processor for decoding and rendering variants
//! - Pipeline that sequences the steps for one upload

pub mod pipeline;
pub mod processor;

pub use pipeline::{IngestJob, IngestOutcome, IngestReport, IngestStep, IngestionPipeline, StepRecord};
pub use processor::{ImageProcessor, RenderedVariant, SourceFormat};
