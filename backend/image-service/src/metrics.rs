//! Prometheus metrics for image-service
//!
//! Collectors are registered once in the default registry and exposed via
//! `GET /metrics`.

use actix_web::HttpResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Uploads accepted and handed to the pipeline
    pub static ref UPLOADS_TOTAL: IntCounter = register_int_counter!(
        "image_uploads_total",
        "Total number of accepted image uploads"
    )
    .expect("Failed to register image_uploads_total");

    /// Per-step pipeline outcomes
    pub static ref INGEST_STEPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "image_ingest_steps_total",
        "Ingestion pipeline steps by kind and status",
        &["step", "status"]
    )
    .expect("Failed to register image_ingest_steps_total");

    /// Whole-run outcomes
    pub static ref INGEST_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "image_ingest_runs_total",
        "Ingestion pipeline runs by outcome",
        &["outcome"]
    )
    .expect("Failed to register image_ingest_runs_total");

    /// Identifiers currently pending
    pub static ref PENDING_ASSETS: IntGauge = register_int_gauge!(
        "image_pending_assets",
        "Number of identifiers whose ingestion is in flight"
    )
    .expect("Failed to register image_pending_assets");

    /// Retrieval results
    pub static ref RETRIEVALS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "image_retrievals_total",
        "Image retrieval requests by result",
        &["result"]
    )
    .expect("Failed to register image_retrievals_total");
}

/// Render the default registry in Prometheus text format
pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
