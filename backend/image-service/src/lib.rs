//! Image Service
//!
//! Accepts image uploads, assigns each a content-derived identifier and
//! derives resized / scaled variants in the background. Reads are gated on
//! the pending state so partial results are never served.

pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};
pub use services::ImageService;
