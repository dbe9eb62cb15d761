/// Data models for image-service
///
/// This module defines structures for:
/// - Identifier: opaque name of one uploaded asset
/// - VariantDescriptor: which derived raster a blob holds
/// - UploadOptions: what the pipeline must produce for one upload
/// - Request/response bodies for the HTTP surface
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppError;

/// Length of a rendered identifier (hex of a 256-bit digest)
pub const IDENTIFIER_LEN: usize = 64;

/// Blob name of the preserved source bytes inside an asset container
pub const ORIGINAL_NAME: &str = "original";

// ========================================
// Identifier
// ========================================

/// Opaque, fixed-length token naming one uploaded asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Accept only the shape the generator produces: 64 lowercase hex chars.
    ///
    /// Anything else cannot name an asset and must never reach the filesystem.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == IDENTIFIER_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));

        valid.then(|| Self(raw.to_string()))
    }

    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ========================================
// Variants
// ========================================

/// Tag identifying one derived variant of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantDescriptor {
    /// Exact target raster dimensions
    Resize { width: u32, height: u32 },
    /// Integer multiplier applied to both original dimensions
    Scale(u32),
}

impl VariantDescriptor {
    /// Canonical blob name: `resize<W>x<H>` or `scalex<F>`
    pub fn variant_name(&self) -> String {
        match self {
            Self::Resize { width, height } => format!("resize{width}x{height}"),
            Self::Scale(factor) => format!("scalex{factor}"),
        }
    }
}

impl fmt::Display for VariantDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.variant_name())
    }
}

/// What a retrieval asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantRequest {
    /// No descriptor: the lexicographically smallest stored blob
    Any,
    /// The preserved source bytes
    Original,
    /// One specific derived variant
    Variant(VariantDescriptor),
}

impl VariantRequest {
    pub fn blob_name(&self) -> Option<String> {
        match self {
            Self::Any => None,
            Self::Original => Some(ORIGINAL_NAME.to_string()),
            Self::Variant(descriptor) => Some(descriptor.variant_name()),
        }
    }
}

// ========================================
// Upload
// ========================================

/// What the ingestion pipeline produces for one upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub save_original: bool,
    /// Paired by position from the `width`/`height` form lists
    pub resize_targets: Vec<(u32, u32)>,
    pub scale_factor: Option<u32>,
}

impl UploadOptions {
    /// Whether any decode-dependent work was requested
    pub fn has_variants(&self) -> bool {
        !self.resize_targets.is_empty() || self.scale_factor.is_some()
    }

    /// Requested descriptors in pipeline order: resizes first, then the scale
    pub fn descriptors(&self) -> Vec<VariantDescriptor> {
        self.resize_targets
            .iter()
            .map(|&(width, height)| VariantDescriptor::Resize { width, height })
            .chain(self.scale_factor.map(VariantDescriptor::Scale))
            .collect()
    }
}

/// Response body of `PUT /uploadImage`
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(rename = "imageName")]
    pub image_name: String,
}

// ========================================
// Retrieval
// ========================================

/// Query string of `GET /getImage/{id}`
///
/// Values stay strings so that malformed input becomes a 400 with a useful
/// message rather than a generic extractor failure.
#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    pub width: Option<String>,
    pub height: Option<String>,
    pub scale: Option<String>,
    pub original: Option<String>,
}

impl ImageQuery {
    /// Canonicalize the query: scale overrides resize, resize overrides original
    pub fn to_request(&self) -> Result<VariantRequest, AppError> {
        if let Some(scale) = &self.scale {
            let factor = parse_positive("scale", scale)?;
            return Ok(VariantRequest::Variant(VariantDescriptor::Scale(factor)));
        }

        match (&self.width, &self.height) {
            (Some(width), Some(height)) => {
                return Ok(VariantRequest::Variant(VariantDescriptor::Resize {
                    width: parse_positive("width", width)?,
                    height: parse_positive("height", height)?,
                }));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(AppError::BadRequest(
                    "width and height must be given together".to_string(),
                ));
            }
            (None, None) => {}
        }

        if self.original.as_deref() == Some("true") {
            return Ok(VariantRequest::Original);
        }

        Ok(VariantRequest::Any)
    }
}

/// Parse a strictly positive integer form/query value
pub fn parse_positive(field: &str, raw: &str) -> Result<u32, AppError> {
    match raw.trim().parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(AppError::BadRequest(format!(
            "{field} must be a positive integer, got {raw:?}"
        ))),
    }
}
