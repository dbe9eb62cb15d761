//! Image processor - decodes uploads and renders variants
//!
//! Decoding picks the codec from the declared content type. Variants are
//! resized with Lanczos3 to the exact target dimensions and encoded as JPEG.
//!
//! All methods here are CPU-bound; the pipeline calls them through
//! `spawn_blocking`.

use crate::error::IngestError;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use std::io::Cursor;
use tracing::debug;

use crate::models::VariantDescriptor;

/// Largest variant we are willing to allocate (100 megapixels)
pub const MAX_VARIANT_PIXELS: u64 = 100_000_000;

/// Raster container formats accepted for decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Png,
    Jpeg,
}

impl SourceFormat {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
        }
    }
}

/// One rendered variant
#[derive(Debug)]
pub struct RenderedVariant {
    /// JPEG bytes
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct ImageProcessor {
    jpeg_quality: u8,
}

impl ImageProcessor {
    pub fn new(jpeg_quality: u8) -> Self {
        Self { jpeg_quality }
    }

    pub fn decode(&self, data: &[u8], format: SourceFormat) -> Result<DynamicImage, IngestError> {
        let img = image::load_from_memory_with_format(data, format.image_format())?;
        let (width, height) = img.dimensions();
        debug!(width, height, ?format, "decoded upload");
        Ok(img)
    }

    /// Target dimensions for a descriptor against the decoded source
    pub fn target_dimensions(
        img: &DynamicImage,
        descriptor: VariantDescriptor,
    ) -> Result<(u32, u32), IngestError> {
        let (width, height) = Self::requested_dimensions(img, descriptor)?;
        if u64::from(width) * u64::from(height) > MAX_VARIANT_PIXELS {
            return Err(IngestError::Dimensions(format!(
                "{descriptor} would be {width}x{height}, above {MAX_VARIANT_PIXELS} pixels"
            )));
        }
        Ok((width, height))
    }

    fn requested_dimensions(
        img: &DynamicImage,
        descriptor: VariantDescriptor,
    ) -> Result<(u32, u32), IngestError> {
        match descriptor {
            VariantDescriptor::Resize { width, height } => {
                if width == 0 || height == 0 {
                    return Err(IngestError::Dimensions(format!(
                        "resize target {width}x{height} has a zero side"
                    )));
                }
                Ok((width, height))
            }
            VariantDescriptor::Scale(factor) => {
                let (orig_w, orig_h) = img.dimensions();
                let width = orig_w.checked_mul(factor);
                let height = orig_h.checked_mul(factor);
                match (width, height) {
                    (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h)),
                    _ => Err(IngestError::Dimensions(format!(
                        "scale x{factor} of {orig_w}x{orig_h} is out of range"
                    ))),
                }
            }
        }
    }

    /// Resize to the descriptor's dimensions and encode as JPEG
    pub fn render(
        &self,
        img: &DynamicImage,
        descriptor: VariantDescriptor,
    ) -> Result<RenderedVariant, IngestError> {
        let (width, height) = Self::target_dimensions(img, descriptor)?;
        let resized = img.resize_exact(width, height, FilterType::Lanczos3);
        let data = self.encode_jpeg(&resized)?;

        debug!(
            variant = %descriptor,
            width,
            height,
            size = data.len(),
            "variant rendered"
        );

        Ok(RenderedVariant {
            data,
            width,
            height,
        })
    }

    fn encode_jpeg(&self, img: &DynamicImage) -> Result<Bytes, IngestError> {
        let mut buf = Vec::new();
        let mut cursor = Cursor::new(&mut buf);

        // JPEG has no alpha channel
        DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut cursor, ImageOutputFormat::Jpeg(self.jpeg_quality))
            .map_err(|e| IngestError::Encode(e.to_string()))?;

        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(
            SourceFormat::from_content_type("image/png"),
            Some(SourceFormat::Png)
        );
        assert_eq!(
            SourceFormat::from_content_type("IMAGE/JPEG; charset=binary"),
            Some(SourceFormat::Jpeg)
        );
        assert_eq!(SourceFormat::from_content_type("image/gif"), None);
    }

    #[test]
    fn test_resize_exact_dimensions() {
        let processor = ImageProcessor::new(85);
        let img = processor.decode(&png_bytes(100, 50), SourceFormat::Png).unwrap();

        let variant = processor
            .render(
                &img,
                VariantDescriptor::Resize {
                    width: 33,
                    height: 77,
                },
            )
            .unwrap();
        assert_eq!((variant.width, variant.height), (33, 77));

        let decoded = image::load_from_memory(&variant.data).unwrap();
        assert_eq!(decoded.dimensions(), (33, 77));
    }

    #[test]
    fn test_scale_multiplies_source() {
        let processor = ImageProcessor::new(85);
        let img = processor.decode(&png_bytes(100, 50), SourceFormat::Png).unwrap();

        let variant = processor.render(&img, VariantDescriptor::Scale(2)).unwrap();
        assert_eq!((variant.width, variant.height), (200, 100));
    }

    #[test]
    fn test_scale_overflow_is_rejected() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let result = ImageProcessor::target_dimensions(&img, VariantDescriptor::Scale(u32::MAX));
        assert!(matches!(result, Err(IngestError::Dimensions(_))));
    }

    #[test]
    fn test_oversized_target_is_rejected() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(100, 100));
        let result = ImageProcessor::target_dimensions(&img, VariantDescriptor::Scale(1_000));
        assert!(matches!(result, Err(IngestError::Dimensions(_))));
    }

    #[test]
    fn test_decode_mismatched_format_fails() {
        let processor = ImageProcessor::new(85);
        let result = processor.decode(&png_bytes(4, 4), SourceFormat::Jpeg);
        assert!(matches!(result, Err(IngestError::Decode(_))));
    }
}
