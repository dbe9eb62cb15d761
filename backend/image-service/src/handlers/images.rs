/// Image handlers - upload, retrieval and deletion endpoints
use actix_multipart::{Field, Multipart};
use actix_web::http::header;
use actix_web::{web, HttpResponse};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::config::Config;
use crate::error::{AppError, MessageResponse, Result};
use crate::models::{parse_positive, Identifier, ImageQuery, UploadOptions, UploadResponse};
use crate::services::ingest::SourceFormat;
use crate::services::{ImageService, Resolution, Submission};

/// Multipart field carrying the image bytes
pub const IMAGE_FIELD: &str = "myImage";

/// Upper bound for a non-file form value
const MAX_TEXT_FIELD_BYTES: usize = 1024;

/// Raw form contents before validation
#[derive(Debug, Default)]
struct UploadForm {
    filename: Option<String>,
    content_type: Option<String>,
    data: Option<Bytes>,
    save_original: Option<String>,
    widths: Vec<String>,
    heights: Vec<String>,
    scale: Option<String>,
}

impl UploadForm {
    fn into_submission(self) -> Result<Submission> {
        let data = self
            .data
            .ok_or_else(|| AppError::BadRequest(format!("missing {IMAGE_FIELD} file field")))?;

        if self.widths.len() != self.heights.len() {
            return Err(AppError::BadRequest(format!(
                "width and height lists differ in length ({} vs {})",
                self.widths.len(),
                self.heights.len()
            )));
        }

        let resize_targets = self
            .widths
            .iter()
            .zip(&self.heights)
            .map(|(w, h)| Ok((parse_positive("width", w)?, parse_positive("height", h)?)))
            .collect::<Result<Vec<_>>>()?;

        let scale_factor = self
            .scale
            .as_deref()
            .map(|s| parse_positive("scale", s))
            .transpose()?;

        let options = UploadOptions {
            save_original: self.save_original.as_deref() == Some("true"),
            resize_targets,
            scale_factor,
        };

        if options.has_variants() {
            let content_type = self.content_type.as_deref().unwrap_or("");
            if SourceFormat::from_content_type(content_type).is_none() {
                return Err(AppError::UnsupportedMediaType(format!(
                    "cannot derive variants from {content_type:?}; use image/png or image/jpeg"
                )));
            }
        }

        Ok(Submission {
            filename: self.filename.unwrap_or_default(),
            content_type: self.content_type,
            data,
            options,
        })
    }
}

async fn read_field(field: &mut Field, limit: usize) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(AppError::PayloadTooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

async fn read_text(field: &mut Field, name: &str) -> Result<String> {
    let raw = read_field(field, MAX_TEXT_FIELD_BYTES)
        .await
        .map_err(|e| text_field_error(name, e))?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| AppError::BadRequest(format!("{name} is not valid UTF-8")))
}

fn text_field_error(name: &str, err: AppError) -> AppError {
    match err {
        AppError::PayloadTooLarge(_) => AppError::BadRequest(format!("{name} value too long")),
        other => other,
    }
}

async fn read_upload_form(payload: &mut Multipart, max_upload_bytes: usize) -> Result<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            IMAGE_FIELD => {
                form.filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .map(str::to_string);
                form.content_type = field.content_type().map(|m| m.essence_str().to_string());
                form.data = Some(read_field(&mut field, max_upload_bytes).await?);
            }
            "saveOriginal" => form.save_original = Some(read_text(&mut field, &name).await?),
            "width" | "width[]" => form.widths.push(read_text(&mut field, &name).await?),
            "height" | "height[]" => form.heights.push(read_text(&mut field, &name).await?),
            "scale" => form.scale = Some(read_text(&mut field, &name).await?),
            other => {
                tracing::debug!(field = other, "ignoring unknown upload field");
                while let Some(chunk) = field.next().await {
                    chunk?;
                }
            }
        }
    }

    Ok(form)
}

/// Accept an upload and start ingestion
/// PUT /uploadImage
pub async fn upload_image(
    service: web::Data<ImageService>,
    config: web::Data<Config>,
    mut payload: Multipart,
) -> Result<HttpResponse> {
    let form = read_upload_form(&mut payload, config.storage.max_upload_bytes).await?;
    let submission = form.into_submission()?;

    // Ingestion is fire-and-forget from the client's point of view
    let (id, _ingestion) = service.submit(submission);

    Ok(HttpResponse::Ok().json(UploadResponse {
        image_name: id.to_string(),
    }))
}

/// Serve the original or a variant
/// GET /getImage/{id}?width=&height=&scale=&original=
pub async fn get_image(
    service: web::Data<ImageService>,
    image_id: web::Path<String>,
    query: web::Query<ImageQuery>,
) -> Result<HttpResponse> {
    let id = Identifier::parse(&image_id)
        .ok_or_else(|| AppError::NotFound(format!("image {image_id}")))?;
    let request = match query.to_request() {
        Ok(request) => request,
        // Pending wins over a malformed descriptor
        Err(_) if service.registry().is_pending(&id) => return Ok(retry_later(&service)),
        Err(e) => return Err(e),
    };

    match service.resolve(&id, request).await? {
        Resolution::Pending => Ok(retry_later(&service)),
        Resolution::NotFound => Err(AppError::NotFound(format!("image {id} ({request:?})"))),
        Resolution::Blob { name, data } => Ok(HttpResponse::Ok()
            .content_type(sniff_content_type(&data))
            .insert_header((
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{name}\""),
            ))
            .body(data)),
    }
}

fn retry_later(service: &ImageService) -> HttpResponse {
    HttpResponse::Accepted()
        .insert_header((header::RETRY_AFTER, service.retry_after_secs().to_string()))
        .finish()
}

/// Delete an identifier and all of its blobs
/// GET /deleteImage/{id}
pub async fn delete_image(
    service: web::Data<ImageService>,
    image_id: web::Path<String>,
) -> Result<HttpResponse> {
    let id = Identifier::parse(&image_id)
        .ok_or_else(|| AppError::NotFound(format!("image {image_id}")))?;

    service.delete(&id).await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Deleted")))
}

fn sniff_content_type(data: &[u8]) -> mime::Mime {
    match image::guess_format(data) {
        Ok(image::ImageFormat::Png) => mime::IMAGE_PNG,
        Ok(image::ImageFormat::Jpeg) => mime::IMAGE_JPEG,
        Ok(image::ImageFormat::Gif) => mime::IMAGE_GIF,
        Ok(image::ImageFormat::Bmp) => mime::IMAGE_BMP,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}
