/// HTTP handlers for image-service
///
/// Routes mirror the legacy surface: `PUT /uploadImage`,
/// `GET /getImage/{id}` and `GET /deleteImage/{id}`.
pub mod images;

use actix_web::{web, HttpResponse};

pub use images::{delete_image, get_image, upload_image};

pub async fn home() -> HttpResponse {
    HttpResponse::Ok().body("Hello World")
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

/// Register every route; shared by the server and the integration tests
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(home))
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(crate::metrics::metrics_handler))
        .route("/uploadImage", web::put().to(upload_image))
        .route("/getImage/{image_id}", web::get().to(get_image))
        .route("/deleteImage/{image_id}", web::get().to(delete_image));
}
