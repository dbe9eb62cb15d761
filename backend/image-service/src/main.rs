/// Image Service - HTTP Server
///
/// Handles image uploads, variant retrieval and deletion.
use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use anyhow::Context;
use image_service::{handlers, logging, Config, ImageService};
use std::fs::File;
use std::io::BufReader;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Optional .env for local development
    let _ = dotenvy::dotenv();

    logging::init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    let service = ImageService::new(&config);

    service
        .store()
        .ensure_root()
        .await
        .with_context(|| format!("Failed to create storage root {:?}", config.storage.root))?;

    let bind_address = config.bind_address();
    tracing::info!(
        env = %config.app.env,
        storage_root = ?config.storage.root,
        tls = config.tls.is_some(),
        "Image Service starting HTTP server on {}",
        bind_address
    );

    let tls = match &config.tls {
        Some(tls) => Some(load_rustls_config(&tls.cert_path, &tls.key_path)?),
        None => None,
    };

    let service_data = web::Data::new(service);
    let config_data = web::Data::new(config.clone());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(service_data.clone())
            .app_data(config_data.clone())
            .wrap(actix_middleware::Logger::default())
            .configure(handlers::configure)
    });

    let server = match tls {
        Some(tls) => server.bind_rustls_0_23(&bind_address, tls)?,
        None => server.bind(&bind_address)?,
    };

    server.run().await?;

    tracing::info!("Image-service shutting down");
    Ok(())
}

fn load_rustls_config(
    cert_path: &std::path::Path,
    key_path: &std::path::Path,
) -> anyhow::Result<rustls::ServerConfig> {
    let mut cert_reader = BufReader::new(
        File::open(cert_path).with_context(|| format!("Failed to open {cert_path:?}"))?,
    );
    let mut key_reader = BufReader::new(
        File::open(key_path).with_context(|| format!("Failed to open {key_path:?}"))?,
    );

    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to parse TLS certificate")?;
    let key = rustls_pemfile::private_key(&mut key_reader)
        .context("Failed to parse TLS private key")?
        .ok_or_else(|| anyhow::anyhow!("No private key found in {key_path:?}"))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Invalid TLS certificate/key pair")
}
