/// Configuration management for image-service
///
/// Loads configuration from environment variables with sensible defaults.
/// A variable that is present but unparsable is an error, not a fallback.
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub tls: Option<TlsConfig>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Root directory holding flat blobs and per-identifier containers
    pub root: PathBuf,
    /// Largest image payload accepted by the upload endpoint
    pub max_upload_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// JPEG quality used when encoding variants (1-100)
    pub jpeg_quality: u8,
    /// Upper bound for one pipeline run
    pub timeout: Duration,
    /// Seconds clients are told to wait while an identifier is pending
    pub retry_after_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("{present} is set but {missing} is not")]
    IncompleteTls {
        present: &'static str,
        missing: &'static str,
    },
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 85,
            timeout: Duration::from_secs(120),
            retry_after_secs: 3,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let jpeg_quality: u8 = parse_var("IMAGE_JPEG_QUALITY", 85)?;
        if !(1..=100).contains(&jpeg_quality) {
            return Err(ConfigError::Invalid {
                name: "IMAGE_JPEG_QUALITY",
                value: jpeg_quality.to_string(),
            });
        }

        Ok(Config {
            app: AppConfig {
                host: std::env::var("IMAGE_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("IMAGE_SERVICE_PORT", 8081)?,
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            },
            storage: StorageConfig {
                root: std::env::var("IMAGE_STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("uploads")),
                max_upload_bytes: parse_var("IMAGE_MAX_UPLOAD_BYTES", 20 * 1024 * 1024)?,
            },
            ingest: IngestConfig {
                jpeg_quality,
                timeout: Duration::from_secs(parse_var("IMAGE_INGEST_TIMEOUT_SECS", 120)?),
                retry_after_secs: parse_var("IMAGE_RETRY_AFTER_SECS", 3)?,
            },
            tls: parse_tls_config()?,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.app.host, self.app.port)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}

fn parse_tls_config() -> Result<Option<TlsConfig>, ConfigError> {
    let cert = std::env::var("IMAGE_TLS_CERT_PATH").ok();
    let key = std::env::var("IMAGE_TLS_KEY_PATH").ok();

    match (cert, key) {
        (Some(cert), Some(key)) => Ok(Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        })),
        (Some(_), None) => Err(ConfigError::IncompleteTls {
            present: "IMAGE_TLS_CERT_PATH",
            missing: "IMAGE_TLS_KEY_PATH",
        }),
        (None, Some(_)) => Err(ConfigError::IncompleteTls {
            present: "IMAGE_TLS_KEY_PATH",
            missing: "IMAGE_TLS_CERT_PATH",
        }),
        (None, None) => Ok(None),
    }
}
