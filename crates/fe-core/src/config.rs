//! Configuration types and loading
//!
//! Settings that a host framework would keep in global configuration are
//! passed around explicitly as plain structs.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Blob storage configuration
    pub storage: StorageConfig,

    /// File record lifecycle settings
    pub files: FileSettings,

    /// Attachment field settings
    pub attachments: AttachmentSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_size_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Local directory backing the storage scheme
    pub local_path: String,
    /// URI scheme served by the local storage (`public` -> `public://...`)
    pub scheme: String,
    /// Base URL used when building download links
    pub base_url: String,
}

/// What happens to attachments when a referenced file record is deleted
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Remove every attachment referencing the file, then the file
    #[default]
    Cascade,
    /// Refuse to delete a file that is still attached somewhere
    Reject,
}

impl DeletePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cascade" => Some(Self::Cascade),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileSettings {
    pub delete_policy: DeletePolicy,
    /// Age after which temporary files become eligible for garbage collection
    pub temporary_max_age_seconds: u64,
    /// Timeout applied to remote fetches while decoding transfer payloads
    pub remote_fetch_timeout_seconds: u64,
    /// Maximum decoded file size in bytes
    pub max_file_size: u64,
    /// Interval between garbage collection sweeps; 0 disables the sweeper
    pub gc_interval_seconds: u64,
}

/// Input widget used for attachment descriptions
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionWidget {
    #[default]
    Textfield,
    Textarea,
}

impl DescriptionWidget {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "textfield" => Some(Self::Textfield),
            "textarea" => Some(Self::Textarea),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttachmentSettings {
    /// Maximum description length in characters
    pub description_max_length: usize,
    pub description_widget: DescriptionWidget,
}

impl Default for AttachmentSettings {
    fn default() -> Self {
        Self {
            description_max_length: 128,
            description_widget: DescriptionWidget::Textfield,
        }
    }
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            delete_policy: DeletePolicy::Cascade,
            temporary_max_age_seconds: 21600, // 6 hours
            remote_fetch_timeout_seconds: 30,
            max_file_size: 256 * 1024 * 1024, // 256MB
            gc_interval_seconds: 3600,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                max_body_size_bytes: 512 * 1024 * 1024,
            },
            storage: StorageConfig {
                local_path: "/var/lib/file-entity/files".to_string(),
                scheme: "public".to_string(),
                base_url: "/files".to_string(),
            },
            files: FileSettings::default(),
            attachments: AttachmentSettings::default(),
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Server
        if let Some(host) = var("HOST") {
            config.server.host = host;
        }
        if let Some(port) = var("PORT") {
            config.server.port = parse_number("PORT", &port)?;
        }
        if let Some(size) = var("MAX_BODY_SIZE_BYTES") {
            config.server.max_body_size_bytes = parse_number("MAX_BODY_SIZE_BYTES", &size)?;
        }

        // Storage
        if let Some(path) = var("FILES_STORAGE_PATH") {
            config.storage.local_path = path;
        }
        if let Some(scheme) = var("FILES_STORAGE_SCHEME") {
            config.storage.scheme = scheme.trim_end_matches("://").to_string();
        }
        if let Some(base_url) = var("FILES_BASE_URL") {
            config.storage.base_url = base_url.trim_end_matches('/').to_string();
        }

        // Files
        if let Some(policy) = var("FILES_DELETE_POLICY") {
            config.files.delete_policy =
                DeletePolicy::parse(&policy).ok_or_else(|| ConfigError::InvalidValue {
                    key: "FILES_DELETE_POLICY".to_string(),
                    message: format!("expected cascade or reject, got {}", policy),
                })?;
        }
        if let Some(age) = var("FILES_TEMPORARY_MAX_AGE_SECONDS") {
            config.files.temporary_max_age_seconds =
                parse_number("FILES_TEMPORARY_MAX_AGE_SECONDS", &age)?;
        }
        if let Some(timeout) = var("FILES_REMOTE_FETCH_TIMEOUT_SECONDS") {
            config.files.remote_fetch_timeout_seconds =
                parse_number("FILES_REMOTE_FETCH_TIMEOUT_SECONDS", &timeout)?;
        }
        if let Some(size) = var("FILES_MAX_FILE_SIZE") {
            config.files.max_file_size = parse_number("FILES_MAX_FILE_SIZE", &size)?;
        }
        if let Some(interval) = var("FILES_GC_INTERVAL_SECONDS") {
            config.files.gc_interval_seconds = parse_number("FILES_GC_INTERVAL_SECONDS", &interval)?;
        }

        // Attachments
        if let Some(length) = var("FILES_DESCRIPTION_MAX_LENGTH") {
            config.attachments.description_max_length =
                parse_number("FILES_DESCRIPTION_MAX_LENGTH", &length)?;
        }
        if let Some(widget) = var("FILES_DESCRIPTION_WIDGET") {
            match DescriptionWidget::parse(&widget) {
                Some(w) => config.attachments.description_widget = w,
                None => warn!(value = %widget, "Unknown description widget, keeping default"),
            }
        }

        Ok(config)
    }

    /// Get the server address
    pub fn server_addr(&self) -> std::net::SocketAddr {
        use std::net::SocketAddr;
        let ip: std::net::IpAddr = self.server.host.parse().unwrap_or([0, 0, 0, 0].into());
        SocketAddr::new(ip, self.server.port)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}
