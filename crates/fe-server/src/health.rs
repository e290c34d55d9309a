//! Health checks

use std::path::PathBuf;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    pub fn http_status(&self) -> StatusCode {
        match self.status {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

struct CachedHealth {
    report: HealthReport,
    cached_at: Instant,
}

/// Checks the blob storage root and caches the result briefly
pub struct HealthChecker {
    storage_root: PathBuf,
    cache_duration: Duration,
    start_time: Instant,
    cache: RwLock<Option<CachedHealth>>,
}

impl HealthChecker {
    pub fn new(storage_root: PathBuf) -> Self {
        Self {
            storage_root,
            cache_duration: Duration::from_secs(10),
            start_time: Instant::now(),
            cache: RwLock::new(None),
        }
    }

    pub async fn check(&self) -> HealthReport {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.cached_at.elapsed() < self.cache_duration {
                    debug!("Returning cached health report");
                    return cached.report.clone();
                }
            }
        }

        let storage = self.check_storage().await;
        let report = HealthReport {
            status: storage.status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            components: vec![storage],
            timestamp: chrono::Utc::now(),
        };

        let mut cache = self.cache.write().await;
        *cache = Some(CachedHealth {
            report: report.clone(),
            cached_at: Instant::now(),
        });

        report
    }

    async fn check_storage(&self) -> ComponentHealth {
        let start = Instant::now();

        let (status, message) = match tokio::fs::metadata(&self.storage_root).await {
            Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => {
                (HealthStatus::Healthy, None)
            }
            Ok(_) => (
                HealthStatus::Unhealthy,
                Some("storage root is not a writable directory".to_string()),
            ),
            Err(e) => {
                warn!(path = %self.storage_root.display(), error = %e, "Storage root unavailable");
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };

        ComponentHealth {
            name: "storage".to_string(),
            status,
            message,
            response_time_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Simple liveness check
pub async fn liveness() -> &'static str {
    "OK"
}

/// Full health report
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.check().await;
    (report.http_status(), Json(report))
}
