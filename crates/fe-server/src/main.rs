//! File Entity RS Server
//!
//! HTTP boundary for file records, transfer payloads, and attachment lists.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fe_core::config::AppConfig;

mod error;
mod handlers;
mod health;
mod state;

use handlers::{attachments, files};
use state::{AppState, Files};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    dotenvy::dotenv().ok();
    let config = AppConfig::from_env().unwrap_or_else(|e| {
        warn!("Failed to load config from env: {}, using defaults", e);
        AppConfig::default()
    });

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        storage = %config.storage.local_path,
        "Starting File Entity RS"
    );

    let state = AppState::from_config(config.clone())?;

    if config.files.gc_interval_seconds > 0 {
        spawn_garbage_collector(
            state.files.clone(),
            Duration::from_secs(config.files.gc_interval_seconds),
        );
    }

    let app = build_router(state);

    let addr = config.server_addr();
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,fe_server=debug,fe_files=debug,tower_http=debug".into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

fn build_router(state: AppState) -> Router {
    let max_body = state.config.server.max_body_size_bytes;

    let health_routes = Router::new()
        .route("/health", get(health::liveness))
        .route("/health/full", get(health::health));

    Router::new()
        .merge(health_routes)
        .nest("/api", api_router())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .layer(DefaultBodyLimit::max(max_body))
}

fn api_router() -> Router<AppState> {
    Router::new()
        .route("/configuration", get(api_configuration))
        .route("/files", post(files::create_file))
        .route("/files/status", post(files::set_status))
        .route("/files/:id", get(files::get_file).delete(files::delete_file))
        .route(
            "/parents/:parent_id/attachments",
            get(attachments::list_attachments).put(attachments::replace_attachments),
        )
}

/// Settings clients need to render upload and attachment forms
async fn api_configuration(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = &state.config;
    Json(serde_json::json!({
        "_type": "Configuration",
        "maximumFileSize": config.files.max_file_size,
        "storageScheme": config.storage.scheme,
        "deletePolicy": config.files.delete_policy,
        "descriptionMaxLength": config.attachments.description_max_length,
        "descriptionWidget": config.attachments.description_widget,
        "_links": {
            "self": { "href": "/api/configuration" }
        }
    }))
}

/// Periodically remove stale temporary files
fn spawn_garbage_collector(files: Arc<Files>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = files.collect_garbage(chrono::Utc::now()).await {
                error!(error = %e, "Garbage collection failed");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use fe_files::{HttpFetcher, LocalStorage};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_app() -> (Router, AppState) {
        let storage = LocalStorage::temp().unwrap();
        let fetcher = HttpFetcher::new(Duration::from_secs(1)).unwrap();
        let state = AppState::new(AppConfig::default(), storage, Arc::new(fetcher));
        (build_router(state.clone()), state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn upload(app: &Router, filename: &str, base64: &str) -> i64 {
        let (status, body) = send(
            app,
            "POST",
            "/api/files",
            Some(json!({ "data": [{ "value": base64 }], "filename": filename })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = test_app();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_full_health_reports_storage() {
        let (app, _) = test_app();
        let (status, body) = send(&app, "GET", "/health/full", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["components"][0]["name"], "storage");
    }

    #[tokio::test]
    async fn test_configuration() {
        let (app, _) = test_app();
        let (status, body) = send(&app, "GET", "/api/configuration", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["descriptionWidget"], "textfield");
        assert_eq!(body["descriptionMaxLength"], 128);
    }

    #[tokio::test]
    async fn test_upload_and_encode() {
        let (app, _) = test_app();
        let id = upload(&app, "hello.txt", "aGVsbG8=").await;

        let (status, body) = send(&app, "GET", &format!("/api/files/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["value"], "aGVsbG8=");
        assert_eq!(body["filename"], "hello.txt");
        assert_eq!(body["filesize"], 5);

        let (_, body) = send(&app, "GET", &format!("/api/files/{}?fields=filename", id), None).await;
        assert_eq!(body["filename"], "hello.txt");
        assert!(body.get("data").is_none());
        assert!(body.get("filesize").is_none());
    }

    #[tokio::test]
    async fn test_missing_blob_sets_omitted_header() {
        let (app, state) = test_app();
        let id = upload(&app, "gone.txt", "Z29uZQ==").await;
        let record = state.files.get(id).await.unwrap();
        fe_files::BlobStore::delete(state.files.blobs().as_ref(), &record.uri)
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/files/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(files::OMITTED_DATA_HEADER).unwrap(),
            "blob_unreadable"
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_hal_error() {
        let (app, _) = test_app();
        let (status, body) = send(&app, "GET", "/api/files/404", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["_type"], "Error");
        assert_eq!(body["errorIdentifier"], "urn:file-entity:api:errors:NotFound");
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_bad_request() {
        let (app, _) = test_app();
        let (status, _) = send(
            &app,
            "POST",
            "/api/files",
            Some(json!({ "data": [{ "value": "%%%" }], "filename": "x.bin" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/api/files",
            Some(json!({ "data": [{ "value": "eA==" }], "uri": "private://x.bin" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_explicit_target_uri() {
        let (app, _) = test_app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/files",
            Some(json!({ "data": [{ "value": "eA==" }], "uri": "public://docs/x.bin" })),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["uri"], "public://docs/x.bin");
        assert_eq!(body["filename"], "x.bin");
        assert_eq!(body["download_url"], "/files/docs/x.bin");
    }

    #[tokio::test]
    async fn test_bulk_status() {
        let (app, _) = test_app();
        let a = upload(&app, "a.txt", "YQ==").await;
        let b = upload(&app, "b.txt", "Yg==").await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/files/status",
            Some(json!({ "ids": [a, 999, b], "status": "permanent" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["succeeded"], 2);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["results"][0]["status"], "permanent");
        assert_eq!(body["results"][1]["id"], 999);
        assert_eq!(
            body["results"][1]["error"]["errorIdentifier"],
            "urn:file-entity:api:errors:NotFound"
        );
        assert_eq!(body["results"][2]["status"], "permanent");
    }

    #[tokio::test]
    async fn test_attachment_list_round() {
        let (app, _) = test_app();
        let a = upload(&app, "a.txt", "YQ==").await;
        let b = upload(&app, "b.txt", "Yg==").await;
        let c = upload(&app, "c.txt", "Yw==").await;

        let (status, body) = send(
            &app,
            "PUT",
            "/api/parents/7/attachments",
            Some(json!({
                "target_id": format!("{} {} {}", a, b, c),
                "current": {
                    a.to_string(): { "weight": 2 },
                    b.to_string(): { "weight": 1, "description": "first" },
                    c.to_string(): { "weight": 1 }
                }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["elements"][0]["file_id"], b);
        assert_eq!(body["elements"][0]["description"], "first");
        assert_eq!(body["elements"][1]["file_id"], c);
        assert_eq!(body["elements"][2]["file_id"], a);

        let (_, body) = send(&app, "GET", "/api/parents/7/attachments", None).await;
        assert_eq!(body["elements"].as_array().unwrap().len(), 3);

        // Deleting an attached file cascades by default
        let (status, _) = send(&app, "DELETE", &format!("/api/files/{}", a), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = send(&app, "GET", "/api/parents/7/attachments", None).await;
        assert_eq!(body["elements"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_attachment_list_rejects_bad_order() {
        let (app, _) = test_app();

        let (status, _) = send(
            &app,
            "PUT",
            "/api/parents/7/attachments",
            Some(json!({ "target_id": "1 x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "PUT", "/api/parents/7/attachments", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "PUT",
            "/api/parents/7/attachments",
            Some(json!({ "order": [5] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
