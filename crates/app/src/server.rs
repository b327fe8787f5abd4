//! Actix Web API exposing live analytics, MJPEG streams, and health.
//!
//! The server runs on a dedicated thread so the camera workers never touch
//! the Actix runtime. Handlers only read the shared store; they never block a
//! writer for longer than the snapshot pointer swap.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use serde::Serialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{error, info};
use traffic_core::{CameraMetrics, MetricsStore, PipelineHealth, StoreSummary, WorkerState};

use crate::telemetry;

/// Shared state backing HTTP handlers.
pub(crate) struct ApiState {
    pub(crate) store: Arc<MetricsStore>,
    pub(crate) health: Arc<PipelineHealth>,
    /// Source URIs, indexed by camera, for the health report.
    pub(crate) sources: Vec<String>,
}

/// Handle for the API server thread.
#[derive(Default)]
pub(crate) struct ApiServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ApiServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

#[derive(Serialize)]
struct CameraView {
    camera: usize,
    #[serde(flatten)]
    metrics: CameraMetrics,
}

#[derive(Serialize)]
struct MetricsResponse {
    timestamp: chrono::DateTime<chrono::Utc>,
    cameras: Vec<CameraView>,
    summary: StoreSummary,
}

#[derive(Serialize)]
struct CameraHealthView {
    camera: usize,
    source: String,
    state: &'static str,
    published: bool,
}

/// Spawn the API server thread and return a handle that can stop it.
pub(crate) fn spawn_api_server(
    store: Arc<MetricsStore>,
    health: Arc<PipelineHealth>,
    sources: Vec<String>,
    port: u16,
) -> Result<ApiServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = std::thread::Builder::new()
        .name("traffic-api-server".into())
        .spawn(move || {
            if let Err(err) = actix_web::rt::System::new().block_on(async move {
                info!(port, "API server listening");
                let server = HttpServer::new(move || {
                    App::new()
                        .app_data(web::Data::new(ApiState {
                            store: store.clone(),
                            health: health.clone(),
                            sources: sources.clone(),
                        }))
                        .route("/", web::get().to(index_handler))
                        .route("/metrics", web::get().to(metrics_handler))
                        .route("/video/{camera}", web::get().to(video_handler))
                        .route("/frame/{camera}", web::get().to(frame_handler))
                        .route("/health", web::get().to(health_handler))
                        .route("/prometheus", web::get().to(prometheus_handler))
                })
                .bind(("0.0.0.0", port))?
                .run();

                let srv_handle = server.handle();
                actix_web::rt::spawn(async move {
                    let _ = shutdown_rx.await;
                    srv_handle.stop(true).await;
                });

                server.await
            }) {
                error!("HTTP server error: {err}");
            }
        })
        .context("Failed to spawn API server thread")?;
    Ok(ApiServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

async fn index_handler(state: web::Data<ApiState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": "smart-traffic",
        "version": env!("CARGO_PKG_VERSION"),
        "cameras": state.store.camera_count(),
        "endpoints": ["/metrics", "/video/{camera}", "/frame/{camera}", "/health", "/prometheus"],
    }))
}

/// Current analytics for every camera plus the cross-camera summary.
async fn metrics_handler(state: web::Data<ApiState>) -> HttpResponse {
    let cameras = (0..state.store.camera_count())
        .filter_map(|camera| {
            state.store.metrics(camera).map(|metrics| CameraView {
                camera,
                metrics: (*metrics).clone(),
            })
        })
        .collect();
    HttpResponse::Ok().json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        cameras,
        summary: state.store.summary(),
    })
}

/// Stream one camera's annotated feed over a multipart response.
async fn video_handler(path: web::Path<usize>, state: web::Data<ApiState>) -> HttpResponse {
    let camera = path.into_inner();
    if camera >= state.store.camera_count()
        || state.health.state(camera) == Some(WorkerState::Failed)
    {
        return HttpResponse::NotFound().json(json!({ "error": "unknown camera" }));
    }

    let state = state.clone();
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(Duration::from_millis(33));
        let mut last_sent: u64 = 0;
        loop {
            interval.tick().await;
            if let Some(packet) = state.store.frame(camera) {
                if packet.frame_number == last_sent {
                    continue;
                }
                last_sent = packet.frame_number;
                let mut payload = Vec::with_capacity(packet.jpeg.len() + 64);
                payload.extend_from_slice(b"--frame\r\n");
                payload.extend_from_slice(
                    format!("X-Sequence: {}\r\n", packet.frame_number).as_bytes(),
                );
                payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
                payload.extend_from_slice(&packet.jpeg);
                payload.extend_from_slice(b"\r\n");
                yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

/// Return one camera's latest annotated JPEG.
async fn frame_handler(path: web::Path<usize>, state: web::Data<ApiState>) -> HttpResponse {
    let camera = path.into_inner();
    if camera >= state.store.camera_count() {
        return HttpResponse::NotFound().json(json!({ "error": "unknown camera" }));
    }
    match state.store.frame(camera) {
        Some(packet) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .body(packet.jpeg.clone()),
        None => HttpResponse::NoContent().finish(),
    }
}

async fn health_handler(state: web::Data<ApiState>) -> HttpResponse {
    let camera_count = state.health.camera_count();
    let cameras: Vec<CameraHealthView> = (0..camera_count)
        .map(|camera| CameraHealthView {
            camera,
            source: state
                .sources
                .get(camera)
                .cloned()
                .unwrap_or_default(),
            state: state
                .health
                .state(camera)
                .unwrap_or(WorkerState::Starting)
                .label(),
            published: state.health.has_published(camera),
        })
        .collect();

    let live = state.health.live_workers();
    let status = if live == camera_count && state.health.detector_ready() {
        "healthy"
    } else {
        "degraded"
    };
    HttpResponse::Ok().json(json!({
        "status": status,
        "detector_ready": state.health.detector_ready(),
        "live_workers": live,
        "cameras": cameras,
    }))
}

/// Expose process counters in Prometheus exposition format.
async fn prometheus_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}
