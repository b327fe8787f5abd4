//! Pipeline supervisor: opens camera sources, spawns one worker per camera,
//! starts the API server, and coordinates shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use detector::{TorchDevice, VehicleDetector};
use tracing::{error, info, warn};
use traffic_core::{MetricsStore, PipelineHealth};

use crate::config::AppConfig;
use crate::server;
use crate::worker::{self, WorkerConfig};

/// Run the full pipeline until Ctrl+C.
pub fn run(config: AppConfig) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("shutdown requested");
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let store = Arc::new(MetricsStore::new(config.cameras.len(), &config.signal));
    let health = Arc::new(PipelineHealth::new(config.cameras.len()));

    let device = if config.use_cpu {
        TorchDevice::Cpu
    } else {
        TorchDevice::cuda_if_available()
    };
    info!(?device, cameras = config.cameras.len(), "starting pipeline");

    let mut workers = Vec::new();
    for (camera, uri) in config.cameras.iter().enumerate() {
        let source = match video_ingest::open_source(uri, (config.width, config.height)) {
            Ok(source) => source,
            Err(err) => {
                error!(camera, %uri, error = %err, "camera source failed to open");
                health.mark_failed(camera);
                continue;
            }
        };

        // Each worker owns its own module instance so inference never
        // serializes across cameras.
        let detector = match VehicleDetector::new(
            &config.model_path,
            device,
            (config.detector_width as i64, config.detector_height as i64),
        ) {
            Ok(detector) => detector.with_confidence_threshold(config.min_confidence),
            Err(err) => {
                error!(camera, error = %err, "detector failed to load");
                health.mark_failed(camera);
                continue;
            }
        };
        health.set_detector_ready(true);

        let worker_config = WorkerConfig {
            camera,
            fps: source.fps,
            signal: config.signal,
            min_confidence: config.min_confidence,
            jpeg_quality: config.jpeg_quality,
            seed: config.seed.map(|seed| seed + camera as u64),
        };
        let handle = worker::spawn_worker(
            worker_config,
            source.frames,
            Box::new(detector),
            store.clone(),
            health.clone(),
            shutdown.clone(),
        )
        .context("Failed to spawn worker thread")?;
        workers.push(handle);
    }

    if workers.is_empty() {
        bail!("no camera source could be started");
    }

    let api = server::spawn_api_server(
        store,
        health.clone(),
        config.cameras.clone(),
        config.port,
    )?;

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("stopping workers");
    for handle in workers {
        if handle.join().is_err() {
            warn!("worker thread panicked during shutdown");
        }
    }
    api.stop();
    info!("pipeline stopped");
    Ok(())
}
