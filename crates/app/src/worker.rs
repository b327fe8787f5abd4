//! Per-camera analysis worker.
//!
//! Each camera gets its own OS thread owning a detector, a count history and
//! the waiting-time state. Frames come in over a bounded channel from the
//! capture thread; analytics and annotated frames go out through the shared
//! store. Workers never talk to each other, so one camera failing leaves the
//! rest untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, error, info, warn};
use traffic_core::{
    CameraMetrics, CaptureError, CountHistory, Detect, Frame, MetricsStore, PipelineHealth,
    SignalConfig, compute_timing, count_vehicles, density_label,
};

use crate::render;
use crate::telemetry;

const RECV_TIMEOUT: Duration = Duration::from_millis(500);
const FRAME_PACING: Duration = Duration::from_millis(33);

/// Per-worker knobs, fixed at spawn time.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub camera: usize,
    /// Source frame rate; sets the analysis cadence (roughly 3 per second).
    pub fps: f64,
    pub signal: SignalConfig,
    pub min_confidence: f32,
    pub jpeg_quality: i32,
    pub seed: Option<u64>,
}

pub fn spawn_worker(
    config: WorkerConfig,
    frames: Receiver<Result<Frame, CaptureError>>,
    detector: Box<dyn Detect>,
    store: Arc<MetricsStore>,
    health: Arc<PipelineHealth>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let name = format!("camera-{}", config.camera);
    telemetry::spawn_thread(name, move || {
        run_worker(config, frames, detector, store, health, shutdown);
    })
}

fn run_worker(
    config: WorkerConfig,
    frames: Receiver<Result<Frame, CaptureError>>,
    mut detector: Box<dyn Detect>,
    store: Arc<MetricsStore>,
    health: Arc<PipelineHealth>,
    shutdown: Arc<AtomicBool>,
) {
    let camera = config.camera;
    let label = camera.to_string();
    // Analyse roughly three frames a second regardless of source fps.
    let cadence = ((config.fps / 3.0).round() as u64).max(1);
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut history = CountHistory::new();
    let mut waiting: u32 = 0;
    let mut frame_number: u64 = 0;

    health.mark_running(camera);
    info!(camera, cadence, "worker started");

    while !shutdown.load(Ordering::SeqCst) {
        let frame = match frames.recv_timeout(RECV_TIMEOUT) {
            Ok(Ok(frame)) => frame,
            Ok(Err(CaptureError::Open { uri })) => {
                error!(camera, %uri, "capture source failed to open, stopping worker");
                health.mark_failed(camera);
                return;
            }
            Ok(Err(CaptureError::Other(err))) => {
                warn!(camera, error = %err, "transient capture error, skipping frame");
                metrics::counter!("traffic_capture_errors_total", "camera" => label.clone())
                    .increment(1);
                continue;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                error!(camera, "capture channel closed, stopping worker");
                health.mark_failed(camera);
                return;
            }
        };

        frame_number += 1;

        let detect_started = std::time::Instant::now();
        let detections = match detector.detect(&frame) {
            Ok(detections) => {
                metrics::histogram!("traffic_detection_seconds", "camera" => label.clone())
                    .record(detect_started.elapsed().as_secs_f64());
                detections
            }
            Err(err) => {
                warn!(camera, error = %err, "detector error, skipping frame");
                metrics::counter!("traffic_detection_errors_total", "camera" => label.clone())
                    .increment(1);
                std::thread::sleep(FRAME_PACING);
                continue;
            }
        };

        let count = count_vehicles(
            &detections,
            frame.width,
            frame.height,
            detector.input_size(),
            config.min_confidence,
        );

        if frame_number % cadence == 0 {
            history.push(count.vehicles);
            let timing = compute_timing(count.vehicles, waiting, &history, &config.signal, &mut rng);
            waiting = timing.waiting;

            let snapshot = CameraMetrics {
                vehicle_count: count.vehicles,
                density_label: density_label(count.vehicles, &config.signal),
                green_time_seconds: timing.green,
                waiting_time_seconds: timing.waiting,
                co2_reduction: timing.co2_reduction,
                bottleneck: count.vehicles >= config.signal.bottleneck_threshold,
                detection_confidence: count.mean_confidence,
                last_update: chrono::Utc::now(),
            };
            debug!(
                camera,
                vehicles = snapshot.vehicle_count,
                green = snapshot.green_time_seconds,
                waiting = snapshot.waiting_time_seconds,
                "published analytics"
            );
            store.publish_metrics(camera, snapshot);
            metrics::counter!("traffic_analyses_total", "camera" => label.clone()).increment(1);
            metrics::gauge!("traffic_vehicle_count", "camera" => label.clone())
                .set(count.vehicles as f64);
        }

        let current = match store.metrics(camera) {
            Some(metrics) => metrics,
            None => break,
        };
        match render::annotate_frame(
            &frame,
            frame_number,
            &count.boxes,
            &current,
            config.jpeg_quality,
        ) {
            Ok(encoded) => {
                store.publish_frame(camera, encoded);
                health.mark_published(camera);
            }
            Err(err) => {
                warn!(camera, error = %err, "frame annotation failed");
            }
        }

        std::thread::sleep(FRAME_PACING);
    }

    info!(camera, "worker shut down");
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, anyhow};
    use chrono::Utc;
    use crossbeam_channel::bounded;
    use traffic_core::{FrameFormat, RawDetection};

    use super::*;

    struct StubDetector {
        detections: Result<Vec<RawDetection>, String>,
    }

    impl StubDetector {
        fn returning(detections: Vec<RawDetection>) -> Box<dyn Detect> {
            Box::new(Self {
                detections: Ok(detections),
            })
        }

        fn failing(message: &str) -> Box<dyn Detect> {
            Box::new(Self {
                detections: Err(message.to_string()),
            })
        }
    }

    impl Detect for StubDetector {
        fn input_size(&self) -> (i32, i32) {
            (64, 36)
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
            match &self.detections {
                Ok(detections) => Ok(detections.clone()),
                Err(message) => Err(anyhow!(message.clone())),
            }
        }
    }

    fn test_frame() -> Frame {
        Frame {
            data: vec![0u8; 64 * 36 * 3],
            width: 64,
            height: 36,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }
    }

    fn cars(n: usize) -> Vec<RawDetection> {
        (0..n)
            .map(|i| RawDetection {
                bbox: [i as f32 * 10.0, 4.0, i as f32 * 10.0 + 8.0, 20.0],
                score: 0.9,
                class_id: 2,
            })
            .collect()
    }

    fn worker_config(camera: usize) -> WorkerConfig {
        WorkerConfig {
            camera,
            fps: 3.0,
            signal: SignalConfig::default(),
            min_confidence: 0.25,
            jpeg_quality: 60,
            seed: Some(1),
        }
    }

    #[test]
    fn publishes_metrics_and_frames_for_its_own_camera_only() {
        let store = Arc::new(MetricsStore::new(2, &SignalConfig::default()));
        let health = Arc::new(PipelineHealth::new(2));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded(4);

        for _ in 0..3 {
            tx.send(Ok(test_frame())).unwrap();
        }
        drop(tx);

        let handle = spawn_worker(
            worker_config(1),
            rx,
            StubDetector::returning(cars(3)),
            store.clone(),
            health.clone(),
            shutdown.clone(),
        )
        .unwrap();
        handle.join().unwrap();

        // Channel closed after the queued frames, so the worker ends failed,
        // but everything it saw was analysed and published first.
        let published = store.metrics(1).unwrap();
        assert_eq!(published.vehicle_count, 3);
        assert!(published.green_time_seconds >= 20);
        assert!(health.has_published(1));
        assert!(store.frame(1).is_some());

        // The other camera is untouched.
        let untouched = store.metrics(0).unwrap();
        assert_eq!(untouched.vehicle_count, 0);
        assert!(!health.has_published(0));
        assert!(store.frame(0).is_none());
    }

    #[test]
    fn fatal_open_error_marks_the_worker_failed() {
        let store = Arc::new(MetricsStore::new(1, &SignalConfig::default()));
        let health = Arc::new(PipelineHealth::new(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded(1);

        tx.send(Err(CaptureError::Open {
            uri: "missing.mp4".to_string(),
        }))
        .unwrap();

        let handle = spawn_worker(
            worker_config(0),
            rx,
            StubDetector::returning(cars(1)),
            store.clone(),
            health.clone(),
            shutdown,
        )
        .unwrap();
        handle.join().unwrap();

        assert_eq!(
            health.state(0),
            Some(traffic_core::WorkerState::Failed)
        );
        assert!(!health.has_published(0));
    }

    #[test]
    fn detector_errors_are_skipped_not_fatal() {
        let store = Arc::new(MetricsStore::new(1, &SignalConfig::default()));
        let health = Arc::new(PipelineHealth::new(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded(2);

        tx.send(Ok(test_frame())).unwrap();
        tx.send(Ok(test_frame())).unwrap();
        drop(tx);

        let handle = spawn_worker(
            worker_config(0),
            rx,
            StubDetector::failing("model exploded"),
            store.clone(),
            health.clone(),
            shutdown,
        )
        .unwrap();
        handle.join().unwrap();

        // No analytics were published, but the skips themselves were benign.
        let metrics = store.metrics(0).unwrap();
        assert_eq!(metrics.vehicle_count, 0);
        assert!(!health.has_published(0));
    }
}
