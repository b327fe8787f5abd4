//! Shared metrics store bridging per-camera workers to read-side consumers.
//!
//! Each camera owns one metrics slot and one frame slot. Publishes replace
//! the whole `Arc` snapshot behind the slot's mutex, so a concurrent reader
//! only ever observes a complete snapshot: stale is possible, torn is not.
//! Writers never wait on readers beyond the brief pointer swap.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::signal::{DensityLabel, SignalConfig};

/// Latest published analytics for one camera.
#[derive(Clone, Debug, Serialize)]
pub struct CameraMetrics {
    pub vehicle_count: u32,
    pub density_label: DensityLabel,
    pub green_time_seconds: u32,
    pub waiting_time_seconds: u32,
    pub co2_reduction: f64,
    pub bottleneck: bool,
    pub detection_confidence: f32,
    pub last_update: DateTime<Utc>,
}

impl CameraMetrics {
    /// Snapshot a camera reports before its worker has published anything.
    pub fn initial(config: &SignalConfig) -> Self {
        Self {
            vehicle_count: 0,
            density_label: DensityLabel::Low,
            green_time_seconds: config.min_green,
            waiting_time_seconds: 0,
            co2_reduction: 0.0,
            bottleneck: false,
            detection_confidence: 0.0,
            last_update: Utc::now(),
        }
    }
}

/// Latest annotated JPEG for one camera.
#[derive(Clone)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub frame_number: u64,
    pub timestamp_ms: i64,
}

/// Process-wide summary across all cameras.
#[derive(Clone, Debug, Serialize)]
pub struct StoreSummary {
    pub total_vehicles: u64,
    pub active_bottlenecks: u32,
    pub average_waiting_time: f64,
    pub total_co2_reduction: f64,
}

struct CameraSlot {
    metrics: Mutex<Arc<CameraMetrics>>,
    frame: Mutex<Option<Arc<EncodedFrame>>>,
}

/// One metrics and one frame slot per camera index; written by exactly one
/// worker each, read by arbitrarily many request handlers.
pub struct MetricsStore {
    slots: Vec<CameraSlot>,
}

impl MetricsStore {
    pub fn new(camera_count: usize, config: &SignalConfig) -> Self {
        let slots = (0..camera_count)
            .map(|_| CameraSlot {
                metrics: Mutex::new(Arc::new(CameraMetrics::initial(config))),
                frame: Mutex::new(None),
            })
            .collect();
        Self { slots }
    }

    pub fn camera_count(&self) -> usize {
        self.slots.len()
    }

    /// Replace the metrics snapshot for `camera`. Out-of-range indices are
    /// ignored; slots are sized once at startup.
    pub fn publish_metrics(&self, camera: usize, metrics: CameraMetrics) {
        if let Some(slot) = self.slots.get(camera) {
            if let Ok(mut guard) = slot.metrics.lock() {
                *guard = Arc::new(metrics);
            }
        }
    }

    /// Replace the annotated frame for `camera`.
    pub fn publish_frame(&self, camera: usize, frame: EncodedFrame) {
        if let Some(slot) = self.slots.get(camera) {
            if let Ok(mut guard) = slot.frame.lock() {
                *guard = Some(Arc::new(frame));
            }
        }
    }

    pub fn metrics(&self, camera: usize) -> Option<Arc<CameraMetrics>> {
        let slot = self.slots.get(camera)?;
        slot.metrics.lock().ok().map(|guard| guard.clone())
    }

    /// Latest frame for `camera`, `None` when out of range or nothing has
    /// been published yet.
    pub fn frame(&self, camera: usize) -> Option<Arc<EncodedFrame>> {
        let slot = self.slots.get(camera)?;
        slot.frame.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn all_metrics(&self) -> Vec<Arc<CameraMetrics>> {
        (0..self.slots.len())
            .filter_map(|camera| self.metrics(camera))
            .collect()
    }

    pub fn summary(&self) -> StoreSummary {
        let snapshots = self.all_metrics();
        let total_vehicles = snapshots.iter().map(|m| m.vehicle_count as u64).sum();
        let active_bottlenecks = snapshots.iter().filter(|m| m.bottleneck).count() as u32;
        let average_waiting_time = if snapshots.is_empty() {
            0.0
        } else {
            snapshots
                .iter()
                .map(|m| m.waiting_time_seconds as f64)
                .sum::<f64>()
                / snapshots.len() as f64
        };
        let total_co2_reduction = snapshots.iter().map(|m| m.co2_reduction).sum();
        StoreSummary {
            total_vehicles,
            active_bottlenecks,
            average_waiting_time,
            total_co2_reduction,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use super::*;

    fn snapshot(seq: u32) -> CameraMetrics {
        // Fields derived from one sequence number so a mixed snapshot is
        // detectable by readers.
        CameraMetrics {
            vehicle_count: seq,
            density_label: DensityLabel::Low,
            green_time_seconds: 20 + seq % 41,
            waiting_time_seconds: seq % 46,
            co2_reduction: seq as f64 * 0.5,
            bottleneck: seq % 2 == 0,
            detection_confidence: 0.5,
            last_update: Utc::now(),
        }
    }

    #[test]
    fn unknown_camera_returns_none() {
        let store = MetricsStore::new(2, &SignalConfig::default());
        assert!(store.metrics(2).is_none());
        assert!(store.frame(0).is_none());
    }

    #[test]
    fn unpublished_camera_reports_initial_snapshot() {
        let config = SignalConfig::default();
        let store = MetricsStore::new(1, &config);
        let metrics = store.metrics(0).unwrap();
        assert_eq!(metrics.vehicle_count, 0);
        assert_eq!(metrics.green_time_seconds, config.min_green);
        assert_eq!(metrics.density_label, DensityLabel::Low);
    }

    #[test]
    fn publish_overwrites_whole_snapshot() {
        let store = MetricsStore::new(1, &SignalConfig::default());
        store.publish_metrics(0, snapshot(7));
        store.publish_metrics(0, snapshot(9));
        let metrics = store.metrics(0).unwrap();
        assert_eq!(metrics.vehicle_count, 9);
        assert_eq!(metrics.co2_reduction, 4.5);
    }

    #[test]
    fn summary_aggregates_across_cameras() {
        let store = MetricsStore::new(3, &SignalConfig::default());
        store.publish_metrics(0, snapshot(4));
        store.publish_metrics(1, snapshot(10));
        // Camera 2 stays on its initial snapshot.
        let summary = store.summary();
        assert_eq!(summary.total_vehicles, 14);
        assert_eq!(summary.active_bottlenecks, 2);
        assert!((summary.average_waiting_time - 14.0 / 3.0).abs() < 1e-9);
        assert!((summary.total_co2_reduction - 7.0).abs() < 1e-9);
    }

    #[test]
    fn concurrent_readers_never_observe_torn_snapshots() {
        let store = Arc::new(MetricsStore::new(1, &SignalConfig::default()));
        let done = Arc::new(AtomicBool::new(false));

        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let done = done.clone();
            readers.push(thread::spawn(move || {
                let mut last_seen = 0u32;
                while !done.load(Ordering::Relaxed) {
                    let metrics = store.metrics(0).expect("camera 0 exists");
                    let seq = metrics.vehicle_count;
                    // Every field must belong to the same publish call.
                    assert_eq!(metrics.green_time_seconds, 20 + seq % 41);
                    assert_eq!(metrics.waiting_time_seconds, seq % 46);
                    assert_eq!(metrics.co2_reduction, seq as f64 * 0.5);
                    assert_eq!(metrics.bottleneck, seq % 2 == 0);
                    // Single writer: observations never go backwards.
                    assert!(seq >= last_seen);
                    last_seen = seq;
                }
            }));
        }

        for seq in 1..5_000u32 {
            store.publish_metrics(0, snapshot(seq));
        }
        done.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
