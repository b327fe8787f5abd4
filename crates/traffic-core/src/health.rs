//! Lifecycle state for workers and the detector, surfaced by the health
//! endpoint. All fields are atomics so workers update them without locking.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use serde::Serialize;

/// Per-camera worker lifecycle. `Failed` is terminal: a camera whose source
/// never opened stays disabled for the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Running,
    Failed,
}

impl WorkerState {
    fn from_u8(value: u8) -> WorkerState {
        match value {
            1 => WorkerState::Running,
            2 => WorkerState::Failed,
            _ => WorkerState::Starting,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Failed => "failed",
        }
    }
}

struct CameraHealth {
    state: AtomicU8,
    published: AtomicBool,
}

pub struct PipelineHealth {
    cameras: Vec<CameraHealth>,
    detector_ready: AtomicBool,
}

impl PipelineHealth {
    pub fn new(camera_count: usize) -> Self {
        let cameras = (0..camera_count)
            .map(|_| CameraHealth {
                state: AtomicU8::new(0),
                published: AtomicBool::new(false),
            })
            .collect();
        Self {
            cameras,
            detector_ready: AtomicBool::new(false),
        }
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    pub fn mark_running(&self, camera: usize) {
        if let Some(entry) = self.cameras.get(camera) {
            entry.state.store(1, Ordering::SeqCst);
        }
    }

    pub fn mark_failed(&self, camera: usize) {
        if let Some(entry) = self.cameras.get(camera) {
            entry.state.store(2, Ordering::SeqCst);
        }
    }

    pub fn mark_published(&self, camera: usize) {
        if let Some(entry) = self.cameras.get(camera) {
            entry.published.store(true, Ordering::Relaxed);
        }
    }

    pub fn state(&self, camera: usize) -> Option<WorkerState> {
        self.cameras
            .get(camera)
            .map(|entry| WorkerState::from_u8(entry.state.load(Ordering::SeqCst)))
    }

    pub fn has_published(&self, camera: usize) -> bool {
        self.cameras
            .get(camera)
            .map(|entry| entry.published.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    pub fn set_detector_ready(&self, ready: bool) {
        self.detector_ready.store(ready, Ordering::SeqCst);
    }

    pub fn detector_ready(&self) -> bool {
        self.detector_ready.load(Ordering::SeqCst)
    }

    /// Workers that have not terminated into `Failed`.
    pub fn live_workers(&self) -> usize {
        self.cameras
            .iter()
            .filter(|entry| entry.state.load(Ordering::SeqCst) != 2)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_is_per_camera() {
        let health = PipelineHealth::new(3);
        health.mark_running(0);
        health.mark_running(1);
        health.mark_failed(1);
        assert_eq!(health.state(0), Some(WorkerState::Running));
        assert_eq!(health.state(1), Some(WorkerState::Failed));
        assert_eq!(health.state(2), Some(WorkerState::Starting));
        assert_eq!(health.live_workers(), 2);
    }

    #[test]
    fn published_flag_tracks_first_frame() {
        let health = PipelineHealth::new(1);
        assert!(!health.has_published(0));
        health.mark_published(0);
        assert!(health.has_published(0));
        assert!(!health.has_published(9));
    }
}
