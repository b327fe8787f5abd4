//! Per-camera traffic analytics: vehicle counting, adaptive signal timing,
//! and the shared state bridging producer workers to read-side consumers.
//!
//! The crate is split into focused submodules:
//! - `frame`: Decoded frame and capture error types shared with the ingest crate.
//! - `detect`: Raw detection type and the detector adapter boundary.
//! - `classify`: Vehicle class filtering, counting, and box rescaling.
//! - `history`: Fixed-capacity window of recent vehicle counts.
//! - `signal`: The adaptive signal timing engine and density labelling.
//! - `store`: Single-writer/multi-reader metrics and frame slots per camera.
//! - `health`: Worker lifecycle state surfaced by the health endpoint.
//!
//! Nothing in here touches OpenCV or Torch; the heavy dependencies live at the
//! edges (`video-ingest`, `detector`) behind the types defined here.

pub use classify::{
    DEFAULT_MIN_CONFIDENCE, FrameCount, VehicleBox, VehicleClass, count_vehicles,
};
pub use detect::{Detect, RawDetection};
pub use frame::{CaptureError, Frame, FrameFormat};
pub use health::{PipelineHealth, WorkerState};
pub use history::{CountHistory, HISTORY_CAPACITY};
pub use signal::{
    DensityLabel, MAX_WAITING_SECONDS, SignalConfig, TimingResult, compute_timing, density_label,
};
pub use store::{CameraMetrics, EncodedFrame, MetricsStore, StoreSummary};

mod classify;
mod detect;
mod frame;
mod health;
mod history;
mod signal;
mod store;
