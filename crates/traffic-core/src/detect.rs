use anyhow::Result;

use crate::frame::Frame;

/// Single detection returned by the detector adapter, in detector-input
/// coordinates (corner form `[x1, y1, x2, y2]`).
#[derive(Debug, Clone, Default)]
pub struct RawDetection {
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_id: i64,
}

/// Boundary for the external detection model.
///
/// The model is a black box with bounded but variable latency; everything in
/// this crate is built around scheduling this one call and smoothing its
/// output. Workers hold their detector exclusively, hence `&mut self`.
pub trait Detect: Send {
    /// Resolution the detector runs at, used to rescale boxes back to the
    /// frame's native resolution.
    fn input_size(&self) -> (i32, i32);

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;
}
