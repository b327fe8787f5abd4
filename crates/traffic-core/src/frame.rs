use thiserror::Error;

/// Raw BGR frame captured from a video source.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The source could not be opened at all. Fatal for the camera's worker.
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    /// Everything else is transient: the worker logs it and keeps draining.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
