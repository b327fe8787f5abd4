//! Camera sources backed by OpenCV `VideoCapture`.
//!
//! A source is opened synchronously so a camera that cannot start is known at
//! spawn time, then drained by a background thread that forwards decoded BGR
//! frames over a small bounded channel. The buffer is intentionally tiny to
//! backpressure the capture loop when the downstream worker falls behind.
//!
//! File-backed sources rewind to frame 0 on exhaustion and keep playing; the
//! demonstration footage is meant to loop forever.

use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use traffic_core::{CaptureError, Frame, FrameFormat};

/// Handle for an opened camera source.
pub struct CameraSource {
    pub frames: Receiver<Result<Frame, CaptureError>>,
    /// Source frame rate, used by the worker to derive its metrics cadence.
    pub fps: f64,
}

/// Open `uri` (a device index like `0`/`/dev/video0`, or a video file path),
/// resize frames to `target_size`, and stream them from a background thread.
pub fn open_source(uri: &str, target_size: (i32, i32)) -> Result<CameraSource, CaptureError> {
    let is_device = parse_device_index(uri).is_some() || uri.starts_with("/dev/video");
    let cap = open_video_capture(uri)?;

    let fps = cap
        .get(videoio::CAP_PROP_FPS)
        .ok()
        .filter(|&fps| fps.is_finite() && fps > 1.0)
        .unwrap_or(30.0);

    let (tx, rx) = bounded(2);
    let name = format!("ingest-{uri}");
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            if let Err(err) = capture_loop(cap, !is_device, target_size, tx.clone()) {
                let _ = tx.send(Err(err));
            }
        })
        .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(CameraSource { frames: rx, fps })
}

// A source yielding nothing for this many consecutive reads is declared dead.
const MAX_EMPTY_READS: u32 = 100;
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(50);

fn capture_loop(
    mut cap: VideoCapture,
    rewind_on_end: bool,
    target_size: (i32, i32),
    tx: Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let mut frame = Mat::default();
    let mut scratch = Mat::default();
    let (target_w, target_h) = target_size;
    let mut empty_reads: u32 = 0;

    loop {
        let grabbed = cap
            .read(&mut frame)
            .map_err(|e| CaptureError::Other(e.into()))?;

        let size = frame.size().map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed || size.width <= 0 {
            empty_reads += 1;
            if empty_reads >= MAX_EMPTY_READS {
                return Err(CaptureError::Other(anyhow!(
                    "source produced no frames in {MAX_EMPTY_READS} consecutive reads"
                )));
            }
            if rewind_on_end {
                // End of file: restart playback from the first frame.
                cap.set(videoio::CAP_PROP_POS_FRAMES, 0.0)
                    .map_err(|e| CaptureError::Other(e.into()))?;
            } else {
                // Device with no frame ready; back off instead of spinning.
                thread::sleep(EMPTY_READ_BACKOFF);
            }
            continue;
        }
        empty_reads = 0;

        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &frame,
                &mut scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &scratch
        } else {
            &frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        if tx
            .send(Ok(Frame {
                data,
                width: target_w,
                height: target_h,
                timestamp_ms: Utc::now().timestamp_millis(),
                format: FrameFormat::Bgr8,
            }))
            .is_err()
        {
            break;
        }
    }

    Ok(())
}

fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}

fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            if let Ok(cap) = VideoCapture::new(index, backend) {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
        }
    }

    for backend in [videoio::CAP_ANY, videoio::CAP_V4L] {
        if let Ok(cap) = VideoCapture::from_file(uri, backend) {
            if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                return Ok(cap);
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}
