//! TorchScript-backed vehicle detector.
//!
//! Wraps a YOLO-style exported module producing `[x, y, w, h, conf, class]`
//! rows. Frames arrive at their native resolution; the tensor is resized to
//! the detector input here, and the classifier in `traffic-core` rescales
//! boxes back to native coordinates.

use std::convert::TryFrom;
use std::path::Path;

use anyhow::Result;
use tch::{CModule, Device, Kind, Tensor};
use traffic_core::{Detect, Frame, FrameFormat, RawDetection};

const MAX_DETECTIONS: usize = 512;

pub use tch::Device as TorchDevice;

pub struct VehicleDetector {
    module: CModule,
    device: Device,
    input_size: (i64, i64),
    confidence_threshold: f32,
}

impl VehicleDetector {
    /// Load a TorchScript module onto `device`.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: (i64, i64),
    ) -> Result<Self> {
        let module = CModule::load_on_device(model_path, device)?;
        Ok(Self {
            module,
            device,
            input_size,
            confidence_threshold: traffic_core::DEFAULT_MIN_CONFIDENCE,
        })
    }

    pub fn with_confidence_threshold(mut self, confidence: f32) -> Self {
        self.confidence_threshold = confidence;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Convert a BGR frame into a normalized RGB tensor at the detector's
    /// input resolution.
    fn bgr_to_tensor(&self, frame: &Frame) -> Result<Tensor> {
        if frame.format != FrameFormat::Bgr8 {
            anyhow::bail!("unsupported frame format");
        }
        let expected = (frame.width as usize) * (frame.height as usize) * 3;
        if frame.data.len() != expected {
            anyhow::bail!(
                "unexpected frame buffer size: got {} bytes, expected {}",
                frame.data.len(),
                expected
            );
        }

        let (in_w, in_h) = self.input_size;
        let tensor = Tensor::from_slice(&frame.data)
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, frame.height as i64, frame.width as i64, 3])
            .permute([0, 3, 1, 2])
            // BGR -> RGB
            .flip([1])
            / 255.0;

        let tensor = if (frame.width as i64, frame.height as i64) != (in_w, in_h) {
            tensor.upsample_bilinear2d([in_h, in_w], false, None, None)
        } else {
            tensor
        };

        Ok(tensor)
    }
}

impl Detect for VehicleDetector {
    fn input_size(&self) -> (i32, i32) {
        (self.input_size.0 as i32, self.input_size.1 as i32)
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let input = self.bgr_to_tensor(frame)?;
        let output = self.module.forward_ts(&[input])?;
        let shape = output.size();
        if shape.len() != 3 {
            anyhow::bail!("unexpected detector output shape: {shape:?}");
        }
        if shape[0] != 1 {
            anyhow::bail!("detector expected batch=1 but received {}", shape[0]);
        }
        if shape[1] < 6 {
            anyhow::bail!(
                "detector output requires at least 6 channels (x,y,w,h,conf,class), got {}",
                shape[1]
            );
        }

        let preds = output
            .to_device(Device::Cpu)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous();
        let rows: Vec<Vec<f32>> = Vec::<Vec<f32>>::try_from(&preds)?;

        let mut detections = Vec::new();
        for row in rows {
            if row.len() < 6 {
                continue;
            }
            let score = row[4];
            if score < self.confidence_threshold {
                continue;
            }
            // Center-form box to corners.
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
                score,
                class_id: row[5] as i64,
            });
            if detections.len() >= MAX_DETECTIONS {
                break;
            }
        }

        Ok(detections)
    }
}
