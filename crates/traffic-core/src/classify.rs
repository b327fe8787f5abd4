//! Vehicle classification and counting on top of raw detector output.
//!
//! A detection counts as a vehicle when its class is in the fixed vehicle set
//! and its confidence clears the configured minimum. Box coordinates are
//! rescaled from detector-input resolution back to the frame's native
//! resolution with independent width/height ratios, since the detector runs
//! on a resized copy of the frame for throughput.

use serde::Serialize;

use crate::detect::RawDetection;

/// Default confidence gate applied to raw detections.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;

/// The vehicle classes we count, by COCO class id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum VehicleClass {
    Car,
    Motorbike,
    Bus,
    Truck,
}

impl VehicleClass {
    pub fn from_class_id(class_id: i64) -> Option<Self> {
        match class_id {
            2 => Some(VehicleClass::Car),
            3 => Some(VehicleClass::Motorbike),
            5 => Some(VehicleClass::Bus),
            7 => Some(VehicleClass::Truck),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VehicleClass::Car => "car",
            VehicleClass::Motorbike => "motorbike",
            VehicleClass::Bus => "bus",
            VehicleClass::Truck => "truck",
        }
    }
}

/// A counted vehicle with its box in native frame coordinates, kept around
/// for overlay rendering.
#[derive(Clone, Debug)]
pub struct VehicleBox {
    pub class: VehicleClass,
    pub score: f32,
    pub bbox: [f32; 4],
}

/// Result of classifying one frame's detections.
#[derive(Clone, Debug, Default)]
pub struct FrameCount {
    pub vehicles: u32,
    /// Mean confidence of the counted vehicles, 0 when none counted.
    pub mean_confidence: f32,
    pub boxes: Vec<VehicleBox>,
}

/// Filter raw detections down to vehicles and rescale their boxes from
/// detector space into `frame_width` x `frame_height`.
pub fn count_vehicles(
    detections: &[RawDetection],
    frame_width: i32,
    frame_height: i32,
    detector_size: (i32, i32),
    min_confidence: f32,
) -> FrameCount {
    let (detector_w, detector_h) = detector_size;
    let scale_x = if detector_w > 0 {
        frame_width as f32 / detector_w as f32
    } else {
        1.0
    };
    let scale_y = if detector_h > 0 {
        frame_height as f32 / detector_h as f32
    } else {
        1.0
    };

    let mut boxes = Vec::new();
    let mut confidence_sum = 0.0f32;

    for det in detections {
        let Some(class) = VehicleClass::from_class_id(det.class_id) else {
            continue;
        };
        if det.score < min_confidence {
            continue;
        }

        let left = (det.bbox[0] * scale_x).clamp(0.0, (frame_width - 1) as f32);
        let top = (det.bbox[1] * scale_y).clamp(0.0, (frame_height - 1) as f32);
        let right = (det.bbox[2] * scale_x).clamp(0.0, (frame_width - 1) as f32);
        let bottom = (det.bbox[3] * scale_y).clamp(0.0, (frame_height - 1) as f32);

        confidence_sum += det.score;
        boxes.push(VehicleBox {
            class,
            score: det.score,
            bbox: [left, top, right, bottom],
        });
    }

    let vehicles = boxes.len() as u32;
    let mean_confidence = if vehicles > 0 {
        confidence_sum / vehicles as f32
    } else {
        0.0
    };

    FrameCount {
        vehicles,
        mean_confidence,
        boxes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: i64, score: f32, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            bbox,
            score,
            class_id,
        }
    }

    #[test]
    fn counts_only_vehicle_classes() {
        let detections = vec![
            det(2, 0.9, [0.0, 0.0, 10.0, 10.0]),  // car
            det(0, 0.9, [0.0, 0.0, 10.0, 10.0]),  // person
            det(7, 0.8, [5.0, 5.0, 20.0, 20.0]),  // truck
            det(11, 0.9, [0.0, 0.0, 10.0, 10.0]), // stop sign
        ];
        let count = count_vehicles(&detections, 640, 360, (640, 360), 0.25);
        assert_eq!(count.vehicles, 2);
        assert_eq!(count.boxes[0].class, VehicleClass::Car);
        assert_eq!(count.boxes[1].class, VehicleClass::Truck);
    }

    #[test]
    fn drops_low_confidence_detections() {
        let detections = vec![
            det(2, 0.24, [0.0, 0.0, 10.0, 10.0]),
            det(3, 0.26, [0.0, 0.0, 10.0, 10.0]),
        ];
        let count = count_vehicles(&detections, 640, 360, (640, 360), DEFAULT_MIN_CONFIDENCE);
        assert_eq!(count.vehicles, 1);
        assert_eq!(count.boxes[0].class, VehicleClass::Motorbike);
    }

    #[test]
    fn rescales_with_independent_ratios() {
        // Detector ran at 640x360, native frame is 1920x1080: 3x in both axes.
        let detections = vec![det(5, 0.5, [100.0, 50.0, 200.0, 150.0])];
        let count = count_vehicles(&detections, 1920, 1080, (640, 360), 0.25);
        let bbox = count.boxes[0].bbox;
        assert_eq!(bbox, [300.0, 150.0, 600.0, 450.0]);
    }

    #[test]
    fn clamps_boxes_to_frame_bounds() {
        let detections = vec![det(2, 0.5, [-20.0, -10.0, 700.0, 400.0])];
        let count = count_vehicles(&detections, 640, 360, (640, 360), 0.25);
        let bbox = count.boxes[0].bbox;
        assert_eq!(bbox, [0.0, 0.0, 639.0, 359.0]);
    }

    #[test]
    fn mean_confidence_zero_when_empty() {
        let count = count_vehicles(&[], 640, 360, (640, 360), 0.25);
        assert_eq!(count.vehicles, 0);
        assert_eq!(count.mean_confidence, 0.0);
    }

    #[test]
    fn mean_confidence_averages_counted_vehicles() {
        let detections = vec![
            det(2, 0.4, [0.0, 0.0, 1.0, 1.0]),
            det(5, 0.8, [0.0, 0.0, 1.0, 1.0]),
            det(0, 0.9, [0.0, 0.0, 1.0, 1.0]), // ignored, not a vehicle
        ];
        let count = count_vehicles(&detections, 640, 360, (640, 360), 0.25);
        assert!((count.mean_confidence - 0.6).abs() < 1e-6);
    }
}
