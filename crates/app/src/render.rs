//! CPU overlay rendering and JPEG encoding for annotated frames.
//!
//! Counted vehicles get a green outline with a `<class> <conf>` tag; a small
//! status block in the top-left mirrors what the metrics endpoint reports for
//! the camera. Rendering is a pure side-table over the classifier output and
//! never touches shared state.

use anyhow::{Result, anyhow};
use image::{ImageBuffer, Rgb, codecs::jpeg::JpegEncoder};
use traffic_core::{CameraMetrics, EncodedFrame, Frame, VehicleBox};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BACKING_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

type Canvas = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Draw detection boxes and the status block onto `frame`, returning the
/// encoded JPEG ready for the store.
pub fn annotate_frame(
    frame: &Frame,
    frame_number: u64,
    boxes: &[VehicleBox],
    metrics: &CameraMetrics,
    jpeg_quality: i32,
) -> Result<EncodedFrame> {
    let width = frame.width as u32;
    let height = frame.height as u32;
    let rgb = bgr_to_rgb(&frame.data);
    let mut image = Canvas::from_vec(width, height, rgb)
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;

    for vehicle in boxes {
        let left = vehicle.bbox[0].round() as i32;
        let top = vehicle.bbox[1].round() as i32;
        let right = vehicle.bbox[2].round() as i32;
        let bottom = vehicle.bbox[3].round() as i32;
        draw_rectangle(&mut image, left, top, right, bottom, BOX_COLOR);

        let tag = format!("{} {:.0}%", vehicle.class.label(), vehicle.score * 100.0);
        let tag_y = (top - 10).max(0);
        draw_backed_text(&mut image, left, tag_y, &tag, BOX_COLOR);
    }

    let status = [
        format!("VEHICLES {}", metrics.vehicle_count),
        format!("TRAFFIC {}", metrics.density_label.label()),
        format!("GREEN {}S", metrics.green_time_seconds),
    ];
    for (line, text) in status.iter().enumerate() {
        draw_backed_text(&mut image, 8, 8 + line as i32 * 12, text, TEXT_COLOR);
    }

    let mut buffer = Vec::new();
    let quality = jpeg_quality.clamp(1, 100) as u8;
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(&image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;

    Ok(EncodedFrame {
        jpeg: buffer,
        frame_number,
        timestamp_ms: frame.timestamp_ms,
    })
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
    }
    output
}

fn draw_backed_text(image: &mut Canvas, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let text_width = text.chars().count() as i32 * 6;
    fill_rect(image, x - 1, y - 1, x + text_width, y + 8, BACKING_COLOR);
    draw_label(image, x, y, text, color);
}

fn draw_rectangle(image: &mut Canvas, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for x in left..=right {
        *image.get_pixel_mut(x as u32, top as u32) = color;
        *image.get_pixel_mut(x as u32, bottom as u32) = color;
    }
    for y in top..=bottom {
        *image.get_pixel_mut(left as u32, y as u32) = color;
        *image.get_pixel_mut(right as u32, y as u32) = color;
    }
}

fn fill_rect(image: &mut Canvas, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for y in top..=bottom {
        for x in left..=right {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

fn draw_label(image: &mut Canvas, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col as i32;
                        if px >= 0 && px < width {
                            *image.get_pixel_mut(px as u32, py as u32) = color;
                        }
                    }
                }
            }
        }
        x += 6;
    }
}

#[rustfmt::skip]
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'B' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110]),
        'C' => Some([0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110]),
        'D' => Some([0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110]),
        'E' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111]),
        'F' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000]),
        'G' => Some([0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111]),
        'H' => Some([0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'I' => Some([0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        'K' => Some([0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001]),
        'L' => Some([0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111]),
        'M' => Some([0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
        'N' => Some([0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001]),
        'O' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'P' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000]),
        'R' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
        'S' => Some([0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110]),
        'T' => Some([0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
        'U' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'V' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100]),
        'W' => Some([0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010]),
        '0' => Some([0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
        '1' => Some([0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        '2' => Some([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
        '3' => Some([0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110]),
        '4' => Some([0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
        '5' => Some([0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '6' => Some([0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
        '7' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
        '8' => Some([0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
        '9' => Some([0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100]),
        '%' => Some([0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use traffic_core::{FrameFormat, SignalConfig, VehicleClass};

    use super::*;

    fn test_frame(width: i32, height: i32) -> Frame {
        Frame {
            data: vec![128u8; (width * height * 3) as usize],
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }
    }

    #[test]
    fn produces_a_jpeg_with_overlays() {
        let frame = test_frame(64, 48);
        let boxes = vec![VehicleBox {
            class: VehicleClass::Car,
            score: 0.9,
            bbox: [4.0, 4.0, 30.0, 30.0],
        }];
        let metrics = CameraMetrics::initial(&SignalConfig::default());
        let encoded = annotate_frame(&frame, 3, &boxes, &metrics, 85).unwrap();
        assert_eq!(encoded.frame_number, 3);
        // JPEG magic bytes.
        assert_eq!(&encoded.jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn drawing_on_an_empty_canvas_is_a_no_op() {
        let mut canvas = Canvas::from_vec(0, 0, Vec::new()).unwrap();
        draw_rectangle(&mut canvas, 0, 0, 10, 10, BOX_COLOR);
        fill_rect(&mut canvas, -5, -5, 5, 5, BACKING_COLOR);
        draw_label(&mut canvas, 0, 0, "EMPTY", TEXT_COLOR);
    }

    #[test]
    fn tolerates_boxes_outside_the_frame() {
        let frame = test_frame(32, 32);
        let boxes = vec![VehicleBox {
            class: VehicleClass::Bus,
            score: 0.5,
            bbox: [-10.0, -10.0, 100.0, 100.0],
        }];
        let metrics = CameraMetrics::initial(&SignalConfig::default());
        annotate_frame(&frame, 1, &boxes, &metrics, 60).unwrap();
    }
}
