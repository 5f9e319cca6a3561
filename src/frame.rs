//! Frames and render payloads.
//!
//! - `CapturedImage`: what a `FrameSource` yields (RGB8, no identity yet).
//! - `Frame`: an image stamped with a sequence id and acquisition time by the capture loop.
//! - `RenderFrame`: what the presentation context receives through the frame slot.
//!
//! `Frame` is deliberately not `Clone`. A frame is owned by exactly one stage of the
//! pipeline at a time; the only copies are made through [`Frame::duplicate`] for still
//! captures and save-on-alert.

use chrono::{DateTime, Utc};
use image::{ImageBuffer, Rgb, RgbImage};

use crate::alert::AlertLevel;
use crate::detect::Detection;
use crate::error::CaptureError;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

// 5x7 bitmap glyphs, one pixel of padding around the text inside the label band.
const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;
const LABEL_PADDING: u32 = 1;
const LABEL_HEIGHT: u32 = GLYPH_HEIGHT + 2 * LABEL_PADDING;

/// Raw RGB8 image produced by a frame source.
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    pixels: Vec<u8>,
}

impl CapturedImage {
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, CaptureError> {
        let expected = rgb_len(width, height)
            .ok_or_else(|| CaptureError::InvalidFrame("frame dimensions overflow".into()))?;
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidFrame(format!(
                "empty frame {}x{}",
                width, height
            )));
        }
        if pixels.len() != expected {
            return Err(CaptureError::InvalidFrame(format!(
                "expected {} RGB bytes for {}x{}, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// A captured image with its pipeline identity.
pub struct Frame {
    /// Monotonic per-pipeline sequence id. Dropped frames still consume an id.
    pub seq: u64,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pixels: Vec<u8>,
}

// No Clone impl: copies go through `duplicate`.

impl Frame {
    pub fn new(seq: u64, captured_at: DateTime<Utc>, image: CapturedImage) -> Self {
        Self {
            seq,
            captured_at,
            width: image.width,
            height: image.height,
            pixels: image.pixels,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Explicit deep copy for still capture and save-on-alert.
    pub fn duplicate(&self) -> Frame {
        Frame {
            seq: self.seq,
            captured_at: self.captured_at,
            width: self.width,
            height: self.height,
            pixels: self.pixels.clone(),
        }
    }

    pub fn into_rgb_image(self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels)
    }

    /// Draws each detection's box and a filled `"{class}: {conf:.2}"` label above it.
    pub fn annotate(mut self, detections: &[Detection]) -> Self {
        if detections.is_empty() {
            return self;
        }
        let (width, height, seq) = (self.width, self.height, self.seq);
        match ImageBuffer::<Rgb<u8>, &mut [u8]>::from_raw(width, height, self.pixels.as_mut_slice())
        {
            Some(mut image) => {
                for detection in detections {
                    draw_box(&mut image, detection.bbox, BOX_COLOR, BOX_THICKNESS);
                }
                for detection in detections {
                    draw_label(&mut image, detection.bbox, &label_text(detection));
                }
            }
            None => log::warn!("frame {} has inconsistent dimensions; skipping overlay", seq),
        }
        self
    }
}

/// Frame delivered to the presentation context.
pub struct RenderFrame {
    pub frame: Frame,
    pub detections: Vec<Detection>,
    pub level: AlertLevel,
    /// False for passthrough frames that never reached the engine.
    pub annotated: bool,
}

impl RenderFrame {
    pub fn passthrough(frame: Frame) -> Self {
        Self {
            frame,
            detections: Vec::new(),
            level: AlertLevel::Safe,
            annotated: false,
        }
    }

    pub fn annotated(frame: Frame, detections: Vec<Detection>, level: AlertLevel) -> Self {
        let frame = frame.annotate(&detections);
        Self {
            frame,
            detections,
            level,
            annotated: true,
        }
    }
}

fn rgb_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
}

fn draw_box(
    image: &mut ImageBuffer<Rgb<u8>, &mut [u8]>,
    bbox: [u32; 4],
    color: Rgb<u8>,
    thickness: u32,
) {
    let max_x = image.width().saturating_sub(1);
    let max_y = image.height().saturating_sub(1);
    let [x1, y1, x2, y2] = bbox;
    let (left, right) = (x1.min(max_x), x2.min(max_x));
    let (top, bottom) = (y1.min(max_y), y2.min(max_y));

    for t in 0..thickness {
        let top_row = (top + t).min(bottom);
        let bottom_row = bottom.saturating_sub(t).max(top);
        for x in left..=right {
            image.put_pixel(x, top_row, color);
            image.put_pixel(x, bottom_row, color);
        }
        let left_col = (left + t).min(right);
        let right_col = right.saturating_sub(t).max(left);
        for y in top..=bottom {
            image.put_pixel(left_col, y, color);
            image.put_pixel(right_col, y, color);
        }
    }
}

fn label_text(detection: &Detection) -> String {
    format!("{}: {:.2}", detection.class_name, detection.confidence)
}

/// Label band sits on top of the box, pushed down to row 0 when the box touches the top edge.
fn draw_label(image: &mut ImageBuffer<Rgb<u8>, &mut [u8]>, bbox: [u32; 4], text: &str) {
    let max_x = image.width().saturating_sub(1);
    let max_y = image.height().saturating_sub(1);
    let left = bbox[0].min(max_x);
    let top = bbox[1].min(max_y);
    let band_top = top.saturating_sub(LABEL_HEIGHT);
    let band_width = text.chars().count() as u32 * GLYPH_ADVANCE + LABEL_PADDING;

    fill_rect(
        image,
        left,
        band_top,
        left.saturating_add(band_width),
        band_top + LABEL_HEIGHT,
        BOX_COLOR,
    );
    draw_text(
        image,
        left + LABEL_PADDING,
        band_top + LABEL_PADDING,
        text,
        LABEL_TEXT_COLOR,
    );
}

fn fill_rect(
    image: &mut ImageBuffer<Rgb<u8>, &mut [u8]>,
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
    color: Rgb<u8>,
) {
    let right = right.min(image.width().saturating_sub(1));
    let bottom = bottom.min(image.height().saturating_sub(1));
    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x, y, color);
        }
    }
}

fn draw_text(
    image: &mut ImageBuffer<Rgb<u8>, &mut [u8]>,
    mut x: u32,
    y: u32,
    text: &str,
    color: Rgb<u8>,
) {
    let (width, height) = image.dimensions();
    for ch in text.chars().flat_map(char::to_uppercase) {
        if x >= width {
            break;
        }
        // Unknown characters leave a gap.
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                let py = y + row as u32;
                if py >= height {
                    break;
                }
                for col in 0..GLYPH_WIDTH {
                    let px = x + col;
                    if px < width && (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        image.put_pixel(px, py, color);
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
