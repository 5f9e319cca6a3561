//! Synthetic frame source for `stub://` devices.
//!
//! Produces a slowly shifting gradient with a bright block that moves across the scene,
//! paced to the configured frame rate. With `max_frames` set, the stream ends after that
//! many frames, which is how tests exercise end-of-stream handling.

use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::config::CaptureSettings;
use crate::error::CaptureError;
use crate::frame::CapturedImage;

const BLOCK_SIZE: u32 = 48;

pub struct SyntheticSource {
    config: CaptureSettings,
    frame_count: u64,
    /// Advances every 50 frames so the background changes occasionally.
    scene_state: u8,
    last_frame_at: Option<Instant>,
    opened: bool,
}

impl SyntheticSource {
    pub fn new(config: CaptureSettings) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
            last_frame_at: None,
            opened: false,
        }
    }

    fn frame_interval(&self) -> Option<Duration> {
        if self.config.target_fps == 0 {
            None
        } else {
            Some(Duration::from_secs(1) / self.config.target_fps)
        }
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval(), self.last_frame_at) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let (w, h) = (self.config.width, self.config.height);
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let travel = w.saturating_sub(BLOCK_SIZE).max(1) as u64;
        let block_x = ((self.frame_count * 4) % travel) as u32;
        let block_y = h.saturating_sub(BLOCK_SIZE) / 2;

        let mut pixels = Vec::with_capacity(w as usize * h as usize * 3);
        for y in 0..h {
            for x in 0..w {
                let in_block = x >= block_x
                    && x < block_x + BLOCK_SIZE
                    && y >= block_y
                    && y < block_y + BLOCK_SIZE;
                if in_block {
                    pixels.extend_from_slice(&[230, 230, 230]);
                } else {
                    let base = (x + y) as u64 + self.scene_state as u64 * 16;
                    pixels.push((base % 256) as u8);
                    pixels.push(((base / 2) % 256) as u8);
                    pixels.push(((y as u64 * 255) / h.max(1) as u64) as u8);
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.config.device)
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(CaptureError::unavailable(
                self.config.device.clone(),
                "synthetic frames need non-zero dimensions",
            ));
        }
        self.opened = true;
        log::info!(
            "SyntheticSource: opened {} ({}x{} @ {} fps)",
            self.config.device,
            self.config.width,
            self.config.height,
            self.config.target_fps
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<CapturedImage, CaptureError> {
        if !self.opened {
            return Err(CaptureError::unavailable(
                self.config.device.clone(),
                "source is not open",
            ));
        }
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Err(CaptureError::EndOfStream);
        }
        self.pace();
        let pixels = self.generate_pixels();
        self.frame_count += 1;
        CapturedImage::from_rgb(self.config.width, self.config.height, pixels)
    }

    fn close(&mut self) {
        if self.opened {
            log::debug!("SyntheticSource: closed {}", self.config.device);
        }
        self.opened = false;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}
