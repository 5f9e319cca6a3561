//! V4L2 camera source.
//!
//! Requests RGB3 at the configured size and rate. Drivers that refuse RGB3 fall back to
//! whatever format they report; YUYV and NV12 are converted to RGB in-process.

use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceStats};
use crate::config::CaptureSettings;
use crate::error::CaptureError;
use crate::frame::CapturedImage;

const MMAP_BUFFERS: u32 = 4;

pub struct V4l2Source {
    config: CaptureSettings,
    state: Option<DeviceV4l2State>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
    active_format: PixelFormat,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: CaptureSettings) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
            active_format: PixelFormat::Rgb24,
        }
    }

    fn unavailable(&self, reason: impl ToString) -> CaptureError {
        CaptureError::unavailable(self.config.device.clone(), reason)
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        format!("{} (v4l2)", self.config.device)
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .map_err(|err| self.unavailable(format!("open: {}", err)))?;
        let mut format = device
            .format()
            .map_err(|err| self.unavailable(format!("read format: {}", err)))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .map_err(|err| self.unavailable(format!("read format: {}", err)))?
            }
        };

        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            self.unavailable(format!("unsupported pixel format {}", format.fourcc))
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.active_format = pixel_format;

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
            },
        }
        .try_build()
        .map_err(|err| self.unavailable(format!("create buffer stream: {}", err)))?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: opened {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<CapturedImage, CaptureError> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| CaptureError::unavailable(self.config.device.clone(), "not open"))?;
        let pixels = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| buf.to_vec())
                .map_err(|err| match err.kind() {
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::BrokenPipe => {
                        CaptureError::unavailable(self.config.device.clone(), err)
                    }
                    _ => CaptureError::Transient(err.to_string()),
                })
        })?;

        let rgb = normalize_to_rgb(
            &pixels,
            self.active_width,
            self.active_height,
            self.active_format,
        )?;
        self.frame_count += 1;
        CapturedImage::from_rgb(self.active_width, self.active_height, rgb)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: closed {}", self.config.device);
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}
