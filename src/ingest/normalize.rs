use crate::error::CaptureError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"NV12" => Some(PixelFormat::Nv12),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, CaptureError> {
    let plane = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| invalid("frame dimensions overflow".to_string()))?;
    match format {
        PixelFormat::Rgb24 => {
            let expected = plane * 3;
            // Drivers may pad the final buffer; anything shorter is a torn frame.
            if pixels.len() < expected {
                return Err(length_mismatch("RGB", expected, pixels.len()));
            }
            Ok(pixels[..expected].to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width as usize, height as usize),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width as usize, height as usize),
    }
}

fn yuyv_to_rgb(pixels: &[u8], w: usize, h: usize) -> Result<Vec<u8>, CaptureError> {
    let expected = w * h * 2;
    if w % 2 != 0 || pixels.len() < expected {
        return Err(length_mismatch("YUYV", expected, pixels.len()));
    }

    let mut rgb = Vec::with_capacity(w * h * 3);
    for chunk in pixels[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            rgb.extend_from_slice(&yuv_to_rgb(y as f32, u, v));
        }
    }
    Ok(rgb)
}

fn nv12_to_rgb(pixels: &[u8], w: usize, h: usize) -> Result<Vec<u8>, CaptureError> {
    let y_plane = w * h;
    let expected = y_plane + y_plane / 2;
    if pixels.len() != expected {
        return Err(length_mismatch("NV12", expected, pixels.len()));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;
            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&yuv_to_rgb(y, u, v));
        }
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    [
        clamp_to_u8(y + 1.402_f32 * v),
        clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v),
        clamp_to_u8(y + 1.772_f32 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn invalid(message: String) -> CaptureError {
    CaptureError::InvalidFrame(message)
}

fn length_mismatch(format: &str, expected: usize, got: usize) -> CaptureError {
    invalid(format!(
        "{} frame length mismatch: expected {}, got {}",
        format, expected, got
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12).unwrap();
        assert_eq!(rgb, vec![128u8; 12]);
    }

    #[test]
    fn yuyv_conversion_produces_gray() {
        let yuyv = vec![128u8; 2 * 2 * 2];
        let rgb = normalize_to_rgb(&yuyv, 2, 2, PixelFormat::Yuyv).unwrap();
        assert_eq!(rgb, vec![128u8; 12]);
    }

    #[test]
    fn short_rgb_buffer_is_rejected() {
        let err = normalize_to_rgb(&[1u8; 8], 1, 3, PixelFormat::Rgb24).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidFrame(_)));
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
