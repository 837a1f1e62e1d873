use anyhow::{anyhow, Result};

use crate::frame::{Frame, CHANNELS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
}

impl PixelFormat {
    #[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }

    fn expected_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Rgb24 => pixels.checked_mul(3),
            PixelFormat::Yuyv => pixels.checked_mul(2),
        }
    }
}

/// Convert a device buffer into `frame`.
///
/// When the device delivered a different resolution than the frame, pixels
/// are nearest-neighbor resampled to the frame size.
pub(crate) fn normalize_into(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    frame: &mut Frame,
) -> Result<()> {
    let expected = format
        .expected_len(width, height)
        .ok_or_else(|| anyhow!("{:?} frame dimensions overflow", format))?;
    if pixels.len() < expected || width == 0 || height == 0 {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }

    let (fw, fh) = (frame.width, frame.height);
    let out = frame.as_bytes_mut();
    for y in 0..fh {
        let sy = (y as u64 * height as u64 / fh as u64) as usize;
        for x in 0..fw {
            let sx = (x as u64 * width as u64 / fw as u64) as usize;
            let rgb = match format {
                PixelFormat::Rgb24 => {
                    let i = (sy * width as usize + sx) * 3;
                    [pixels[i], pixels[i + 1], pixels[i + 2]]
                }
                PixelFormat::Yuyv => yuyv_pixel(pixels, width as usize, sx, sy),
            };
            let o = (y as usize * fw as usize + x as usize) * CHANNELS;
            out[o..o + CHANNELS].copy_from_slice(&rgb);
        }
    }
    Ok(())
}

/// YUYV packs two pixels in four bytes: Y0 U Y1 V.
fn yuyv_pixel(pixels: &[u8], width: usize, x: usize, y: usize) -> [u8; 3] {
    let pair = (y * width + (x & !1)) * 2;
    let luma = if x & 1 == 0 { pixels[pair] } else { pixels[pair + 2] } as f32;
    let u = pixels[pair + 1] as f32 - 128.0;
    let v = pixels[pair + 3] as f32 - 128.0;

    let r = luma + 1.402_f32 * v;
    let g = luma - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = luma + 1.772_f32 * u;
    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_conversion_produces_gray() -> Result<()> {
        let yuyv = [128u8, 128, 128, 128, 128, 128, 128, 128];
        let mut frame = Frame::zeroed(2, 2);
        normalize_into(&yuyv, 2, 2, PixelFormat::Yuyv, &mut frame)?;
        assert_eq!(frame.as_bytes(), &[128u8; 12][..]);
        Ok(())
    }

    #[test]
    fn rgb_is_resampled_to_frame_size() -> Result<()> {
        // 2x1 source: red, blue. Upscaled to 4x2.
        let pixels = [255u8, 0, 0, 0, 0, 255];
        let mut frame = Frame::zeroed(4, 2);
        normalize_into(&pixels, 2, 1, PixelFormat::Rgb24, &mut frame)?;
        assert_eq!(frame.pixel(0, 0), Some([255, 0, 0]));
        assert_eq!(frame.pixel(1, 1), Some([255, 0, 0]));
        assert_eq!(frame.pixel(2, 0), Some([0, 0, 255]));
        assert_eq!(frame.pixel(3, 1), Some([0, 0, 255]));
        Ok(())
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut frame = Frame::zeroed(2, 2);
        assert!(normalize_into(&[0u8; 5], 2, 2, PixelFormat::Rgb24, &mut frame).is_err());
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
