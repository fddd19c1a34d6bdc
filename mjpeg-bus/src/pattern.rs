use bytes::Bytes;
use jpeg_encoder::{ColorType, Encoder};

pub const PATTERN_WIDTH: u16 = 320;
pub const PATTERN_HEIGHT: u16 = 240;

const BARS: [[u8; 3]; 8] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
    [16, 16, 16],
];

/// Render the colour-bar placeholder used when no live source exists.
///
/// The top three quarters are the classic eight vertical bars, the bottom quarter a
/// grey ramp.
pub fn color_bars(width: u16, height: u16) -> anyhow::Result<Bytes> {
    if width == 0 || height == 0 {
        return Err(anyhow::anyhow!("invalid pattern size {}x{}", width, height));
    }

    let (w, h) = (width as usize, height as usize);
    let ramp_start = h * 3 / 4;
    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            if y < ramp_start {
                rgb.extend_from_slice(&BARS[x * BARS.len() / w]);
            } else {
                let level = (x * 255 / w.max(2).saturating_sub(1)).min(255) as u8;
                rgb.extend_from_slice(&[level, level, level]);
            }
        }
    }

    let mut out = Vec::new();
    Encoder::new(&mut out, 80)
        .encode(&rgb, width, height, ColorType::Rgb)
        .map_err(|e| anyhow::anyhow!("encode test pattern: {}", e))?;
    Ok(Bytes::from(out))
}
