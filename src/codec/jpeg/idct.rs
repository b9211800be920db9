//! Dequantization, inverse DCT and color conversion to a raster.

use std::sync::OnceLock;

use crate::error::{ImagingError, Result};
use crate::raster::PixelRaster;

use super::super::ImageFormat;
use super::scan::{Block, Frame};

/// `cos((2x + 1) u pi / 16)` scaled by `C(u) / 2`, indexed `[x][u]`.
fn basis() -> &'static [[f32; 8]; 8] {
    static TABLE: OnceLock<[[f32; 8]; 8]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [[0f32; 8]; 8];
        for (x, row) in table.iter_mut().enumerate() {
            for (u, value) in row.iter_mut().enumerate() {
                let c = if u == 0 { std::f32::consts::FRAC_1_SQRT_2 } else { 1.0 };
                let angle = (2 * x + 1) as f32 * u as f32 * std::f32::consts::PI / 16.0;
                *value = c / 2.0 * angle.cos();
            }
        }
        table
    })
}

/// Dequantize and transform one block into level-shifted samples.
pub(super) fn idct_block(block: &Block, quant: &[u16; 64], out: &mut [u8; 64]) {
    let basis = basis();
    let mut coef = [0f32; 64];
    for i in 0..64 {
        coef[i] = block[i] as f32 * quant[i] as f32;
    }
    let mut rows = [0f32; 64];
    for v in 0..8 {
        for x in 0..8 {
            let mut sum = 0.0;
            for u in 0..8 {
                sum += basis[x][u] * coef[v * 8 + u];
            }
            rows[v * 8 + x] = sum;
        }
    }
    for x in 0..8 {
        for y in 0..8 {
            let mut sum = 0.0;
            for v in 0..8 {
                sum += basis[y][v] * rows[v * 8 + x];
            }
            out[y * 8 + x] = (sum + 128.0).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// How the decoded components map to color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ColorTransform {
    Gray,
    YCbCr,
    Rgb,
    Cmyk,
    Ycck,
}

/// Full-resolution component planes, after IDCT.
struct Plane {
    samples: Vec<u8>,
    stride: usize,
    h: usize,
    v: usize,
}

fn render_planes(frame: &Frame, quant: &[Option<[u16; 64]>; 4]) -> Result<Vec<Plane>> {
    let mut planes = Vec::with_capacity(frame.components.len());
    for c in &frame.components {
        let table = quant[c.quant_table].as_ref().ok_or_else(|| {
            ImagingError::data(ImageFormat::Jpeg, format!("missing quantization table {}", c.quant_table))
        })?;
        let stride = c.blocks_w * 8;
        let mut samples = vec![0u8; stride * c.blocks_h * 8];
        let mut pixels = [0u8; 64];
        for by in 0..c.blocks_h {
            for bx in 0..c.blocks_w {
                idct_block(&c.coefficients[by * c.blocks_w + bx], table, &mut pixels);
                for y in 0..8 {
                    let at = (by * 8 + y) * stride + bx * 8;
                    samples[at..at + 8].copy_from_slice(&pixels[y * 8..y * 8 + 8]);
                }
            }
        }
        planes.push(Plane {
            samples,
            stride,
            h: c.h,
            v: c.v,
        });
    }
    Ok(planes)
}

fn clamp(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

pub(super) fn ycc_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let (y, cb, cr) = (y as f32, cb as f32 - 128.0, cr as f32 - 128.0);
    [
        clamp(y + 1.402 * cr),
        clamp(y - 0.344_136 * cb - 0.714_136 * cr),
        clamp(y + 1.772 * cb),
    ]
}

/// Build the output raster from the decoded coefficients.
pub(super) fn to_raster(frame: &Frame, quant: &[Option<[u16; 64]>; 4], transform: ColorTransform) -> Result<PixelRaster> {
    let planes = render_planes(frame, quant)?;
    let (w, h) = (frame.width as usize, frame.height as usize);
    let sample = |p: &Plane, x: usize, y: usize| -> u8 {
        let sx = x * p.h / frame.max_h;
        let sy = y * p.v / frame.max_v;
        p.samples[sy * p.stride + sx]
    };

    if transform == ColorTransform::Gray {
        let mut gray = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                gray.push(sample(&planes[0], x, y));
            }
        }
        return PixelRaster::from_gray8(frame.width, frame.height, gray);
    }

    let mut rgb = Vec::with_capacity(w * h * 3);
    let mut s = [0u8; 4];
    for y in 0..h {
        for x in 0..w {
            for (slot, p) in s.iter_mut().zip(&planes) {
                *slot = sample(p, x, y);
            }
            // Adobe CMYK is stored inverted, so each channel already holds
            // 255 minus the ink.
            let ink = |v: u8| ((v as u32 * s[3] as u32 + 127) / 255) as u8;
            let px = match transform {
                ColorTransform::YCbCr => ycc_to_rgb(s[0], s[1], s[2]),
                ColorTransform::Rgb => [s[0], s[1], s[2]],
                ColorTransform::Cmyk => [ink(s[0]), ink(s[1]), ink(s[2])],
                ColorTransform::Ycck => {
                    let [r, g, b] = ycc_to_rgb(s[0], s[1], s[2]);
                    [ink(255 - r), ink(255 - g), ink(255 - b)]
                }
                ColorTransform::Gray => [s[0]; 3],
            };
            rgb.extend_from_slice(&px);
        }
    }
    PixelRaster::from_rgb8(frame.width, frame.height, rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_only_block_is_flat() {
        let mut block = [0i16; 64];
        block[0] = 80;
        let mut out = [0u8; 64];
        idct_block(&block, &[1; 64], &mut out);
        assert!(out.iter().all(|&v| v == 138));
    }

    #[test]
    fn test_ycc_to_rgb() {
        assert_eq!(ycc_to_rgb(128, 128, 128), [128, 128, 128]);
        assert_eq!(ycc_to_rgb(76, 85, 255), [254, 0, 0]);
    }
}
