//! Layout conversions, lossless and lossy.
//!
//! Lossy conversions are only ever reached when the caller opted in; encoders
//! decide that, these functions just transform pixels.

use std::collections::BTreeMap;

use super::{Palette, PixelRaster, Pixels, RGBA8};
use crate::error::Result;

/// Rec. 601 luma of an opaque color.
pub fn luminance(c: RGBA8) -> u8 {
    ((c.r as u32 * 299 + c.g as u32 * 587 + c.b as u32 * 114 + 500) / 1000) as u8
}

/// Composite a color over opaque white.
pub fn flatten_alpha(c: RGBA8) -> RGBA8 {
    if c.a == 255 {
        return c;
    }
    let a = c.a as u32;
    let blend = |v: u8| ((v as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
    RGBA8::new(blend(c.r), blend(c.g), blend(c.b), 255)
}

/// Threshold to black and white at half luminance.
pub fn to_bitonal(raster: &PixelRaster) -> Result<PixelRaster> {
    let samples = raster
        .iter_rgba()
        .map(|c| u8::from(luminance(flatten_alpha(c)) >= 128))
        .collect();
    PixelRaster::new(raster.width(), raster.height(), Pixels::Bitonal(samples))
}

/// Reduce to 8-bit luminance.
pub fn to_grayscale(raster: &PixelRaster) -> Result<PixelRaster> {
    let samples = raster
        .iter_rgba()
        .map(|c| luminance(flatten_alpha(c)))
        .collect();
    PixelRaster::from_gray8(raster.width(), raster.height(), samples)
}

/// Expand to RGB, compositing any transparency over white.
pub fn to_rgb(raster: &PixelRaster) -> Result<PixelRaster> {
    let mut data = Vec::with_capacity(raster.pixel_count() * 3);
    for c in raster.iter_rgba().map(flatten_alpha) {
        data.extend_from_slice(&[c.r, c.g, c.b]);
    }
    PixelRaster::from_rgb8(raster.width(), raster.height(), data)
}

/// Expand to RGBA.
pub fn to_rgba(raster: &PixelRaster) -> Result<PixelRaster> {
    PixelRaster::from_rgba8(raster.width(), raster.height(), raster.to_rgba8())
}

/// Map every pixel onto `colors`, which must contain every color present.
///
/// `colors` is used as the palette in the given order.
pub fn to_indexed_exact(raster: &PixelRaster, colors: &[RGBA8]) -> Result<PixelRaster> {
    let lookup: BTreeMap<[u8; 4], u8> = colors
        .iter()
        .enumerate()
        .map(|(i, c)| ([c.r, c.g, c.b, c.a], i as u8))
        .collect();
    let mut indices = Vec::with_capacity(raster.pixel_count());
    for c in raster.iter_rgba() {
        let index = lookup.get(&[c.r, c.g, c.b, c.a]).copied().ok_or_else(|| {
            crate::error::ImagingError::InvalidRaster(format!(
                "color {:?} missing from palette",
                c
            ))
        })?;
        indices.push(index);
    }
    PixelRaster::from_indexed(
        raster.width(),
        raster.height(),
        Palette::new(colors.to_vec())?,
        indices,
    )
}

struct ColorBox {
    colors: Vec<([u8; 3], u32)>,
}

impl ColorBox {
    fn widest_channel(&self) -> (usize, u8) {
        let mut best = (0, 0);
        for ch in 0..3 {
            let min = self.colors.iter().map(|(c, _)| c[ch]).min().unwrap_or(0);
            let max = self.colors.iter().map(|(c, _)| c[ch]).max().unwrap_or(0);
            if max - min > best.1 {
                best = (ch, max - min);
            }
        }
        best
    }

    fn average(&self) -> RGBA8 {
        let total: u64 = self.colors.iter().map(|&(_, n)| n as u64).sum::<u64>().max(1);
        let mut sum = [0u64; 3];
        for (c, n) in &self.colors {
            for ch in 0..3 {
                sum[ch] += c[ch] as u64 * *n as u64;
            }
        }
        let avg = |ch: usize| ((sum[ch] + total / 2) / total) as u8;
        RGBA8::new(avg(0), avg(1), avg(2), 255)
    }
}

/// Median-cut quantization to at most `max_colors` entries.
///
/// When `keep_transparent` is set, pixels with alpha below 128 map to one
/// reserved fully transparent entry; all other pixels are treated as opaque.
/// The palette is deterministic for a given set of pixels.
pub fn quantize(raster: &PixelRaster, max_colors: usize, keep_transparent: bool) -> Result<PixelRaster> {
    let max_colors = max_colors.clamp(2, super::MAX_PALETTE_LEN);
    let mut histogram: BTreeMap<[u8; 3], u32> = BTreeMap::new();
    let mut any_transparent = false;
    for c in raster.iter_rgba() {
        if keep_transparent && c.a < 128 {
            any_transparent = true;
            continue;
        }
        let c = flatten_alpha(c);
        *histogram.entry([c.r, c.g, c.b]).or_insert(0) += 1;
    }

    let reserved = usize::from(any_transparent);
    let budget = (max_colors - reserved).max(1);
    let mut boxes = Vec::new();
    if !histogram.is_empty() {
        boxes.push(ColorBox {
            colors: histogram.into_iter().collect(),
        });
    }

    while boxes.len() < budget {
        let candidate = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.colors.len() > 1)
            .map(|(i, b)| (i, b.widest_channel()))
            .max_by(|a, b| a.1 .1.cmp(&b.1 .1).then(b.0.cmp(&a.0)));
        let Some((index, (channel, _))) = candidate else {
            break;
        };
        let mut colors = std::mem::take(&mut boxes[index].colors);
        colors.sort_by(|a, b| a.0[channel].cmp(&b.0[channel]).then(a.0.cmp(&b.0)));
        let total: u64 = colors.iter().map(|&(_, n)| n as u64).sum();
        let mut running = 0u64;
        let mut split = 1;
        for (i, &(_, n)) in colors.iter().enumerate() {
            running += n as u64;
            if running * 2 >= total {
                split = i + 1;
                break;
            }
        }
        let split = split.clamp(1, colors.len() - 1);
        let upper = colors.split_off(split);
        boxes[index].colors = colors;
        boxes.push(ColorBox { colors: upper });
    }

    let mut palette: Vec<RGBA8> = boxes.iter().map(ColorBox::average).collect();
    let mut lookup: BTreeMap<[u8; 3], u8> = BTreeMap::new();
    for (i, b) in boxes.iter().enumerate() {
        for (c, _) in &b.colors {
            lookup.insert(*c, i as u8);
        }
    }
    let transparent_index = palette.len() as u8;
    if any_transparent {
        palette.push(RGBA8::new(0, 0, 0, 0));
    }

    let mut indices = Vec::with_capacity(raster.pixel_count());
    for c in raster.iter_rgba() {
        if keep_transparent && c.a < 128 {
            indices.push(transparent_index);
        } else {
            let c = flatten_alpha(c);
            indices.push(lookup.get(&[c.r, c.g, c.b]).copied().unwrap_or(0));
        }
    }
    PixelRaster::from_indexed(raster.width(), raster.height(), Palette::new(palette)?, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{classify, ColorModel, Layout};

    fn gradient(width: u32, height: u32) -> PixelRaster {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 7) as u8, (y * 5) as u8, ((x + y) * 3) as u8]);
            }
        }
        PixelRaster::from_rgb8(width, height, data).unwrap()
    }

    #[test]
    fn test_luminance() {
        assert_eq!(luminance(RGBA8::new(255, 255, 255, 255)), 255);
        assert_eq!(luminance(RGBA8::new(0, 0, 0, 255)), 0);
        assert_eq!(flatten_alpha(RGBA8::new(0, 0, 0, 0)), RGBA8::new(255, 255, 255, 255));
    }

    #[test]
    fn test_bitonal_and_gray() {
        let raster = gradient(20, 20);
        let bw = to_bitonal(&raster).unwrap();
        assert_eq!(bw.layout(), Layout::Bitonal);
        assert_eq!(classify(&bw).model, ColorModel::Bitonal);
        let gray = to_grayscale(&raster).unwrap();
        assert_eq!(gray.dimensions(), (20, 20));
    }

    #[test]
    fn test_quantize_bounds_palette() {
        let raster = gradient(40, 40);
        let indexed = quantize(&raster, 16, false).unwrap();
        match indexed.pixels() {
            Pixels::Indexed { palette, .. } => assert!(palette.len() <= 16),
            other => panic!("unexpected layout {:?}", other.layout()),
        }
        // Same input, same palette.
        assert_eq!(indexed, quantize(&raster, 16, false).unwrap());
    }

    #[test]
    fn test_quantize_reserves_transparent_entry() {
        let raster = PixelRaster::from_argb(3, 1, &[0x00000000, 0xFFFF0000, 0xFF00FF00]).unwrap();
        let indexed = quantize(&raster, 4, true).unwrap();
        assert_eq!(indexed.pixel(0, 0).a, 0);
        assert_eq!(indexed.pixel(1, 0), RGBA8::new(255, 0, 0, 255));
        assert_eq!(indexed.pixel(2, 0), RGBA8::new(0, 255, 0, 255));
    }

    #[test]
    fn test_indexed_exact() {
        let raster = PixelRaster::from_argb(2, 1, &[0xFF010203, 0xFF040506]).unwrap();
        let colors = classify(&raster).colors.unwrap();
        let indexed = to_indexed_exact(&raster, &colors).unwrap();
        assert!(indexed.same_pixels(&raster));
    }
}
