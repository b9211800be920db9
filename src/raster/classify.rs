//! Minimal color representation of a raster.

use std::collections::BTreeSet;

use super::{PixelRaster, RGBA8, BLACK, WHITE};

/// Distinct colors tracked before classification gives up on a palette.
pub const MAX_TRACKED_COLORS: usize = 256;

/// The least representation that loses no information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorModel {
    /// Only opaque black and opaque white.
    Bitonal,
    /// Only opaque colors with `r == g == b`.
    Grayscale,
    /// At most [`MAX_TRACKED_COLORS`] distinct colors; holds the count.
    Indexed(usize),
    /// Anything else.
    FullColor,
}

/// How the alpha channel is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Transparency {
    /// Every pixel has alpha 255.
    Opaque,
    /// Alpha is only ever 0 or 255.
    Binary,
    /// Some alpha lies strictly between 0 and 255.
    Translucent,
}

/// Result of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Minimal color model.
    pub model: ColorModel,
    /// Alpha usage.
    pub transparency: Transparency,
    /// Distinct colors sorted by `(r, g, b, a)`; `None` past the threshold.
    pub colors: Option<Vec<RGBA8>>,
}

impl Classification {
    /// Whether no pixel carries transparency.
    pub fn is_opaque(&self) -> bool {
        self.transparency == Transparency::Opaque
    }

    /// Number of distinct colors, when tracked.
    pub fn color_count(&self) -> Option<usize> {
        self.colors.as_ref().map(Vec::len)
    }
}

fn pack(c: RGBA8) -> u32 {
    (c.r as u32) << 24 | (c.g as u32) << 16 | (c.b as u32) << 8 | c.a as u32
}

fn unpack(v: u32) -> RGBA8 {
    RGBA8::new((v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8)
}

/// Scan every pixel once and report the minimal color model.
///
/// The result depends only on the set of colors present, never on the order
/// they are visited in.
pub fn classify(raster: &PixelRaster) -> Classification {
    let mut seen: BTreeSet<u32> = BTreeSet::new();
    let mut overflow = false;
    let mut transparency = Transparency::Opaque;

    for px in raster.iter_rgba() {
        match px.a {
            255 => {}
            0 => transparency = transparency.max(Transparency::Binary),
            _ => transparency = Transparency::Translucent,
        }
        if !overflow {
            seen.insert(pack(px));
            if seen.len() > MAX_TRACKED_COLORS {
                overflow = true;
                seen.clear();
            }
        } else if transparency == Transparency::Translucent {
            break;
        }
    }

    if overflow {
        return Classification {
            model: ColorModel::FullColor,
            transparency,
            colors: None,
        };
    }

    let colors: Vec<RGBA8> = seen.into_iter().map(unpack).collect();
    let model = if colors.iter().all(|&c| c == BLACK || c == WHITE) {
        ColorModel::Bitonal
    } else if colors.iter().all(|c| c.a == 255 && c.r == c.g && c.g == c.b) {
        ColorModel::Grayscale
    } else {
        ColorModel::Indexed(colors.len())
    };

    Classification {
        model,
        transparency,
        colors: Some(colors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Pixels, PixelRaster};

    fn rgba(pixels: &[[u8; 4]]) -> PixelRaster {
        let data = pixels.iter().flatten().copied().collect();
        PixelRaster::from_rgba8(pixels.len() as u32, 1, data).unwrap()
    }

    #[test]
    fn test_bitonal() {
        let raster = rgba(&[[0, 0, 0, 255], [255, 255, 255, 255], [0, 0, 0, 255]]);
        let class = classify(&raster);
        assert_eq!(class.model, ColorModel::Bitonal);
        assert!(class.is_opaque());
        assert_eq!(class.color_count(), Some(2));
    }

    #[test]
    fn test_grayscale_and_indexed() {
        let gray = rgba(&[[10, 10, 10, 255], [200, 200, 200, 255]]);
        assert_eq!(classify(&gray).model, ColorModel::Grayscale);

        let colored = rgba(&[[10, 20, 30, 255], [200, 200, 200, 255]]);
        assert_eq!(classify(&colored).model, ColorModel::Indexed(2));

        let transparent_gray = rgba(&[[10, 10, 10, 0], [200, 200, 200, 255]]);
        let class = classify(&transparent_gray);
        assert_eq!(class.model, ColorModel::Indexed(2));
        assert_eq!(class.transparency, Transparency::Binary);
    }

    #[test]
    fn test_full_color_threshold() {
        let data: Vec<u8> = (0..300u32)
            .flat_map(|i| [(i % 256) as u8, (i / 256) as u8, 7, 255])
            .collect();
        let raster = PixelRaster::from_rgba8(300, 1, data).unwrap();
        let class = classify(&raster);
        assert_eq!(class.model, ColorModel::FullColor);
        assert!(class.colors.is_none());
    }

    #[test]
    fn test_order_independent() {
        let a = rgba(&[[1, 2, 3, 255], [4, 5, 6, 128], [1, 2, 3, 255]]);
        let b = rgba(&[[4, 5, 6, 128], [1, 2, 3, 255], [1, 2, 3, 255]]);
        assert_eq!(classify(&a), classify(&b));
        assert_eq!(classify(&a).transparency, Transparency::Translucent);
    }

    #[test]
    fn test_bitonal_layout() {
        let raster = PixelRaster::new(3, 1, Pixels::Bitonal(vec![1, 1, 1])).unwrap();
        assert_eq!(classify(&raster).model, ColorModel::Bitonal);
    }
}
