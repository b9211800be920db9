//! Storage mode selection shared by the encoders.
//!
//! Each encoder declares a [`ColorPolicy`] listing the layouts it can write.
//! [`prepare`] classifies the raster, picks the cheapest layout that holds it
//! exactly and converts to it. When no layout fits, conversion only happens
//! if the caller opted in with `allow_lossy_conversion` or a color mode
//! override.

use std::borrow::Cow;

use crate::config::{ColorMode, EncodeParameters};
use crate::error::{ImagingError, Result};
use crate::raster::{
    self, classify, Classification, ColorModel, Layout, PixelRaster, Transparency,
};

use super::{AlphaSupport, ImageFormat};

/// Palette capability of a format.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IndexedSupport {
    pub max_colors: usize,
    pub alpha: AlphaSupport,
}

/// Layouts a format can write.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ColorPolicy {
    pub bitonal: bool,
    pub grayscale: bool,
    pub indexed: Option<IndexedSupport>,
    pub rgb: bool,
    pub rgba: bool,
}

impl ColorPolicy {
    fn richest_rank(&self) -> u8 {
        if self.rgb || self.rgba {
            3
        } else if self.indexed.is_some() {
            2
        } else if self.grayscale {
            1
        } else {
            0
        }
    }
}

impl AlphaSupport {
    fn holds(self, class: &Classification) -> bool {
        match self {
            AlphaSupport::Full => true,
            AlphaSupport::None => class.is_opaque(),
            AlphaSupport::SingleTransparent => {
                class.transparency != Transparency::Translucent
                    && class
                        .colors
                        .as_ref()
                        .map_or(false, |c| c.iter().filter(|c| c.a == 0).count() <= 1)
            }
        }
    }
}

fn describe(class: &Classification) -> String {
    let base = match class.model {
        ColorModel::Bitonal => "bitonal".to_string(),
        ColorModel::Grayscale => "grayscale".to_string(),
        ColorModel::Indexed(n) => format!("{}-color indexed", n),
        ColorModel::FullColor => "full color".to_string(),
    };
    match class.transparency {
        Transparency::Opaque => base,
        Transparency::Binary => format!("{} transparent", base),
        Transparency::Translucent => format!("{} translucent", base),
    }
}

fn same_layout<'a>(raster: &'a PixelRaster, layout: Layout) -> Option<Cow<'a, PixelRaster>> {
    (raster.layout() == layout).then_some(Cow::Borrowed(raster))
}

/// Pick the cheapest exact layout at or above `floor`.
fn lossless<'a>(
    raster: &'a PixelRaster,
    class: &Classification,
    policy: &ColorPolicy,
    floor: u8,
) -> Result<Option<Cow<'a, PixelRaster>>> {
    let opaque = class.is_opaque();
    if floor == 0 && policy.bitonal && class.model == ColorModel::Bitonal {
        return Ok(Some(match same_layout(raster, Layout::Bitonal) {
            Some(r) => r,
            None => Cow::Owned(raster::to_bitonal(raster)?),
        }));
    }
    if floor <= 1
        && policy.grayscale
        && opaque
        && matches!(class.model, ColorModel::Bitonal | ColorModel::Grayscale)
    {
        return Ok(Some(match same_layout(raster, Layout::Grayscale) {
            Some(r) => r,
            None => Cow::Owned(raster::to_grayscale(raster)?),
        }));
    }
    if floor <= 2 {
        if let (Some(indexed), Some(colors)) = (policy.indexed, class.colors.as_ref()) {
            if colors.len() <= indexed.max_colors && indexed.alpha.holds(class) {
                return Ok(Some(Cow::Owned(raster::to_indexed_exact(raster, colors)?)));
            }
        }
    }
    if policy.rgb && opaque {
        return Ok(Some(match same_layout(raster, Layout::Rgb) {
            Some(r) => r,
            None => Cow::Owned(raster::to_rgb(raster)?),
        }));
    }
    if policy.rgba {
        return Ok(Some(match same_layout(raster, Layout::Rgba) {
            Some(r) => r,
            None => Cow::Owned(raster::to_rgba(raster)?),
        }));
    }
    Ok(None)
}

/// Convert to the richest layout the format has, losing what does not fit.
fn lossy<'a>(raster: &'a PixelRaster, policy: &ColorPolicy) -> Result<Cow<'a, PixelRaster>> {
    let converted = if policy.rgba {
        raster::to_rgba(raster)?
    } else if policy.rgb {
        raster::to_rgb(raster)?
    } else if let Some(indexed) = policy.indexed {
        raster::quantize(raster, indexed.max_colors, indexed.alpha != AlphaSupport::None)?
    } else if policy.grayscale {
        raster::to_grayscale(raster)?
    } else {
        raster::to_bitonal(raster)?
    };
    Ok(Cow::Owned(converted))
}

/// Bring `raster` into a layout `policy` allows.
pub(crate) fn prepare<'a>(
    format: ImageFormat,
    raster: &'a PixelRaster,
    policy: &ColorPolicy,
    params: &EncodeParameters,
) -> Result<Cow<'a, PixelRaster>> {
    let (source, floor): (Cow<'a, PixelRaster>, u8) = match params.color_mode {
        None => (Cow::Borrowed(raster), 0),
        Some(ColorMode::Bitonal) => (Cow::Owned(raster::to_bitonal(raster)?), 0),
        Some(ColorMode::Grayscale) => (Cow::Owned(raster::to_grayscale(raster)?), 1),
        Some(ColorMode::Indexed) => (Cow::Borrowed(raster), 2),
        Some(ColorMode::FullColor) => (Cow::Borrowed(raster), 3),
    };
    let class = classify(&source);

    if floor > policy.richest_rank() {
        return Err(ImagingError::UnsupportedColorMode {
            format,
            required: format!("{:?}", params.color_mode.unwrap_or(ColorMode::FullColor)).to_lowercase(),
        });
    }

    let chosen = match source {
        Cow::Borrowed(r) => lossless(r, &class, policy, floor)?,
        Cow::Owned(ref r) => lossless(r, &class, policy, floor)?.map(|c| Cow::Owned(c.into_owned())),
    };
    if let Some(chosen) = chosen {
        log::trace!("{}: storing {} raster as {:?}", format, describe(&class), chosen.layout());
        return Ok(chosen);
    }

    if !(params.allow_lossy_conversion || params.color_mode.is_some()) {
        return Err(ImagingError::UnsupportedColorMode {
            format,
            required: describe(&class),
        });
    }
    log::debug!("{}: lossy conversion of {} raster", format, describe(&class));
    match source {
        Cow::Borrowed(r) => lossy(r, policy),
        Cow::Owned(r) => Ok(Cow::Owned(lossy(&r, policy)?.into_owned())),
    }
}

/// Error for an encoder handed a layout its policy never produces.
pub(crate) fn unexpected_layout(format: ImageFormat, layout: Layout) -> ImagingError {
    ImagingError::InvalidRaster(format!("{} encoder cannot write {:?} samples", format, layout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Pixels, BLACK, WHITE};

    const BITONAL_ONLY: ColorPolicy = ColorPolicy {
        bitonal: true,
        grayscale: false,
        indexed: None,
        rgb: false,
        rgba: false,
    };

    const PALETTE_ONLY: ColorPolicy = ColorPolicy {
        bitonal: false,
        grayscale: false,
        indexed: Some(IndexedSupport {
            max_colors: 256,
            alpha: AlphaSupport::SingleTransparent,
        }),
        rgb: false,
        rgba: false,
    };

    const EVERYTHING: ColorPolicy = ColorPolicy {
        bitonal: true,
        grayscale: true,
        indexed: Some(IndexedSupport {
            max_colors: 256,
            alpha: AlphaSupport::Full,
        }),
        rgb: true,
        rgba: true,
    };

    fn colorful(width: u32) -> PixelRaster {
        let data = (0..width * width)
            .flat_map(|i| [(i * 3) as u8, (i * 7) as u8, (i / 3) as u8])
            .collect();
        PixelRaster::from_rgb8(width, width, data).unwrap()
    }

    #[test]
    fn test_picks_cheapest_layout() {
        let bw = PixelRaster::from_argb(2, 1, &[0xFF000000, 0xFFFFFFFF]).unwrap();
        let params = EncodeParameters::default();
        let out = prepare(ImageFormat::Png, &bw, &EVERYTHING, &params).unwrap();
        assert_eq!(out.layout(), Layout::Bitonal);
        assert!(out.same_pixels(&bw));

        let gray = PixelRaster::from_argb(2, 1, &[0xFF101010, 0xFF808080]).unwrap();
        let out = prepare(ImageFormat::Png, &gray, &EVERYTHING, &params).unwrap();
        assert_eq!(out.layout(), Layout::Grayscale);

        let big = colorful(20);
        let out = prepare(ImageFormat::Png, &big, &EVERYTHING, &params).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn test_rejects_without_opt_in() {
        let raster = colorful(20);
        let err = prepare(ImageFormat::Pbm, &raster, &BITONAL_ONLY, &EncodeParameters::default())
            .unwrap_err();
        assert!(matches!(err, ImagingError::UnsupportedColorMode { .. }));

        let out = prepare(ImageFormat::Pbm, &raster, &BITONAL_ONLY, &EncodeParameters::lossy()).unwrap();
        assert_eq!(out.layout(), Layout::Bitonal);
        assert_eq!(out.dimensions(), raster.dimensions());
    }

    #[test]
    fn test_palette_quantizes_with_opt_in() {
        let raster = colorful(30);
        assert!(prepare(ImageFormat::Gif, &raster, &PALETTE_ONLY, &EncodeParameters::default()).is_err());
        let out = prepare(ImageFormat::Gif, &raster, &PALETTE_ONLY, &EncodeParameters::lossy()).unwrap();
        match out.pixels() {
            Pixels::Indexed { palette, .. } => assert!(palette.len() <= 256),
            other => panic!("unexpected {:?}", other.layout()),
        }
    }

    #[test]
    fn test_single_transparent_color() {
        let two_clear = PixelRaster::from_argb(2, 1, &[0x00FF0000, 0x0000FF00]).unwrap();
        let params = EncodeParameters::default();
        assert!(prepare(ImageFormat::Gif, &two_clear, &PALETTE_ONLY, &params).is_err());
        let one_clear = PixelRaster::from_argb(2, 1, &[0x00000000, 0xFF00FF00]).unwrap();
        assert!(prepare(ImageFormat::Gif, &one_clear, &PALETTE_ONLY, &params).is_ok());
    }

    #[test]
    fn test_override_is_honored() {
        let raster = PixelRaster::new(2, 1, Pixels::Bitonal(vec![0, 1])).unwrap();
        let params = EncodeParameters::default().with_color_mode(ColorMode::FullColor);
        let out = prepare(ImageFormat::Png, &raster, &EVERYTHING, &params).unwrap();
        assert_eq!(out.layout(), Layout::Rgb);
        assert_eq!(out.pixel(0, 0), BLACK);
        assert_eq!(out.pixel(1, 0), WHITE);

        let params = EncodeParameters::default().with_color_mode(ColorMode::Indexed);
        assert!(prepare(ImageFormat::Pbm, &raster, &BITONAL_ONLY, &params).is_err());

        let gray = EncodeParameters::default().with_color_mode(ColorMode::Grayscale);
        let colors = colorful(4);
        let out = prepare(ImageFormat::Png, &colors, &EVERYTHING, &gray).unwrap();
        assert_eq!(out.layout(), Layout::Grayscale);
    }
}
