//! Parameter sets consumed by read and write calls.
//!
//! Passing `None` to any facade function is the same as passing the
//! `Default` value of the corresponding parameter type.

use serde::{Deserialize, Serialize};

use crate::codec::ImageFormat;
use crate::error::{ImagingError, Result};
use crate::metadata::PixelDensity;

/// Payload compression scheme requested for an encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Store samples uncompressed.
    None,
    /// Run-length encoding (PCX, TGA, BMP) or PackBits (TIFF).
    Rle,
    /// Lempel-Ziv-Welch (TIFF).
    Lzw,
    /// zlib/DEFLATE (PNG, TIFF).
    Deflate,
}

/// Explicit storage mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// One bit per pixel, black and white.
    Bitonal,
    /// 8-bit luminance.
    Grayscale,
    /// Palette of at most the format's maximum size.
    Indexed,
    /// Truecolor, with alpha when the raster has any.
    FullColor,
}

/// Options for one encode call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeParameters {
    /// Density to store; overrides the density in the written metadata.
    pub pixel_density: Option<PixelDensity>,
    /// Payload compression; each format documents its default.
    pub compression: Option<Compression>,
    /// zlib level 0 to 10 for deflate-based formats; defaults to 6.
    pub compression_level: Option<u8>,
    /// Force a storage mode instead of classifying the raster.
    pub color_mode: Option<ColorMode>,
    /// Permit lossy down-conversion when the raster needs more than the
    /// format can store.
    pub allow_lossy_conversion: bool,
    /// ICC profile to embed; overrides the profile in the written metadata.
    #[serde(skip)]
    pub icc_profile: Option<Vec<u8>>,
    /// Write the ASCII variants of PBM, PGM and PPM.
    pub plain_text: bool,
    /// Fail with `MetadataUnsupported` instead of dropping metadata the
    /// format cannot store.
    pub strict_metadata: bool,
}

impl EncodeParameters {
    /// Parse parameters from TOML.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let params: Self = toml::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    /// Parameters that opt in to lossy color conversion.
    pub fn lossy() -> Self {
        Self {
            allow_lossy_conversion: true,
            ..Default::default()
        }
    }

    /// Set the pixel density.
    pub fn with_pixel_density(mut self, density: PixelDensity) -> Self {
        self.pixel_density = Some(density);
        self
    }

    /// Set the compression scheme.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Force a color mode.
    pub fn with_color_mode(mut self, mode: ColorMode) -> Self {
        self.color_mode = Some(mode);
        self
    }

    /// Embed an ICC profile.
    pub fn with_icc_profile(mut self, profile: Vec<u8>) -> Self {
        self.icc_profile = Some(profile);
        self
    }

    /// Check ranges that do not depend on the target format.
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = self.compression_level {
            if level > 10 {
                return Err(ImagingError::InvalidParameter(format!(
                    "compression level {} is outside 0..=10",
                    level
                )));
            }
        }
        if let Some(profile) = &self.icc_profile {
            if profile.is_empty() {
                return Err(ImagingError::InvalidParameter(
                    "ICC profile is empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// Reject a compression scheme the format does not implement.
    pub(crate) fn compression_or(
        &self,
        format: ImageFormat,
        supported: &[Compression],
        default: Compression,
    ) -> Result<Compression> {
        match self.compression {
            None => Ok(default),
            Some(c) if supported.contains(&c) => Ok(c),
            Some(c) => Err(ImagingError::InvalidParameter(format!(
                "{} does not support {:?} compression",
                format, c
            ))),
        }
    }
}

/// Default per-side dimension limit.
pub const DEFAULT_MAX_DIMENSION: u32 = 1 << 18;

/// Default total pixel limit.
pub const DEFAULT_MAX_PIXELS: u64 = 1 << 28;

/// Options for read and query calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadParameters {
    /// Skip identification and use this format.
    pub format_hint: Option<ImageFormat>,
    /// Sub-image to read from multi-image containers.
    pub image_index: usize,
    /// Largest accepted width or height.
    pub max_dimension: u32,
    /// Largest accepted `width * height`.
    pub max_pixels: u64,
}

impl Default for ReadParameters {
    fn default() -> Self {
        Self {
            format_hint: None,
            image_index: 0,
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl ReadParameters {
    /// Parameters that force a format.
    pub fn with_format(format: ImageFormat) -> Self {
        Self {
            format_hint: Some(format),
            ..Default::default()
        }
    }

    /// Select a sub-image.
    pub fn with_image_index(mut self, index: usize) -> Self {
        self.image_index = index;
        self
    }

    /// Fail with `InvalidDimensions` when the size is zero or over the limits.
    pub fn check_dimensions(&self, width: u64, height: u64) -> Result<()> {
        let too_big = width > self.max_dimension as u64
            || height > self.max_dimension as u64
            || width.saturating_mul(height) > self.max_pixels;
        if width == 0 || height == 0 || too_big {
            return Err(ImagingError::InvalidDimensions { width, height });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_empty_toml() {
        let parsed = EncodeParameters::from_toml_str("").unwrap();
        assert_eq!(parsed, EncodeParameters::default());
    }

    #[test]
    fn test_toml_parameters() {
        let text = r#"
            compression = "lzw"
            compression_level = 9
            color_mode = "grayscale"
            allow_lossy_conversion = true

            [pixel_density]
            horizontal = 300.0
            vertical = 300.0
            unit = "inch"
        "#;
        let params = EncodeParameters::from_toml_str(text).unwrap();
        assert_eq!(params.compression, Some(Compression::Lzw));
        assert_eq!(params.color_mode, Some(ColorMode::Grayscale));
        assert!(params.allow_lossy_conversion);
        assert_eq!(params.pixel_density.unwrap().horizontal_dpi(), 300.0);
    }

    #[test]
    fn test_level_validation() {
        let err = EncodeParameters::from_toml_str("compression_level = 42").unwrap_err();
        assert!(matches!(err, ImagingError::InvalidParameter(_)));
    }

    #[test]
    fn test_dimension_limits() {
        let params = ReadParameters::default();
        assert!(params.check_dimensions(300, 300).is_ok());
        assert!(params.check_dimensions(0, 10).is_err());
        assert!(params.check_dimensions(1 << 19, 1).is_err());
        assert!(params.check_dimensions(1 << 17, 1 << 17).is_err());
    }

    #[test]
    fn test_compression_support() {
        let params = EncodeParameters::default().with_compression(Compression::Lzw);
        assert_eq!(
            params
                .compression_or(ImageFormat::Tiff, &[Compression::None, Compression::Lzw], Compression::None)
                .unwrap(),
            Compression::Lzw
        );
        assert!(params
            .compression_or(ImageFormat::Pcx, &[Compression::Rle], Compression::Rle)
            .is_err());
    }
}
