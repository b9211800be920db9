//! Format-independent image metadata.
//!
//! Pixel density, ICC profiles and text tags are carried here independent of
//! how any single format stores them. Every field is optional; `None` means
//! the image did not say, which is distinct from an empty value.

use serde::{Deserialize, Serialize};

use crate::codec::ImageFormat;
use crate::error::{ImagingError, Result};

const CM_PER_INCH: f64 = 2.54;

/// Physical unit of a [`PixelDensity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityUnit {
    /// Pixels per inch.
    Inch,
    /// Pixels per centimeter.
    Centimeter,
}

/// Horizontal and vertical resolution in pixels per unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelDensity {
    horizontal: f64,
    vertical: f64,
    unit: DensityUnit,
}

impl PixelDensity {
    /// Create a density; both values must be finite and positive.
    pub fn new(horizontal: f64, vertical: f64, unit: DensityUnit) -> Result<Self> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(horizontal) || !valid(vertical) {
            return Err(ImagingError::InvalidParameter(format!(
                "pixel density must be positive, got {}x{}",
                horizontal, vertical
            )));
        }
        Ok(Self {
            horizontal,
            vertical,
            unit,
        })
    }

    /// Density in dots per inch.
    pub fn from_pixels_per_inch(horizontal: f64, vertical: f64) -> Result<Self> {
        Self::new(horizontal, vertical, DensityUnit::Inch)
    }

    /// Density in pixels per centimeter.
    pub fn from_pixels_per_centimeter(horizontal: f64, vertical: f64) -> Result<Self> {
        Self::new(horizontal, vertical, DensityUnit::Centimeter)
    }

    /// Density in pixels per meter, stored as pixels per centimeter.
    pub fn from_pixels_per_meter(horizontal: f64, vertical: f64) -> Result<Self> {
        Self::new(horizontal / 100.0, vertical / 100.0, DensityUnit::Centimeter)
    }

    /// Raw horizontal value in [`Self::unit`].
    pub fn horizontal(&self) -> f64 {
        self.horizontal
    }

    /// Raw vertical value in [`Self::unit`].
    pub fn vertical(&self) -> f64 {
        self.vertical
    }

    /// Unit of the raw values.
    pub fn unit(&self) -> DensityUnit {
        self.unit
    }

    fn to_inch(&self, value: f64) -> f64 {
        match self.unit {
            DensityUnit::Inch => value,
            DensityUnit::Centimeter => value * CM_PER_INCH,
        }
    }

    /// Horizontal dots per inch.
    pub fn horizontal_dpi(&self) -> f64 {
        self.to_inch(self.horizontal)
    }

    /// Vertical dots per inch.
    pub fn vertical_dpi(&self) -> f64 {
        self.to_inch(self.vertical)
    }

    /// Horizontal pixels per meter.
    pub fn horizontal_ppm(&self) -> f64 {
        self.horizontal_dpi() / CM_PER_INCH * 100.0
    }

    /// Vertical pixels per meter.
    pub fn vertical_ppm(&self) -> f64 {
        self.vertical_dpi() / CM_PER_INCH * 100.0
    }
}

/// One key/value text entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextTag {
    /// Tag name, e.g. `Comment` or a TIFF tag name.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl TextTag {
    /// Create a tag.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Metadata read from or written to an image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Physical resolution.
    pub pixel_density: Option<PixelDensity>,
    /// Embedded ICC profile, opaque.
    #[serde(skip)]
    pub icc_profile: Option<Vec<u8>>,
    /// Text tags in file order.
    pub text: Option<Vec<TextTag>>,
}

impl Metadata {
    /// Whether no field is present.
    pub fn is_empty(&self) -> bool {
        self.pixel_density.is_none() && self.icc_profile.is_none() && self.text.is_none()
    }

    /// Append a text tag, creating the list if needed.
    pub fn push_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.text.get_or_insert_with(Vec::new).push(TextTag::new(key, value));
    }

    /// First value stored under `key`.
    pub fn text_value(&self, key: &str) -> Option<&str> {
        self.text
            .as_ref()?
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// Color space reported by [`ImageInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColorType {
    /// One bit per pixel.
    BlackAndWhite,
    /// Luminance only.
    Grayscale,
    /// Palette based.
    Indexed,
    /// Red, green, blue.
    Rgb,
    /// Cyan, magenta, yellow, black.
    Cmyk,
    /// Luma and chroma.
    YCbCr,
    /// Luma, chroma and black.
    Ycck,
    /// Anything else.
    Other,
}

/// Header-level facts about an encoded image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    /// Detected format.
    pub format: ImageFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bits per pixel as stored.
    pub bits_per_pixel: u16,
    /// Stored color space.
    pub color_type: ColorType,
    /// Whether the image declares transparency.
    pub has_transparency: bool,
    /// Compression scheme name.
    pub compression: String,
    /// Number of images in the container.
    pub image_count: usize,
    /// Physical resolution, when stored.
    pub pixel_density: Option<PixelDensity>,
    /// Whether the image is interlaced or progressive.
    pub is_progressive: bool,
    /// Free-form comments.
    pub comments: Vec<String>,
}

impl ImageInfo {
    /// Info with the given size and neutral defaults.
    pub fn new(format: ImageFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            bits_per_pixel: 24,
            color_type: ColorType::Rgb,
            has_transparency: false,
            compression: "None".into(),
            image_count: 1,
            pixel_density: None,
            is_progressive: false,
            comments: Vec::new(),
        }
    }

    /// Horizontal DPI, when a density is stored.
    pub fn physical_width_dpi(&self) -> Option<f64> {
        self.pixel_density.map(|d| d.horizontal_dpi())
    }

    /// Vertical DPI, when a density is stored.
    pub fn physical_height_dpi(&self) -> Option<f64> {
        self.pixel_density.map(|d| d.vertical_dpi())
    }

    /// MIME type of [`Self::format`].
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_density_conversions() {
        let density = PixelDensity::from_pixels_per_inch(75.0, 150.0).unwrap();
        assert!((density.horizontal_ppm() - 2952.756).abs() < 0.01);
        let back = PixelDensity::from_pixels_per_meter(2953.0, 5906.0).unwrap();
        assert!((back.horizontal_dpi() - 75.0).abs() < 0.01);
        assert!((back.vertical_dpi() - 150.0).abs() < 0.02);
        assert_eq!(back.unit(), DensityUnit::Centimeter);
    }

    #[test]
    fn test_density_must_be_positive() {
        assert!(PixelDensity::from_pixels_per_inch(0.0, 72.0).is_err());
        assert!(PixelDensity::from_pixels_per_inch(72.0, f64::NAN).is_err());
    }

    #[test]
    fn test_absent_and_empty_text_differ() {
        let mut metadata = Metadata::default();
        assert!(metadata.is_empty());
        metadata.text = Some(Vec::new());
        assert!(!metadata.is_empty());
        metadata.push_text("Comment", "hello");
        assert_eq!(metadata.text_value("Comment"), Some("hello"));
        assert_eq!(metadata.text_value("Author"), None);
    }
}
