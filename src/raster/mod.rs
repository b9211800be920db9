//! In-memory pixel raster shared by every decoder and encoder.
//!
//! A [`PixelRaster`] is a width, a height and one of five sample layouts.
//! The layout is a tagged union, so an indexed raster always carries its
//! palette and a bitonal raster can only hold black and white.

mod classify;
mod convert;

pub use classify::{classify, Classification, ColorModel, Transparency, MAX_TRACKED_COLORS};
pub use convert::{
    flatten_alpha, luminance, quantize, to_bitonal, to_grayscale, to_indexed_exact, to_rgb,
    to_rgba,
};

pub use rgb::RGBA8;

use crate::error::{ImagingError, Result};

/// Opaque black.
pub const BLACK: RGBA8 = RGBA8 {
    r: 0,
    g: 0,
    b: 0,
    a: 255,
};

/// Opaque white.
pub const WHITE: RGBA8 = RGBA8 {
    r: 255,
    g: 255,
    b: 255,
    a: 255,
};

/// Maximum number of entries in a [`Palette`].
pub const MAX_PALETTE_LEN: usize = 256;

/// Ordered color table referenced by indexed samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette(Vec<RGBA8>);

impl Palette {
    /// Create a palette of 1 to 256 colors.
    pub fn new(colors: Vec<RGBA8>) -> Result<Self> {
        if colors.is_empty() || colors.len() > MAX_PALETTE_LEN {
            return Err(ImagingError::InvalidRaster(format!(
                "palette must hold 1 to {} colors, got {}",
                MAX_PALETTE_LEN,
                colors.len()
            )));
        }
        Ok(Self(colors))
    }

    /// Build an opaque palette from packed `r, g, b` triples.
    pub fn from_rgb_triples(data: &[u8]) -> Result<Self> {
        Self::new(
            data.chunks_exact(3)
                .map(|c| RGBA8::new(c[0], c[1], c[2], 255))
                .collect(),
        )
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a constructed palette.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up an entry.
    pub fn get(&self, index: usize) -> Option<RGBA8> {
        self.0.get(index).copied()
    }

    /// All entries in order.
    pub fn colors(&self) -> &[RGBA8] {
        &self.0
    }

    /// Whether any entry is not fully opaque.
    pub fn has_transparency(&self) -> bool {
        self.0.iter().any(|c| c.a != 255)
    }
}

/// Sample storage, one variant per channel layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pixels {
    /// One byte per pixel: 0 is black, 1 is white.
    Bitonal(Vec<u8>),
    /// One 8-bit luminance byte per pixel.
    Grayscale(Vec<u8>),
    /// One palette index per pixel.
    Indexed {
        /// Color table.
        palette: Palette,
        /// Row-major indices into `palette`.
        indices: Vec<u8>,
    },
    /// Three bytes per pixel, `r g b`.
    Rgb(Vec<u8>),
    /// Four bytes per pixel, `r g b a`, straight alpha.
    Rgba(Vec<u8>),
}

/// Discriminant of [`Pixels`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// See [`Pixels::Bitonal`].
    Bitonal,
    /// See [`Pixels::Grayscale`].
    Grayscale,
    /// See [`Pixels::Indexed`].
    Indexed,
    /// See [`Pixels::Rgb`].
    Rgb,
    /// See [`Pixels::Rgba`].
    Rgba,
}

impl Layout {
    /// Bytes each pixel occupies in the sample buffer.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Layout::Bitonal | Layout::Grayscale | Layout::Indexed => 1,
            Layout::Rgb => 3,
            Layout::Rgba => 4,
        }
    }
}

impl Pixels {
    /// Layout tag of this buffer.
    pub fn layout(&self) -> Layout {
        match self {
            Pixels::Bitonal(_) => Layout::Bitonal,
            Pixels::Grayscale(_) => Layout::Grayscale,
            Pixels::Indexed { .. } => Layout::Indexed,
            Pixels::Rgb(_) => Layout::Rgb,
            Pixels::Rgba(_) => Layout::Rgba,
        }
    }

    fn samples(&self) -> &[u8] {
        match self {
            Pixels::Bitonal(s) | Pixels::Grayscale(s) | Pixels::Rgb(s) | Pixels::Rgba(s) => s,
            Pixels::Indexed { indices, .. } => indices,
        }
    }
}

/// A complete, validated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelRaster {
    width: u32,
    height: u32,
    pixels: Pixels,
}

impl PixelRaster {
    /// Create a raster, checking the buffer against the dimensions and layout.
    pub fn new(width: u32, height: u32, pixels: Pixels) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ImagingError::InvalidDimensions {
                width: width as u64,
                height: height as u64,
            });
        }
        let count = width as usize * height as usize;
        let expected = count * pixels.layout().bytes_per_pixel();
        let actual = pixels.samples().len();
        if actual != expected {
            return Err(ImagingError::InvalidRaster(format!(
                "{}x{} {:?} raster needs {} bytes, got {}",
                width,
                height,
                pixels.layout(),
                expected,
                actual
            )));
        }
        match &pixels {
            Pixels::Bitonal(samples) => {
                if samples.iter().any(|&s| s > 1) {
                    return Err(ImagingError::InvalidRaster(
                        "bitonal samples must be 0 or 1".into(),
                    ));
                }
            }
            Pixels::Indexed { palette, indices } => {
                if let Some(&bad) = indices.iter().find(|&&i| i as usize >= palette.len()) {
                    return Err(ImagingError::InvalidRaster(format!(
                        "index {} outside palette of {} colors",
                        bad,
                        palette.len()
                    )));
                }
            }
            _ => {}
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Create an RGBA raster from packed `r g b a` bytes.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, Pixels::Rgba(data))
    }

    /// Create an RGB raster from packed `r g b` bytes.
    pub fn from_rgb8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, Pixels::Rgb(data))
    }

    /// Create a grayscale raster.
    pub fn from_gray8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, Pixels::Grayscale(data))
    }

    /// Create an indexed raster.
    pub fn from_indexed(width: u32, height: u32, palette: Palette, indices: Vec<u8>) -> Result<Self> {
        Self::new(width, height, Pixels::Indexed { palette, indices })
    }

    /// Create an RGBA raster from `0xAARRGGBB` words.
    pub fn from_argb(width: u32, height: u32, argb: &[u32]) -> Result<Self> {
        let mut data = Vec::with_capacity(argb.len() * 4);
        for &word in argb {
            data.extend_from_slice(&[(word >> 16) as u8, (word >> 8) as u8, word as u8, (word >> 24) as u8]);
        }
        Self::from_rgba8(width, height, data)
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of pixels.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Sample storage.
    pub fn pixels(&self) -> &Pixels {
        &self.pixels
    }

    /// Layout tag.
    pub fn layout(&self) -> Layout {
        self.pixels.layout()
    }

    /// Take the sample storage.
    pub fn into_pixels(self) -> Pixels {
        self.pixels
    }

    /// Color of the pixel at row-major position `index`.
    pub fn pixel_at(&self, index: usize) -> RGBA8 {
        match &self.pixels {
            Pixels::Bitonal(s) => {
                if s[index] == 0 {
                    BLACK
                } else {
                    WHITE
                }
            }
            Pixels::Grayscale(s) => {
                let v = s[index];
                RGBA8::new(v, v, v, 255)
            }
            Pixels::Indexed { palette, indices } => palette.colors()[indices[index] as usize],
            Pixels::Rgb(s) => RGBA8::new(s[index * 3], s[index * 3 + 1], s[index * 3 + 2], 255),
            Pixels::Rgba(s) => RGBA8::new(
                s[index * 4],
                s[index * 4 + 1],
                s[index * 4 + 2],
                s[index * 4 + 3],
            ),
        }
    }

    /// Color of the pixel at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the raster.
    pub fn pixel(&self, x: u32, y: u32) -> RGBA8 {
        assert!(x < self.width && y < self.height, "pixel ({}, {}) out of bounds", x, y);
        self.pixel_at(y as usize * self.width as usize + x as usize)
    }

    /// Iterate every pixel in row-major order.
    pub fn iter_rgba(&self) -> impl Iterator<Item = RGBA8> + '_ {
        (0..self.pixel_count()).map(move |i| self.pixel_at(i))
    }

    /// Expand to packed `r g b a` bytes.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixel_count() * 4);
        for px in self.iter_rgba() {
            out.extend_from_slice(&[px.r, px.g, px.b, px.a]);
        }
        out
    }

    /// Whether any pixel is not fully opaque.
    pub fn has_alpha(&self) -> bool {
        match &self.pixels {
            Pixels::Rgba(s) => s.chunks_exact(4).any(|p| p[3] != 255),
            Pixels::Indexed { palette, indices } => {
                palette.has_transparency()
                    && indices.iter().any(|&i| palette.colors()[i as usize].a != 255)
            }
            _ => false,
        }
    }

    /// Whether both rasters have the same size and the same color at every
    /// pixel, regardless of layout.
    pub fn same_pixels(&self, other: &PixelRaster) -> bool {
        self.dimensions() == other.dimensions() && self.iter_rgba().eq(other.iter_rgba())
    }
}
