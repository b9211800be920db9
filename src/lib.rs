//! Pure Rust image codecs.
//!
//! `pixelcodec` reads and writes PNG, GIF, TIFF, BMP, ICO/CUR, PCX, DCX,
//! PBM/PGM/PPM/PAM, TGA, WBMP, XBM and XPM, and reads baseline and
//! progressive JPEG and PSD. Every decoder produces a [`PixelRaster`];
//! every encoder picks the smallest representation that stores the raster
//! exactly, or fails unless lossy conversion was requested.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use pixelcodec::{read_image, write_image, ImageFormat};
//! use std::fs::File;
//!
//! let raster = read_image(File::open("photo.jpg")?, None)?;
//! write_image(&raster, File::create("photo.png")?, ImageFormat::Png, None)?;
//! ```
//!
//! # Lossy conversion
//!
//! Writing a truecolor raster to a palette or bitonal format fails with
//! [`ImagingError::UnsupportedColorMode`] unless
//! [`EncodeParameters::allow_lossy_conversion`] is set:
//!
//! ```rust,ignore
//! let params = EncodeParameters::lossy();
//! write_image(&raster, File::create("photo.gif")?, ImageFormat::Gif, Some(&params))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod imaging;
pub mod io;
pub mod metadata;
pub mod raster;

pub use codec::{capability, AlphaSupport, DecodedImage, FormatCapability, ImageCodec, ImageFormat, NativeColor};
pub use config::{ColorMode, Compression, EncodeParameters, ReadParameters};
pub use error::{ImagingError, Operation, Result};
pub use imaging::{
    encode_to_vec, encode_with_metadata_to_vec, get_icc_profile, get_image_info, get_image_size, get_metadata,
    identify, read_image, read_image_with_metadata, write_image, write_image_with_metadata,
};
pub use metadata::{ColorType, DensityUnit, ImageInfo, Metadata, PixelDensity, TextTag};
pub use raster::{classify, Classification, Layout, Palette, PixelRaster, Pixels, RGBA8};

/// Library version information.
pub mod version {
    /// Library version string.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Library name.
    pub const NAME: &str = env!("CARGO_PKG_NAME");

    /// Get full version string.
    pub fn full_version() -> String {
        format!("{} {}", NAME, VERSION)
    }
}
