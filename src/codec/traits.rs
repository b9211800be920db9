//! Codec trait definitions.

use crate::config::{EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Operation, Result};
use crate::metadata::{ImageInfo, Metadata};
use crate::raster::PixelRaster;

use super::ImageFormat;

/// How much color a format can natively store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NativeColor {
    /// Black and white only.
    Bitonal,
    /// Luminance only.
    Grayscale,
    /// A bounded palette.
    Indexed,
    /// Truecolor.
    FullRgb,
}

/// How much transparency a format can store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlphaSupport {
    /// No transparency at all.
    None,
    /// One fully transparent color.
    SingleTransparent,
    /// A full alpha channel.
    Full,
}

/// Static description of what a format supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatCapability {
    /// Whether pixels can be decoded.
    pub can_read: bool,
    /// Whether pixels can be encoded.
    pub can_write: bool,
    /// Richest color representation.
    pub native_color: NativeColor,
    /// Transparency support when writing.
    pub alpha: AlphaSupport,
    /// Whether pixel density survives a write/read cycle.
    pub preserves_resolution: bool,
    /// Whether an ICC profile survives a write/read cycle.
    pub preserves_icc: bool,
    /// Whether text tags survive a write/read cycle.
    pub preserves_text: bool,
}

/// Raster and metadata produced by a decoder.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Decoded pixels.
    pub raster: PixelRaster,
    /// Ancillary data found in the stream.
    pub metadata: Metadata,
}

/// Trait implemented by every per-format codec.
///
/// Codecs are stateless; every method works on a complete in-memory copy of
/// the encoded stream.
pub trait ImageCodec: Send + Sync {
    /// Format handled by this codec.
    fn format(&self) -> ImageFormat;

    /// Whether `prefix` (the first bytes of a stream, possibly the whole
    /// stream) carries this format's signature.
    fn matches(&self, prefix: &[u8]) -> bool;

    /// Parse the header and report size, depth and density.
    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo>;

    /// Parse ancillary data without decoding pixels.
    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata>;

    /// Extract the ICC profile, if any.
    fn read_icc_profile(&self, data: &[u8], params: &ReadParameters) -> Result<Option<Vec<u8>>> {
        Ok(self.read_metadata(data, params)?.icc_profile)
    }

    /// Decode the selected image completely.
    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage>;

    /// Encode a raster. Formats without a writer keep the default.
    fn encode(
        &self,
        raster: &PixelRaster,
        metadata: &Metadata,
        params: &EncodeParameters,
    ) -> Result<Vec<u8>> {
        let _ = (raster, metadata, params);
        Err(ImagingError::UnsupportedFormat {
            format: self.format(),
            operation: Operation::Write,
        })
    }
}
