//! TIFF codec.
//!
//! Reads strips and tiles in either byte order with no, PackBits, LZW or
//! Deflate compression. Writes little-endian single-directory files with
//! LZW by default.

mod decode;
mod encode;
mod ifd;

use crate::config::{EncodeParameters, ReadParameters};
use crate::error::Result;
use crate::metadata::{ImageInfo, Metadata};
use crate::raster::PixelRaster;

use super::{DecodedImage, ImageCodec, ImageFormat};

pub(crate) mod tags {
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const PHOTOMETRIC: u16 = 262;
    pub const FILL_ORDER: u16 = 266;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const ROWS_PER_STRIP: u16 = 278;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const X_RESOLUTION: u16 = 282;
    pub const Y_RESOLUTION: u16 = 283;
    pub const PLANAR_CONFIGURATION: u16 = 284;
    pub const RESOLUTION_UNIT: u16 = 296;
    pub const PREDICTOR: u16 = 317;
    pub const COLOR_MAP: u16 = 320;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const INK_SET: u16 = 332;
    pub const EXTRA_SAMPLES: u16 = 338;
    pub const SAMPLE_FORMAT: u16 = 339;
    pub const ICC_PROFILE: u16 = 34675;
}

/// ASCII tags carried as text metadata, by name.
pub(crate) const TEXT_TAGS: [(u16, &str); 10] = [
    (269, "DocumentName"),
    (270, "ImageDescription"),
    (271, "Make"),
    (272, "Model"),
    (285, "PageName"),
    (305, "Software"),
    (306, "DateTime"),
    (315, "Artist"),
    (316, "HostComputer"),
    (33432, "Copyright"),
];

/// Compression scheme codes.
pub(crate) mod compression {
    pub const NONE: u32 = 1;
    pub const LZW: u32 = 5;
    pub const DEFLATE: u32 = 8;
    pub const PACKBITS: u32 = 32773;
    pub const DEFLATE_OLD: u32 = 32946;

    pub fn name(code: u32) -> &'static str {
        match code {
            NONE => "None",
            2 => "CCITT RLE",
            3 => "CCITT Group 3",
            4 => "CCITT Group 4",
            LZW => "LZW",
            6 | 7 => "JPEG",
            DEFLATE | DEFLATE_OLD => "Deflate",
            PACKBITS => "PackBits",
            _ => "Unknown",
        }
    }
}

/// TIFF codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffCodec;

impl ImageCodec for TiffCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Tiff
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.starts_with(b"II*\0") || prefix.starts_with(b"MM\0*")
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        decode::read_info(data, params)
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        decode::read_metadata(data, params)
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        decode::decode(data, params)
    }

    fn encode(&self, raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
        encode::encode(raster, metadata, params)
    }
}
