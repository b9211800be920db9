//! Format registry and per-format codecs.
//!
//! Every supported format has one zero-sized codec type implementing
//! [`ImageCodec`] and one row in a static table holding the codec and its
//! [`FormatCapability`]. Rows are indexed by the [`ImageFormat`]
//! discriminant, so lookups never search.

mod bmp;
pub(crate) mod color;
mod dcx;
mod format;
mod gif;
mod ico;
mod jpeg;
mod lzw;
mod packbits;
mod pcx;
mod png;
mod pnm;
mod psd;
mod tga;
mod tiff;
mod traits;
mod wbmp;
mod xbm;
mod xpm;
mod zlib;

pub use bmp::BmpCodec;
pub use dcx::DcxCodec;
pub use format::ImageFormat;
pub use gif::GifCodec;
pub use ico::IcoCodec;
pub use jpeg::JpegCodec;
pub use pcx::PcxCodec;
pub use png::PngCodec;
pub use pnm::{PamCodec, PbmCodec, PgmCodec, PpmCodec};
pub use psd::PsdCodec;
pub use tga::TgaCodec;
pub use tiff::TiffCodec;
pub use traits::{AlphaSupport, DecodedImage, FormatCapability, ImageCodec, NativeColor};
pub use wbmp::WbmpCodec;
pub use xbm::XbmCodec;
pub use xpm::XpmCodec;

use std::io::BufRead;

use crate::config::EncodeParameters;
use crate::error::{ImagingError, Operation, Result};
use crate::metadata::{Metadata, PixelDensity, TextTag};

/// Number of leading bytes inspected by [`identify`].
pub const IDENTIFY_PREFIX_LEN: usize = 64;

/// One registry row.
pub struct FormatEntry {
    /// Format of this row.
    pub format: ImageFormat,
    /// Codec implementing the format.
    pub codec: &'static dyn ImageCodec,
    /// What the codec supports.
    pub capability: FormatCapability,
}

const fn caps(
    can_write: bool,
    native_color: NativeColor,
    alpha: AlphaSupport,
    preserves_resolution: bool,
    preserves_icc: bool,
    preserves_text: bool,
) -> FormatCapability {
    FormatCapability {
        can_read: true,
        can_write,
        native_color,
        alpha,
        preserves_resolution,
        preserves_icc,
        preserves_text,
    }
}

use AlphaSupport::{Full, SingleTransparent};
use NativeColor::{Bitonal, FullRgb, Grayscale, Indexed};

static REGISTRY: [FormatEntry; 17] = [
    FormatEntry {
        format: ImageFormat::Png,
        codec: &PngCodec,
        capability: caps(true, FullRgb, Full, true, true, true),
    },
    FormatEntry {
        format: ImageFormat::Gif,
        codec: &GifCodec,
        capability: caps(true, Indexed, SingleTransparent, false, false, true),
    },
    FormatEntry {
        format: ImageFormat::Tiff,
        codec: &TiffCodec,
        capability: caps(true, FullRgb, Full, true, true, true),
    },
    FormatEntry {
        format: ImageFormat::Jpeg,
        codec: &JpegCodec,
        capability: caps(false, FullRgb, AlphaSupport::None, true, true, true),
    },
    FormatEntry {
        format: ImageFormat::Bmp,
        codec: &BmpCodec,
        capability: caps(true, FullRgb, Full, true, false, false),
    },
    FormatEntry {
        format: ImageFormat::Ico,
        codec: &IcoCodec,
        capability: caps(true, FullRgb, Full, true, false, false),
    },
    FormatEntry {
        format: ImageFormat::Psd,
        codec: &PsdCodec,
        capability: caps(false, FullRgb, Full, true, true, false),
    },
    FormatEntry {
        format: ImageFormat::Pcx,
        codec: &PcxCodec,
        capability: caps(true, FullRgb, Full, true, false, false),
    },
    FormatEntry {
        format: ImageFormat::Dcx,
        codec: &DcxCodec,
        capability: caps(true, FullRgb, Full, true, false, false),
    },
    FormatEntry {
        format: ImageFormat::Pbm,
        codec: &PbmCodec,
        capability: caps(true, Bitonal, AlphaSupport::None, false, false, false),
    },
    FormatEntry {
        format: ImageFormat::Pgm,
        codec: &PgmCodec,
        capability: caps(true, Grayscale, AlphaSupport::None, false, false, false),
    },
    FormatEntry {
        format: ImageFormat::Ppm,
        codec: &PpmCodec,
        capability: caps(true, FullRgb, AlphaSupport::None, false, false, false),
    },
    FormatEntry {
        format: ImageFormat::Pam,
        codec: &PamCodec,
        capability: caps(true, FullRgb, Full, false, false, false),
    },
    FormatEntry {
        format: ImageFormat::Tga,
        codec: &TgaCodec,
        capability: caps(true, FullRgb, Full, false, false, false),
    },
    FormatEntry {
        format: ImageFormat::Wbmp,
        codec: &WbmpCodec,
        capability: caps(true, Bitonal, AlphaSupport::None, false, false, false),
    },
    FormatEntry {
        format: ImageFormat::Xbm,
        codec: &XbmCodec,
        capability: caps(true, Bitonal, AlphaSupport::None, false, false, false),
    },
    FormatEntry {
        format: ImageFormat::Xpm,
        codec: &XpmCodec,
        capability: caps(true, Indexed, SingleTransparent, false, false, false),
    },
];

/// Identification order: fixed magic numbers first, structural checks last.
const IDENTIFY_ORDER: [ImageFormat; 17] = [
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::Tiff,
    ImageFormat::Jpeg,
    ImageFormat::Psd,
    ImageFormat::Dcx,
    ImageFormat::Ico,
    ImageFormat::Pbm,
    ImageFormat::Pgm,
    ImageFormat::Ppm,
    ImageFormat::Pam,
    ImageFormat::Xpm,
    ImageFormat::Xbm,
    ImageFormat::Bmp,
    ImageFormat::Pcx,
    ImageFormat::Tga,
    ImageFormat::Wbmp,
];

/// Registry row for `format`.
pub fn entry(format: ImageFormat) -> &'static FormatEntry {
    &REGISTRY[format as usize]
}

/// Every registry row in table order.
pub fn entries() -> &'static [FormatEntry] {
    &REGISTRY
}

/// Codec for `format`.
pub fn codec_for(format: ImageFormat) -> &'static dyn ImageCodec {
    entry(format).codec
}

/// Static capabilities of `format`.
pub fn capability(format: ImageFormat) -> FormatCapability {
    entry(format).capability
}

/// Codec for `format`, or `UnsupportedFormat` if it cannot decode.
pub fn decoder_for(format: ImageFormat) -> Result<&'static dyn ImageCodec> {
    let entry = entry(format);
    if !entry.capability.can_read {
        return Err(ImagingError::UnsupportedFormat {
            format,
            operation: Operation::Read,
        });
    }
    Ok(entry.codec)
}

/// Codec for `format`, or `UnsupportedFormat` if it cannot encode.
pub fn encoder_for(format: ImageFormat) -> Result<&'static dyn ImageCodec> {
    let entry = entry(format);
    if !entry.capability.can_write {
        return Err(ImagingError::UnsupportedFormat {
            format,
            operation: Operation::Write,
        });
    }
    Ok(entry.codec)
}

/// Identify a format from the leading bytes of `data`.
pub fn identify(data: &[u8]) -> Option<ImageFormat> {
    let prefix = &data[..data.len().min(IDENTIFY_PREFIX_LEN)];
    let found = IDENTIFY_ORDER
        .into_iter()
        .find(|&format| codec_for(format).matches(prefix));
    log::trace!("identified {:?} from {} byte prefix", found, prefix.len());
    found
}

/// Identify a format from a buffered stream without consuming any bytes.
pub fn identify_stream<R: BufRead + ?Sized>(reader: &mut R) -> Result<Option<ImageFormat>> {
    let buffered = reader.fill_buf()?;
    Ok(identify(buffered))
}

/// Metadata an encoder should actually write.
#[derive(Debug, Default)]
pub(crate) struct WriteMetadata<'a> {
    pub density: Option<PixelDensity>,
    pub icc_profile: Option<&'a [u8]>,
    pub text: Option<&'a [TextTag]>,
}

fn drop_or_reject(format: ImageFormat, field: &'static str, strict: bool) -> Result<()> {
    if strict {
        return Err(ImagingError::MetadataUnsupported { format, field });
    }
    log::debug!("{}: dropping {} metadata", format, field);
    Ok(())
}

/// Merge parameter overrides into `metadata` and drop what `format` cannot
/// store.
pub(crate) fn write_metadata<'a>(
    format: ImageFormat,
    metadata: &'a Metadata,
    params: &'a EncodeParameters,
) -> Result<WriteMetadata<'a>> {
    let caps = capability(format);
    let strict = params.strict_metadata;
    let mut out = WriteMetadata::default();

    if let Some(density) = params.pixel_density.or(metadata.pixel_density) {
        if caps.preserves_resolution {
            out.density = Some(density);
        } else {
            drop_or_reject(format, "pixel density", strict)?;
        }
    }
    if let Some(icc) = params.icc_profile.as_deref().or(metadata.icc_profile.as_deref()) {
        if caps.preserves_icc {
            out.icc_profile = Some(icc);
        } else {
            drop_or_reject(format, "ICC profile", strict)?;
        }
    }
    if let Some(text) = metadata.text.as_deref() {
        if caps.preserves_text {
            out.text = Some(text);
        } else if !text.is_empty() {
            drop_or_reject(format, "text", strict)?;
        }
    }
    Ok(out)
}
