//! Wireless bitmap (WBMP type 0).

use crate::config::{Compression, EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::io::{pack_samples, unpack_samples, ByteReader, Endian};
use crate::metadata::{ColorType, ImageInfo, Metadata};
use crate::raster::{PixelRaster, Pixels};

use super::color::{self, ColorPolicy};
use super::{write_metadata, DecodedImage, ImageCodec, ImageFormat};

/// Longest multi-byte integer accepted; five groups of seven bits cover u32.
const MAX_INT_BYTES: usize = 5;

const POLICY: ColorPolicy = ColorPolicy {
    bitonal: true,
    grayscale: false,
    indexed: None,
    rgb: false,
    rgba: false,
};

fn read_int(r: &mut ByteReader<'_>) -> Result<u32> {
    let mut value = 0u64;
    for _ in 0..MAX_INT_BYTES {
        let b = r.u8()?;
        value = (value << 7) | (b & 0x7F) as u64;
        if b & 0x80 == 0 {
            return u32::try_from(value)
                .map_err(|_| ImagingError::header(ImageFormat::Wbmp, "multi-byte integer overflows"));
        }
    }
    Err(ImagingError::header(ImageFormat::Wbmp, "multi-byte integer too long"))
}

fn write_int(value: u32, out: &mut Vec<u8>) {
    let mut groups = vec![(value & 0x7F) as u8];
    let mut rest = value >> 7;
    while rest > 0 {
        groups.push(0x80 | (rest & 0x7F) as u8);
        rest >>= 7;
    }
    out.extend(groups.iter().rev());
}

struct Header {
    width: u32,
    height: u32,
    data_start: usize,
}

impl Header {
    fn payload_len(&self) -> u64 {
        (self.width as u64).div_ceil(8) * self.height as u64
    }
}

fn header(data: &[u8]) -> Result<Header> {
    let mut r = ByteReader::new(data, Endian::Big);
    let kind = read_int(&mut r)?;
    if kind != 0 {
        return Err(ImagingError::feature(ImageFormat::Wbmp, format!("WBMP type {}", kind)));
    }
    let fixed = r.u8()?;
    if fixed & 0x9F != 0 {
        return Err(ImagingError::header(ImageFormat::Wbmp, "extension headers are not supported"));
    }
    let width = read_int(&mut r)?;
    let height = read_int(&mut r)?;
    Ok(Header {
        width,
        height,
        data_start: r.position(),
    })
}

fn parse(data: &[u8], params: &ReadParameters) -> Result<Header> {
    let header = header(data)?;
    if header.width == 0 || header.height == 0 {
        return Err(ImagingError::InvalidDimensions {
            width: header.width as u64,
            height: header.height as u64,
        });
    }
    params.check_dimensions(header.width as u64, header.height as u64)?;
    if params.image_index != 0 {
        return Err(ImagingError::InvalidParameter(format!(
            "WBMP holds one image, index {} requested",
            params.image_index
        )));
    }
    Ok(header)
}

/// Wireless bitmap codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct WbmpCodec;

impl ImageCodec for WbmpCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Wbmp
    }

    /// WBMP has no magic number. The header must parse and the declared
    /// payload must fill the visible data exactly; when only a prefix is
    /// visible, the payload must at least cover it.
    fn matches(&self, prefix: &[u8]) -> bool {
        let Ok(h) = header(prefix) else {
            return false;
        };
        if h.width == 0 || h.height == 0 {
            return false;
        }
        let visible = (prefix.len() - h.data_start) as u64;
        if prefix.len() < super::IDENTIFY_PREFIX_LEN {
            h.payload_len() == visible
        } else {
            h.payload_len() >= visible
        }
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        let header = parse(data, params)?;
        let mut info = ImageInfo::new(ImageFormat::Wbmp, header.width, header.height);
        info.bits_per_pixel = 1;
        info.color_type = ColorType::BlackAndWhite;
        Ok(info)
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        parse(data, params)?;
        Ok(Metadata::default())
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        let header = parse(data, params)?;
        let (w, h) = (header.width as usize, header.height as usize);
        let row_bytes = w.div_ceil(8);
        let rows = data
            .get(header.data_start..)
            .and_then(|d| d.get(..row_bytes * h))
            .ok_or_else(|| ImagingError::truncated(format!("WBMP raster needs {} bytes", row_bytes * h)))?;
        let mut bits = Vec::with_capacity(w * h);
        for row in rows.chunks_exact(row_bytes) {
            bits.extend(unpack_samples(row, 1, w)?);
        }
        log::debug!("WBMP decoded {}x{}", w, h);
        Ok(DecodedImage {
            raster: PixelRaster::new(header.width, header.height, Pixels::Bitonal(bits))?,
            metadata: Metadata::default(),
        })
    }

    fn encode(&self, raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
        params.validate()?;
        params.compression_or(ImageFormat::Wbmp, &[Compression::None], Compression::None)?;
        let prepared = color::prepare(ImageFormat::Wbmp, raster, &POLICY, params)?;
        write_metadata(ImageFormat::Wbmp, metadata, params)?;
        let Pixels::Bitonal(bits) = prepared.pixels() else {
            return Err(color::unexpected_layout(ImageFormat::Wbmp, prepared.layout()));
        };
        let (w, h) = prepared.dimensions();
        let mut out = vec![0, 0];
        write_int(w, &mut out);
        write_int(h, &mut out);
        for row in bits.chunks_exact(w as usize) {
            out.extend(pack_samples(row, 1));
        }
        log::debug!("WBMP encoded {}x{}", w, h);
        Ok(out)
    }
}
