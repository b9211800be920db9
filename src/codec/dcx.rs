//! DCX: a page table followed by complete PCX images.

use crate::config::{EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::io::{ByteReader, ByteWriter, Endian};
use crate::metadata::{ImageInfo, Metadata};
use crate::raster::PixelRaster;

use super::pcx::{decode_page, encode_page, looks_like_pcx, read_page_info, read_page_metadata};
use super::{DecodedImage, ImageCodec, ImageFormat};

const MAGIC: u32 = 987_654_321;
const MAX_PAGES: usize = 1023;
/// Magic plus the fixed table of 1024 offsets (the last always zero).
const TABLE_LEN: usize = 4 + (MAX_PAGES + 1) * 4;

fn page_offsets(data: &[u8]) -> Result<Vec<usize>> {
    let mut r = ByteReader::new(data, Endian::Little);
    if r.u32()? != MAGIC {
        return Err(ImagingError::header(ImageFormat::Dcx, "missing DCX magic number"));
    }
    let mut offsets = Vec::new();
    while offsets.len() < MAX_PAGES {
        match r.u32()? {
            0 => break,
            offset => offsets.push(offset as usize),
        }
    }
    if offsets.is_empty() {
        return Err(ImagingError::header(ImageFormat::Dcx, "empty page table"));
    }
    Ok(offsets)
}

/// The bytes of page `index`; a page ends where the next one starts.
fn page<'a>(data: &'a [u8], offsets: &[usize], index: usize) -> Result<&'a [u8]> {
    let start = *offsets.get(index).ok_or_else(|| {
        ImagingError::InvalidParameter(format!("DCX has {} pages, index {} requested", offsets.len(), index))
    })?;
    let end = offsets
        .get(index + 1)
        .copied()
        .filter(|&next| next > start)
        .unwrap_or(data.len());
    data.get(start..end.min(data.len()))
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ImagingError::truncated(format!("DCX page {} at offset {} lies past the end", index, start)))
}

fn selected<'a>(data: &'a [u8], params: &ReadParameters) -> Result<(usize, &'a [u8])> {
    let offsets = page_offsets(data)?;
    let body = page(data, &offsets, params.image_index)?;
    Ok((offsets.len(), body))
}

/// Multi-page PCX container.
#[derive(Debug, Clone, Copy, Default)]
pub struct DcxCodec;

impl ImageCodec for DcxCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Dcx
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.len() >= 4 && u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) == MAGIC
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        let (pages, body) = selected(data, params)?;
        let mut info = read_page_info(body, params, ImageFormat::Dcx)?;
        info.image_count = pages;
        Ok(info)
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        let (_, body) = selected(data, params)?;
        read_page_metadata(body, ImageFormat::Dcx)
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        let (pages, body) = selected(data, params)?;
        if !looks_like_pcx(body) {
            return Err(ImagingError::header(
                ImageFormat::Dcx,
                format!("page {} is not a PCX image", params.image_index),
            ));
        }
        let (raster, pixel_density) = decode_page(body, params, ImageFormat::Dcx)?;
        log::debug!("DCX: decoded page {} of {}", params.image_index, pages);
        Ok(DecodedImage {
            raster,
            metadata: Metadata {
                pixel_density,
                ..Metadata::default()
            },
        })
    }

    fn encode(&self, raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
        let pcx = encode_page(raster, metadata, params, ImageFormat::Dcx)?;
        let mut out = ByteWriter::with_capacity(Endian::Little, TABLE_LEN + pcx.len());
        out.u32(MAGIC);
        out.u32(TABLE_LEN as u32);
        out.zeros(TABLE_LEN - out.len());
        out.bytes(&pcx);
        Ok(out.into_inner())
    }
}
