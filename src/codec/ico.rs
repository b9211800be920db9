//! ICO and CUR codec.
//!
//! An icon file is a directory of images, each stored either as a PNG stream
//! or as a headerless DIB whose height covers the color bitmap and the 1-bit
//! AND mask below it.

use crate::config::{Compression, EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::io::{unpack_samples, ByteReader, ByteWriter, Endian};
use crate::metadata::{ColorType, ImageInfo, Metadata, PixelDensity};
use crate::raster::{Layout, PixelRaster, Pixels};

use super::bmp::{decode_pixels, encode_dib, DibHeader};
use super::color::{self, ColorPolicy, IndexedSupport};
use super::{write_metadata, AlphaSupport, DecodedImage, ImageCodec, ImageFormat, PngCodec};

const ICON: u16 = 1;
const CURSOR: u16 = 2;
const DIRECTORY_ENTRY_LEN: usize = 16;
const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

const POLICY: ColorPolicy = ColorPolicy {
    bitonal: false,
    grayscale: false,
    indexed: Some(IndexedSupport {
        max_colors: 256,
        alpha: AlphaSupport::None,
    }),
    rgb: true,
    rgba: true,
};

#[derive(Debug, Clone, Copy)]
struct DirEntry {
    width: u32,
    height: u32,
    bits: u16,
    size: usize,
    offset: usize,
}

struct Directory {
    kind: u16,
    entries: Vec<DirEntry>,
}

fn directory(data: &[u8]) -> Result<Directory> {
    let mut r = ByteReader::new(data, Endian::Little);
    let reserved = r.u16()?;
    let kind = r.u16()?;
    let count = r.u16()?;
    if reserved != 0 || !(kind == ICON || kind == CURSOR) {
        return Err(ImagingError::header(ImageFormat::Ico, "not an icon or cursor directory"));
    }
    if count == 0 {
        return Err(ImagingError::header(ImageFormat::Ico, "empty icon directory"));
    }
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let e = r.bytes(DIRECTORY_ENTRY_LEN)?;
        let mut f = ByteReader::new(e, Endian::Little);
        let width = f.u8()?;
        let height = f.u8()?;
        f.skip(4)?;
        let bits = f.u16()?;
        let size = f.u32()? as usize;
        let offset = f.u32()? as usize;
        entries.push(DirEntry {
            width: if width == 0 { 256 } else { width as u32 },
            height: if height == 0 { 256 } else { height as u32 },
            bits,
            size,
            offset,
        });
    }
    Ok(Directory { kind, entries })
}

fn select<'a>(data: &'a [u8], dir: &Directory, params: &ReadParameters) -> Result<(DirEntry, &'a [u8])> {
    let entry = *dir.entries.get(params.image_index).ok_or_else(|| {
        ImagingError::InvalidParameter(format!(
            "icon has {} images, index {} requested",
            dir.entries.len(),
            params.image_index
        ))
    })?;
    let body = data
        .get(entry.offset..)
        .and_then(|d| d.get(..entry.size))
        .ok_or_else(|| ImagingError::truncated(format!("icon image at {} needs {} bytes", entry.offset, entry.size)))?;
    Ok((entry, body))
}

fn png_params(params: &ReadParameters) -> ReadParameters {
    ReadParameters {
        format_hint: Some(ImageFormat::Png),
        image_index: 0,
        ..params.clone()
    }
}

/// DIB header of an embedded bitmap, with the height halved.
fn dib_header(body: &[u8]) -> Result<DibHeader> {
    let mut header = DibHeader::parse(body, 0, ImageFormat::Ico)?;
    if header.height < 2 {
        return Err(ImagingError::header(ImageFormat::Ico, "icon bitmap without mask rows"));
    }
    header.height /= 2;
    Ok(header)
}

/// Transparent flags from the AND mask, top row first. Missing mask rows are
/// treated as opaque.
fn and_mask(body: &[u8], header: &DibHeader) -> Result<Option<Vec<bool>>> {
    let (w, h) = (header.width as usize, header.height as usize);
    let start = header.palette_end() + header.row_bytes() * h;
    let row_bytes = w.div_ceil(32) * 4;
    let Some(mask) = body.get(start..).and_then(|m| m.get(..row_bytes * h)) else {
        log::debug!("ICO: entry has no AND mask");
        return Ok(None);
    };
    let mut transparent = Vec::with_capacity(w * h);
    for y in 0..h {
        let row = &mask[(h - 1 - y) * row_bytes..(h - y) * row_bytes];
        transparent.extend(unpack_samples(row, 1, w)?.into_iter().map(|bit| bit == 1));
    }
    Ok(Some(transparent))
}

fn decode_dib(body: &[u8], params: &ReadParameters) -> Result<(PixelRaster, Option<PixelDensity>)> {
    let header = dib_header(body)?;
    params.check_dimensions(header.width as u64, header.height as u64)?;
    let palette = header.palette(body)?;
    let raster = decode_pixels(
        body,
        &header,
        palette.as_ref(),
        header.palette_end(),
        header.height,
        ImageFormat::Ico,
        true,
    )?;
    let has_alpha = raster.layout() == Layout::Rgba && raster.iter_rgba().any(|p| p.a != 0);
    if has_alpha {
        return Ok((raster, header.density()));
    }
    let transparent = and_mask(body, &header)?.unwrap_or_default();
    let raster = if transparent.iter().any(|&t| t) {
        let rgba = raster
            .iter_rgba()
            .zip(&transparent)
            .flat_map(|(p, &t)| [p.r, p.g, p.b, if t { 0 } else { 255 }])
            .collect();
        PixelRaster::from_rgba8(header.width, header.height, rgba)?
    } else if raster.layout() == Layout::Rgba {
        let rgb = raster.iter_rgba().flat_map(|p| [p.r, p.g, p.b]).collect();
        PixelRaster::from_rgb8(header.width, header.height, rgb)?
    } else {
        raster
    };
    Ok((raster, header.density()))
}

/// ICO and CUR codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcoCodec;

impl ImageCodec for IcoCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Ico
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.len() >= 6
            && prefix[..2] == [0, 0]
            && matches!(u16::from_le_bytes([prefix[2], prefix[3]]), ICON | CURSOR)
            && u16::from_le_bytes([prefix[4], prefix[5]]) > 0
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        let dir = directory(data)?;
        let (entry, body) = select(data, &dir, params)?;
        let mut info = if body.starts_with(PNG_SIGNATURE) {
            let mut info = PngCodec.read_info(body, &png_params(params))?;
            info.format = ImageFormat::Ico;
            info.compression = "PNG".into();
            info
        } else {
            let header = dib_header(body)?;
            let mut info = ImageInfo::new(ImageFormat::Ico, header.width, header.height);
            info.bits_per_pixel = header.bits;
            info.color_type = if header.bits <= 8 { ColorType::Indexed } else { ColorType::Rgb };
            info.has_transparency = true;
            info.compression = header.compression_name().into();
            info.pixel_density = header.density();
            info
        };
        if info.bits_per_pixel == 0 {
            info.bits_per_pixel = entry.bits;
        }
        info.image_count = dir.entries.len();
        if dir.kind == CURSOR {
            info.comments.push("cursor".into());
        }
        Ok(info)
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        let dir = directory(data)?;
        let (_, body) = select(data, &dir, params)?;
        if body.starts_with(PNG_SIGNATURE) {
            return PngCodec.read_metadata(body, &png_params(params));
        }
        Ok(Metadata {
            pixel_density: dib_header(body)?.density(),
            ..Metadata::default()
        })
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        let dir = directory(data)?;
        let (entry, body) = select(data, &dir, params)?;
        if body.starts_with(PNG_SIGNATURE) {
            log::debug!("ICO: entry {} is PNG ({}x{})", params.image_index, entry.width, entry.height);
            return PngCodec.decode(body, &png_params(params));
        }
        let (raster, density) = decode_dib(body, params)?;
        log::debug!(
            "ICO: decoded entry {} of {}, {}x{} {:?}",
            params.image_index,
            dir.entries.len(),
            raster.width(),
            raster.height(),
            raster.layout()
        );
        Ok(DecodedImage {
            raster,
            metadata: Metadata {
                pixel_density: density,
                ..Metadata::default()
            },
        })
    }

    fn encode(&self, raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
        params.validate()?;
        params.compression_or(ImageFormat::Ico, &[Compression::None], Compression::None)?;
        let prepared = color::prepare(ImageFormat::Ico, raster, &POLICY, params)?;
        let extra = write_metadata(ImageFormat::Ico, metadata, params)?;
        let (w, h) = prepared.dimensions();

        let mut image = encode_dib(&prepared, extra.density, true, ImageFormat::Ico)?;
        let mask_row = (w as usize).div_ceil(32) * 4;
        let mut mask = vec![0u8; mask_row * h as usize];
        if let Pixels::Rgba(rgba) = prepared.pixels() {
            for y in 0..h as usize {
                let row = &mut mask[(h as usize - 1 - y) * mask_row..][..mask_row];
                for x in 0..w as usize {
                    if rgba[(y * w as usize + x) * 4 + 3] == 0 {
                        row[x / 8] |= 0x80 >> (x % 8);
                    }
                }
            }
        }
        image.extend_from_slice(&mask);

        let (bits, colors) = match prepared.pixels() {
            Pixels::Indexed { palette, .. } => (
                match palette.len() {
                    0..=2 => 1,
                    3..=16 => 4,
                    _ => 8,
                },
                palette.len(),
            ),
            Pixels::Rgba(_) => (32, 0),
            _ => (24, 0),
        };
        let dim = |v: u32| if v >= 256 { 0 } else { v as u8 };

        let mut out = ByteWriter::with_capacity(Endian::Little, 6 + DIRECTORY_ENTRY_LEN + image.len());
        out.u16(0);
        out.u16(ICON);
        out.u16(1);
        out.u8(dim(w));
        out.u8(dim(h));
        out.u8(if colors < 256 { colors as u8 } else { 0 });
        out.u8(0);
        out.u16(1);
        out.u16(bits);
        out.u32(image.len() as u32);
        out.u32((6 + DIRECTORY_ENTRY_LEN) as u32);
        out.bytes(&image);
        log::debug!("ICO: encoded {}x{} at {} bpp", w, h, bits);
        Ok(out.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RGBA8;

    fn roundtrip(raster: &PixelRaster) -> PixelRaster {
        let data = IcoCodec.encode(raster, &Metadata::default(), &EncodeParameters::default()).unwrap();
        assert!(IcoCodec.matches(&data));
        IcoCodec.decode(&data, &ReadParameters::default()).unwrap().raster
    }

    #[test]
    fn test_palette_and_truecolor_roundtrip() {
        let indexed = PixelRaster::from_rgb8(3, 2, vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 0, 0, 0, 255, 0, 0, 0, 255]).unwrap();
        let decoded = roundtrip(&indexed);
        assert_eq!(decoded.layout(), Layout::Indexed);
        assert!(decoded.same_pixels(&indexed));

        let rgb = PixelRaster::from_rgb8(16, 17, (0..16 * 17 * 3).map(|i| (i % 253) as u8).collect()).unwrap();
        assert!(roundtrip(&rgb).same_pixels(&rgb));
    }

    #[test]
    fn test_alpha_and_mask() {
        let rgba = PixelRaster::from_argb(2, 2, &[0xFFFF0000, 0x00000000, 0x8000FF00, 0xFF0000FF]).unwrap();
        let data = IcoCodec.encode(&rgba, &Metadata::default(), &EncodeParameters::default()).unwrap();
        let decoded = IcoCodec.decode(&data, &ReadParameters::default()).unwrap().raster;
        assert!(decoded.same_pixels(&rgba));
        // The mask marks the fully transparent pixel (top right, written as the last row).
        assert_eq!(data[data.len() - 4], 0b0100_0000);
    }

    #[test]
    fn test_mask_applies_to_paletted_entry() {
        let indexed = PixelRaster::from_rgb8(2, 1, vec![10, 20, 30, 40, 50, 60]).unwrap();
        let mut data = IcoCodec.encode(&indexed, &Metadata::default(), &EncodeParameters::default()).unwrap();
        let last = data.len() - 4;
        data[last] = 0b1000_0000;
        let decoded = IcoCodec.decode(&data, &ReadParameters::default()).unwrap().raster;
        assert_eq!(decoded.pixel(0, 0).a, 0);
        assert_eq!(decoded.pixel(1, 0), RGBA8::new(40, 50, 60, 255));
    }

    #[test]
    fn test_large_icon_directory_uses_zero() {
        let raster = PixelRaster::from_rgb8(256, 1, (0..256 * 3).map(|i| (i / 3) as u8).collect()).unwrap();
        let data = IcoCodec.encode(&raster, &Metadata::default(), &EncodeParameters::default()).unwrap();
        assert_eq!(data[6], 0);
        let info = IcoCodec.read_info(&data, &ReadParameters::default()).unwrap();
        assert_eq!((info.width, info.height), (256, 1));
        assert_eq!(info.image_count, 1);
    }

    #[test]
    fn test_png_entry() {
        let raster = PixelRaster::from_argb(3, 3, &[0x80102030; 9]).unwrap();
        let png = PngCodec.encode(&raster, &Metadata::default(), &EncodeParameters::default()).unwrap();
        let mut w = ByteWriter::new(Endian::Little);
        w.bytes(&[0, 0, 1, 0, 1, 0, 3, 3, 0, 0, 1, 0, 32, 0]);
        w.u32(png.len() as u32);
        w.u32(22);
        w.bytes(&png);
        let data = w.into_inner();
        let decoded = IcoCodec.decode(&data, &ReadParameters::default()).unwrap().raster;
        assert!(decoded.same_pixels(&raster));
        assert_eq!(IcoCodec.read_info(&data, &ReadParameters::default()).unwrap().format, ImageFormat::Ico);
    }

    #[test]
    fn test_bad_index_and_truncation() {
        let raster = PixelRaster::from_rgb8(4, 4, vec![0; 48]).unwrap();
        let data = IcoCodec.encode(&raster, &Metadata::default(), &EncodeParameters::default()).unwrap();
        let err = IcoCodec.decode(&data, &ReadParameters::default().with_image_index(1)).unwrap_err();
        assert!(matches!(err, ImagingError::InvalidParameter(_)));
        let err = IcoCodec.decode(&data[..data.len() - 1], &ReadParameters::default()).unwrap_err();
        assert!(err.is_truncation());
    }
}
