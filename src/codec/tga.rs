//! Truevision TGA codec.

use crate::config::{Compression, EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::io::{scale_to_u8, ByteReader, ByteWriter, Endian};
use crate::metadata::{ColorType, ImageInfo, Metadata};
use crate::raster::{Palette, PixelRaster, Pixels, RGBA8};

use super::color::{self, ColorPolicy, IndexedSupport};
use super::{write_metadata, AlphaSupport, DecodedImage, ImageCodec, ImageFormat};

const HEADER_LEN: usize = 18;
const RIGHT_TO_LEFT: u8 = 0x10;
const TOP_DOWN: u8 = 0x20;
const MAX_PACKET: usize = 128;

const POLICY: ColorPolicy = ColorPolicy {
    bitonal: false,
    grayscale: true,
    indexed: Some(IndexedSupport {
        max_colors: 256,
        alpha: AlphaSupport::None,
    }),
    rgb: true,
    rgba: true,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    ColorMapped,
    TrueColor,
    Gray,
}

#[derive(Debug)]
struct Header<'a> {
    kind: Kind,
    rle: bool,
    map_first: u16,
    map_len: u16,
    map_bits: u8,
    width: u16,
    height: u16,
    bits: u8,
    alpha_bits: u8,
    descriptor: u8,
    id: &'a [u8],
    palette_at: usize,
}

impl Header<'_> {
    fn color_type(&self) -> ColorType {
        match self.kind {
            Kind::ColorMapped => ColorType::Indexed,
            Kind::TrueColor => ColorType::Rgb,
            Kind::Gray => ColorType::Grayscale,
        }
    }
}

fn kind_of(image_type: u8) -> Option<(Kind, bool)> {
    Some(match image_type {
        1 => (Kind::ColorMapped, false),
        2 => (Kind::TrueColor, false),
        3 => (Kind::Gray, false),
        9 => (Kind::ColorMapped, true),
        10 => (Kind::TrueColor, true),
        11 => (Kind::Gray, true),
        _ => return None,
    })
}

fn depth_fits(kind: Kind, bits: u8) -> bool {
    match kind {
        Kind::ColorMapped => matches!(bits, 8 | 16),
        Kind::TrueColor => matches!(bits, 15 | 16 | 24 | 32),
        Kind::Gray => matches!(bits, 8 | 16),
    }
}

fn parse<'a>(data: &'a [u8], params: &ReadParameters) -> Result<Header<'a>> {
    let mut r = ByteReader::new(data, Endian::Little);
    let id_len = r.u8()? as usize;
    let map_type = r.u8()?;
    let image_type = r.u8()?;
    let map_first = r.u16()?;
    let map_len = r.u16()?;
    let map_bits = r.u8()?;
    r.skip(4)?;
    let width = r.u16()?;
    let height = r.u16()?;
    let bits = r.u8()?;
    let descriptor = r.u8()?;

    let (kind, rle) = match kind_of(image_type) {
        Some(k) => k,
        None if image_type == 0 => return Err(ImagingError::header(ImageFormat::Tga, "file holds no image data")),
        None => return Err(ImagingError::feature(ImageFormat::Tga, format!("image type {}", image_type))),
    };
    if map_type > 1 || (kind == Kind::ColorMapped) != (map_type == 1) {
        return Err(ImagingError::header(
            ImageFormat::Tga,
            format!("color map type {} with image type {}", map_type, image_type),
        ));
    }
    if !depth_fits(kind, bits) {
        return Err(ImagingError::header(ImageFormat::Tga, format!("{} bits for {:?} image", bits, kind)));
    }
    if map_type == 1 && !matches!(map_bits, 15 | 16 | 24 | 32) {
        return Err(ImagingError::header(ImageFormat::Tga, format!("{}-bit color map entries", map_bits)));
    }
    if width == 0 || height == 0 {
        return Err(ImagingError::InvalidDimensions {
            width: width as u64,
            height: height as u64,
        });
    }
    params.check_dimensions(width as u64, height as u64)?;
    if params.image_index != 0 {
        return Err(ImagingError::InvalidParameter(format!(
            "TGA holds one image, index {} requested",
            params.image_index
        )));
    }
    let id = r.bytes(id_len)?;
    Ok(Header {
        kind,
        rle,
        map_first,
        map_len,
        map_bits,
        width,
        height,
        bits,
        alpha_bits: descriptor & 0x0F,
        descriptor,
        id,
        palette_at: HEADER_LEN + id_len,
    })
}

/// Decode one little-endian pixel of `bits` into RGBA.
fn color(px: &[u8], bits: u8, alpha: bool) -> RGBA8 {
    match bits {
        15 | 16 => {
            let v = u16::from_le_bytes([px[0], px[1]]) as u32;
            let a = if bits == 16 && alpha && v & 0x8000 == 0 { 0 } else { 255 };
            RGBA8::new(
                scale_to_u8((v >> 10) & 31, 31),
                scale_to_u8((v >> 5) & 31, 31),
                scale_to_u8(v & 31, 31),
                a,
            )
        }
        24 => RGBA8::new(px[2], px[1], px[0], 255),
        _ => RGBA8::new(px[2], px[1], px[0], if alpha { px[3] } else { 255 }),
    }
}

fn color_map(data: &[u8], header: &Header<'_>) -> Result<(Option<Palette>, usize)> {
    let entry = (header.map_bits as usize).div_ceil(8);
    let len = header.map_len as usize * entry;
    let table = data
        .get(header.palette_at..)
        .and_then(|d| d.get(..len))
        .ok_or_else(|| ImagingError::truncated(format!("TGA color map needs {} bytes", len)))?;
    let end = header.palette_at + len;
    if header.kind != Kind::ColorMapped {
        return Ok((None, end));
    }
    if header.map_len == 0 || header.map_len > 256 {
        return Err(ImagingError::feature(ImageFormat::Tga, format!("color map of {} entries", header.map_len)));
    }
    let alpha = header.map_bits == 32 || (header.map_bits == 16 && header.alpha_bits > 0);
    let colors = table.chunks_exact(entry).map(|px| color(px, header.map_bits, alpha)).collect();
    Ok((Some(Palette::new(colors)?), end))
}

/// Raw pixel bytes, `bytes_per_pixel` each, in stored order.
fn pixel_bytes(data: &[u8], at: usize, header: &Header<'_>) -> Result<Vec<u8>> {
    let bpp = (header.bits as usize).div_ceil(8);
    let total = header.width as usize * header.height as usize * bpp;
    let body = data.get(at..).unwrap_or_default();
    if !header.rle {
        return body
            .get(..total)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| ImagingError::truncated(format!("TGA pixel data needs {} bytes", total)));
    }
    let mut out = Vec::with_capacity(total);
    let mut r = ByteReader::new(body, Endian::Little);
    while out.len() < total {
        let packet = r.u8()?;
        let count = (packet & 0x7F) as usize + 1;
        if packet & 0x80 != 0 {
            let px = r.bytes(bpp)?;
            for _ in 0..count {
                out.extend_from_slice(px);
            }
        } else {
            out.extend_from_slice(r.bytes(count * bpp)?);
        }
    }
    out.truncate(total);
    Ok(out)
}

fn decode_raster(data: &[u8], header: &Header<'_>) -> Result<PixelRaster> {
    let (palette, at) = color_map(data, header)?;
    let stored = pixel_bytes(data, at, header)?;
    let (w, h) = (header.width as usize, header.height as usize);
    let bpp = (header.bits as usize).div_ceil(8);
    let top_down = header.descriptor & TOP_DOWN != 0;
    let right_to_left = header.descriptor & RIGHT_TO_LEFT != 0;
    let source = |x: usize, y: usize| {
        let sy = if top_down { y } else { h - 1 - y };
        let sx = if right_to_left { w - 1 - x } else { x };
        &stored[(sy * w + sx) * bpp..(sy * w + sx + 1) * bpp]
    };
    let (width, height) = (header.width as u32, header.height as u32);

    match header.kind {
        Kind::ColorMapped => {
            let palette = palette.ok_or_else(|| ImagingError::header(ImageFormat::Tga, "missing color map"))?;
            let mut indices = Vec::with_capacity(w * h);
            for y in 0..h {
                for x in 0..w {
                    let px = source(x, y);
                    let raw = if bpp == 2 { u16::from_le_bytes([px[0], px[1]]) } else { px[0] as u16 };
                    let index = raw.checked_sub(header.map_first).filter(|&i| (i as usize) < palette.len());
                    let index = index.ok_or_else(|| {
                        ImagingError::data(ImageFormat::Tga, format!("color index {} outside the color map", raw))
                    })?;
                    indices.push(index as u8);
                }
            }
            PixelRaster::from_indexed(width, height, palette, indices)
        }
        Kind::Gray => {
            let alpha = bpp == 2 && header.alpha_bits > 0;
            let mut gray = Vec::with_capacity(w * h * if alpha { 4 } else { 1 });
            for y in 0..h {
                for x in 0..w {
                    let px = source(x, y);
                    if alpha {
                        gray.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
                    } else {
                        gray.push(px[0]);
                    }
                }
            }
            if alpha {
                PixelRaster::from_rgba8(width, height, gray)
            } else {
                PixelRaster::from_gray8(width, height, gray)
            }
        }
        Kind::TrueColor => {
            let alpha = header.alpha_bits > 0 && header.bits != 24 && header.bits != 15;
            let mut rgba = Vec::with_capacity(w * h * 4);
            for y in 0..h {
                for x in 0..w {
                    let c = color(source(x, y), header.bits, alpha);
                    rgba.extend_from_slice(&[c.r, c.g, c.b, c.a]);
                }
            }
            // A zero alpha channel everywhere means the writer ignored it.
            let all_clear = rgba.chunks_exact(4).all(|p| p[3] == 0);
            if !alpha || all_clear || rgba.chunks_exact(4).all(|p| p[3] == 255) {
                let rgb = rgba.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]]).collect();
                PixelRaster::from_rgb8(width, height, rgb)
            } else {
                PixelRaster::from_rgba8(width, height, rgba)
            }
        }
    }
}

/// Append one row as RLE packets; packets never cross rows.
fn encode_rle_row(row: &[u8], bpp: usize, out: &mut Vec<u8>) {
    let pixels: Vec<&[u8]> = row.chunks_exact(bpp).collect();
    let mut i = 0;
    while i < pixels.len() {
        let mut run = 1;
        while i + run < pixels.len() && run < MAX_PACKET && pixels[i + run] == pixels[i] {
            run += 1;
        }
        if run > 1 {
            out.push(0x80 | (run - 1) as u8);
            out.extend_from_slice(pixels[i]);
            i += run;
            continue;
        }
        let start = i;
        while i < pixels.len() && i - start < MAX_PACKET && !(i + 1 < pixels.len() && pixels[i + 1] == pixels[i]) {
            i += 1;
        }
        if i == start {
            i += 1;
        }
        out.push((i - start - 1) as u8);
        for px in &pixels[start..i] {
            out.extend_from_slice(px);
        }
    }
}

/// Truevision TGA codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct TgaCodec;

impl ImageCodec for TgaCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Tga
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        if prefix.len() < HEADER_LEN {
            return false;
        }
        let (map_type, image_type, map_bits, bits) = (prefix[1], prefix[2], prefix[7], prefix[16]);
        let width = u16::from_le_bytes([prefix[12], prefix[13]]);
        let height = u16::from_le_bytes([prefix[14], prefix[15]]);
        let Some((kind, _)) = kind_of(image_type) else {
            return false;
        };
        (kind == Kind::ColorMapped) == (map_type == 1)
            && map_type <= 1
            && (map_type == 0 || matches!(map_bits, 15 | 16 | 24 | 32))
            && depth_fits(kind, bits)
            && width > 0
            && height > 0
            && prefix[17] & 0xC0 == 0
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        let header = parse(data, params)?;
        let mut info = ImageInfo::new(ImageFormat::Tga, header.width as u32, header.height as u32);
        info.bits_per_pixel = header.bits as u16;
        info.color_type = header.color_type();
        info.has_transparency = header.alpha_bits > 0;
        info.compression = if header.rle { "RLE" } else { "None" }.into();
        let id = String::from_utf8_lossy(header.id).trim_end_matches('\0').trim().to_string();
        if !id.is_empty() {
            info.comments.push(id);
        }
        Ok(info)
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        parse(data, params)?;
        Ok(Metadata::default())
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        let header = parse(data, params)?;
        let raster = decode_raster(data, &header)?;
        log::debug!(
            "TGA decoded {}x{} {:?} at {} bits{}",
            header.width,
            header.height,
            header.kind,
            header.bits,
            if header.rle { ", RLE" } else { "" }
        );
        Ok(DecodedImage {
            raster,
            metadata: Metadata::default(),
        })
    }

    fn encode(&self, raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
        params.validate()?;
        let compression = params.compression_or(ImageFormat::Tga, &[Compression::None, Compression::Rle], Compression::None)?;
        let prepared = color::prepare(ImageFormat::Tga, raster, &POLICY, params)?;
        write_metadata(ImageFormat::Tga, metadata, params)?;
        let (w, h) = prepared.dimensions();
        if w > u16::MAX as u32 || h > u16::MAX as u32 {
            return Err(ImagingError::InvalidDimensions {
                width: w as u64,
                height: h as u64,
            });
        }
        let rle = compression == Compression::Rle;

        let (image_type, bits, alpha_bits, palette, pixels): (u8, u8, u8, Option<&Palette>, Vec<u8>) = match prepared.pixels() {
            Pixels::Indexed { palette, indices } => (1, 8, 0, Some(palette), indices.clone()),
            Pixels::Grayscale(g) => (3, 8, 0, None, g.clone()),
            Pixels::Rgb(rgb) => (2, 24, 0, None, rgb.chunks_exact(3).flat_map(|p| [p[2], p[1], p[0]]).collect()),
            Pixels::Rgba(rgba) => (2, 32, 8, None, rgba.chunks_exact(4).flat_map(|p| [p[2], p[1], p[0], p[3]]).collect()),
            other => return Err(color::unexpected_layout(ImageFormat::Tga, other.layout())),
        };

        let mut out = ByteWriter::new(Endian::Little);
        out.u8(0);
        out.u8(u8::from(palette.is_some()));
        out.u8(if rle { image_type + 8 } else { image_type });
        out.u16(0);
        out.u16(palette.map_or(0, |p| p.len() as u16));
        out.u8(if palette.is_some() { 24 } else { 0 });
        out.u16(0);
        out.u16(0);
        out.u16(w as u16);
        out.u16(h as u16);
        out.u8(bits);
        out.u8(TOP_DOWN | alpha_bits);
        if let Some(palette) = palette {
            for c in palette.colors() {
                out.bytes(&[c.b, c.g, c.r]);
            }
        }
        let row_bytes = w as usize * bits as usize / 8;
        if rle {
            let mut packed = Vec::new();
            for row in pixels.chunks_exact(row_bytes) {
                encode_rle_row(row, bits as usize / 8, &mut packed);
            }
            out.bytes(&packed);
        } else {
            out.bytes(&pixels);
        }
        log::debug!("TGA encoded {}x{} type {} at {} bits", w, h, image_type, bits);
        Ok(out.into_inner())
    }
}
