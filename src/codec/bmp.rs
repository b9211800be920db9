//! BMP codec and the device-independent bitmap helpers shared with ICO.

use crate::config::{Compression, EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::io::{scale_to_u8, unpack_samples, ByteReader, ByteWriter, Endian};
use crate::metadata::{ColorType, ImageInfo, Metadata, PixelDensity};
use crate::raster::{Layout, Palette, PixelRaster, Pixels, RGBA8};

use super::color::{self, ColorPolicy, IndexedSupport};
use super::{write_metadata, AlphaSupport, DecodedImage, ImageCodec, ImageFormat};

const FILE_HEADER_LEN: usize = 14;
const INFO_HEADER_LEN: u32 = 40;
const V4_HEADER_LEN: u32 = 108;

const BI_RGB: u32 = 0;
const BI_RLE8: u32 = 1;
const BI_RLE4: u32 = 2;
const BI_BITFIELDS: u32 = 3;
const BI_ALPHABITFIELDS: u32 = 6;

const PROFILE_EMBEDDED: u32 = 0x4D42_4544;
const LCS_SRGB: u32 = 0x7352_4742;

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

/// Parsed BITMAPCOREHEADER, BITMAPINFOHEADER or one of its extensions.
#[derive(Debug, Clone)]
pub(crate) struct DibHeader {
    pub header_len: u32,
    pub width: u32,
    pub height: u32,
    pub top_down: bool,
    pub bits: u16,
    pub compression: u32,
    pub x_ppm: i32,
    pub y_ppm: i32,
    pub colors_used: u32,
    /// Red, green, blue and alpha masks when the pixels use bitfields.
    pub masks: Option<[u32; 4]>,
    profile: Option<(u32, u32)>,
    /// Offset just past the header and any trailing masks.
    pub end: usize,
}

impl DibHeader {
    pub fn parse(data: &[u8], at: usize, format: ImageFormat) -> Result<Self> {
        let mut r = ByteReader::at(data, at, Endian::Little)?;
        let header_len = r.u32()?;
        if header_len == 12 {
            let width = r.u16()? as u32;
            let height = r.u16()? as u32;
            let _planes = r.u16()?;
            let bits = r.u16()?;
            if width == 0 || height == 0 {
                return Err(ImagingError::InvalidDimensions {
                    width: width as u64,
                    height: height as u64,
                });
            }
            return Ok(Self {
                header_len,
                width,
                height,
                top_down: false,
                bits,
                compression: BI_RGB,
                x_ppm: 0,
                y_ppm: 0,
                colors_used: 0,
                masks: None,
                profile: None,
                end: at + 12,
            });
        }
        if !matches!(header_len, 16 | 40 | 52 | 56 | 64 | 108 | 124) {
            return Err(ImagingError::header(format, format!("bitmap header of {} bytes", header_len)));
        }
        let width = r.i32()?;
        let height = r.i32()?;
        let _planes = r.u16()?;
        let bits = r.u16()?;
        let (mut compression, mut x_ppm, mut y_ppm, mut colors_used) = (BI_RGB, 0, 0, 0);
        if header_len >= 40 {
            compression = r.u32()?;
            let _image_size = r.u32()?;
            x_ppm = r.i32()?;
            y_ppm = r.i32()?;
            colors_used = r.u32()?;
            let _important = r.u32()?;
        }
        if header_len == 64 && compression >= 3 {
            // OS/2 2.x reuses 3 and 4 for Huffman and RLE24.
            return Err(ImagingError::feature(format, "OS/2 bitmap compression"));
        }
        let mut masks = None;
        let mut end = at + header_len as usize;
        if compression == BI_BITFIELDS || compression == BI_ALPHABITFIELDS {
            let inline = header_len >= 52 && header_len != 64;
            let mut m = if inline {
                ByteReader::at(data, at + 40, Endian::Little)?
            } else {
                ByteReader::at(data, end, Endian::Little)?
            };
            let has_alpha = compression == BI_ALPHABITFIELDS || header_len >= 56;
            let red = m.u32()?;
            let green = m.u32()?;
            let blue = m.u32()?;
            let alpha = if has_alpha { m.u32()? } else { 0 };
            masks = Some([red, green, blue, alpha]);
            if !inline {
                end = m.position();
            }
        } else if header_len >= 56 && header_len != 64 {
            let mut m = ByteReader::at(data, at + 52, Endian::Little)?;
            let alpha = m.u32()?;
            if alpha != 0 && bits == 32 {
                masks = Some([0x00FF_0000, 0x0000_FF00, 0x0000_00FF, alpha]);
            }
        }
        let (mut cs_type, mut profile) = (0, None);
        if header_len >= 108 {
            cs_type = ByteReader::at(data, at + 56, Endian::Little)?.u32()?;
        }
        if header_len >= 124 {
            let mut p = ByteReader::at(data, at + 112, Endian::Little)?;
            let offset = p.u32()?;
            let size = p.u32()?;
            if cs_type == PROFILE_EMBEDDED && size > 0 {
                profile = Some((offset, size));
            }
        }
        if width <= 0 || height == 0 || height == i32::MIN {
            return Err(ImagingError::InvalidDimensions {
                width: width.unsigned_abs() as u64,
                height: height.unsigned_abs() as u64,
            });
        }
        Ok(Self {
            header_len,
            width: width as u32,
            height: height.unsigned_abs(),
            top_down: height < 0,
            bits,
            compression,
            x_ppm,
            y_ppm,
            colors_used,
            masks,
            profile,
            end,
        })
    }

    pub fn density(&self) -> Option<PixelDensity> {
        if self.x_ppm > 0 && self.y_ppm > 0 {
            PixelDensity::from_pixels_per_meter(self.x_ppm as f64, self.y_ppm as f64).ok()
        } else {
            None
        }
    }

    /// Bytes per palette entry.
    fn palette_entry_len(&self) -> usize {
        if self.header_len == 12 {
            3
        } else {
            4
        }
    }

    fn palette_len(&self) -> usize {
        match (self.colors_used, self.bits) {
            (0, 1 | 2 | 4 | 8) => 1 << self.bits,
            (0, _) => 0,
            (n, _) => (n as usize).min(256),
        }
    }

    /// Read the color table that follows the header.
    pub fn palette(&self, data: &[u8]) -> Result<Option<Palette>> {
        let count = self.palette_len();
        if self.bits > 8 || count == 0 {
            return Ok(None);
        }
        let entry = self.palette_entry_len();
        let mut r = ByteReader::at(data, self.end, Endian::Little)?;
        let mut colors = Vec::with_capacity(count);
        for _ in 0..count {
            let bgr = r.bytes(entry)?;
            colors.push(RGBA8::new(bgr[2], bgr[1], bgr[0], 255));
        }
        Palette::new(colors).map(Some)
    }

    /// Offset just past the color table.
    pub fn palette_end(&self) -> usize {
        let count = if self.bits <= 8 { self.palette_len() } else { self.colors_used.min(256) as usize };
        self.end + count * self.palette_entry_len()
    }

    pub fn row_bytes(&self) -> usize {
        (self.width as usize * self.bits as usize).div_ceil(32) * 4
    }

    pub fn compression_name(&self) -> &'static str {
        match self.compression {
            BI_RGB => "None",
            BI_RLE8 => "RLE8",
            BI_RLE4 => "RLE4",
            BI_BITFIELDS | BI_ALPHABITFIELDS => "BitFields",
            4 => "JPEG",
            5 => "PNG",
            _ => "Unknown",
        }
    }

    fn icc_profile(&self, data: &[u8], header_at: usize) -> Option<Vec<u8>> {
        let (offset, size) = self.profile?;
        let start = header_at + offset as usize;
        match data.get(start..start + size as usize) {
            Some(bytes) => Some(bytes.to_vec()),
            None => {
                log::warn!("BMP: embedded ICC profile lies outside the file");
                None
            }
        }
    }
}

/// Shift and width of a channel mask.
fn mask_shift(mask: u32) -> (u32, u32) {
    if mask == 0 {
        return (0, 0);
    }
    let shift = mask.trailing_zeros();
    (shift, (mask >> shift).trailing_ones())
}

fn channel(value: u32, mask: u32) -> u8 {
    let (shift, width) = mask_shift(mask);
    if width == 0 {
        return 0;
    }
    let max = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
    let v = (value & mask) >> shift;
    if width > 8 {
        (v >> (width - 8)) as u8
    } else {
        scale_to_u8(v, max)
    }
}

/// Expand RLE8 or RLE4 data to one index per pixel, bottom-up rows.
fn decode_rle(data: &[u8], header: &DibHeader) -> Result<Vec<u8>> {
    let (w, h) = (header.width as usize, header.height as usize);
    let mut out = vec![0u8; w * h];
    let four = header.compression == BI_RLE4;
    let mut r = ByteReader::new(data, Endian::Little);
    let (mut x, mut y) = (0usize, 0usize);
    let mut put = |x: &mut usize, y: usize, index: u8| {
        if *x < w && y < h {
            out[y * w + *x] = index;
        }
        *x += 1;
    };
    loop {
        let count = r.u8()?;
        let value = r.u8()?;
        if count > 0 {
            for i in 0..count {
                let index = if four {
                    if i % 2 == 0 { value >> 4 } else { value & 15 }
                } else {
                    value
                };
                put(&mut x, y, index);
            }
            continue;
        }
        match value {
            0 => {
                x = 0;
                y += 1;
            }
            1 => break,
            2 => {
                x += r.u8()? as usize;
                y += r.u8()? as usize;
            }
            n => {
                let n = n as usize;
                let len = if four { n.div_ceil(2) } else { n };
                let bytes = r.bytes(len)?;
                for i in 0..n {
                    let index = if four {
                        let b = bytes[i / 2];
                        if i % 2 == 0 { b >> 4 } else { b & 15 }
                    } else {
                        bytes[i]
                    };
                    put(&mut x, y, index);
                }
                if len % 2 == 1 {
                    r.skip(1)?;
                }
            }
        }
        if y >= h {
            break;
        }
    }
    Ok(out)
}

/// Decode the pixel array at `at`. `height` is the image height (for icons
/// it is half the header value). `icon_alpha` treats plain 32-bit pixels as
/// BGRA, the way icons store them.
pub(crate) fn decode_pixels(
    data: &[u8],
    header: &DibHeader,
    palette: Option<&Palette>,
    at: usize,
    height: u32,
    format: ImageFormat,
    icon_alpha: bool,
) -> Result<PixelRaster> {
    let (w, h) = (header.width as usize, height as usize);
    let row_of = |y: usize| if header.top_down { y } else { h - 1 - y };

    if matches!(header.compression, BI_RLE8 | BI_RLE4) {
        let palette = palette.ok_or_else(|| ImagingError::header(format, "RLE bitmap without palette"))?;
        let compressed = data.get(at..).ok_or_else(|| ImagingError::truncated("BMP pixel data offset past end"))?;
        let bottom_up = decode_rle(compressed, header)?;
        let mut indices = vec![0u8; w * h];
        for y in 0..h {
            let src = row_of(y);
            indices[y * w..(y + 1) * w].copy_from_slice(&bottom_up[src * w..(src + 1) * w]);
        }
        check_indices(&indices, palette, format)?;
        return PixelRaster::from_indexed(w as u32, h as u32, palette.clone(), indices);
    }
    if !matches!(header.compression, BI_RGB | BI_BITFIELDS | BI_ALPHABITFIELDS) {
        return Err(ImagingError::feature(format, format!("{} compressed pixels", header.compression_name())));
    }

    let row_bytes = header.row_bytes();
    let rows = data
        .get(at..)
        .and_then(|d| d.get(..row_bytes * h))
        .ok_or_else(|| ImagingError::truncated(format!("{} pixel array needs {} bytes", format, row_bytes * h)))?;
    let row = |y: usize| &rows[row_of(y) * row_bytes..(row_of(y) + 1) * row_bytes];

    match header.bits {
        1 | 2 | 4 | 8 => {
            let palette = palette.ok_or_else(|| ImagingError::header(format, "indexed bitmap without palette"))?;
            let mut indices = Vec::with_capacity(w * h);
            for y in 0..h {
                indices.extend(unpack_samples(row(y), header.bits as u8, w)?);
            }
            check_indices(&indices, palette, format)?;
            PixelRaster::from_indexed(w as u32, h as u32, palette.clone(), indices)
        }
        16 | 24 | 32 => {
            let masks = match (header.masks, header.bits) {
                (Some(m), _) => m,
                (None, 16) => [0x7C00, 0x03E0, 0x001F, 0],
                (None, _) if icon_alpha => [0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000],
                (None, _) => [0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0],
            };
            let bpp = header.bits as usize / 8;
            let mut rgba = Vec::with_capacity(w * h * 4);
            for y in 0..h {
                for px in row(y).chunks_exact(bpp).take(w) {
                    let value = match bpp {
                        2 => u16::from_le_bytes([px[0], px[1]]) as u32,
                        3 => u32::from_le_bytes([px[0], px[1], px[2], 0]),
                        _ => u32::from_le_bytes([px[0], px[1], px[2], px[3]]),
                    };
                    let alpha = if masks[3] == 0 { 255 } else { channel(value, masks[3]) };
                    rgba.extend_from_slice(&[channel(value, masks[0]), channel(value, masks[1]), channel(value, masks[2]), alpha]);
                }
            }
            let opaque = rgba.chunks_exact(4).all(|p| p[3] == 255);
            let invisible = rgba.chunks_exact(4).all(|p| p[3] == 0);
            if opaque || (invisible && !icon_alpha) {
                let rgb = rgba.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]]).collect();
                PixelRaster::from_rgb8(w as u32, h as u32, rgb)
            } else {
                PixelRaster::from_rgba8(w as u32, h as u32, rgba)
            }
        }
        other => Err(ImagingError::feature(format, format!("{} bits per pixel", other))),
    }
}

fn check_indices(indices: &[u8], palette: &Palette, format: ImageFormat) -> Result<()> {
    match indices.iter().find(|&&i| i as usize >= palette.len()) {
        Some(&bad) => Err(ImagingError::data(
            format,
            format!("pixel index {} outside palette of {} colors", bad, palette.len()),
        )),
        None => Ok(()),
    }
}

fn ppm(dpi: f64) -> i32 {
    (dpi / 0.0254).round().min(i32::MAX as f64) as i32
}

/// Write a DIB header, color table and pixel array for an already prepared
/// raster. Icons double the height field and never use bitfields.
pub(crate) fn encode_dib(raster: &PixelRaster, density: Option<PixelDensity>, icon: bool, format: ImageFormat) -> Result<Vec<u8>> {
    let (w, h) = raster.dimensions();
    if w > i32::MAX as u32 || h > (i32::MAX as u32) / 2 {
        return Err(ImagingError::InvalidDimensions {
            width: w as u64,
            height: h as u64,
        });
    }
    let (bits, palette): (u16, Option<&Palette>) = match raster.pixels() {
        Pixels::Indexed { palette, .. } => (
            match palette.len() {
                0..=2 => 1,
                3..=16 => 4,
                _ => 8,
            },
            Some(palette),
        ),
        Pixels::Rgb(_) => (24, None),
        Pixels::Rgba(_) => (32, None),
        other => return Err(color::unexpected_layout(format, other.layout())),
    };
    let v4 = bits == 32 && !icon;
    let header_len = if v4 { V4_HEADER_LEN } else { INFO_HEADER_LEN };
    let row_bytes = (w as usize * bits as usize).div_ceil(32) * 4;

    let mut out = ByteWriter::new(Endian::Little);
    out.u32(header_len);
    out.i32(w as i32);
    out.i32(if icon { h as i32 * 2 } else { h as i32 });
    out.u16(1);
    out.u16(bits);
    out.u32(if v4 { BI_BITFIELDS } else { BI_RGB });
    out.u32((row_bytes * h as usize) as u32);
    let (x, y) = density.map_or((0, 0), |d| (ppm(d.horizontal_dpi()), ppm(d.vertical_dpi())));
    out.i32(x);
    out.i32(y);
    out.u32(palette.map_or(0, |p| p.len() as u32));
    out.u32(0);
    if v4 {
        for mask in [0x00FF_0000u32, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000] {
            out.u32(mask);
        }
        out.u32(LCS_SRGB);
        out.zeros(36 + 12);
    }
    if let Some(palette) = palette {
        for c in palette.colors() {
            out.bytes(&[c.b, c.g, c.r, 0]);
        }
    }

    let mut line = vec![0u8; row_bytes];
    for y in (0..h).rev() {
        line.iter_mut().for_each(|b| *b = 0);
        let start = y as usize * w as usize;
        let end = start + w as usize;
        match raster.pixels() {
            Pixels::Indexed { indices, .. } => {
                let packed = crate::io::pack_samples(&indices[start..end], bits as u8);
                line[..packed.len()].copy_from_slice(&packed);
            }
            Pixels::Rgb(rgb) => {
                for (dst, p) in line.chunks_exact_mut(3).zip(rgb[start * 3..end * 3].chunks_exact(3)) {
                    dst.copy_from_slice(&[p[2], p[1], p[0]]);
                }
            }
            Pixels::Rgba(rgba) => {
                for (dst, p) in line.chunks_exact_mut(4).zip(rgba[start * 4..end * 4].chunks_exact(4)) {
                    dst.copy_from_slice(&[p[2], p[1], p[0], p[3]]);
                }
            }
            _ => {}
        }
        out.bytes(&line);
    }
    Ok(out.into_inner())
}

struct Parsed {
    header: DibHeader,
    pixels_at: usize,
}

fn parse(data: &[u8], params: &ReadParameters) -> Result<Parsed> {
    let mut r = ByteReader::new(data, Endian::Little);
    if r.bytes(2)? != &b"BM"[..] {
        return Err(ImagingError::header(ImageFormat::Bmp, "missing BM signature"));
    }
    let _file_size = r.u32()?;
    r.skip(4)?;
    let pixels_at = r.u32()? as usize;
    let header = DibHeader::parse(data, FILE_HEADER_LEN, ImageFormat::Bmp)?;
    params.check_dimensions(header.width as u64, header.height as u64)?;
    if params.image_index != 0 {
        return Err(ImagingError::InvalidParameter(format!(
            "BMP holds one image, index {} requested",
            params.image_index
        )));
    }
    Ok(Parsed { header, pixels_at })
}

fn metadata_of(data: &[u8], header: &DibHeader) -> Metadata {
    Metadata {
        pixel_density: header.density(),
        icc_profile: header.icc_profile(data, FILE_HEADER_LEN),
        text: None,
    }
}

/// BMP codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BmpCodec;

impl ImageCodec for BmpCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Bmp
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.starts_with(b"BM")
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        let Parsed { header, .. } = parse(data, params)?;
        let mut info = ImageInfo::new(ImageFormat::Bmp, header.width, header.height);
        info.bits_per_pixel = header.bits;
        info.color_type = if header.bits <= 8 { ColorType::Indexed } else { ColorType::Rgb };
        info.has_transparency = header.masks.is_some_and(|m| m[3] != 0);
        info.compression = header.compression_name().into();
        info.pixel_density = header.density();
        Ok(info)
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        let Parsed { header, .. } = parse(data, params)?;
        Ok(metadata_of(data, &header))
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        let Parsed { header, pixels_at } = parse(data, params)?;
        let palette = header.palette(data)?;
        let raster = decode_pixels(data, &header, palette.as_ref(), pixels_at, header.height, ImageFormat::Bmp, false)?;
        log::debug!(
            "BMP decoded {}x{} {} bpp ({}, {}-byte header)",
            header.width,
            header.height,
            header.bits,
            header.compression_name(),
            header.header_len
        );
        Ok(DecodedImage {
            raster,
            metadata: metadata_of(data, &header),
        })
    }

    fn encode(&self, raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
        params.validate()?;
        params.compression_or(ImageFormat::Bmp, &[Compression::None], Compression::None)?;
        let prepared = color::prepare(ImageFormat::Bmp, raster, &POLICY, params)?;
        let extra = write_metadata(ImageFormat::Bmp, metadata, params)?;
        let dib = encode_dib(&prepared, extra.density, false, ImageFormat::Bmp)?;

        let palette_len = match prepared.pixels() {
            Pixels::Indexed { palette, .. } => palette.len() * 4,
            _ => 0,
        };
        let header_len = if prepared.layout() == Layout::Rgba { V4_HEADER_LEN } else { INFO_HEADER_LEN };
        let pixels_at = FILE_HEADER_LEN + header_len as usize + palette_len;

        let mut out = ByteWriter::with_capacity(Endian::Little, FILE_HEADER_LEN + dib.len());
        out.bytes(b"BM");
        out.u32((FILE_HEADER_LEN + dib.len()) as u32);
        out.u32(0);
        out.u32(pixels_at as u32);
        out.bytes(&dib);
        log::debug!("BMP encoded {}x{} as {:?}", prepared.width(), prepared.height(), prepared.layout());
        Ok(out.into_inner())
    }
}
