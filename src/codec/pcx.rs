//! ZSoft PCX codec. The page decoder and encoder are shared with DCX.

use crate::config::{Compression, EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::io::{pack_samples, unpack_samples, ByteReader, ByteWriter, Endian};
use crate::metadata::{ColorType, ImageInfo, Metadata, PixelDensity};
use crate::raster::{Palette, PixelRaster, Pixels, BLACK, WHITE};

use super::color::{self, ColorPolicy, IndexedSupport};
use super::{write_metadata, AlphaSupport, DecodedImage, ImageCodec, ImageFormat};

const MANUFACTURER: u8 = 0x0A;
const HEADER_LEN: usize = 128;
const VGA_PALETTE_MARKER: u8 = 0x0C;
const VGA_PALETTE_LEN: usize = 769;
const MAX_RUN: usize = 63;

const POLICY: ColorPolicy = ColorPolicy {
    bitonal: true,
    grayscale: false,
    indexed: Some(IndexedSupport {
        max_colors: 256,
        alpha: AlphaSupport::None,
    }),
    rgb: true,
    rgba: true,
};

#[derive(Debug, Clone)]
struct Header {
    version: u8,
    rle: bool,
    bits: u8,
    width: u32,
    height: u32,
    dpi: (u16, u16),
    ega_palette: [u8; 48],
    planes: u8,
    bytes_per_line: usize,
    palette_info: u16,
}

impl Header {
    fn parse(data: &[u8], format: ImageFormat) -> Result<Self> {
        let mut r = ByteReader::new(data, Endian::Little);
        let raw = r.array::<HEADER_LEN>()?;
        let mut r = ByteReader::new(&raw, Endian::Little);
        if r.u8()? != MANUFACTURER {
            return Err(ImagingError::header(format, "missing PCX manufacturer byte"));
        }
        let version = r.u8()?;
        let encoding = r.u8()?;
        let bits = r.u8()?;
        let (x_min, y_min, x_max, y_max) = (r.u16()?, r.u16()?, r.u16()?, r.u16()?);
        let dpi = (r.u16()?, r.u16()?);
        let ega_palette = r.array::<48>()?;
        r.skip(1)?;
        let planes = r.u8()?;
        let bytes_per_line = r.u16()? as usize;
        let palette_info = r.u16()?;
        if encoding > 1 {
            return Err(ImagingError::header(format, format!("encoding {}", encoding)));
        }
        if x_max < x_min || y_max < y_min {
            return Err(ImagingError::InvalidDimensions { width: 0, height: 0 });
        }
        let width = (x_max - x_min) as u32 + 1;
        let height = (y_max - y_min) as u32 + 1;
        let header = Self {
            version,
            rle: encoding == 1,
            bits,
            width,
            height,
            dpi,
            ega_palette,
            planes,
            bytes_per_line,
            palette_info,
        };
        header.check(format)?;
        Ok(header)
    }

    fn check(&self, format: ImageFormat) -> Result<()> {
        let ok = matches!(
            (self.bits, self.planes),
            (1, 1..=4) | (2, 1) | (4, 1) | (8, 1) | (8, 3) | (8, 4)
        );
        if !ok {
            return Err(ImagingError::feature(
                format,
                format!("{} bits per pixel in {} planes", self.bits, self.planes),
            ));
        }
        let needed = (self.width as usize * self.bits as usize).div_ceil(8);
        if self.bytes_per_line < needed {
            return Err(ImagingError::header(
                format,
                format!("{} bytes per line for {} pixels", self.bytes_per_line, self.width),
            ));
        }
        Ok(())
    }

    fn density(&self) -> Option<PixelDensity> {
        match self.dpi {
            (0, _) | (_, 0) => None,
            (h, v) => PixelDensity::from_pixels_per_inch(h as f64, v as f64).ok(),
        }
    }

    /// Version 5 8-bit images carry a 256-color palette after the pixel
    /// data unless the header marks them grayscale.
    fn requires_vga_palette(&self) -> bool {
        self.bits == 8 && self.planes == 1 && self.version >= 5 && self.palette_info != 2
    }

    fn scanline(&self) -> usize {
        self.bytes_per_line * self.planes as usize
    }

    fn color_type(&self) -> ColorType {
        match (self.bits, self.planes) {
            (1, 1) => ColorType::BlackAndWhite,
            (8, 3 | 4) => ColorType::Rgb,
            _ => ColorType::Indexed,
        }
    }
}

/// Expand the RLE payload, returning the pixels and the number of input
/// bytes used. Runs may cross scanline boundaries.
fn decode_rle(data: &[u8], expected: usize) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::with_capacity(expected);
    let mut r = ByteReader::new(data, Endian::Little);
    while out.len() < expected {
        let b = r.u8()?;
        if b & 0xC0 == 0xC0 {
            let value = r.u8()?;
            out.resize(out.len() + (b & 0x3F) as usize, value);
        } else {
            out.push(b);
        }
    }
    out.truncate(expected);
    Ok((out, r.position()))
}

fn ega_palette(header: &Header, count: usize) -> Result<Palette> {
    Palette::from_rgb_triples(&header.ega_palette[..count * 3])
}

/// The 256-color palette at the end of the file, when present at or after
/// `from`.
fn vga_palette(data: &[u8], from: usize) -> Option<&[u8]> {
    let at = data.len().checked_sub(VGA_PALETTE_LEN)?;
    (at >= from && data[at] == VGA_PALETTE_MARKER).then(|| &data[at + 1..])
}

/// Decode one PCX image occupying all of `data`.
pub(crate) fn decode_page(data: &[u8], params: &ReadParameters, format: ImageFormat) -> Result<(PixelRaster, Option<PixelDensity>)> {
    let header = Header::parse(data, format)?;
    params.check_dimensions(header.width as u64, header.height as u64)?;
    let (w, h) = (header.width as usize, header.height as usize);
    let line = header.scanline();
    let expected = line * h;
    let body = &data[HEADER_LEN..];
    let (pixels, consumed) = if header.rle {
        decode_rle(body, expected)?
    } else {
        let raw = body
            .get(..expected)
            .ok_or_else(|| ImagingError::truncated(format!("{} pixel data needs {} bytes", format, expected)))?;
        (raw.to_vec(), expected)
    };
    let bpl = header.bytes_per_line;
    let plane = |y: usize, p: usize| &pixels[y * line + p * bpl..y * line + (p + 1) * bpl];

    let raster = match (header.bits, header.planes) {
        (1, 1) => {
            let mut bits = Vec::with_capacity(w * h);
            for y in 0..h {
                bits.extend(unpack_samples(plane(y, 0), 1, w)?);
            }
            let palette = ega_palette(&header, 2)?;
            let zero = header.ega_palette.iter().all(|&b| b == 0);
            if zero || (palette.get(0) == Some(BLACK) && palette.get(1) == Some(WHITE)) {
                PixelRaster::new(header.width, header.height, Pixels::Bitonal(bits))?
            } else {
                PixelRaster::from_indexed(header.width, header.height, palette, bits)?
            }
        }
        (1, planes) => {
            let planes = planes as usize;
            let mut indices = vec![0u8; w * h];
            for y in 0..h {
                for p in 0..planes {
                    for (x, bit) in unpack_samples(plane(y, p), 1, w)?.into_iter().enumerate() {
                        indices[y * w + x] |= bit << p;
                    }
                }
            }
            PixelRaster::from_indexed(header.width, header.height, ega_palette(&header, 1 << planes)?, indices)?
        }
        (2 | 4, 1) => {
            let mut indices = Vec::with_capacity(w * h);
            for y in 0..h {
                indices.extend(unpack_samples(plane(y, 0), header.bits, w)?);
            }
            PixelRaster::from_indexed(header.width, header.height, ega_palette(&header, 1 << header.bits)?, indices)?
        }
        (8, 1) => {
            let mut indices = Vec::with_capacity(w * h);
            for y in 0..h {
                indices.extend_from_slice(&plane(y, 0)[..w]);
            }
            match vga_palette(data, HEADER_LEN + consumed) {
                Some(table) => PixelRaster::from_indexed(header.width, header.height, Palette::from_rgb_triples(table)?, indices)?,
                None if header.requires_vga_palette() => {
                    return Err(ImagingError::truncated(format!("{} 256-color palette is missing", format)));
                }
                None => {
                    log::debug!("{}: 8-bit image without trailing palette, reading as grayscale", format);
                    PixelRaster::from_gray8(header.width, header.height, indices)?
                }
            }
        }
        (_, planes) => {
            let planes = planes as usize;
            let mut samples = Vec::with_capacity(w * h * planes);
            for y in 0..h {
                for x in 0..w {
                    for p in 0..planes {
                        samples.push(plane(y, p)[x]);
                    }
                }
            }
            if planes == 4 {
                PixelRaster::from_rgba8(header.width, header.height, samples)?
            } else {
                PixelRaster::from_rgb8(header.width, header.height, samples)?
            }
        }
    };
    log::debug!(
        "{}: decoded {}x{} PCX v{}, {} bits x {} planes{}",
        format,
        w,
        h,
        header.version,
        header.bits,
        header.planes,
        if header.rle { ", RLE" } else { "" }
    );
    Ok((raster, header.density()))
}

pub(crate) fn read_page_info(data: &[u8], params: &ReadParameters, format: ImageFormat) -> Result<ImageInfo> {
    let header = Header::parse(data, format)?;
    params.check_dimensions(header.width as u64, header.height as u64)?;
    let mut info = ImageInfo::new(format, header.width, header.height);
    info.bits_per_pixel = header.bits as u16 * header.planes as u16;
    let gray = header.bits == 8 && header.planes == 1 && !header.requires_vga_palette();
    info.color_type = if gray && vga_palette(data, HEADER_LEN).is_none() {
        ColorType::Grayscale
    } else {
        header.color_type()
    };
    info.has_transparency = header.planes == 4 && header.bits == 8;
    info.compression = if header.rle { "RLE" } else { "None" }.into();
    info.pixel_density = header.density();
    Ok(info)
}

pub(crate) fn read_page_metadata(data: &[u8], format: ImageFormat) -> Result<Metadata> {
    Ok(Metadata {
        pixel_density: Header::parse(data, format)?.density(),
        ..Metadata::default()
    })
}

fn encode_rle(line: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < line.len() {
        let value = line[i];
        let mut run = 1;
        while i + run < line.len() && run < MAX_RUN && line[i + run] == value {
            run += 1;
        }
        if run > 1 || value & 0xC0 == 0xC0 {
            out.push(0xC0 | run as u8);
        }
        out.push(value);
        i += run;
    }
}

/// Encode one PCX image. Returns the complete file.
pub(crate) fn encode_page(raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters, format: ImageFormat) -> Result<Vec<u8>> {
    params.validate()?;
    let compression = params.compression_or(format, &[Compression::None, Compression::Rle], Compression::Rle)?;
    let prepared = color::prepare(format, raster, &POLICY, params)?;
    let extra = write_metadata(format, metadata, params)?;
    let (w, h) = prepared.dimensions();
    if w > u16::MAX as u32 + 1 || h > u16::MAX as u32 + 1 {
        return Err(ImagingError::InvalidDimensions {
            width: w as u64,
            height: h as u64,
        });
    }

    let (bits, planes, palette): (u8, u8, Option<&Palette>) = match prepared.pixels() {
        Pixels::Bitonal(_) => (1, 1, None),
        Pixels::Indexed { palette, .. } => (8, 1, Some(palette)),
        Pixels::Rgb(_) => (8, 3, None),
        Pixels::Rgba(_) => (8, 4, None),
        other => return Err(color::unexpected_layout(format, other.layout())),
    };
    let width = w as usize;
    let needed = (width * bits as usize).div_ceil(8);
    let bytes_per_line = needed + needed % 2;
    if bytes_per_line > u16::MAX as usize {
        return Err(ImagingError::InvalidDimensions {
            width: w as u64,
            height: h as u64,
        });
    }
    let dpi = extra
        .density
        .map_or((0, 0), |d| (d.horizontal_dpi().round() as u16, d.vertical_dpi().round() as u16));

    let mut out = ByteWriter::new(Endian::Little);
    out.u8(MANUFACTURER);
    out.u8(5);
    out.u8(u8::from(compression == Compression::Rle));
    out.u8(bits);
    out.u16(0);
    out.u16(0);
    out.u16((w - 1) as u16);
    out.u16((h - 1) as u16);
    out.u16(dpi.0);
    out.u16(dpi.1);
    let mut ega = [0u8; 48];
    if bits == 1 {
        ega[3..6].copy_from_slice(&[255, 255, 255]);
    }
    out.bytes(&ega);
    out.u8(0);
    out.u8(planes);
    out.u16(bytes_per_line as u16);
    out.u16(1);
    out.u16(0);
    out.u16(0);
    out.zeros(54);

    let mut line = vec![0u8; bytes_per_line];
    let mut body = Vec::new();
    for y in 0..h as usize {
        let row = y * width..(y + 1) * width;
        for p in 0..planes as usize {
            line.iter_mut().for_each(|b| *b = 0);
            match prepared.pixels() {
                Pixels::Bitonal(bits) => {
                    let packed = pack_samples(&bits[row.clone()], 1);
                    line[..packed.len()].copy_from_slice(&packed);
                }
                Pixels::Indexed { indices, .. } => line[..width].copy_from_slice(&indices[row.clone()]),
                Pixels::Rgb(rgb) => {
                    for (x, px) in rgb[row.start * 3..row.end * 3].chunks_exact(3).enumerate() {
                        line[x] = px[p];
                    }
                }
                Pixels::Rgba(rgba) => {
                    for (x, px) in rgba[row.start * 4..row.end * 4].chunks_exact(4).enumerate() {
                        line[x] = px[p];
                    }
                }
                Pixels::Grayscale(_) => {}
            }
            if compression == Compression::Rle {
                encode_rle(&line, &mut body);
            } else {
                body.extend_from_slice(&line);
            }
        }
    }
    out.bytes(&body);
    if let Some(palette) = palette {
        out.u8(VGA_PALETTE_MARKER);
        let mut table = [0u8; 768];
        for (slot, c) in table.chunks_exact_mut(3).zip(palette.colors()) {
            slot.copy_from_slice(&[c.r, c.g, c.b]);
        }
        out.bytes(&table);
    }
    log::debug!("{}: encoded {}x{} as {} bits x {} planes, {:?}", format, w, h, bits, planes, compression);
    Ok(out.into_inner())
}

/// Signature check shared with DCX page validation.
pub(crate) fn looks_like_pcx(prefix: &[u8]) -> bool {
    prefix.len() >= 4
        && prefix[0] == MANUFACTURER
        && matches!(prefix[1], 0 | 2 | 3 | 4 | 5)
        && prefix[2] <= 1
        && matches!(prefix[3], 1 | 2 | 4 | 8)
}

/// PCX codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcxCodec;

impl PcxCodec {
    fn single(params: &ReadParameters) -> Result<()> {
        if params.image_index != 0 {
            return Err(ImagingError::InvalidParameter(format!(
                "PCX holds one image, index {} requested",
                params.image_index
            )));
        }
        Ok(())
    }
}

impl ImageCodec for PcxCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Pcx
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        looks_like_pcx(prefix)
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        Self::single(params)?;
        read_page_info(data, params, ImageFormat::Pcx)
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        Self::single(params)?;
        read_page_metadata(data, ImageFormat::Pcx)
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        Self::single(params)?;
        let (raster, pixel_density) = decode_page(data, params, ImageFormat::Pcx)?;
        Ok(DecodedImage {
            raster,
            metadata: Metadata {
                pixel_density,
                ..Metadata::default()
            },
        })
    }

    fn encode(&self, raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
        encode_page(raster, metadata, params, ImageFormat::Pcx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Layout, RGBA8};

    fn roundtrip(raster: &PixelRaster, params: &EncodeParameters) -> PixelRaster {
        let data = PcxCodec.encode(raster, &Metadata::default(), params).unwrap();
        assert!(PcxCodec.matches(&data));
        PcxCodec.decode(&data, &ReadParameters::default()).unwrap().raster
    }

    #[test]
    fn test_layouts_roundtrip_with_and_without_rle() {
        let bitonal = PixelRaster::new(11, 3, Pixels::Bitonal((0..33).map(|i| (i % 3 == 0) as u8).collect())).unwrap();
        let indexed = PixelRaster::from_rgb8(2, 2, vec![1, 2, 3, 200, 200, 200, 1, 2, 3, 7, 7, 0xC5]).unwrap();
        let rgb = PixelRaster::from_rgb8(20, 20, (0..1200u32).map(|i| (i % 5 * 60) as u8 ^ (i / 60) as u8).collect()).unwrap();
        let rgba = PixelRaster::from_argb(3, 1, &[0xFF102030, 0x00000000, 0x7FC0C0C0]).unwrap();
        for params in [EncodeParameters::default(), EncodeParameters::default().with_compression(Compression::None)] {
            let decoded = roundtrip(&bitonal, &params);
            assert_eq!(decoded.layout(), Layout::Bitonal);
            assert!(decoded.same_pixels(&bitonal));
            let decoded = roundtrip(&indexed, &params);
            assert_eq!(decoded.layout(), Layout::Indexed);
            assert!(decoded.same_pixels(&indexed));
            assert!(roundtrip(&rgb, &params).same_pixels(&rgb));
            assert!(roundtrip(&rgba, &params).same_pixels(&rgba));
        }
    }

    #[test]
    fn test_rle_escapes_high_bytes() {
        let mut out = Vec::new();
        encode_rle(&[0xC5, 1, 1, 1, 2], &mut out);
        assert_eq!(out, vec![0xC1, 0xC5, 0xC3, 1, 2]);
        assert_eq!(decode_rle(&out, 5).unwrap(), (vec![0xC5, 1, 1, 1, 2], 5));
    }

    #[test]
    fn test_density_is_integral_dpi() {
        let metadata = Metadata {
            pixel_density: Some(PixelDensity::from_pixels_per_inch(75.0, 150.0).unwrap()),
            ..Metadata::default()
        };
        let raster = PixelRaster::from_gray8(1, 1, vec![0]).unwrap();
        let data = PcxCodec.encode(&raster, &metadata, &EncodeParameters::default()).unwrap();
        assert_eq!(&data[12..16], &[75, 0, 150, 0]);
        let info = PcxCodec.read_info(&data, &ReadParameters::default()).unwrap();
        assert_eq!(info.pixel_density.unwrap().vertical_dpi(), 150.0);
    }

    #[test]
    fn test_ega_planes() {
        let mut w = ByteWriter::new(Endian::Little);
        w.bytes(&[MANUFACTURER, 2, 0, 1]);
        w.u16(0);
        w.u16(0);
        w.u16(7);
        w.u16(0);
        w.u16(0);
        w.u16(0);
        let mut ega = [0u8; 48];
        for (i, c) in ega.chunks_exact_mut(3).enumerate() {
            c.copy_from_slice(&[i as u8 * 16, 0, 0]);
        }
        w.bytes(&ega);
        w.u8(0);
        w.u8(4);
        w.u16(2);
        w.zeros(60);
        // Pixel 0 has planes 0 and 2 set (index 5), pixel 7 has plane 3 (index 8).
        w.bytes(&[0x80, 0, 0, 0, 0x80, 0, 0x01, 0]);
        let raster = PcxCodec.decode(w.as_slice(), &ReadParameters::default()).unwrap().raster;
        assert_eq!(raster.pixel(0, 0), RGBA8::new(80, 0, 0, 255));
        assert_eq!(raster.pixel(7, 0), RGBA8::new(128, 0, 0, 255));
        assert_eq!(raster.pixel(3, 0), RGBA8::new(0, 0, 0, 255));
    }

    #[test]
    fn test_truncated_and_unsupported() {
        let raster = PixelRaster::from_rgb8(20, 20, (0..400u32).flat_map(|p| [p as u8, (p >> 8) as u8, 3]).collect()).unwrap();
        let data = PcxCodec.encode(&raster, &Metadata::default(), &EncodeParameters::default()).unwrap();
        for cut in [3, 100, data.len() - 1] {
            assert!(PcxCodec.decode(&data[..cut], &ReadParameters::default()).unwrap_err().is_truncation());
        }
        let params = EncodeParameters::default().with_compression(Compression::Lzw);
        assert!(PcxCodec.encode(&raster, &Metadata::default(), &params).is_err());
    }

    #[test]
    fn test_missing_vga_palette_is_truncation() {
        let raster = PixelRaster::from_gray8(9, 7, (0..63).map(|i| (i * 4) as u8).collect()).unwrap();
        for params in [EncodeParameters::default(), EncodeParameters::default().with_compression(Compression::None)] {
            let data = PcxCodec.encode(&raster, &Metadata::default(), &params).unwrap();
            for cut in data.len() - VGA_PALETTE_LEN..data.len() {
                let err = PcxCodec.decode(&data[..cut], &ReadParameters::default()).unwrap_err();
                assert!(err.is_truncation(), "cut at {} of {}: {}", cut, data.len(), err);
            }
        }
    }

    #[test]
    fn test_old_8bit_without_palette_reads_gray() {
        let raster = PixelRaster::from_gray8(4, 1, vec![0, 1, 2, 3]).unwrap();
        let params = EncodeParameters::default().with_compression(Compression::None);
        let mut data = PcxCodec.encode(&raster, &Metadata::default(), &params).unwrap();
        data.truncate(data.len() - VGA_PALETTE_LEN);
        data[1] = 3;
        let decoded = PcxCodec.decode(&data, &ReadParameters::default()).unwrap().raster;
        assert_eq!(decoded.layout(), Layout::Grayscale);
        for x in 0..4 {
            let v = data[HEADER_LEN + x as usize];
            assert_eq!(decoded.pixel(x, 0), RGBA8::new(v, v, v, 255));
        }
        let info = PcxCodec.read_info(&data, &ReadParameters::default()).unwrap();
        assert_eq!(info.color_type, ColorType::Grayscale);
    }

    #[test]
    fn test_line_length_must_fit_header() {
        let wide = PixelRaster::from_gray8(65536, 1, vec![7; 65536]).unwrap();
        let err = PcxCodec.encode(&wide, &Metadata::default(), &EncodeParameters::default()).unwrap_err();
        assert!(matches!(err, ImagingError::InvalidDimensions { .. }));

        let bitonal = PixelRaster::new(65536, 1, Pixels::Bitonal((0..65536).map(|i| (i % 7 == 0) as u8).collect())).unwrap();
        assert!(roundtrip(&bitonal, &EncodeParameters::default()).same_pixels(&bitonal));
    }
}
