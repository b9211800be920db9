//! PNG codec.
//!
//! Decoding supports every color type and bit depth, Adam7 interlacing,
//! palette transparency and the pHYs, iCCP, tEXt, zTXt and iTXt chunks.
//! Encoding picks the smallest of 1-bit gray, 8-bit gray, palette, RGB and
//! RGBA that holds the raster exactly, with per-row adaptive filtering.

use crate::config::{Compression, EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::io::{expand_bits, packed_len, unpack_samples, ByteReader, ByteWriter, Endian};
use crate::metadata::{ColorType, ImageInfo, Metadata, PixelDensity};
use crate::raster::{Palette, PixelRaster, Pixels, RGBA8};

use super::color::{self, ColorPolicy, IndexedSupport};
use super::{zlib, AlphaSupport, DecodedImage, ImageCodec, ImageFormat};

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const IDAT_CHUNK_LEN: usize = 1 << 16;

const POLICY: ColorPolicy = ColorPolicy {
    bitonal: true,
    grayscale: true,
    indexed: Some(IndexedSupport {
        max_colors: 256,
        alpha: AlphaSupport::Full,
    }),
    rgb: true,
    rgba: true,
};

/// Adam7 passes as `(x0, y0, dx, dy)`.
const ADAM7: [(u32, u32, u32, u32); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

/// PNG codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngCodec;

pub(crate) fn crc32(parts: &[&[u8]]) -> u32 {
    static TABLE: std::sync::OnceLock<[u32; 256]> = std::sync::OnceLock::new();
    let table = TABLE.get_or_init(|| {
        let mut t = [0u32; 256];
        for (n, slot) in t.iter_mut().enumerate() {
            let mut c = n as u32;
            for _ in 0..8 {
                c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            }
            *slot = c;
        }
        t
    });
    let mut c = 0xFFFF_FFFFu32;
    for &b in parts.iter().flat_map(|p| p.iter()) {
        c = table[((c ^ b as u32) & 0xFF) as usize] ^ (c >> 8);
    }
    c ^ 0xFFFF_FFFF
}

#[derive(Debug, Clone, Copy)]
struct Header {
    width: u32,
    height: u32,
    depth: u8,
    color_type: u8,
    interlaced: bool,
}

impl Header {
    fn parse(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data, Endian::Big);
        let header = Self {
            width: r.u32()?,
            height: r.u32()?,
            depth: r.u8()?,
            color_type: r.u8()?,
            interlaced: false,
        };
        let (compression, filter, interlace) = (r.u8()?, r.u8()?, r.u8()?);
        let valid_depth = match header.color_type {
            0 => matches!(header.depth, 1 | 2 | 4 | 8 | 16),
            3 => matches!(header.depth, 1 | 2 | 4 | 8),
            2 | 4 | 6 => matches!(header.depth, 8 | 16),
            other => {
                return Err(ImagingError::header(ImageFormat::Png, format!("color type {}", other)));
            }
        };
        if !valid_depth {
            return Err(ImagingError::header(
                ImageFormat::Png,
                format!("bit depth {} with color type {}", header.depth, header.color_type),
            ));
        }
        if compression != 0 || filter != 0 || interlace > 1 {
            return Err(ImagingError::header(ImageFormat::Png, "unknown compression, filter or interlace method"));
        }
        Ok(Self {
            interlaced: interlace == 1,
            ..header
        })
    }

    fn channels(&self) -> usize {
        match self.color_type {
            2 => 3,
            4 => 2,
            6 => 4,
            _ => 1,
        }
    }

    fn bits_per_pixel(&self) -> usize {
        self.channels() * self.depth as usize
    }

    fn row_bytes(&self, width: u32) -> usize {
        packed_len(width as usize * self.channels(), self.depth)
    }

    /// `(x0, y0, dx, dy, width, height)` of every non-empty pass.
    fn passes(&self) -> Vec<(u32, u32, u32, u32, u32, u32)> {
        let full = [(0, 0, 1, 1)];
        let table: &[(u32, u32, u32, u32)] = if self.interlaced { &ADAM7 } else { &full };
        table
            .iter()
            .filter_map(|&(x0, y0, dx, dy)| {
                let w = self.width.saturating_sub(x0).div_ceil(dx);
                let h = self.height.saturating_sub(y0).div_ceil(dy);
                (w > 0 && h > 0).then_some((x0, y0, dx, dy, w, h))
            })
            .collect()
    }

    fn inflated_len(&self) -> usize {
        self.passes()
            .iter()
            .map(|&(_, _, _, _, w, h)| h as usize * (1 + self.row_bytes(w)))
            .sum()
    }
}

struct Chunks<'a> {
    header: Header,
    palette: Option<&'a [u8]>,
    transparency: Option<&'a [u8]>,
    idat: Vec<&'a [u8]>,
    metadata: Metadata,
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn split_nul(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = data.iter().position(|&b| b == 0)?;
    Some((&data[..pos], &data[pos + 1..]))
}

fn parse_text(kind: &[u8; 4], data: &[u8]) -> Option<(String, String)> {
    let (key, rest) = split_nul(data)?;
    let key = latin1(key);
    match kind {
        b"tEXt" => Some((key, latin1(rest))),
        b"zTXt" => {
            let (&method, compressed) = rest.split_first()?;
            if method != 0 {
                return None;
            }
            let text = zlib::decompress(ImageFormat::Png, compressed, 1 << 24).ok()?;
            Some((key, latin1(&text)))
        }
        _ => {
            let (&flag, rest) = rest.split_first()?;
            let (&method, rest) = rest.split_first()?;
            let (_language, rest) = split_nul(rest)?;
            let (_translated, text) = split_nul(rest)?;
            let text = if flag == 1 {
                if method != 0 {
                    return None;
                }
                zlib::decompress(ImageFormat::Png, text, 1 << 24).ok()?
            } else {
                text.to_vec()
            };
            Some((key, String::from_utf8(text).ok()?))
        }
    }
}

fn parse_chunks<'a>(data: &'a [u8], params: &ReadParameters) -> Result<Chunks<'a>> {
    let mut r = ByteReader::new(data, Endian::Big);
    if r.bytes(8)? != &SIGNATURE[..] {
        return Err(ImagingError::header(ImageFormat::Png, "bad signature"));
    }
    let mut header = None;
    let mut chunks_palette = None;
    let mut transparency = None;
    let mut idat = Vec::new();
    let mut metadata = Metadata::default();

    loop {
        let length = r.u32()? as usize;
        let kind: [u8; 4] = r.array()?;
        let body = r.bytes(length)?;
        let crc = r.u32()?;
        let critical = kind[0].is_ascii_uppercase();
        let name = String::from_utf8_lossy(&kind).into_owned();
        log::trace!("PNG chunk {} ({} bytes)", name, length);

        if crc32(&[&kind[..], body]) != crc {
            if critical {
                return Err(ImagingError::data(ImageFormat::Png, format!("CRC mismatch in {}", name)));
            }
            log::warn!("PNG: skipping {} chunk with bad CRC", name);
            continue;
        }
        if header.is_none() && &kind != b"IHDR" {
            return Err(ImagingError::header(ImageFormat::Png, "first chunk is not IHDR"));
        }

        match &kind {
            b"IHDR" => {
                if header.is_some() {
                    return Err(ImagingError::header(ImageFormat::Png, "duplicate IHDR"));
                }
                let parsed = Header::parse(body)?;
                params.check_dimensions(parsed.width as u64, parsed.height as u64)?;
                header = Some(parsed);
            }
            b"PLTE" => {
                if body.is_empty() || body.len() % 3 != 0 || body.len() > 768 {
                    return Err(ImagingError::data(ImageFormat::Png, "PLTE length"));
                }
                chunks_palette = Some(body);
            }
            b"tRNS" => transparency = Some(body),
            b"IDAT" => idat.push(body),
            b"IEND" => break,
            b"pHYs" => {
                if body.len() == 9 && body[8] == 1 {
                    let x = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                    let y = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
                    match PixelDensity::from_pixels_per_meter(x as f64, y as f64) {
                        Ok(density) => metadata.pixel_density = Some(density),
                        Err(_) => log::warn!("PNG: ignoring zero pHYs density"),
                    }
                } else if body.len() != 9 {
                    log::warn!("PNG: malformed pHYs chunk");
                }
            }
            b"iCCP" => {
                let profile = split_nul(body).and_then(|(_, rest)| match rest.split_first() {
                    Some((0, compressed)) => zlib::decompress(ImageFormat::Png, compressed, 1 << 26).ok(),
                    _ => None,
                });
                match profile {
                    Some(profile) if !profile.is_empty() => metadata.icc_profile = Some(profile),
                    _ => log::warn!("PNG: ignoring unreadable iCCP chunk"),
                }
            }
            b"tEXt" | b"zTXt" | b"iTXt" => match parse_text(&kind, body) {
                Some((key, value)) => metadata.push_text(key, value),
                None => log::warn!("PNG: ignoring malformed {} chunk", name),
            },
            _ if critical => {
                return Err(ImagingError::feature(ImageFormat::Png, format!("critical chunk {}", name)));
            }
            _ => {}
        }
    }

    let header = header.ok_or_else(|| ImagingError::header(ImageFormat::Png, "missing IHDR"))?;
    if header.color_type == 3 && chunks_palette.is_none() {
        return Err(ImagingError::data(ImageFormat::Png, "palette image without PLTE"));
    }
    if idat.is_empty() {
        return Err(ImagingError::data(ImageFormat::Png, "no IDAT chunk"));
    }
    Ok(Chunks {
        header,
        palette: chunks_palette,
        transparency,
        idat,
        metadata,
    })
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn unfilter(filter: u8, row: &mut [u8], prev: &[u8], bpp: usize) -> Result<()> {
    match filter {
        0 => {}
        1 => {
            for i in bpp..row.len() {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        2 => {
            for (x, &p) in row.iter_mut().zip(prev) {
                *x = x.wrapping_add(p);
            }
        }
        3 => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] } else { 0 };
                row[i] = row[i].wrapping_add(((left as u16 + prev[i] as u16) / 2) as u8);
            }
        }
        4 => {
            for i in 0..row.len() {
                let (left, corner) = if i >= bpp { (row[i - bpp], prev[i - bpp]) } else { (0, 0) };
                row[i] = row[i].wrapping_add(paeth(left, prev[i], corner));
            }
        }
        other => {
            return Err(ImagingError::data(ImageFormat::Png, format!("filter type {}", other)));
        }
    }
    Ok(())
}

fn filter_row(filter: u8, row: &[u8], prev: &[u8], bpp: usize, out: &mut Vec<u8>) {
    out.push(filter);
    for i in 0..row.len() {
        let left = if i >= bpp { row[i - bpp] } else { 0 };
        let corner = if i >= bpp { prev[i - bpp] } else { 0 };
        let predicted = match filter {
            0 => 0,
            1 => left,
            2 => prev[i],
            3 => ((left as u16 + prev[i] as u16) / 2) as u8,
            _ => paeth(left, prev[i], corner),
        };
        out.push(row[i].wrapping_sub(predicted));
    }
}

/// Pixels in the stored representation, before conversion.
enum Target {
    Bitonal(Vec<u8>),
    Gray(Vec<u8>),
    Indexed(Vec<u8>),
    Rgb(Vec<u8>),
    Rgba(Vec<u8>),
}

fn to8(value: u16, depth: u8) -> u8 {
    match depth {
        16 => (value >> 8) as u8,
        8 => value as u8,
        d => expand_bits(value as u8, d),
    }
}

fn row_samples(row: &[u8], depth: u8, count: usize) -> Result<Vec<u16>> {
    if depth == 16 {
        return Ok(row
            .chunks_exact(2)
            .take(count)
            .map(|p| u16::from_be_bytes([p[0], p[1]]))
            .collect());
    }
    Ok(unpack_samples(row, depth, count)?
        .into_iter()
        .map(u16::from)
        .collect())
}

fn decode_pixels(chunks: &Chunks<'_>) -> Result<PixelRaster> {
    let h = chunks.header;
    let compressed: Vec<u8> = chunks.idat.concat();
    let expected = h.inflated_len();
    let inflated = zlib::decompress(ImageFormat::Png, &compressed, expected)?;
    if inflated.len() < expected {
        return Err(ImagingError::truncated(format!(
            "PNG image data inflated to {} of {} bytes",
            inflated.len(),
            expected
        )));
    }

    let count = h.width as usize * h.height as usize;
    let channels = h.channels();
    let trns = chunks.transparency;
    let key_gray = trns
        .filter(|t| h.color_type == 0 && t.len() >= 2)
        .map(|t| u16::from_be_bytes([t[0], t[1]]));
    let key_rgb = trns.filter(|t| h.color_type == 2 && t.len() >= 6).map(|t| {
        [
            u16::from_be_bytes([t[0], t[1]]),
            u16::from_be_bytes([t[2], t[3]]),
            u16::from_be_bytes([t[4], t[5]]),
        ]
    });

    let mut target = match h.color_type {
        0 if key_gray.is_some() => Target::Rgba(vec![0; count * 4]),
        0 if h.depth == 1 => Target::Bitonal(vec![0; count]),
        0 => Target::Gray(vec![0; count]),
        3 => Target::Indexed(vec![0; count]),
        2 if key_rgb.is_none() => Target::Rgb(vec![0; count * 3]),
        _ => Target::Rgba(vec![0; count * 4]),
    };

    let bpp = h.bits_per_pixel().div_ceil(8);
    let mut offset = 0;
    for (x0, y0, dx, dy, pw, ph) in h.passes() {
        let stride = h.row_bytes(pw);
        let mut prev = vec![0u8; stride];
        for py in 0..ph {
            let filter = inflated[offset];
            let mut row = inflated[offset + 1..offset + 1 + stride].to_vec();
            offset += 1 + stride;
            unfilter(filter, &mut row, &prev, bpp)?;
            let samples = row_samples(&row, h.depth, pw as usize * channels)?;
            let y = (y0 + py * dy) as usize;
            for px in 0..pw as usize {
                let i = y * h.width as usize + x0 as usize + px * dx as usize;
                let s = &samples[px * channels..(px + 1) * channels];
                match &mut target {
                    Target::Bitonal(out) => out[i] = s[0] as u8,
                    Target::Gray(out) => out[i] = to8(s[0], h.depth),
                    Target::Indexed(out) => out[i] = s[0] as u8,
                    Target::Rgb(out) => {
                        for c in 0..3 {
                            out[i * 3 + c] = to8(s[c], h.depth);
                        }
                    }
                    Target::Rgba(out) => {
                        let rgba = match h.color_type {
                            0 => {
                                let g = to8(s[0], h.depth);
                                let a = if Some(s[0]) == key_gray { 0 } else { 255 };
                                [g, g, g, a]
                            }
                            2 => {
                                let a = if Some([s[0], s[1], s[2]]) == key_rgb { 0 } else { 255 };
                                [to8(s[0], h.depth), to8(s[1], h.depth), to8(s[2], h.depth), a]
                            }
                            4 => {
                                let g = to8(s[0], h.depth);
                                [g, g, g, to8(s[1], h.depth)]
                            }
                            _ => [
                                to8(s[0], h.depth),
                                to8(s[1], h.depth),
                                to8(s[2], h.depth),
                                to8(s[3], h.depth),
                            ],
                        };
                        out[i * 4..i * 4 + 4].copy_from_slice(&rgba);
                    }
                }
            }
            prev = row;
        }
    }

    let (width, height) = (h.width, h.height);
    match target {
        Target::Bitonal(samples) => PixelRaster::new(width, height, Pixels::Bitonal(samples)),
        Target::Gray(samples) => PixelRaster::from_gray8(width, height, samples),
        Target::Rgb(samples) => PixelRaster::from_rgb8(width, height, samples),
        Target::Rgba(samples) => PixelRaster::from_rgba8(width, height, samples),
        Target::Indexed(indices) => {
            let plte = chunks.palette.unwrap_or_default();
            let alphas = trns.unwrap_or_default();
            let colors = plte
                .chunks_exact(3)
                .enumerate()
                .map(|(i, c)| RGBA8::new(c[0], c[1], c[2], alphas.get(i).copied().unwrap_or(255)))
                .collect();
            let palette = Palette::new(colors)?;
            if indices.iter().any(|&i| i as usize >= palette.len()) {
                return Err(ImagingError::data(ImageFormat::Png, "palette index out of range"));
            }
            PixelRaster::from_indexed(width, height, palette, indices)
        }
    }
}

fn info_from(chunks: &Chunks<'_>) -> ImageInfo {
    let h = chunks.header;
    let mut info = ImageInfo::new(ImageFormat::Png, h.width, h.height);
    info.bits_per_pixel = h.bits_per_pixel() as u16;
    info.color_type = match h.color_type {
        0 if h.depth == 1 => ColorType::BlackAndWhite,
        0 | 4 => ColorType::Grayscale,
        3 => ColorType::Indexed,
        _ => ColorType::Rgb,
    };
    info.has_transparency = matches!(h.color_type, 4 | 6) || chunks.transparency.is_some();
    info.compression = "Deflate".into();
    info.is_progressive = h.interlaced;
    info.pixel_density = chunks.metadata.pixel_density;
    info.comments = chunks
        .metadata
        .text
        .iter()
        .flatten()
        .map(|t| format!("{}: {}", t.key, t.value))
        .collect();
    info
}

fn write_chunk(out: &mut ByteWriter, kind: &[u8; 4], body: &[u8]) {
    out.u32(body.len() as u32);
    out.bytes(kind);
    out.bytes(body);
    out.u32(crc32(&[&kind[..], body]));
}

fn valid_keyword(key: &str) -> bool {
    (1..=79).contains(&key.len())
        && key.chars().all(|c| (' '..='~').contains(&c) || ('\u{A1}'..='\u{FF}').contains(&c))
}

fn text_chunk(key: &str, value: &str) -> ([u8; 4], Vec<u8>) {
    let mut body: Vec<u8> = key.chars().map(|c| c as u8).collect();
    body.push(0);
    if value.chars().all(|c| (c as u32) < 256 && c != '\0') {
        body.extend(value.chars().map(|c| c as u8));
        (*b"tEXt", body)
    } else {
        body.extend_from_slice(&[0, 0, 0, 0]);
        body.extend_from_slice(value.as_bytes());
        (*b"iTXt", body)
    }
}

impl ImageCodec for PngCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Png
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.starts_with(&SIGNATURE)
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        Ok(info_from(&parse_chunks(data, params)?))
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        Ok(parse_chunks(data, params)?.metadata)
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        let chunks = parse_chunks(data, params)?;
        let raster = decode_pixels(&chunks)?;
        log::debug!(
            "PNG decoded {}x{} color type {} depth {}{}",
            raster.width(),
            raster.height(),
            chunks.header.color_type,
            chunks.header.depth,
            if chunks.header.interlaced { " interlaced" } else { "" }
        );
        Ok(DecodedImage {
            raster,
            metadata: chunks.metadata,
        })
    }

    fn encode(&self, raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
        params.validate()?;
        params.compression_or(ImageFormat::Png, &[Compression::Deflate], Compression::Deflate)?;
        let prepared = color::prepare(ImageFormat::Png, raster, &POLICY, params)?;
        let extra = super::write_metadata(ImageFormat::Png, metadata, params)?;
        let (width, height) = prepared.dimensions();

        let mut palette_chunks = None;
        let (color_type, depth, channels, samples): (u8, u8, usize, &[u8]) =
            match prepared.pixels() {
                Pixels::Bitonal(s) => (0, 1, 1, s),
                Pixels::Grayscale(s) => (0, 8, 1, s),
                Pixels::Rgb(s) => (2, 8, 3, s),
                Pixels::Rgba(s) => (6, 8, 4, s),
                Pixels::Indexed { palette, indices } => {
                    let depth = match palette.len() {
                        0..=2 => 1,
                        3..=4 => 2,
                        5..=16 => 4,
                        _ => 8,
                    };
                    let mut plte = Vec::with_capacity(palette.len() * 3);
                    let mut trns: Vec<u8> = palette.colors().iter().map(|c| c.a).collect();
                    for c in palette.colors() {
                        plte.extend_from_slice(&[c.r, c.g, c.b]);
                    }
                    while trns.last() == Some(&255) {
                        trns.pop();
                    }
                    palette_chunks = Some((plte, trns));
                    (3, depth, 1, indices)
                }
            };

        let header = Header {
            width,
            height,
            depth,
            color_type,
            interlaced: false,
        };
        let stride = header.row_bytes(width);
        let row_pixels = width as usize * channels;
        let bpp = header.bits_per_pixel().div_ceil(8);
        let adaptive = depth == 8 && color_type != 3;

        let mut filtered = Vec::with_capacity(height as usize * (stride + 1));
        let mut prev = vec![0u8; stride];
        let mut candidate = Vec::with_capacity(stride + 1);
        for y in 0..height as usize {
            let samples_row = &samples[y * row_pixels..(y + 1) * row_pixels];
            let row = crate::io::pack_samples(samples_row, depth);
            if !adaptive {
                filter_row(0, &row, &prev, bpp, &mut filtered);
            } else {
                let mut best: Option<(u64, u8)> = None;
                for filter in 0..5u8 {
                    candidate.clear();
                    filter_row(filter, &row, &prev, bpp, &mut candidate);
                    let cost: u64 = candidate[1..].iter().map(|&b| (b as i8).unsigned_abs() as u64).sum();
                    if best.map_or(true, |(c, _)| cost < c) {
                        best = Some((cost, filter));
                    }
                }
                let filter = best.map_or(0, |(_, f)| f);
                filter_row(filter, &row, &prev, bpp, &mut filtered);
            }
            prev = row;
        }
        let compressed = zlib::compress(&filtered, params.compression_level);

        let mut out = ByteWriter::with_capacity(Endian::Big, compressed.len() + 256);
        out.bytes(&SIGNATURE);
        let mut ihdr = ByteWriter::new(Endian::Big);
        ihdr.u32(width);
        ihdr.u32(height);
        ihdr.bytes(&[depth, color_type, 0, 0, 0]);
        write_chunk(&mut out, b"IHDR", ihdr.as_slice());

        if let Some(profile) = extra.icc_profile {
            let mut body = b"ICC Profile\0\0".to_vec();
            body.extend_from_slice(&zlib::compress(profile, params.compression_level));
            write_chunk(&mut out, b"iCCP", &body);
        }
        if let Some(density) = extra.density {
            let mut body = ByteWriter::new(Endian::Big);
            body.u32(density.horizontal_ppm().round() as u32);
            body.u32(density.vertical_ppm().round() as u32);
            body.u8(1);
            write_chunk(&mut out, b"pHYs", body.as_slice());
        }
        if let Some((plte, trns)) = &palette_chunks {
            write_chunk(&mut out, b"PLTE", plte);
            if !trns.is_empty() {
                write_chunk(&mut out, b"tRNS", trns);
            }
        }
        for tag in extra.text.unwrap_or_default() {
            if !valid_keyword(&tag.key) {
                if params.strict_metadata {
                    return Err(ImagingError::MetadataUnsupported {
                        format: ImageFormat::Png,
                        field: "text key",
                    });
                }
                log::warn!("PNG: dropping text tag with invalid key {:?}", tag.key);
                continue;
            }
            let (kind, body) = text_chunk(&tag.key, &tag.value);
            write_chunk(&mut out, &kind, &body);
        }
        for part in compressed.chunks(IDAT_CHUNK_LEN) {
            write_chunk(&mut out, b"IDAT", part);
        }
        if compressed.is_empty() {
            write_chunk(&mut out, b"IDAT", &[]);
        }
        write_chunk(&mut out, b"IEND", &[]);

        log::debug!(
            "PNG encoded {}x{} as color type {} depth {} ({} bytes)",
            width,
            height,
            color_type,
            depth,
            out.len()
        );
        Ok(out.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Layout, BLACK, WHITE};

    fn decode(data: &[u8]) -> DecodedImage {
        PngCodec.decode(data, &ReadParameters::default()).unwrap()
    }

    fn gradient(width: u32, height: u32, alpha: bool) -> PixelRaster {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 7) as u8, (y * 5) as u8, (x ^ y) as u8]);
                if alpha {
                    data.push((x + y) as u8);
                }
            }
        }
        if alpha {
            PixelRaster::from_rgba8(width, height, data).unwrap()
        } else {
            PixelRaster::from_rgb8(width, height, data).unwrap()
        }
    }

    #[test]
    fn test_crc_reference() {
        assert_eq!(crc32(&[&b"IEND"[..]]), 0xAE42_6082);
    }

    #[test]
    fn test_roundtrip_layouts() {
        let params = EncodeParameters::default();
        let cases = [
            (PixelRaster::new(3, 2, Pixels::Bitonal(vec![0, 1, 1, 0, 0, 1])).unwrap(), Layout::Bitonal),
            (PixelRaster::from_gray8(3, 1, vec![0, 77, 200]).unwrap(), Layout::Grayscale),
            (PixelRaster::from_argb(2, 1, &[0xFFFF0000, 0x000000FF]).unwrap(), Layout::Indexed),
            (gradient(40, 30, false), Layout::Rgb),
            (gradient(40, 30, true), Layout::Rgba),
        ];
        for (raster, layout) in cases {
            let data = PngCodec.encode(&raster, &Metadata::default(), &params).unwrap();
            let decoded = decode(&data);
            assert_eq!(decoded.raster.layout(), layout);
            assert!(decoded.raster.same_pixels(&raster));
        }
    }

    #[test]
    fn test_metadata_roundtrip() {
        let mut metadata = Metadata::default();
        metadata.pixel_density = Some(PixelDensity::from_pixels_per_inch(75.0, 150.0).unwrap());
        metadata.icc_profile = Some(vec![1, 2, 3, 4, 5]);
        metadata.push_text("Title", "caf\u{e9}");
        metadata.push_text("Author", "\u{65e5}\u{672c}");
        let raster = PixelRaster::from_gray8(1, 1, vec![9]).unwrap();
        let data = PngCodec.encode(&raster, &metadata, &EncodeParameters::default()).unwrap();

        let read = PngCodec.read_metadata(&data, &ReadParameters::default()).unwrap();
        let density = read.pixel_density.unwrap();
        assert!((density.horizontal_dpi() - 75.0).abs() < 0.1);
        assert!((density.vertical_dpi() - 150.0).abs() < 0.1);
        assert_eq!(read.icc_profile, metadata.icc_profile);
        assert_eq!(read.text, metadata.text);
    }

    #[test]
    fn test_interlaced_sixteen_bit_decode() {
        // 3x3 16-bit gray, Adam7, every row filter 0.
        let header = Header {
            width: 3,
            height: 3,
            depth: 16,
            color_type: 0,
            interlaced: true,
        };
        let mut values = [[0u16; 3]; 3];
        for (y, row) in values.iter_mut().enumerate() {
            for (x, v) in row.iter_mut().enumerate() {
                *v = ((y * 3 + x) as u16) << 12;
            }
        }
        let mut raw = Vec::new();
        for (x0, y0, dx, dy, pw, ph) in header.passes() {
            for py in 0..ph {
                raw.push(0);
                for px in 0..pw {
                    let v = values[(y0 + py * dy) as usize][(x0 + px * dx) as usize];
                    raw.extend_from_slice(&v.to_be_bytes());
                }
            }
        }
        let mut out = ByteWriter::new(Endian::Big);
        out.bytes(&SIGNATURE);
        write_chunk(&mut out, b"IHDR", &[0, 0, 0, 3, 0, 0, 0, 3, 16, 0, 0, 0, 1]);
        write_chunk(&mut out, b"IDAT", &zlib::compress(&raw, None));
        write_chunk(&mut out, b"IEND", &[]);

        let decoded = decode(out.as_slice());
        assert_eq!(decoded.raster.layout(), Layout::Grayscale);
        for y in 0..3u32 {
            for x in 0..3u32 {
                let expected = (((y * 3 + x) << 4) & 0xFF) as u8;
                assert_eq!(decoded.raster.pixel(x, y).r, expected);
            }
        }
        let info = PngCodec.read_info(out.as_slice(), &ReadParameters::default()).unwrap();
        assert!(info.is_progressive);
        assert_eq!(info.bits_per_pixel, 16);
    }

    #[test]
    fn test_missing_iend_is_truncation() {
        let raster = PixelRaster::from_argb(1, 1, &[0xFF000000]).unwrap();
        let data = PngCodec.encode(&raster, &Metadata::default(), &EncodeParameters::default()).unwrap();
        for cut in [data.len() - 12, data.len() - 1, 20] {
            let err = PngCodec.decode(&data[..cut], &ReadParameters::default()).unwrap_err();
            assert!(err.is_truncation(), "cut at {}: {:?}", cut, err);
        }
    }

    #[test]
    fn test_bad_crc_on_critical_chunk() {
        let raster = PixelRaster::from_gray8(2, 2, vec![1, 2, 3, 4]).unwrap();
        let mut data = PngCodec.encode(&raster, &Metadata::default(), &EncodeParameters::default()).unwrap();
        data[29] ^= 0xFF;
        let err = PngCodec.decode(&data, &ReadParameters::default()).unwrap_err();
        assert!(matches!(err, ImagingError::InvalidData { .. }));
    }

    #[test]
    fn test_bitonal_pixels() {
        let raster = PixelRaster::new(9, 1, Pixels::Bitonal(vec![1, 0, 0, 0, 0, 0, 0, 0, 1])).unwrap();
        let data = PngCodec.encode(&raster, &Metadata::default(), &EncodeParameters::default()).unwrap();
        let decoded = decode(&data).raster;
        assert_eq!(decoded.pixel(0, 0), WHITE);
        assert_eq!(decoded.pixel(1, 0), BLACK);
        assert_eq!(decoded.pixel(8, 0), WHITE);
    }
}
