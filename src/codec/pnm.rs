//! Netpbm family: PBM, PGM, PPM (plain and raw) and PAM.

use crate::config::{Compression, EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::io::{pack_samples, scale_to_u8, unpack_samples};
use crate::metadata::{ColorType, ImageInfo, Metadata};
use crate::raster::{PixelRaster, Pixels};

use super::color::{self, ColorPolicy};
use super::{write_metadata, DecodedImage, ImageCodec, ImageFormat};

const MAX_MAXVAL: u32 = 65535;
const PLAIN_LINE_LEN: usize = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Model {
    BlackAndWhite,
    Grayscale,
    Rgb,
}

impl Model {
    fn channels(self) -> usize {
        match self {
            Model::BlackAndWhite | Model::Grayscale => 1,
            Model::Rgb => 3,
        }
    }
}

#[derive(Debug, Clone)]
struct Header {
    format: ImageFormat,
    plain: bool,
    width: u32,
    height: u32,
    maxval: u32,
    model: Model,
    alpha: bool,
    tuple_type: Option<String>,
    comments: Vec<String>,
    data_start: usize,
}

impl Header {
    fn depth(&self) -> usize {
        self.model.channels() + usize::from(self.alpha)
    }

    fn color_type(&self) -> ColorType {
        match self.model {
            Model::BlackAndWhite => ColorType::BlackAndWhite,
            Model::Grayscale => ColorType::Grayscale,
            Model::Rgb => ColorType::Rgb,
        }
    }

    fn bits_per_pixel(&self) -> u16 {
        let sample = if self.format == ImageFormat::Pbm {
            1
        } else if self.maxval > 255 {
            16
        } else {
            8
        };
        sample * self.depth() as u16
    }
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C)
}

/// Whitespace and comment aware scanner over a header.
struct Tokens<'a> {
    data: &'a [u8],
    pos: usize,
    format: ImageFormat,
    comments: Vec<String>,
}

impl<'a> Tokens<'a> {
    fn skip_space(&mut self) {
        while let Some(&b) = self.data.get(self.pos) {
            if b == b'#' {
                let end = self.data[self.pos..]
                    .iter()
                    .position(|&c| c == b'\n' || c == b'\r')
                    .map_or(self.data.len(), |n| self.pos + n);
                let text = String::from_utf8_lossy(&self.data[self.pos + 1..end]).trim().to_string();
                if !text.is_empty() {
                    self.comments.push(text);
                }
                self.pos = end;
            } else if is_space(b) {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn token(&mut self) -> Result<&'a [u8]> {
        self.skip_space();
        let start = self.pos;
        while self.data.get(self.pos).is_some_and(|&b| !is_space(b) && b != b'#') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(ImagingError::truncated(format!("{} header or plain data ended early", self.format)));
        }
        Ok(&self.data[start..self.pos])
    }

    fn number(&mut self, what: &str) -> Result<u32> {
        let token = self.token()?;
        std::str::from_utf8(token)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| {
                ImagingError::header(
                    self.format,
                    format!("{} is not a number: {:?}", what, String::from_utf8_lossy(token)),
                )
            })
    }

    /// Plain data ends with whitespace after its last value.
    fn finish(&self) -> Result<()> {
        match self.data.get(self.pos) {
            Some(&b) if is_space(b) || b == b'#' => Ok(()),
            _ => Err(ImagingError::truncated(format!("{} plain data is not terminated", self.format))),
        }
    }

    /// Next plain PBM digit; digits need not be separated.
    fn bit(&mut self) -> Result<u8> {
        self.skip_space();
        match self.data.get(self.pos) {
            Some(&b @ (b'0' | b'1')) => {
                self.pos += 1;
                Ok(b - b'0')
            }
            Some(&b) => Err(ImagingError::data(self.format, format!("unexpected byte {:#04x} in plain bitmap", b))),
            None => Err(ImagingError::truncated("plain PBM data ended early")),
        }
    }
}

fn magic_format(magic: &[u8]) -> Option<(ImageFormat, bool)> {
    Some(match magic {
        b"P1" => (ImageFormat::Pbm, true),
        b"P4" => (ImageFormat::Pbm, false),
        b"P2" => (ImageFormat::Pgm, true),
        b"P5" => (ImageFormat::Pgm, false),
        b"P3" => (ImageFormat::Ppm, true),
        b"P6" => (ImageFormat::Ppm, false),
        b"P7" => (ImageFormat::Pam, false),
        _ => return None,
    })
}

fn check_size(header: &Header, params: &ReadParameters) -> Result<()> {
    if header.width == 0 || header.height == 0 {
        return Err(ImagingError::InvalidDimensions {
            width: header.width as u64,
            height: header.height as u64,
        });
    }
    if header.maxval == 0 || header.maxval > MAX_MAXVAL {
        return Err(ImagingError::header(header.format, format!("maxval {}", header.maxval)));
    }
    params.check_dimensions(header.width as u64, header.height as u64)
}

fn parse_pam(tokens: &mut Tokens<'_>) -> Result<Header> {
    let (mut width, mut height, mut depth, mut maxval) = (None, None, None, None);
    let mut tuple_type: Option<String> = None;
    loop {
        let key = tokens.token()?;
        match key {
            b"ENDHDR" => break,
            b"WIDTH" => width = Some(tokens.number("WIDTH")?),
            b"HEIGHT" => height = Some(tokens.number("HEIGHT")?),
            b"DEPTH" => depth = Some(tokens.number("DEPTH")?),
            b"MAXVAL" => maxval = Some(tokens.number("MAXVAL")?),
            b"TUPLTYPE" => {
                let value = String::from_utf8_lossy(tokens.token()?).into_owned();
                tuple_type = Some(match tuple_type {
                    Some(prev) => format!("{} {}", prev, value),
                    None => value,
                });
            }
            other => {
                return Err(ImagingError::header(
                    ImageFormat::Pam,
                    format!("unknown header line {:?}", String::from_utf8_lossy(other)),
                ))
            }
        }
    }
    // ENDHDR is followed by exactly one newline.
    tokens.pos += 1;
    let missing = |what: &str| ImagingError::header(ImageFormat::Pam, format!("missing {}", what));
    let width = width.ok_or_else(|| missing("WIDTH"))?;
    let height = height.ok_or_else(|| missing("HEIGHT"))?;
    let depth = depth.ok_or_else(|| missing("DEPTH"))? as usize;
    let maxval = maxval.ok_or_else(|| missing("MAXVAL"))?;

    let (model, alpha) = match tuple_type.as_deref() {
        Some("BLACKANDWHITE") => (Model::BlackAndWhite, false),
        Some("BLACKANDWHITE_ALPHA") => (Model::BlackAndWhite, true),
        Some("GRAYSCALE") => (Model::Grayscale, false),
        Some("GRAYSCALE_ALPHA") => (Model::Grayscale, true),
        Some("RGB") => (Model::Rgb, false),
        Some("RGB_ALPHA") => (Model::Rgb, true),
        _ => match depth {
            1 => (Model::Grayscale, false),
            2 => (Model::Grayscale, true),
            3 => (Model::Rgb, false),
            4 => (Model::Rgb, true),
            n => return Err(ImagingError::feature(ImageFormat::Pam, format!("{} channels of {:?}", n, tuple_type))),
        },
    };
    if model.channels() + usize::from(alpha) != depth {
        return Err(ImagingError::header(
            ImageFormat::Pam,
            format!("DEPTH {} does not fit TUPLTYPE {:?}", depth, tuple_type),
        ));
    }
    if model == Model::BlackAndWhite && maxval != 1 {
        return Err(ImagingError::header(ImageFormat::Pam, "BLACKANDWHITE needs MAXVAL 1"));
    }
    Ok(Header {
        format: ImageFormat::Pam,
        plain: false,
        width,
        height,
        maxval,
        model,
        alpha,
        tuple_type,
        comments: std::mem::take(&mut tokens.comments),
        data_start: tokens.pos,
    })
}

fn parse(data: &[u8], params: &ReadParameters) -> Result<Header> {
    let magic = data.get(..2).ok_or_else(|| ImagingError::truncated("Netpbm magic number"))?;
    let (format, plain) = magic_format(magic)
        .ok_or_else(|| ImagingError::header(ImageFormat::Ppm, "not a Netpbm magic number"))?;
    if params.image_index != 0 {
        return Err(ImagingError::InvalidParameter(format!(
            "{} holds one image, index {} requested",
            format, params.image_index
        )));
    }
    let mut tokens = Tokens {
        data,
        pos: 2,
        format,
        comments: Vec::new(),
    };
    let header = if format == ImageFormat::Pam {
        parse_pam(&mut tokens)?
    } else {
        let width = tokens.number("width")?;
        let height = tokens.number("height")?;
        let maxval = if format == ImageFormat::Pbm { 1 } else { tokens.number("maxval")? };
        if !plain {
            // Exactly one whitespace byte separates the header from raw data.
            tokens.pos += 1;
        }
        Header {
            format,
            plain,
            width,
            height,
            maxval,
            model: match format {
                ImageFormat::Pbm => Model::BlackAndWhite,
                ImageFormat::Pgm => Model::Grayscale,
                _ => Model::Rgb,
            },
            alpha: false,
            tuple_type: None,
            comments: tokens.comments,
            data_start: tokens.pos,
        }
    };
    check_size(&header, params)?;
    Ok(header)
}

/// Read every sample scaled to 8 bits, interleaved.
fn samples(data: &[u8], header: &Header) -> Result<Vec<u8>> {
    let count = header.width as usize * header.height as usize * header.depth();
    let maxval = header.maxval;
    let check = |v: u32| {
        if v > maxval {
            Err(ImagingError::data(header.format, format!("sample {} exceeds maxval {}", v, maxval)))
        } else {
            Ok(scale_to_u8(v, maxval))
        }
    };
    let mut out = Vec::with_capacity(count);
    if header.plain {
        let mut tokens = Tokens {
            data,
            pos: header.data_start,
            format: header.format,
            comments: Vec::new(),
        };
        for _ in 0..count {
            out.push(check(tokens.number("sample")?)?);
        }
        tokens.finish()?;
        return Ok(out);
    }
    let wide = maxval > 255;
    let len = if wide { count * 2 } else { count };
    let raw = data
        .get(header.data_start..)
        .and_then(|d| d.get(..len))
        .ok_or_else(|| ImagingError::truncated(format!("{} raster needs {} bytes", header.format, len)))?;
    if wide {
        for s in raw.chunks_exact(2) {
            out.push(check(u16::from_be_bytes([s[0], s[1]]) as u32)?);
        }
    } else {
        for &s in raw {
            out.push(check(s as u32)?);
        }
    }
    Ok(out)
}

/// PBM bits, 1 meaning black.
fn pbm_bits(data: &[u8], header: &Header) -> Result<Vec<u8>> {
    let (w, h) = (header.width as usize, header.height as usize);
    let mut bits = Vec::with_capacity(w * h);
    if header.plain {
        let mut tokens = Tokens {
            data,
            pos: header.data_start,
            format: header.format,
            comments: Vec::new(),
        };
        for _ in 0..w * h {
            bits.push(tokens.bit()?);
        }
        tokens.finish()?;
    } else {
        let row_bytes = w.div_ceil(8);
        let raw = data
            .get(header.data_start..)
            .and_then(|d| d.get(..row_bytes * h))
            .ok_or_else(|| ImagingError::truncated(format!("PBM raster needs {} bytes", row_bytes * h)))?;
        for row in raw.chunks_exact(row_bytes) {
            bits.extend(unpack_samples(row, 1, w)?);
        }
    }
    Ok(bits)
}

fn decode_raster(data: &[u8], header: &Header) -> Result<PixelRaster> {
    let (w, h) = (header.width, header.height);
    if header.format == ImageFormat::Pbm {
        let bits = pbm_bits(data, header)?;
        return PixelRaster::new(w, h, Pixels::Bitonal(bits.into_iter().map(|b| b ^ 1).collect()));
    }
    let s = samples(data, header)?;
    match (header.model, header.alpha) {
        (Model::BlackAndWhite, false) => PixelRaster::new(w, h, Pixels::Bitonal(s.into_iter().map(|v| u8::from(v != 0)).collect())),
        (Model::Grayscale, false) => PixelRaster::from_gray8(w, h, s),
        (Model::Rgb, false) => PixelRaster::from_rgb8(w, h, s),
        (Model::Rgb, true) => PixelRaster::from_rgba8(w, h, s),
        (_, true) => {
            let rgba = s.chunks_exact(2).flat_map(|p| [p[0], p[0], p[0], p[1]]).collect();
            PixelRaster::from_rgba8(w, h, rgba)
        }
    }
}

fn read_info(data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
    let header = parse(data, params)?;
    let mut info = ImageInfo::new(header.format, header.width, header.height);
    info.bits_per_pixel = header.bits_per_pixel();
    info.color_type = header.color_type();
    info.has_transparency = header.alpha;
    info.compression = if header.plain { "Plain" } else { "None" }.into();
    info.comments = header.comments;
    Ok(info)
}

fn decode(data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
    let header = parse(data, params)?;
    let raster = decode_raster(data, &header)?;
    log::debug!(
        "{}: decoded {}x{} {} maxval {}{}",
        header.format,
        header.width,
        header.height,
        if header.plain { "plain" } else { "raw" },
        header.maxval,
        header.tuple_type.as_deref().map(|t| format!(" {}", t)).unwrap_or_default()
    );
    Ok(DecodedImage {
        raster,
        metadata: Metadata::default(),
    })
}

/// Append numbers as plain text lines no longer than 70 characters.
fn write_plain<I: IntoIterator<Item = u32>>(out: &mut Vec<u8>, values: I, separator: bool) {
    let mut line_len = 0;
    for v in values {
        let text = v.to_string();
        let extra = usize::from(separator && line_len > 0);
        if line_len + extra + text.len() > PLAIN_LINE_LEN {
            out.push(b'\n');
            line_len = 0;
        } else if extra == 1 {
            out.push(b' ');
            line_len += 1;
        }
        out.extend_from_slice(text.as_bytes());
        line_len += text.len();
    }
    out.push(b'\n');
}

fn encode(
    format: ImageFormat,
    policy: &ColorPolicy,
    raster: &PixelRaster,
    metadata: &Metadata,
    params: &EncodeParameters,
) -> Result<Vec<u8>> {
    params.validate()?;
    params.compression_or(format, &[Compression::None], Compression::None)?;
    let prepared = color::prepare(format, raster, policy, params)?;
    write_metadata(format, metadata, params)?;
    let (w, h) = prepared.dimensions();
    let plain = params.plain_text && format != ImageFormat::Pam;
    if params.plain_text && !plain {
        log::debug!("PAM has no plain form, writing raw");
    }
    let mut out = Vec::new();

    match (format, prepared.pixels()) {
        (ImageFormat::Pbm, Pixels::Bitonal(bits)) => {
            let black = bits.iter().map(|&b| b ^ 1);
            out.extend_from_slice(format!("{}\n{} {}\n", if plain { "P1" } else { "P4" }, w, h).as_bytes());
            if plain {
                write_plain(&mut out, black.map(u32::from), false);
            } else {
                let black: Vec<u8> = black.collect();
                for row in black.chunks_exact(w as usize) {
                    out.extend(pack_samples(row, 1));
                }
            }
        }
        (ImageFormat::Pam, pixels) => {
            let (depth, tuple, samples): (usize, &str, Vec<u8>) = match pixels {
                Pixels::Bitonal(bits) => (1, "BLACKANDWHITE", bits.clone()),
                Pixels::Grayscale(g) => (1, "GRAYSCALE", g.clone()),
                Pixels::Rgb(rgb) => (3, "RGB", rgb.clone()),
                Pixels::Rgba(rgba) => (4, "RGB_ALPHA", rgba.clone()),
                other => return Err(color::unexpected_layout(format, other.layout())),
            };
            let maxval = if tuple == "BLACKANDWHITE" { 1 } else { 255 };
            out.extend_from_slice(
                format!(
                    "P7\nWIDTH {}\nHEIGHT {}\nDEPTH {}\nMAXVAL {}\nTUPLTYPE {}\nENDHDR\n",
                    w, h, depth, maxval, tuple
                )
                .as_bytes(),
            );
            out.extend_from_slice(&samples);
        }
        (ImageFormat::Pgm | ImageFormat::Ppm, Pixels::Grayscale(s) | Pixels::Rgb(s)) => {
            let magic = match (format, plain) {
                (ImageFormat::Pgm, true) => "P2",
                (ImageFormat::Pgm, false) => "P5",
                (_, true) => "P3",
                (_, false) => "P6",
            };
            out.extend_from_slice(format!("{}\n{} {}\n255\n", magic, w, h).as_bytes());
            if plain {
                write_plain(&mut out, s.iter().map(|&v| v as u32), true);
            } else {
                out.extend_from_slice(s);
            }
        }
        (_, other) => return Err(color::unexpected_layout(format, other.layout())),
    }
    log::debug!("{}: encoded {}x{} {:?}{}", format, w, h, prepared.layout(), if plain { " as plain text" } else { "" });
    Ok(out)
}

fn magic_matches(prefix: &[u8], magics: &[&[u8]]) -> bool {
    prefix.len() >= 3 && magics.contains(&&prefix[..2]) && is_space(prefix[2])
}

macro_rules! netpbm_codec {
    ($(#[$doc:meta])* $name:ident, $format:expr, [$($magic:expr),+], $policy:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl ImageCodec for $name {
            fn format(&self) -> ImageFormat {
                $format
            }

            fn matches(&self, prefix: &[u8]) -> bool {
                magic_matches(prefix, &[$(&$magic[..]),+])
            }

            fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
                read_info(data, params)
            }

            fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
                parse(data, params)?;
                Ok(Metadata::default())
            }

            fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
                decode(data, params)
            }

            fn encode(&self, raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
                encode($format, &$policy, raster, metadata, params)
            }
        }
    };
}

const fn policy(bitonal: bool, grayscale: bool, rgb: bool, rgba: bool) -> ColorPolicy {
    ColorPolicy {
        bitonal,
        grayscale,
        indexed: None,
        rgb,
        rgba,
    }
}

netpbm_codec!(
    /// Portable bitmap (`P1`, `P4`).
    PbmCodec, ImageFormat::Pbm, [b"P1", b"P4"], policy(true, false, false, false)
);
netpbm_codec!(
    /// Portable graymap (`P2`, `P5`).
    PgmCodec, ImageFormat::Pgm, [b"P2", b"P5"], policy(false, true, false, false)
);
netpbm_codec!(
    /// Portable pixmap (`P3`, `P6`).
    PpmCodec, ImageFormat::Ppm, [b"P3", b"P6"], policy(false, false, true, false)
);
netpbm_codec!(
    /// Portable arbitrary map (`P7`).
    PamCodec, ImageFormat::Pam, [b"P7"], policy(true, true, true, true)
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColorMode;
    use crate::raster::{Layout, RGBA8};

    fn decode_bytes(data: &[u8]) -> PixelRaster {
        decode(data, &ReadParameters::default()).unwrap().raster
    }

    #[test]
    fn test_plain_formats_with_comments() {
        let pbm = decode_bytes(b"P1\n# a comment\n3 2\n101\n0 1 0\n");
        assert_eq!(pbm.pixels(), &Pixels::Bitonal(vec![0, 1, 0, 1, 0, 1]));

        let pgm = decode_bytes(b"P2 2 1 # inline\n 15\n0 15\n");
        assert_eq!(pgm.pixels(), &Pixels::Grayscale(vec![0, 255]));

        let info = read_info(b"P3\n#first\n#second\n1 1\n255\n1 2 3\n", &ReadParameters::default()).unwrap();
        assert_eq!(info.comments, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(info.format, ImageFormat::Ppm);
    }

    #[test]
    fn test_sixteen_bit_raw() {
        let mut data = b"P5\n2 1\n65535\n".to_vec();
        data.extend_from_slice(&[0xFF, 0xFF, 0x80, 0x00]);
        let raster = decode_bytes(&data);
        assert_eq!(raster.pixels(), &Pixels::Grayscale(vec![255, 128]));
        assert_eq!(read_info(&data, &ReadParameters::default()).unwrap().bits_per_pixel, 16);
    }

    #[test]
    fn test_sample_above_maxval() {
        let err = decode(b"P2\n1 1\n10\n11\n", &ReadParameters::default()).unwrap_err();
        assert!(matches!(err, ImagingError::InvalidData { .. }));
    }

    #[test]
    fn test_pam_tuple_types() {
        let data = b"P7\nWIDTH 2\nHEIGHT 1\nDEPTH 2\nMAXVAL 255\nTUPLTYPE GRAYSCALE_ALPHA\nENDHDR\n\x10\x00\x20\xFF";
        let raster = decode_bytes(data);
        assert_eq!(raster.pixel(0, 0), RGBA8::new(16, 16, 16, 0));
        assert_eq!(raster.pixel(1, 0), RGBA8::new(32, 32, 32, 255));

        let data = b"P7\nWIDTH 2\nHEIGHT 1\nDEPTH 1\nMAXVAL 1\nTUPLTYPE BLACKANDWHITE\nENDHDR\n\x00\x01";
        assert_eq!(decode_bytes(data).pixels(), &Pixels::Bitonal(vec![0, 1]));

        let err = decode(b"P7\nWIDTH 1\nHEIGHT 1\nDEPTH 3\nMAXVAL 255\nTUPLTYPE GRAYSCALE\nENDHDR\n", &ReadParameters::default()).unwrap_err();
        assert!(matches!(err, ImagingError::InvalidHeader { .. }));
    }

    #[test]
    fn test_roundtrip_plain_and_raw() {
        let bitonal = PixelRaster::new(10, 3, Pixels::Bitonal((0..30).map(|i| (i % 7 == 0) as u8).collect())).unwrap();
        let gray = PixelRaster::from_gray8(4, 2, (0..8).map(|i| i * 30).collect()).unwrap();
        let rgb = PixelRaster::from_rgb8(3, 3, (0..27).map(|i| i * 9).collect()).unwrap();
        let rgba = PixelRaster::from_argb(2, 1, &[0x80112233, 0xFF445566]).unwrap();
        for plain in [false, true] {
            let params = EncodeParameters {
                plain_text: plain,
                ..Default::default()
            };
            let cases: [(&dyn ImageCodec, &PixelRaster); 4] =
                [(&PbmCodec, &bitonal), (&PgmCodec, &gray), (&PpmCodec, &rgb), (&PamCodec, &rgba)];
            for (codec, raster) in cases {
                let data = codec.encode(raster, &Metadata::default(), &params).unwrap();
                assert!(codec.matches(&data), "{}", codec.format());
                let decoded = codec.decode(&data, &ReadParameters::default()).unwrap().raster;
                assert!(decoded.same_pixels(raster), "{} plain={}", codec.format(), plain);
            }
        }
    }

    #[test]
    fn test_plain_lines_are_short() {
        let gray = PixelRaster::from_gray8(100, 1, vec![255; 100]).unwrap();
        let params = EncodeParameters {
            plain_text: true,
            ..Default::default()
        };
        let data = PgmCodec.encode(&gray, &Metadata::default(), &params).unwrap();
        assert!(data.split(|&b| b == b'\n').all(|line| line.len() <= 70));
    }

    #[test]
    fn test_color_needs_opt_in() {
        let rgb = PixelRaster::from_rgb8(1, 1, vec![200, 10, 10]).unwrap();
        let err = PbmCodec.encode(&rgb, &Metadata::default(), &EncodeParameters::default()).unwrap_err();
        assert!(matches!(err, ImagingError::UnsupportedColorMode { .. }));
        let data = PgmCodec.encode(&rgb, &Metadata::default(), &EncodeParameters::lossy()).unwrap();
        assert_eq!(decode_bytes(&data).layout(), Layout::Grayscale);
        let params = EncodeParameters::default().with_color_mode(ColorMode::Bitonal);
        let data = PbmCodec.encode(&rgb, &Metadata::default(), &params).unwrap();
        assert_eq!(decode_bytes(&data).layout(), Layout::Bitonal);
    }

    #[test]
    fn test_truncated_raster() {
        let err = decode(b"P6\n2 2\n255\n\x01\x02\x03", &ReadParameters::default()).unwrap_err();
        assert!(err.is_truncation());
        let err = decode(b"P1\n2 2\n1 0 1", &ReadParameters::default()).unwrap_err();
        assert!(err.is_truncation());
        let err = decode(b"P2\n2", &ReadParameters::default()).unwrap_err();
        assert!(err.is_truncation());
        // A cut inside the last sample would otherwise read as a smaller value.
        let err = decode(b"P2\n1 1\n255\n25", &ReadParameters::default()).unwrap_err();
        assert!(err.is_truncation());
        let err = decode(b"P1\n2 1\n01", &ReadParameters::default()).unwrap_err();
        assert!(err.is_truncation());
        assert!(decode(b"P1\n2 1\n01\n", &ReadParameters::default()).is_ok());
    }
}
