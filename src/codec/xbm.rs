//! X BitMap: C source with `#define` dimensions and a hex byte array.

use crate::config::{Compression, EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::io::closes_c_array;
use crate::metadata::{ColorType, ImageInfo, Metadata};
use crate::raster::{PixelRaster, Pixels};

use super::color::{self, ColorPolicy};
use super::{write_metadata, DecodedImage, ImageCodec, ImageFormat};

const IMAGE_NAME: &str = "image";
const VALUES_PER_LINE: usize = 12;

const POLICY: ColorPolicy = ColorPolicy {
    bitonal: true,
    grayscale: false,
    indexed: None,
    rgb: false,
    rgba: false,
};

#[derive(Debug)]
struct Header {
    name: String,
    width: u32,
    height: u32,
    hotspot: Option<(u32, u32)>,
    /// X10 bitmaps store 16-bit shorts.
    short_words: bool,
    /// Byte offset of the opening brace.
    array_start: usize,
}

fn parse_number(token: &str) -> Option<u32> {
    let token = token.trim();
    match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

fn parse(data: &[u8], params: &ReadParameters) -> Result<Header> {
    let text = std::str::from_utf8(data).map_err(|_| ImagingError::header(ImageFormat::Xbm, "not ASCII text"))?;
    let (mut width, mut height, mut x_hot, mut y_hot) = (None, None, None, None);
    let mut name = None;
    let mut offset = 0;
    let mut array = None;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("#define") {
            let mut parts = rest.split_whitespace();
            if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
                let value = parse_number(value);
                if let Some(base) = key.strip_suffix("_width") {
                    width = value;
                    name = Some(base.to_string());
                } else if key.ends_with("_height") {
                    height = value;
                } else if key.ends_with("_x_hot") {
                    x_hot = value;
                } else if key.ends_with("_y_hot") {
                    y_hot = value;
                }
            }
        } else if trimmed.starts_with("static") && trimmed.contains("_bits") {
            // The brace may sit on a following line.
            let brace = text[offset..].find('{').map(|b| offset + b);
            array = Some((trimmed.contains("short"), brace));
            break;
        }
        offset += line.len();
    }
    let (width, height) = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        _ => return Err(ImagingError::header(ImageFormat::Xbm, "missing width or height #define")),
    };
    let (short_words, array_start) = match array {
        Some((short, Some(start))) => (short, start),
        Some((_, None)) => return Err(ImagingError::truncated("XBM bits array has no opening brace")),
        None => return Err(ImagingError::truncated("XBM bits array is missing")),
    };
    if width == 0 || height == 0 {
        return Err(ImagingError::InvalidDimensions {
            width: width as u64,
            height: height as u64,
        });
    }
    params.check_dimensions(width as u64, height as u64)?;
    if params.image_index != 0 {
        return Err(ImagingError::InvalidParameter(format!(
            "XBM holds one image, index {} requested",
            params.image_index
        )));
    }
    Ok(Header {
        name: name.unwrap_or_default(),
        width,
        height,
        hotspot: x_hot.zip(y_hot),
        short_words,
        array_start,
    })
}

fn decode_bits(data: &[u8], header: &Header) -> Result<Vec<u8>> {
    let body = std::str::from_utf8(&data[header.array_start + 1..])
        .map_err(|_| ImagingError::data(ImageFormat::Xbm, "bits array is not ASCII"))?;
    let end = body.find('}').ok_or_else(|| ImagingError::truncated("XBM bits array has no closing brace"))?;
    if !closes_c_array(&body[end + 1..]) {
        return Err(ImagingError::truncated("XBM bits array is not terminated"));
    }
    let (w, h) = (header.width as usize, header.height as usize);
    let word_bits = if header.short_words { 16 } else { 8 };
    let words_per_row = w.div_ceil(word_bits);
    let needed = words_per_row * h;

    let mut words = Vec::with_capacity(needed);
    for token in body[..end].split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let value = parse_number(token)
            .ok_or_else(|| ImagingError::data(ImageFormat::Xbm, format!("bad value {:?} in bits array", token)))?;
        words.push(value);
    }
    if words.len() < needed {
        return Err(ImagingError::truncated(format!(
            "XBM bits array holds {} of {} values",
            words.len(),
            needed
        )));
    }

    // Least significant bit first; a set bit is black.
    let mut bits = Vec::with_capacity(w * h);
    for row in words.chunks_exact(words_per_row).take(h) {
        for x in 0..w {
            let word = row[x / word_bits];
            bits.push(u8::from((word >> (x % word_bits)) & 1 == 0));
        }
    }
    Ok(bits)
}

/// X BitMap codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct XbmCodec;

impl ImageCodec for XbmCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Xbm
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        let start = prefix.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(prefix.len());
        prefix[start..].starts_with(b"#define")
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        let header = parse(data, params)?;
        let mut info = ImageInfo::new(ImageFormat::Xbm, header.width, header.height);
        info.bits_per_pixel = 1;
        info.color_type = ColorType::BlackAndWhite;
        if !header.name.is_empty() {
            info.comments.push(header.name.clone());
        }
        if let Some((x, y)) = header.hotspot {
            info.comments.push(format!("hotspot {} {}", x, y));
        }
        Ok(info)
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        parse(data, params)?;
        Ok(Metadata::default())
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        let header = parse(data, params)?;
        let bits = decode_bits(data, &header)?;
        log::debug!(
            "XBM decoded {:?} {}x{}{}",
            header.name,
            header.width,
            header.height,
            if header.short_words { " (X10)" } else { "" }
        );
        Ok(DecodedImage {
            raster: PixelRaster::new(header.width, header.height, Pixels::Bitonal(bits))?,
            metadata: Metadata::default(),
        })
    }

    fn encode(&self, raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
        params.validate()?;
        params.compression_or(ImageFormat::Xbm, &[Compression::None], Compression::None)?;
        let prepared = color::prepare(ImageFormat::Xbm, raster, &POLICY, params)?;
        write_metadata(ImageFormat::Xbm, metadata, params)?;
        let Pixels::Bitonal(bits) = prepared.pixels() else {
            return Err(color::unexpected_layout(ImageFormat::Xbm, prepared.layout()));
        };
        let (w, h) = prepared.dimensions();
        let mut values = Vec::with_capacity((w as usize).div_ceil(8) * h as usize);
        for row in bits.chunks_exact(w as usize) {
            for chunk in row.chunks(8) {
                let byte = chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |acc, (i, &white)| acc | (u8::from(white == 0) << i));
                values.push(format!("0x{:02x}", byte));
            }
        }
        let mut text = format!(
            "#define {name}_width {}\n#define {name}_height {}\nstatic unsigned char {name}_bits[] = {{\n",
            w,
            h,
            name = IMAGE_NAME
        );
        let lines: Vec<String> = values.chunks(VALUES_PER_LINE).map(|c| format!("   {}", c.join(", "))).collect();
        text.push_str(&lines.join(",\n"));
        text.push_str(" };\n");
        log::debug!("XBM encoded {}x{}", w, h);
        Ok(text.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "#define arrow_width 10\n#define arrow_height 2\n#define arrow_x_hot 1\n#define arrow_y_hot 0\nstatic char arrow_bits[] = {\n 0x01, 0x02,\n 0xff, 0x03 };\n";

    #[test]
    fn test_decode_lsb_first() {
        let decoded = XbmCodec.decode(SAMPLE.as_bytes(), &ReadParameters::default()).unwrap().raster;
        let Pixels::Bitonal(bits) = decoded.pixels() else {
            panic!("expected bitonal");
        };
        assert_eq!(&bits[..10], &[0, 1, 1, 1, 1, 1, 1, 1, 1, 0]);
        assert!(bits[10..].iter().all(|&b| b == 0));
        let info = XbmCodec.read_info(SAMPLE.as_bytes(), &ReadParameters::default()).unwrap();
        assert_eq!(info.comments, vec!["arrow".to_string(), "hotspot 1 0".to_string()]);
    }

    #[test]
    fn test_x10_shorts() {
        let text = "#define old_width 17\n#define old_height 1\nstatic short old_bits[] = {\n 0x8001, 0x0001 };\n";
        let decoded = XbmCodec.decode(text.as_bytes(), &ReadParameters::default()).unwrap().raster;
        let Pixels::Bitonal(bits) = decoded.pixels() else {
            panic!("expected bitonal");
        };
        assert_eq!(bits[0], 0);
        assert_eq!(bits[15], 0);
        assert_eq!(bits[16], 0);
        assert!(bits[1..15].iter().all(|&b| b == 1));
    }

    #[test]
    fn test_roundtrip() {
        let raster = PixelRaster::new(13, 3, Pixels::Bitonal((0..39).map(|i| (i % 3 != 0) as u8).collect())).unwrap();
        let data = XbmCodec.encode(&raster, &Metadata::default(), &EncodeParameters::default()).unwrap();
        assert!(XbmCodec.matches(&data));
        let decoded = XbmCodec.decode(&data, &ReadParameters::default()).unwrap().raster;
        assert!(decoded.same_pixels(&raster));
    }

    #[test]
    fn test_truncated_array() {
        let cut = &SAMPLE[..SAMPLE.len() - 5];
        assert!(XbmCodec.decode(cut.as_bytes(), &ReadParameters::default()).unwrap_err().is_truncation());
        let missing = "#define a_width 8\n#define a_height 2\nstatic char a_bits[] = { 0x00 };\n";
        assert!(XbmCodec.decode(missing.as_bytes(), &ReadParameters::default()).unwrap_err().is_truncation());
        for tail in 1..=3 {
            let cut = &SAMPLE[..SAMPLE.len() - tail];
            let err = XbmCodec.decode(cut.as_bytes(), &ReadParameters::default()).unwrap_err();
            assert!(err.is_truncation(), "{:?}", cut);
        }
    }
}
