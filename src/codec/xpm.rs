//! X PixMap (XPM3): a C array of strings holding a color table and one
//! string per pixel row.

use crate::config::{Compression, EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::io::closes_c_array;
use crate::metadata::{ColorType, ImageInfo, Metadata};
use crate::raster::{Palette, PixelRaster, Pixels, RGBA8};

use super::color::{self, ColorPolicy, IndexedSupport};
use super::{write_metadata, AlphaSupport, DecodedImage, ImageCodec, ImageFormat};

const SIGNATURE: &[u8] = b"/* XPM */";
const IMAGE_NAME: &str = "image";

/// Characters used for generated pixel keys.
const KEY_CHARS: &[u8] = b" .XoO+@#$%&*=-;:>,<1234567890qwertyuipasdfghjklzxcvbnmMNBVCZASDFGHJKLPIUYTREWQ!~^/()_`'][{}|";

const POLICY: ColorPolicy = ColorPolicy {
    bitonal: false,
    grayscale: false,
    indexed: Some(IndexedSupport {
        max_colors: 256,
        alpha: AlphaSupport::SingleTransparent,
    }),
    rgb: false,
    rgba: false,
};

/// Common X11 color names, lowercase without spaces, sorted for binary search.
static NAMED_COLORS: &[(&str, [u8; 3])] = &[
    ("aqua", [0, 255, 255]),
    ("beige", [245, 245, 220]),
    ("black", [0, 0, 0]),
    ("blue", [0, 0, 255]),
    ("brown", [165, 42, 42]),
    ("coral", [255, 127, 80]),
    ("cyan", [0, 255, 255]),
    ("darkblue", [0, 0, 139]),
    ("darkcyan", [0, 139, 139]),
    ("darkgray", [169, 169, 169]),
    ("darkgreen", [0, 100, 0]),
    ("darkgrey", [169, 169, 169]),
    ("darkmagenta", [139, 0, 139]),
    ("darkorange", [255, 140, 0]),
    ("darkred", [139, 0, 0]),
    ("dimgray", [105, 105, 105]),
    ("dimgrey", [105, 105, 105]),
    ("fuchsia", [255, 0, 255]),
    ("gold", [255, 215, 0]),
    ("gray", [190, 190, 190]),
    ("green", [0, 255, 0]),
    ("grey", [190, 190, 190]),
    ("indigo", [75, 0, 130]),
    ("ivory", [255, 255, 240]),
    ("khaki", [240, 230, 140]),
    ("lavender", [230, 230, 250]),
    ("lightblue", [173, 216, 230]),
    ("lightcyan", [224, 255, 255]),
    ("lightgray", [211, 211, 211]),
    ("lightgreen", [144, 238, 144]),
    ("lightgrey", [211, 211, 211]),
    ("lightyellow", [255, 255, 224]),
    ("lime", [0, 255, 0]),
    ("magenta", [255, 0, 255]),
    ("maroon", [176, 48, 96]),
    ("navy", [0, 0, 128]),
    ("navyblue", [0, 0, 128]),
    ("olive", [128, 128, 0]),
    ("orange", [255, 165, 0]),
    ("pink", [255, 192, 203]),
    ("purple", [160, 32, 240]),
    ("red", [255, 0, 0]),
    ("salmon", [250, 128, 114]),
    ("silver", [192, 192, 192]),
    ("skyblue", [135, 206, 235]),
    ("tan", [210, 180, 140]),
    ("teal", [0, 128, 128]),
    ("turquoise", [64, 224, 208]),
    ("violet", [238, 130, 238]),
    ("wheat", [245, 222, 179]),
    ("white", [255, 255, 255]),
    ("yellow", [255, 255, 0]),
];

fn parse_color(value: &str) -> Option<RGBA8> {
    if value.eq_ignore_ascii_case("none") {
        return Some(RGBA8::new(0, 0, 0, 0));
    }
    if let Some(hex) = value.strip_prefix('#') {
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let digits = match hex.len() {
            3 | 6 | 9 | 12 => hex.len() / 3,
            _ => return None,
        };
        let channel = |i: usize| {
            let part = &hex[i * digits..(i + 1) * digits];
            let v = u32::from_str_radix(part, 16).ok()?;
            // Keep the most significant byte; single digits repeat.
            Some(match digits {
                1 => (v * 17) as u8,
                2 => v as u8,
                n => (v >> ((n - 2) * 4)) as u8,
            })
        };
        return Some(RGBA8::new(channel(0)?, channel(1)?, channel(2)?, 255));
    }
    let key: String = value.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_ascii_lowercase();
    if let Some(level) = key.strip_prefix("gray").or_else(|| key.strip_prefix("grey")) {
        if let Ok(percent) = level.parse::<u32>() {
            if percent <= 100 {
                let v = ((percent * 255 + 50) / 100) as u8;
                return Some(RGBA8::new(v, v, v, 255));
            }
        }
    }
    NAMED_COLORS
        .binary_search_by(|(name, _)| name.cmp(&key.as_str()))
        .ok()
        .map(|i| {
            let [r, g, b] = NAMED_COLORS[i].1;
            RGBA8::new(r, g, b, 255)
        })
}

/// Every C string literal in the file, with comments skipped.
fn string_literals(text: &str) -> Result<Vec<&str>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = text[i + 2..]
                    .find("*/")
                    .ok_or_else(|| ImagingError::truncated("XPM comment is not closed"))?;
                i += end + 4;
            }
            b'"' => {
                let end = text[i + 1..]
                    .find('"')
                    .ok_or_else(|| ImagingError::truncated("XPM string is not closed"))?;
                out.push(&text[i + 1..i + 1 + end]);
                i += end + 2;
            }
            b'}' => {
                if !closes_c_array(&text[i + 1..]) {
                    return Err(ImagingError::truncated("XPM array is not terminated"));
                }
                return Ok(out);
            }
            _ => i += 1,
        }
    }
    Err(ImagingError::truncated("XPM array is not closed"))
}

struct Values {
    width: u32,
    height: u32,
    colors: usize,
    chars_per_pixel: usize,
}

fn values(line: &str) -> Result<Values> {
    let nums: Vec<u32> = line
        .split_whitespace()
        .take(4)
        .map(|t| t.parse::<u32>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| ImagingError::header(ImageFormat::Xpm, format!("bad values line {:?}", line)))?;
    let [width, height, colors, cpp] = nums[..] else {
        return Err(ImagingError::header(ImageFormat::Xpm, format!("values line {:?} needs four numbers", line)));
    };
    if cpp == 0 || cpp > 8 || colors == 0 {
        return Err(ImagingError::header(
            ImageFormat::Xpm,
            format!("{} colors at {} chars per pixel", colors, cpp),
        ));
    }
    Ok(Values {
        width,
        height,
        colors: colors as usize,
        chars_per_pixel: cpp as usize,
    })
}

/// Visual keys in order of preference.
const VISUALS: [&str; 5] = ["c", "g", "g4", "m", "s"];

fn color_entry(line: &str, cpp: usize) -> Result<(&str, RGBA8)> {
    let key = line
        .get(..cpp)
        .ok_or_else(|| ImagingError::data(ImageFormat::Xpm, format!("color line {:?} too short", line)))?;
    let words: Vec<&str> = line[cpp..].split_whitespace().collect();
    let mut specs: Vec<(&str, String)> = Vec::new();
    let mut i = 0;
    while i < words.len() {
        if VISUALS.contains(&words[i]) {
            let visual = words[i];
            let mut value = Vec::new();
            i += 1;
            while i < words.len() && !VISUALS.contains(&words[i]) {
                value.push(words[i]);
                i += 1;
            }
            specs.push((visual, value.join(" ")));
        } else {
            i += 1;
        }
    }
    for visual in ["c", "g", "g4", "m"] {
        if let Some((_, value)) = specs.iter().find(|(v, _)| *v == visual) {
            return parse_color(value)
                .map(|c| (key, c))
                .ok_or_else(|| ImagingError::data(ImageFormat::Xpm, format!("unknown color {:?}", value)));
        }
    }
    Err(ImagingError::data(ImageFormat::Xpm, format!("color line {:?} has no color", line)))
}

struct Document<'a> {
    values: Values,
    lines: Vec<&'a str>,
}

fn parse<'a>(data: &'a [u8], params: &ReadParameters) -> Result<Document<'a>> {
    if !data.starts_with(SIGNATURE) {
        return Err(ImagingError::header(ImageFormat::Xpm, "missing /* XPM */ comment"));
    }
    let text = std::str::from_utf8(data).map_err(|_| ImagingError::header(ImageFormat::Xpm, "not ASCII text"))?;
    let lines = string_literals(text)?;
    let first = lines.first().ok_or_else(|| ImagingError::truncated("XPM has no values string"))?;
    let values = values(first)?;
    if values.width == 0 || values.height == 0 {
        return Err(ImagingError::InvalidDimensions {
            width: values.width as u64,
            height: values.height as u64,
        });
    }
    params.check_dimensions(values.width as u64, values.height as u64)?;
    if params.image_index != 0 {
        return Err(ImagingError::InvalidParameter(format!(
            "XPM holds one image, index {} requested",
            params.image_index
        )));
    }
    Ok(Document { values, lines })
}

fn decode_raster(doc: &Document<'_>) -> Result<PixelRaster> {
    let v = &doc.values;
    let needed = 1 + v.colors + v.height as usize;
    if doc.lines.len() < needed {
        return Err(ImagingError::truncated(format!(
            "XPM holds {} of {} strings",
            doc.lines.len(),
            needed
        )));
    }
    let mut keys = std::collections::HashMap::with_capacity(v.colors);
    let mut colors = Vec::with_capacity(v.colors);
    for line in &doc.lines[1..=v.colors] {
        let (key, color) = color_entry(line, v.chars_per_pixel)?;
        keys.insert(key, colors.len());
        colors.push(color);
    }
    let w = v.width as usize;
    let mut indices = Vec::with_capacity(w * v.height as usize);
    for row in &doc.lines[1 + v.colors..needed] {
        if row.len() < w * v.chars_per_pixel {
            return Err(ImagingError::data(ImageFormat::Xpm, format!("pixel row of {} bytes", row.len())));
        }
        for x in 0..w {
            let key = row
                .get(x * v.chars_per_pixel..(x + 1) * v.chars_per_pixel)
                .ok_or_else(|| ImagingError::data(ImageFormat::Xpm, "pixel key splits a character"))?;
            let index = keys
                .get(key)
                .ok_or_else(|| ImagingError::data(ImageFormat::Xpm, format!("undefined pixel key {:?}", key)))?;
            indices.push(*index);
        }
    }
    if colors.len() <= 256 {
        let indices = indices.into_iter().map(|i| i as u8).collect();
        PixelRaster::from_indexed(v.width, v.height, Palette::new(colors)?, indices)
    } else {
        let rgba = indices.into_iter().flat_map(|i| {
            let c = colors[i];
            [c.r, c.g, c.b, c.a]
        });
        PixelRaster::from_rgba8(v.width, v.height, rgba.collect())
    }
}

/// Key for palette entry `index`, `cpp` characters long.
fn key_for(mut index: usize, cpp: usize) -> String {
    let mut key = String::with_capacity(cpp);
    for _ in 0..cpp {
        key.push(KEY_CHARS[index % KEY_CHARS.len()] as char);
        index /= KEY_CHARS.len();
    }
    key
}

/// X PixMap codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct XpmCodec;

impl ImageCodec for XpmCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Xpm
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.starts_with(SIGNATURE)
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        let doc = parse(data, params)?;
        let v = &doc.values;
        let mut info = ImageInfo::new(ImageFormat::Xpm, v.width, v.height);
        info.bits_per_pixel = (v.colors as f64).log2().ceil().max(1.0) as u16;
        info.color_type = ColorType::Indexed;
        info.has_transparency = doc.lines[1..]
            .iter()
            .take(v.colors)
            .any(|line| line.split_whitespace().any(|w| w.eq_ignore_ascii_case("none")));
        Ok(info)
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        parse(data, params)?;
        Ok(Metadata::default())
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        let doc = parse(data, params)?;
        let raster = decode_raster(&doc)?;
        log::debug!(
            "XPM decoded {}x{} with {} colors at {} chars per pixel",
            doc.values.width,
            doc.values.height,
            doc.values.colors,
            doc.values.chars_per_pixel
        );
        Ok(DecodedImage {
            raster,
            metadata: Metadata::default(),
        })
    }

    fn encode(&self, raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
        params.validate()?;
        params.compression_or(ImageFormat::Xpm, &[Compression::None], Compression::None)?;
        let prepared = color::prepare(ImageFormat::Xpm, raster, &POLICY, params)?;
        write_metadata(ImageFormat::Xpm, metadata, params)?;
        let Pixels::Indexed { palette, indices } = prepared.pixels() else {
            return Err(color::unexpected_layout(ImageFormat::Xpm, prepared.layout()));
        };
        let (w, h) = prepared.dimensions();
        let cpp = if palette.len() <= KEY_CHARS.len() { 1 } else { 2 };
        let keys: Vec<String> = (0..palette.len()).map(|i| key_for(i, cpp)).collect();

        let mut text = format!("/* XPM */\nstatic char *{}[] = {{\n", IMAGE_NAME);
        text.push_str("/* columns rows colors chars-per-pixel */\n");
        text.push_str(&format!("\"{} {} {} {}\",\n", w, h, palette.len(), cpp));
        for (key, c) in keys.iter().zip(palette.colors()) {
            if c.a == 0 {
                text.push_str(&format!("\"{} c None\",\n", key));
            } else {
                text.push_str(&format!("\"{} c #{:02X}{:02X}{:02X}\",\n", key, c.r, c.g, c.b));
            }
        }
        text.push_str("/* pixels */\n");
        for (y, row) in indices.chunks_exact(w as usize).enumerate() {
            text.push('"');
            for &i in row {
                text.push_str(&keys[i as usize]);
            }
            text.push('"');
            text.push_str(if y + 1 < h as usize { ",\n" } else { "\n" });
        }
        text.push_str("};\n");
        log::debug!("XPM encoded {}x{} with {} colors", w, h, palette.len());
        Ok(text.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_specs() {
        assert_eq!(parse_color("#F0A"), Some(RGBA8::new(255, 0, 170, 255)));
        assert_eq!(parse_color("#102030"), Some(RGBA8::new(16, 32, 48, 255)));
        assert_eq!(parse_color("#FFFF80001234"), Some(RGBA8::new(255, 128, 18, 255)));
        assert_eq!(parse_color("None"), Some(RGBA8::new(0, 0, 0, 0)));
        assert_eq!(parse_color("Light Blue"), Some(RGBA8::new(173, 216, 230, 255)));
        assert_eq!(parse_color("gray50"), Some(RGBA8::new(128, 128, 128, 255)));
        assert_eq!(parse_color("no such color"), None);
        assert!(NAMED_COLORS.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_decode_two_chars_per_pixel() {
        let text = r#"/* XPM */
static char *icon[] = {
/* columns rows colors chars-per-pixel */
"3 2 3 2 ",
"   c None",
"ab c red m black",
"cd s mark c #00FF00",
/* pixels */
"  abcd",
"cdcdab"
};
"#;
        let raster = XpmCodec.decode(text.as_bytes(), &ReadParameters::default()).unwrap().raster;
        assert_eq!(raster.pixel(0, 0).a, 0);
        assert_eq!(raster.pixel(1, 0), RGBA8::new(255, 0, 0, 255));
        assert_eq!(raster.pixel(2, 0), RGBA8::new(0, 255, 0, 255));
        assert_eq!(raster.pixel(2, 1), RGBA8::new(255, 0, 0, 255));
        let info = XpmCodec.read_info(text.as_bytes(), &ReadParameters::default()).unwrap();
        assert!(info.has_transparency);
        assert_eq!(info.bits_per_pixel, 2);
    }

    #[test]
    fn test_roundtrip_with_transparency() {
        let mut argb = vec![0u32; 120];
        for (i, p) in argb.iter_mut().enumerate() {
            *p = if i % 7 == 0 { 0 } else { 0xFF000000 | (i as u32 * 0x010203) };
        }
        let raster = PixelRaster::from_argb(12, 10, &argb).unwrap();
        let data = XpmCodec.encode(&raster, &Metadata::default(), &EncodeParameters::default()).unwrap();
        assert!(XpmCodec.matches(&data));
        let decoded = XpmCodec.decode(&data, &ReadParameters::default()).unwrap().raster;
        assert!(decoded.same_pixels(&raster));
    }

    #[test]
    fn test_wide_palette_uses_two_chars() {
        let gray = PixelRaster::from_gray8(200, 1, (0..200).map(|i| i as u8).collect()).unwrap();
        let data = XpmCodec.encode(&gray, &Metadata::default(), &EncodeParameters::default()).unwrap();
        let text = String::from_utf8(data.clone()).unwrap();
        assert!(text.contains("\"200 1 200 2\""));
        assert!(XpmCodec.decode(&data, &ReadParameters::default()).unwrap().raster.same_pixels(&gray));
    }

    #[test]
    fn test_errors() {
        let missing_row = "/* XPM */\nstatic char *x[] = {\n\"2 2 1 1\",\n\". c red\",\n\"..\"\n};\n";
        let err = XpmCodec.decode(missing_row.as_bytes(), &ReadParameters::default()).unwrap_err();
        assert!(err.is_truncation());
        let bad_key = "/* XPM */\nstatic char *x[] = {\n\"1 1 1 1\",\n\". c red\",\n\"x\"\n};\n";
        let err = XpmCodec.decode(bad_key.as_bytes(), &ReadParameters::default()).unwrap_err();
        assert!(matches!(err, ImagingError::InvalidData { .. }));
        let whole = "/* XPM */\nstatic char *x[] = {\n\"1 1 1 1\",\n\". c red\",\n\".\"\n};\n";
        assert!(XpmCodec.decode(whole.as_bytes(), &ReadParameters::default()).is_ok());
        for cut in [whole.len() - 1, whole.len() - 2, whole.len() - 3] {
            let err = XpmCodec.decode(whole[..cut].as_bytes(), &ReadParameters::default()).unwrap_err();
            assert!(err.is_truncation(), "{:?}", &whole[..cut]);
        }
        let translucent = PixelRaster::from_argb(1, 1, &[0x80FF0000]).unwrap();
        let err = XpmCodec.encode(&translucent, &Metadata::default(), &EncodeParameters::default()).unwrap_err();
        assert!(matches!(err, ImagingError::UnsupportedColorMode { .. }));
    }
}
