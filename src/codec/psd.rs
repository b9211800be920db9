//! Photoshop document reader. Only the merged composite image is decoded;
//! layers are skipped.

use crate::config::ReadParameters;
use crate::error::{ImagingError, Result};
use crate::io::{unpack_samples, ByteReader, Endian};
use crate::metadata::{ColorType, ImageInfo, Metadata, PixelDensity};
use crate::raster::{Palette, PixelRaster, Pixels, RGBA8};

use super::{packbits, DecodedImage, ImageCodec, ImageFormat};

const SIGNATURE: &[u8] = b"8BPS";
const RESOURCE_SIGNATURE: &[u8] = b"8BIM";

const RESOLUTION_INFO: u16 = 0x03ED;
const ICC_PROFILE: u16 = 0x040F;
const TRANSPARENCY_INDEX: u16 = 0x0417;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorMode {
    Bitmap,
    Grayscale,
    Indexed,
    Rgb,
    Cmyk,
    Duotone,
}

impl ColorMode {
    fn from_code(code: u16) -> Result<Self> {
        Ok(match code {
            0 => ColorMode::Bitmap,
            1 => ColorMode::Grayscale,
            2 => ColorMode::Indexed,
            3 => ColorMode::Rgb,
            4 => ColorMode::Cmyk,
            8 => ColorMode::Duotone,
            7 => return Err(ImagingError::feature(ImageFormat::Psd, "multichannel color mode")),
            9 => return Err(ImagingError::feature(ImageFormat::Psd, "Lab color mode")),
            other => return Err(ImagingError::header(ImageFormat::Psd, format!("color mode {}", other))),
        })
    }

    /// Channels that carry color, before any alpha channel.
    fn color_channels(self) -> usize {
        match self {
            ColorMode::Bitmap | ColorMode::Grayscale | ColorMode::Indexed | ColorMode::Duotone => 1,
            ColorMode::Rgb => 3,
            ColorMode::Cmyk => 4,
        }
    }

    fn color_type(self) -> ColorType {
        match self {
            ColorMode::Bitmap => ColorType::BlackAndWhite,
            ColorMode::Grayscale | ColorMode::Duotone => ColorType::Grayscale,
            ColorMode::Indexed => ColorType::Indexed,
            ColorMode::Rgb => ColorType::Rgb,
            ColorMode::Cmyk => ColorType::Cmyk,
        }
    }
}

#[derive(Debug, Default)]
struct Resources {
    density: Option<PixelDensity>,
    icc_profile: Option<Vec<u8>>,
    transparent_index: Option<u16>,
}

struct Document<'a> {
    width: u32,
    height: u32,
    channels: usize,
    depth: u16,
    mode: ColorMode,
    color_data: &'a [u8],
    resources: Resources,
    compression: u16,
    image_data: &'a [u8],
}

impl Document<'_> {
    fn has_alpha(&self) -> bool {
        self.mode != ColorMode::Bitmap && self.mode != ColorMode::Indexed && self.channels > self.mode.color_channels()
    }

    fn compression_name(&self) -> &'static str {
        match self.compression {
            0 => "None",
            1 => "PackBits",
            2 => "ZIP",
            3 => "ZIP with prediction",
            _ => "Unknown",
        }
    }
}

/// ResolutionInfo stores pixels per inch as 16.16 fixed point whatever the
/// display unit; the unit only picks how the density is reported.
fn resolution(data: &[u8]) -> Result<Option<PixelDensity>> {
    let mut r = ByteReader::new(data, Endian::Big);
    let h = r.u32()? as f64 / 65536.0;
    let h_unit = r.u16()?;
    r.skip(2)?;
    let v = r.u32()? as f64 / 65536.0;
    if h <= 0.0 || v <= 0.0 {
        return Ok(None);
    }
    let density = if h_unit == 2 {
        PixelDensity::from_pixels_per_centimeter(h / 2.54, v / 2.54)
    } else {
        PixelDensity::from_pixels_per_inch(h, v)
    };
    Ok(density.ok())
}

fn parse_resources(data: &[u8]) -> Result<Resources> {
    let mut resources = Resources::default();
    let mut r = ByteReader::new(data, Endian::Big);
    while r.remaining() >= 12 {
        if r.bytes(4)? != RESOURCE_SIGNATURE {
            log::warn!("PSD: image resource without 8BIM signature, ignoring the rest");
            break;
        }
        let id = r.u16()?;
        let name_len = r.u8()? as usize;
        // Pascal string padded so the length byte plus text is even.
        r.skip(name_len + (name_len + 1) % 2)?;
        let size = r.u32()? as usize;
        let body = r.bytes(size)?;
        if size % 2 == 1 && !r.is_empty() {
            r.skip(1)?;
        }
        match id {
            RESOLUTION_INFO => match resolution(body) {
                Ok(d) => resources.density = d,
                Err(err) => log::warn!("PSD: ignoring malformed resolution info: {}", err),
            },
            ICC_PROFILE if !body.is_empty() => resources.icc_profile = Some(body.to_vec()),
            TRANSPARENCY_INDEX if size >= 2 => {
                resources.transparent_index = Some(u16::from_be_bytes([body[0], body[1]]));
            }
            _ => log::trace!("PSD: skipping resource {:#06x} ({} bytes)", id, size),
        }
    }
    Ok(resources)
}

fn parse<'a>(data: &'a [u8], params: &ReadParameters) -> Result<Document<'a>> {
    let mut r = ByteReader::new(data, Endian::Big);
    if r.bytes(4)? != SIGNATURE {
        return Err(ImagingError::header(ImageFormat::Psd, "missing 8BPS signature"));
    }
    match r.u16()? {
        1 => {}
        2 => return Err(ImagingError::feature(ImageFormat::Psd, "large document format (PSB)")),
        v => return Err(ImagingError::header(ImageFormat::Psd, format!("version {}", v))),
    }
    r.skip(6)?;
    let channels = r.u16()? as usize;
    let height = r.u32()?;
    let width = r.u32()?;
    let depth = r.u16()?;
    let mode = ColorMode::from_code(r.u16()?)?;
    if !(1..=56).contains(&channels) {
        return Err(ImagingError::header(ImageFormat::Psd, format!("{} channels", channels)));
    }
    if width == 0 || height == 0 {
        return Err(ImagingError::InvalidDimensions {
            width: width as u64,
            height: height as u64,
        });
    }
    params.check_dimensions(width as u64, height as u64)?;
    match (mode, depth) {
        (ColorMode::Bitmap, 1) => {}
        (ColorMode::Bitmap, _) => {
            return Err(ImagingError::header(ImageFormat::Psd, format!("bitmap mode at depth {}", depth)))
        }
        (ColorMode::Indexed, 8) => {}
        (ColorMode::Indexed, _) => {
            return Err(ImagingError::header(ImageFormat::Psd, format!("indexed mode at depth {}", depth)))
        }
        (_, 8 | 16) => {}
        (_, 32) => return Err(ImagingError::feature(ImageFormat::Psd, "32-bit float channels")),
        (_, other) => return Err(ImagingError::header(ImageFormat::Psd, format!("depth {}", other))),
    }
    if channels < mode.color_channels() {
        return Err(ImagingError::header(
            ImageFormat::Psd,
            format!("{:?} mode with {} channels", mode, channels),
        ));
    }
    if params.image_index != 0 {
        return Err(ImagingError::InvalidParameter(format!(
            "PSD composite is image 0, index {} requested",
            params.image_index
        )));
    }

    let color_len = r.u32()? as usize;
    let color_data = r.bytes(color_len)?;
    if mode == ColorMode::Indexed && color_data.len() < 768 {
        return Err(ImagingError::header(ImageFormat::Psd, "indexed document without color table"));
    }
    let resource_len = r.u32()? as usize;
    let resources = parse_resources(r.bytes(resource_len)?)?;
    let layer_len = r.u32()? as usize;
    r.skip(layer_len)?;
    let compression = r.u16()?;
    let image_data = r.rest();
    Ok(Document {
        width,
        height,
        channels,
        depth,
        mode,
        color_data,
        resources,
        compression,
        image_data,
    })
}

/// Decode the planar composite into one 8-bit plane per used channel.
fn read_planes(doc: &Document<'_>, used: usize) -> Result<Vec<Vec<u8>>> {
    let (w, h) = (doc.width as usize, doc.height as usize);
    let row_bytes = (w * doc.depth as usize).div_ceil(8);
    let mut rows: Vec<Vec<u8>> = Vec::with_capacity(used * h);
    match doc.compression {
        0 => {
            let total = row_bytes * h * doc.channels;
            let raw = doc.image_data.get(..total).ok_or_else(|| {
                ImagingError::truncated(format!("PSD image data needs {} bytes, {} present", total, doc.image_data.len()))
            })?;
            rows.extend(raw.chunks_exact(row_bytes).take(used * h).map(<[u8]>::to_vec));
        }
        1 => {
            let mut r = ByteReader::new(doc.image_data, Endian::Big);
            let mut counts = Vec::with_capacity(doc.channels * h);
            for _ in 0..doc.channels * h {
                counts.push(r.u16()? as usize);
            }
            for &count in counts.iter().take(used * h) {
                let packed = r.bytes(count)?;
                let (row, _) = packbits::decode(packed, row_bytes)?;
                rows.push(row);
            }
        }
        2 | 3 => return Err(ImagingError::feature(ImageFormat::Psd, "ZIP compressed image data")),
        other => return Err(ImagingError::header(ImageFormat::Psd, format!("compression {}", other))),
    }

    let mut planes = Vec::with_capacity(used);
    for channel in rows.chunks_exact(h) {
        let mut plane = Vec::with_capacity(w * h);
        for row in channel {
            match doc.depth {
                1 => plane.extend(unpack_samples(row, 1, w)?),
                8 => plane.extend_from_slice(&row[..w]),
                _ => plane.extend(row.chunks_exact(2).take(w).map(|s| s[0])),
            }
        }
        planes.push(plane);
    }
    Ok(planes)
}

fn palette(doc: &Document<'_>) -> Result<Palette> {
    let table = &doc.color_data[..768];
    let transparent = doc.resources.transparent_index.map(usize::from);
    let colors = (0..256)
        .map(|i| {
            let alpha = if transparent == Some(i) { 0 } else { 255 };
            RGBA8::new(table[i], table[256 + i], table[512 + i], alpha)
        })
        .collect();
    Palette::new(colors)
}

fn to_raster(doc: &Document<'_>) -> Result<PixelRaster> {
    let alpha = doc.has_alpha();
    let used = doc.mode.color_channels() + usize::from(alpha);
    let planes = read_planes(doc, used)?;
    let (w, h) = (doc.width, doc.height);
    let n = w as usize * h as usize;
    match doc.mode {
        // PSD bitmaps store 1 for black.
        ColorMode::Bitmap => PixelRaster::new(w, h, Pixels::Bitonal(planes[0].iter().map(|&b| b ^ 1).collect())),
        ColorMode::Indexed => PixelRaster::from_indexed(w, h, palette(doc)?, planes[0].clone()),
        ColorMode::Grayscale | ColorMode::Duotone if !alpha => PixelRaster::from_gray8(w, h, planes[0].clone()),
        ColorMode::Grayscale | ColorMode::Duotone => {
            let rgba = (0..n).flat_map(|i| {
                let g = planes[0][i];
                [g, g, g, planes[1][i]]
            });
            PixelRaster::from_rgba8(w, h, rgba.collect())
        }
        ColorMode::Rgb => {
            if alpha {
                let rgba = (0..n).flat_map(|i| [planes[0][i], planes[1][i], planes[2][i], planes[3][i]]);
                PixelRaster::from_rgba8(w, h, rgba.collect())
            } else {
                let rgb = (0..n).flat_map(|i| [planes[0][i], planes[1][i], planes[2][i]]);
                PixelRaster::from_rgb8(w, h, rgb.collect())
            }
        }
        ColorMode::Cmyk => {
            // Channels hold 255 minus the ink amount.
            let mix = |v: u8, k: u8| ((v as u32 * k as u32 + 127) / 255) as u8;
            let mut out = Vec::with_capacity(n * if alpha { 4 } else { 3 });
            for i in 0..n {
                let k = planes[3][i];
                out.extend_from_slice(&[mix(planes[0][i], k), mix(planes[1][i], k), mix(planes[2][i], k)]);
                if alpha {
                    out.push(planes[4][i]);
                }
            }
            if alpha {
                PixelRaster::from_rgba8(w, h, out)
            } else {
                PixelRaster::from_rgb8(w, h, out)
            }
        }
    }
}

fn metadata_of(doc: &Document<'_>) -> Metadata {
    Metadata {
        pixel_density: doc.resources.density,
        icc_profile: doc.resources.icc_profile.clone(),
        text: None,
    }
}

/// Photoshop PSD codec (read only).
#[derive(Debug, Clone, Copy, Default)]
pub struct PsdCodec;

impl ImageCodec for PsdCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Psd
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.starts_with(SIGNATURE)
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        let doc = parse(data, params)?;
        let mut info = ImageInfo::new(ImageFormat::Psd, doc.width, doc.height);
        info.bits_per_pixel = doc.depth * doc.channels as u16;
        info.color_type = doc.mode.color_type();
        info.has_transparency = doc.has_alpha() || doc.resources.transparent_index.is_some();
        info.compression = doc.compression_name().into();
        info.pixel_density = doc.resources.density;
        Ok(info)
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        Ok(metadata_of(&parse(data, params)?))
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        let doc = parse(data, params)?;
        let raster = to_raster(&doc)?;
        log::debug!(
            "PSD decoded {}x{} {:?}, {} channels at depth {} ({})",
            doc.width,
            doc.height,
            doc.mode,
            doc.channels,
            doc.depth,
            doc.compression_name()
        );
        Ok(DecodedImage {
            raster,
            metadata: metadata_of(&doc),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ByteWriter;

    struct TestPsd {
        channels: u16,
        width: u32,
        height: u32,
        depth: u16,
        mode: u16,
        color_data: Vec<u8>,
        resources: Vec<(u16, Vec<u8>)>,
    }

    impl TestPsd {
        fn new(mode: u16, channels: u16, depth: u16, width: u32, height: u32) -> Self {
            Self {
                channels,
                width,
                height,
                depth,
                mode,
                color_data: Vec::new(),
                resources: Vec::new(),
            }
        }

        fn header(&self) -> ByteWriter {
            let mut w = ByteWriter::new(Endian::Big);
            w.bytes(SIGNATURE);
            w.u16(1);
            w.zeros(6);
            w.u16(self.channels);
            w.u32(self.height);
            w.u32(self.width);
            w.u16(self.depth);
            w.u16(self.mode);
            w.u32(self.color_data.len() as u32);
            w.bytes(&self.color_data);
            let mut res = ByteWriter::new(Endian::Big);
            for (id, body) in &self.resources {
                res.bytes(RESOURCE_SIGNATURE);
                res.u16(*id);
                res.bytes(&[0, 0]);
                res.u32(body.len() as u32);
                res.bytes(body);
                if body.len() % 2 == 1 {
                    res.u8(0);
                }
            }
            w.u32(res.len() as u32);
            w.bytes(res.as_slice());
            w.u32(0);
            w
        }

        /// Planar rows, stored raw.
        fn raw(&self, planes: &[&[u8]]) -> Vec<u8> {
            let mut w = self.header();
            w.u16(0);
            for plane in planes {
                w.bytes(plane);
            }
            w.into_inner()
        }

        /// Planar rows, PackBits compressed.
        fn rle(&self, planes: &[&[u8]], row_bytes: usize) -> Vec<u8> {
            let mut w = self.header();
            w.u16(1);
            let mut rows = Vec::new();
            for plane in planes {
                for row in plane.chunks(row_bytes) {
                    let mut packed = Vec::new();
                    packbits::encode(row, &mut packed);
                    rows.push(packed);
                }
            }
            for row in &rows {
                w.u16(row.len() as u16);
            }
            for row in &rows {
                w.bytes(row);
            }
            w.into_inner()
        }
    }

    #[test]
    fn test_rgb_with_alpha_packbits() {
        let psd = TestPsd::new(3, 4, 8, 3, 2);
        let r = [255, 255, 255, 0, 0, 0];
        let g = [0, 0, 0, 128, 128, 128];
        let b = [9, 9, 9, 9, 9, 9];
        let a = [255, 0, 255, 255, 255, 64];
        let data = psd.rle(&[&r, &g, &b, &a], 3);
        assert!(PsdCodec.matches(&data));
        let raster = PsdCodec.decode(&data, &ReadParameters::default()).unwrap().raster;
        assert_eq!(raster.pixel(0, 0), RGBA8::new(255, 0, 9, 255));
        assert_eq!(raster.pixel(1, 0).a, 0);
        assert_eq!(raster.pixel(2, 1), RGBA8::new(0, 128, 9, 64));
    }

    #[test]
    fn test_grayscale_sixteen_bit_and_resources() {
        let mut psd = TestPsd::new(1, 1, 16, 2, 1);
        let mut res = ByteWriter::new(Endian::Big);
        res.u32(72 << 16);
        res.u16(1);
        res.u16(1);
        res.u32(144 << 16);
        res.u16(1);
        res.u16(1);
        psd.resources.push((RESOLUTION_INFO, res.into_inner()));
        psd.resources.push((0x0404, vec![1, 2, 3]));
        psd.resources.push((ICC_PROFILE, vec![7; 5]));
        let data = psd.raw(&[&[0x12, 0x34, 0xFF, 0x00]]);
        let decoded = PsdCodec.decode(&data, &ReadParameters::default()).unwrap();
        assert_eq!(decoded.raster.pixels(), &Pixels::Grayscale(vec![0x12, 0xFF]));
        let density = decoded.metadata.pixel_density.unwrap();
        assert!((density.horizontal_dpi() - 72.0).abs() < 1e-6);
        assert!((density.vertical_dpi() - 144.0).abs() < 1e-6);
        assert_eq!(decoded.metadata.icc_profile, Some(vec![7; 5]));
        let info = PsdCodec.read_info(&data, &ReadParameters::default()).unwrap();
        assert_eq!(info.bits_per_pixel, 16);
        assert_eq!(info.color_type, ColorType::Grayscale);
    }

    #[test]
    fn test_bitmap_and_indexed() {
        let psd = TestPsd::new(0, 1, 1, 3, 1);
        let data = psd.raw(&[&[0b1010_0000]]);
        let raster = PsdCodec.decode(&data, &ReadParameters::default()).unwrap().raster;
        assert_eq!(raster.pixels(), &Pixels::Bitonal(vec![0, 1, 0]));

        let mut psd = TestPsd::new(2, 1, 8, 2, 1);
        let mut table = vec![0u8; 768];
        table[1] = 200;
        table[256 + 1] = 100;
        table[512 + 1] = 50;
        psd.color_data = table;
        psd.resources.push((TRANSPARENCY_INDEX, vec![0, 0]));
        let data = psd.raw(&[&[0, 1]]);
        let raster = PsdCodec.decode(&data, &ReadParameters::default()).unwrap().raster;
        assert_eq!(raster.pixel(0, 0).a, 0);
        assert_eq!(raster.pixel(1, 0), RGBA8::new(200, 100, 50, 255));
    }

    #[test]
    fn test_cmyk_is_inverted() {
        let psd = TestPsd::new(4, 4, 8, 1, 1);
        // No ink at all is white; full black ink is black.
        let data = psd.raw(&[&[255], &[255], &[255], &[255]]);
        let raster = PsdCodec.decode(&data, &ReadParameters::default()).unwrap().raster;
        assert_eq!(raster.pixel(0, 0), RGBA8::new(255, 255, 255, 255));
        let data = psd.raw(&[&[255], &[0], &[255], &[0]]);
        let raster = PsdCodec.decode(&data, &ReadParameters::default()).unwrap().raster;
        assert_eq!(raster.pixel(0, 0), RGBA8::new(0, 0, 0, 255));
    }

    #[test]
    fn test_errors() {
        let psd = TestPsd::new(3, 3, 8, 4, 4);
        let data = psd.raw(&[&[0; 16], &[0; 16], &[0; 16]]);
        let err = PsdCodec.decode(&data[..data.len() - 1], &ReadParameters::default()).unwrap_err();
        assert!(err.is_truncation());

        let lab = TestPsd::new(9, 3, 8, 1, 1).raw(&[&[0], &[0], &[0]]);
        let err = PsdCodec.decode(&lab, &ReadParameters::default()).unwrap_err();
        assert!(matches!(err, ImagingError::UnsupportedFeature { .. }));

        let err = PsdCodec
            .encode(&PixelRaster::from_gray8(1, 1, vec![0]).unwrap(), &Metadata::default(), &Default::default())
            .unwrap_err();
        assert!(matches!(err, ImagingError::UnsupportedFormat { .. }));
    }
}
