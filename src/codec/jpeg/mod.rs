//! JPEG decoder.
//!
//! Handles the Huffman-coded DCT processes: baseline, extended (8-bit) and
//! progressive, with any sampling factors and restart intervals. Arithmetic
//! coding, lossless and hierarchical frames are reported as unsupported.
//! There is no encoder.

mod huffman;
mod idct;
mod scan;

use crate::config::ReadParameters;
use crate::error::{ImagingError, Result};
use crate::io::{ByteReader, Endian};
use crate::metadata::{ColorType, DensityUnit, ImageInfo, Metadata, PixelDensity};

use super::{DecodedImage, ImageCodec, ImageFormat};
use huffman::HuffmanTable;
use idct::ColorTransform;
use scan::{Frame, ScanHeader, Tables};

/// Zigzag position to natural (row-major) coefficient index.
pub(super) const ZIGZAG: [u8; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27,
    20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58,
    59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const DQT: u8 = 0xDB;
const DRI: u8 = 0xDD;
const DHT: u8 = 0xC4;
const DAC: u8 = 0xCC;
const APP0: u8 = 0xE0;
const APP2: u8 = 0xE2;
const APP14: u8 = 0xEE;
const COM: u8 = 0xFE;

const ICC_SIGNATURE: &[u8] = b"ICC_PROFILE\0";

/// Everything gathered from marker segments.
#[derive(Default)]
struct Headers<'a> {
    frame: Option<Frame>,
    quant: [Option<[u16; 64]>; 4],
    tables: Tables,
    restart_interval: usize,
    jfif: bool,
    density: Option<PixelDensity>,
    adobe_transform: Option<u8>,
    icc_chunks: Vec<(u8, u8, &'a [u8])>,
    comments: Vec<String>,
}

impl<'a> Headers<'a> {
    fn segment(&mut self, marker: u8, body: &'a [u8]) -> Result<()> {
        match marker {
            0xC0..=0xC2 => {
                if self.frame.is_some() {
                    return Err(ImagingError::data(ImageFormat::Jpeg, "more than one frame header"));
                }
                self.frame = Some(Frame::parse(body, marker == 0xC2)?);
            }
            0xC3 => return Err(ImagingError::feature(ImageFormat::Jpeg, "lossless process")),
            0xC5..=0xC7 | 0xCD..=0xCF => {
                return Err(ImagingError::feature(ImageFormat::Jpeg, "hierarchical process"));
            }
            0xC9..=0xCB | DAC => return Err(ImagingError::feature(ImageFormat::Jpeg, "arithmetic coding")),
            DHT => self.huffman_tables(body)?,
            DQT => self.quant_tables(body)?,
            DRI => self.restart_interval = ByteReader::new(body, Endian::Big).u16()? as usize,
            APP0 if body.starts_with(b"JFIF\0") => {
                self.jfif = true;
                self.density = jfif_density(body);
            }
            APP2 if body.starts_with(ICC_SIGNATURE) && body.len() >= ICC_SIGNATURE.len() + 2 => {
                let at = ICC_SIGNATURE.len();
                self.icc_chunks.push((body[at], body[at + 1], &body[at + 2..]));
            }
            APP14 if body.starts_with(b"Adobe") && body.len() >= 12 => self.adobe_transform = Some(body[11]),
            COM => self
                .comments
                .push(String::from_utf8_lossy(body).trim_end_matches('\0').to_string()),
            other => log::trace!("JPEG: skipping marker {:02X} ({} bytes)", other, body.len()),
        }
        Ok(())
    }

    fn huffman_tables(&mut self, body: &[u8]) -> Result<()> {
        let mut r = ByteReader::new(body, Endian::Big);
        while !r.is_empty() {
            let spec = r.u8()?;
            let (class, slot) = (spec >> 4, (spec & 15) as usize);
            let counts = r.array::<16>()?;
            let total = counts.iter().map(|&c| c as usize).sum();
            let table = HuffmanTable::new(&counts, r.bytes(total)?)?;
            match (class, slot) {
                (0, 0..=3) => self.tables.dc[slot] = Some(table),
                (1, 0..=3) => self.tables.ac[slot] = Some(table),
                _ => {
                    return Err(ImagingError::data(
                        ImageFormat::Jpeg,
                        format!("Huffman table class {} slot {}", class, slot),
                    ));
                }
            }
        }
        Ok(())
    }

    fn quant_tables(&mut self, body: &[u8]) -> Result<()> {
        let mut r = ByteReader::new(body, Endian::Big);
        while !r.is_empty() {
            let spec = r.u8()?;
            let (precision, slot) = (spec >> 4, (spec & 15) as usize);
            if slot > 3 || precision > 1 {
                return Err(ImagingError::data(ImageFormat::Jpeg, format!("quantization table {:02X}", spec)));
            }
            let mut table = [0u16; 64];
            for &natural in &ZIGZAG {
                table[natural as usize] = if precision == 0 { r.u8()? as u16 } else { r.u16()? };
            }
            self.quant[slot] = Some(table);
        }
        Ok(())
    }

    fn transform(&self, frame: &Frame) -> ColorTransform {
        match frame.components.len() {
            1 => ColorTransform::Gray,
            3 => {
                let ids: Vec<u8> = frame.components.iter().map(|c| c.id).collect();
                match self.adobe_transform {
                    Some(0) => ColorTransform::Rgb,
                    Some(_) => ColorTransform::YCbCr,
                    None if !self.jfif && ids == b"RGB" => ColorTransform::Rgb,
                    None => ColorTransform::YCbCr,
                }
            }
            _ => match self.adobe_transform {
                Some(2) => ColorTransform::Ycck,
                _ => ColorTransform::Cmyk,
            },
        }
    }

    fn icc_profile(&self) -> Option<Vec<u8>> {
        if self.icc_chunks.is_empty() {
            return None;
        }
        let mut chunks = self.icc_chunks.clone();
        chunks.sort_by_key(|&(seq, _, _)| seq);
        let total = chunks[0].1 as usize;
        let complete = chunks.len() == total
            && chunks
                .iter()
                .enumerate()
                .all(|(i, &(seq, count, _))| seq as usize == i + 1 && count as usize == total);
        if !complete {
            log::warn!("JPEG: ignoring incomplete ICC profile ({} chunks)", chunks.len());
            return None;
        }
        Some(chunks.iter().flat_map(|&(_, _, data)| data.iter().copied()).collect())
    }

    fn metadata(&self) -> Metadata {
        let mut metadata = Metadata {
            pixel_density: self.density,
            icc_profile: self.icc_profile(),
            text: None,
        };
        for comment in &self.comments {
            metadata.push_text("Comment", comment.clone());
        }
        metadata
    }
}

fn jfif_density(body: &[u8]) -> Option<PixelDensity> {
    if body.len() < 12 {
        log::warn!("JPEG: short JFIF segment");
        return None;
    }
    let unit = match body[7] {
        1 => DensityUnit::Inch,
        2 => DensityUnit::Centimeter,
        _ => return None,
    };
    let x = u16::from_be_bytes([body[8], body[9]]) as f64;
    let y = u16::from_be_bytes([body[10], body[11]]) as f64;
    PixelDensity::new(x, y, unit).ok()
}

/// Find the next marker at or after `pos`, skipping fill bytes.
/// Returns the marker code and the offset just past it.
fn next_marker(data: &[u8], mut pos: usize) -> Result<(u8, usize)> {
    let start = pos;
    loop {
        while data.get(pos).is_some_and(|&b| b != 0xFF) {
            pos += 1;
        }
        while data.get(pos) == Some(&0xFF) {
            pos += 1;
        }
        match data.get(pos) {
            None => return Err(ImagingError::truncated("JPEG ends before the EOI marker")),
            Some(0) => pos += 1,
            Some(&marker) => {
                if pos - start > 1 {
                    log::trace!("JPEG: skipped {} bytes before marker {:02X}", pos - start - 1, marker);
                }
                return Ok((marker, pos + 1));
            }
        }
    }
}

/// Walk the marker segments. With `decode` set, entropy-coded scans are
/// decoded into the frame and the walk continues to EOI; otherwise it stops
/// at the first scan.
fn parse<'a>(data: &'a [u8], params: &ReadParameters, decode: bool) -> Result<Headers<'a>> {
    if !data.starts_with(&[0xFF, SOI]) {
        return Err(ImagingError::header(ImageFormat::Jpeg, "missing SOI marker"));
    }
    if params.image_index != 0 {
        return Err(ImagingError::InvalidParameter(format!(
            "JPEG holds one image, index {} requested",
            params.image_index
        )));
    }
    let mut headers = Headers::default();
    let mut pos = 2;
    let mut scans = 0usize;
    loop {
        let (marker, after) = next_marker(data, pos)?;
        pos = after;
        match marker {
            EOI => break,
            SOI | 0x01 | 0xD0..=0xD7 => continue,
            _ => {}
        }
        let mut r = ByteReader::at(data, pos, Endian::Big)?;
        let len = r.u16()? as usize;
        if len < 2 {
            return Err(ImagingError::header(ImageFormat::Jpeg, format!("segment length {}", len)));
        }
        let body = r.bytes(len - 2)?;
        pos += len;

        if marker != SOS {
            let had_frame = headers.frame.is_some();
            headers.segment(marker, body)?;
            if let (false, Some(frame)) = (had_frame, headers.frame.as_mut()) {
                params.check_dimensions(frame.width as u64, frame.height as u64)?;
                if decode {
                    frame.allocate();
                }
            }
            continue;
        }

        let frame = headers
            .frame
            .as_mut()
            .ok_or_else(|| ImagingError::header(ImageFormat::Jpeg, "scan before frame header"))?;
        if !decode {
            return Ok(headers);
        }
        let scan = ScanHeader::parse(body, frame)?;
        let (intervals, end) = scan::entropy_intervals(data, pos)?;
        scan::decode_scan(frame, &scan, &headers.tables, &intervals, headers.restart_interval)?;
        log::trace!("JPEG: scan {} ({} restart intervals)", scans, intervals.len());
        scans += 1;
        pos = end;
    }
    if headers.frame.is_none() {
        return Err(ImagingError::header(ImageFormat::Jpeg, "no frame header"));
    }
    if decode && scans == 0 {
        return Err(ImagingError::data(ImageFormat::Jpeg, "no scans"));
    }
    Ok(headers)
}

/// JPEG codec (read-only).
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl ImageCodec for JpegCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Jpeg
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.starts_with(&[0xFF, SOI, 0xFF])
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        let headers = parse(data, params, false)?;
        let frame = headers
            .frame
            .as_ref()
            .ok_or_else(|| ImagingError::header(ImageFormat::Jpeg, "no frame header"))?;
        let mut info = ImageInfo::new(ImageFormat::Jpeg, frame.width, frame.height);
        info.bits_per_pixel = 8 * frame.components.len() as u16;
        info.color_type = match headers.transform(frame) {
            ColorTransform::Gray => ColorType::Grayscale,
            ColorTransform::YCbCr => ColorType::YCbCr,
            ColorTransform::Rgb => ColorType::Rgb,
            ColorTransform::Cmyk => ColorType::Cmyk,
            ColorTransform::Ycck => ColorType::Ycck,
        };
        info.compression = "JPEG".into();
        info.is_progressive = frame.progressive;
        info.pixel_density = headers.density;
        info.comments = headers.comments.clone();
        Ok(info)
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        Ok(parse(data, params, false)?.metadata())
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        let headers = parse(data, params, true)?;
        let frame = headers
            .frame
            .as_ref()
            .ok_or_else(|| ImagingError::header(ImageFormat::Jpeg, "no frame header"))?;
        let transform = headers.transform(frame);
        let raster = idct::to_raster(frame, &headers.quant, transform)?;
        log::debug!(
            "JPEG decoded {}x{} {} components as {:?}{}",
            frame.width,
            frame.height,
            frame.components.len(),
            transform,
            if frame.progressive { " (progressive)" } else { "" }
        );
        Ok(DecodedImage {
            raster,
            metadata: headers.metadata(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncodeParameters;
    use crate::raster::{Layout, PixelRaster, RGBA8};

    use super::scan::Block;

    fn segment(out: &mut Vec<u8>, marker: u8, body: &[u8]) {
        out.extend_from_slice(&[0xFF, marker]);
        out.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(body);
    }

    #[derive(Default)]
    struct Bits {
        out: Vec<u8>,
        acc: u8,
        n: u8,
    }

    impl Bits {
        fn put(&mut self, value: u32, len: u32) {
            for i in (0..len).rev() {
                self.acc = (self.acc << 1) | ((value >> i) & 1) as u8;
                self.n += 1;
                if self.n == 8 {
                    self.out.push(self.acc);
                    if self.acc == 0xFF {
                        self.out.push(0);
                    }
                    self.acc = 0;
                    self.n = 0;
                }
            }
        }

        fn flush(&mut self) {
            while self.n != 0 {
                self.put(1, 1);
            }
        }

        /// DC difference with 4-bit category codes (code == category).
        fn dc(&mut self, diff: i32) {
            let category = 32 - diff.unsigned_abs().leading_zeros();
            self.put(category, 4);
            let raw = if diff >= 0 { diff } else { diff + (1 << category) - 1 };
            self.put(raw as u32, category);
        }

        /// AC coefficients 1..=63 shifted right by `low`, with 8-bit codes
        /// (code == symbol).
        fn ac_first(&mut self, block: &Block, low: u32) {
            let mut run = 0u32;
            for &natural in &ZIGZAG[1..] {
                let c = block[natural as usize] as i32;
                let magnitude = c.unsigned_abs() >> low;
                if magnitude == 0 {
                    run += 1;
                    continue;
                }
                while run > 15 {
                    self.put(0xF0, 8);
                    run -= 16;
                }
                let size = 32 - magnitude.leading_zeros();
                self.put((run << 4) | size, 8);
                self.put(if c < 0 { (1 << size) - 1 - magnitude } else { magnitude }, size);
                run = 0;
            }
            if run > 0 {
                self.put(0x00, 8);
            }
        }

        /// Lowest AC bit after an `ac_first` pass with `low == 1`.
        fn ac_refine(&mut self, block: &Block) {
            let magnitude = |k: usize| (block[ZIGZAG[k] as usize] as i32).unsigned_abs();
            let last_new = (1..64).rev().find(|&k| magnitude(k) == 1);
            let mut run = 0u32;
            let mut corrections = Vec::new();
            for k in 1..64 {
                let m = magnitude(k);
                if m == 0 {
                    run += 1;
                    continue;
                }
                while run > 15 && last_new.is_some_and(|e| k <= e) {
                    self.put(0xF0, 8);
                    run -= 16;
                    for bit in corrections.drain(..) {
                        self.put(bit, 1);
                    }
                }
                if m > 1 {
                    corrections.push(m & 1);
                    continue;
                }
                self.put((run << 4) | 1, 8);
                self.put(u32::from(block[ZIGZAG[k] as usize] > 0), 1);
                for bit in corrections.drain(..) {
                    self.put(bit, 1);
                }
                run = 0;
            }
            if run > 0 || !corrections.is_empty() {
                self.put(0x00, 8);
                for bit in corrections.drain(..) {
                    self.put(bit, 1);
                }
            }
        }
    }

    /// Writes JPEGs from natural-order coefficient blocks with every
    /// quantizer set to 1.
    #[derive(Default)]
    struct TestJpeg {
        width: u16,
        height: u16,
        components: Vec<(u8, u8)>,
        progressive: bool,
        restart: usize,
        segments: Vec<(u8, Vec<u8>)>,
    }

    impl TestJpeg {
        fn gray(width: u16, height: u16) -> Self {
            Self {
                width,
                height,
                components: vec![(1, 0x11)],
                ..Self::default()
            }
        }

        /// One scan over the listed components. `blocks` holds each
        /// component's blocks in coding order.
        fn scan(
            &self,
            out: &mut Vec<u8>,
            comps: &[usize],
            spectral: [u8; 3],
            blocks: &[Vec<Block>],
            code: impl Fn(&mut Bits, &mut i32, &Block),
        ) {
            let mut sos = vec![comps.len() as u8];
            for &ci in comps {
                sos.extend_from_slice(&[self.components[ci].0, 0x00]);
            }
            sos.extend_from_slice(&spectral);
            segment(out, SOS, &sos);

            let units: Vec<Vec<(usize, usize)>> = if comps.len() == 1 {
                (0..blocks[comps[0]].len()).map(|b| vec![(comps[0], b)]).collect()
            } else {
                let max_h = self.components.iter().map(|c| (c.1 >> 4) as usize).max().unwrap();
                let max_v = self.components.iter().map(|c| (c.1 & 15) as usize).max().unwrap();
                let mcus = (self.width as usize).div_ceil(8 * max_h) * (self.height as usize).div_ceil(8 * max_v);
                let mut cursors = vec![0; self.components.len()];
                (0..mcus)
                    .map(|_| {
                        let mut unit = Vec::new();
                        for &ci in comps {
                            let sampling = self.components[ci].1;
                            for _ in 0..(sampling >> 4) * (sampling & 15) {
                                unit.push((ci, cursors[ci]));
                                cursors[ci] += 1;
                            }
                        }
                        unit
                    })
                    .collect()
            };

            let mut bits = Bits::default();
            let mut predictors = vec![0; self.components.len()];
            for (m, unit) in units.iter().enumerate() {
                if self.restart > 0 && m > 0 && m % self.restart == 0 {
                    bits.flush();
                    bits.out.extend_from_slice(&[0xFF, 0xD0 + ((m / self.restart - 1) % 8) as u8]);
                    predictors.iter_mut().for_each(|p| *p = 0);
                }
                for &(ci, b) in unit {
                    code(&mut bits, &mut predictors[ci], &blocks[ci][b]);
                }
            }
            bits.flush();
            out.extend_from_slice(&bits.out);
        }

        fn build_blocks(&self, blocks: &[Vec<Block>]) -> Vec<u8> {
            let mut out = vec![0xFF, SOI];
            for (marker, body) in &self.segments {
                segment(&mut out, *marker, body);
            }
            let mut dqt = vec![0u8];
            dqt.extend_from_slice(&[1; 64]);
            segment(&mut out, DQT, &dqt);

            let mut sof = vec![8];
            sof.extend_from_slice(&self.height.to_be_bytes());
            sof.extend_from_slice(&self.width.to_be_bytes());
            sof.push(self.components.len() as u8);
            for &(id, sampling) in &self.components {
                sof.extend_from_slice(&[id, sampling, 0]);
            }
            segment(&mut out, if self.progressive { 0xC2 } else { 0xC0 }, &sof);

            // DC: categories 0..=11 as 4-bit codes. AC: symbols 0..=254 as
            // 8-bit codes.
            let mut dht = vec![0x00];
            let mut counts = [0u8; 16];
            counts[3] = 12;
            dht.extend_from_slice(&counts);
            dht.extend(0..12u8);
            dht.push(0x10);
            let mut counts = [0u8; 16];
            counts[7] = 255;
            dht.extend_from_slice(&counts);
            dht.extend(0..=254u8);
            segment(&mut out, DHT, &dht);
            if self.restart > 0 {
                segment(&mut out, DRI, &(self.restart as u16).to_be_bytes());
            }

            let all: Vec<usize> = (0..self.components.len()).collect();
            if self.progressive {
                self.scan(&mut out, &all, [0, 0, 0x01], blocks, |bits, pred, block| {
                    let v = block[0] as i32 >> 1;
                    bits.dc(v - *pred);
                    *pred = v;
                });
                self.scan(&mut out, &all, [0, 0, 0x10], blocks, |bits, _, block| bits.put((block[0] & 1) as u32, 1));
                for ci in 0..self.components.len() {
                    self.scan(&mut out, &[ci], [1, 63, 0x01], blocks, |bits, _, block| bits.ac_first(block, 1));
                    self.scan(&mut out, &[ci], [1, 63, 0x10], blocks, |bits, _, block| bits.ac_refine(block));
                }
            } else {
                self.scan(&mut out, &all, [0, 63, 0x00], blocks, |bits, pred, block| {
                    bits.dc(block[0] as i32 - *pred);
                    *pred = block[0] as i32;
                    bits.ac_first(block, 0);
                });
            }
            out.extend_from_slice(&[0xFF, EOI]);
            out
        }

        /// Flat blocks with the given DC values.
        fn build(&self, dcs: &[Vec<i32>]) -> Vec<u8> {
            let blocks: Vec<Vec<Block>> = dcs
                .iter()
                .map(|component| component.iter().map(|&dc| coefficients(&[(0, dc as i16)])).collect())
                .collect();
            self.build_blocks(&blocks)
        }
    }

    fn coefficients(values: &[(usize, i16)]) -> Block {
        let mut block = [0i16; 64];
        for &(index, value) in values {
            block[index] = value;
        }
        block
    }

    fn level(v: u8) -> i32 {
        (v as i32 - 128) * 8
    }

    fn decode(data: &[u8]) -> DecodedImage {
        JpegCodec.decode(data, &ReadParameters::default()).unwrap()
    }

    #[test]
    fn test_grayscale_with_jfif_and_comment() {
        let mut jpeg = TestJpeg::gray(16, 8);
        jpeg.segments.push((APP0, b"JFIF\0\x01\x02\x01\x00\x48\x00\x90\0\0".to_vec()));
        jpeg.segments.push((COM, b"hello".to_vec()));
        let data = jpeg.build(&[vec![level(50), level(200)]]);

        let decoded = decode(&data);
        assert_eq!(decoded.raster.layout(), Layout::Grayscale);
        assert_eq!(decoded.raster.pixel(0, 0).r, 50);
        assert_eq!(decoded.raster.pixel(15, 7).r, 200);
        let density = decoded.metadata.pixel_density.unwrap();
        assert_eq!((density.horizontal_dpi(), density.vertical_dpi()), (72.0, 144.0));
        assert_eq!(decoded.metadata.text_value("Comment"), Some("hello"));

        let info = JpegCodec.read_info(&data, &ReadParameters::default()).unwrap();
        assert_eq!((info.width, info.height, info.bits_per_pixel), (16, 8, 8));
        assert_eq!(info.color_type, ColorType::Grayscale);
        assert!(!info.is_progressive);
        assert_eq!(info.comments, vec!["hello".to_string()]);
    }

    #[test]
    fn test_subsampled_color() {
        let jpeg = TestJpeg {
            width: 16,
            height: 16,
            components: vec![(1, 0x22), (2, 0x11), (3, 0x11)],
            ..TestJpeg::default()
        };
        let data = jpeg.build(&[
            vec![level(60), level(90), level(120), level(150)],
            vec![level(100)],
            vec![level(180)],
        ]);
        let raster = decode(&data).raster;
        assert_eq!(raster.layout(), Layout::Rgb);
        let expect = |y| {
            let [r, g, b] = idct::ycc_to_rgb(y, 100, 180);
            RGBA8::new(r, g, b, 255)
        };
        assert_eq!(raster.pixel(0, 0), expect(60));
        assert_eq!(raster.pixel(15, 0), expect(90));
        assert_eq!(raster.pixel(0, 15), expect(120));
        assert_eq!(raster.pixel(15, 15), expect(150));
    }

    #[test]
    fn test_adobe_rgb() {
        let mut jpeg = TestJpeg {
            width: 8,
            height: 8,
            components: vec![(1, 0x11), (2, 0x11), (3, 0x11)],
            ..TestJpeg::default()
        };
        jpeg.segments.push((APP14, b"Adobe\0\x64\0\0\0\0\0".to_vec()));
        let data = jpeg.build(&[vec![level(10)], vec![level(20)], vec![level(30)]]);
        assert_eq!(decode(&data).raster.pixel(3, 3), RGBA8::new(10, 20, 30, 255));
        let info = JpegCodec.read_info(&data, &ReadParameters::default()).unwrap();
        assert_eq!(info.color_type, ColorType::Rgb);
    }

    #[test]
    fn test_restart_intervals() {
        let mut jpeg = TestJpeg::gray(24, 8);
        jpeg.restart = 1;
        let data = jpeg.build(&[vec![level(30), level(130), level(230)]]);
        let raster = decode(&data).raster;
        let row: Vec<u8> = (0..3).map(|b| raster.pixel(b * 8 + 4, 4).r).collect();
        assert_eq!(row, vec![30, 130, 230]);
    }

    #[test]
    fn test_progressive_matches_sequential() {
        let dcs = vec![vec![-333, 101, 7, 640]];
        let sequential = TestJpeg::gray(16, 16).build(&dcs);
        let mut jpeg = TestJpeg::gray(16, 16);
        jpeg.progressive = true;
        let progressive = jpeg.build(&dcs);

        let expected = decode(&sequential).raster;
        assert_eq!(decode(&progressive).raster, expected);
        assert!(JpegCodec.read_info(&progressive, &ReadParameters::default()).unwrap().is_progressive);
    }

    /// Four gray blocks: long zero runs, odd magnitudes and lone +-1
    /// coefficients that only appear in a refinement pass.
    fn textured() -> Vec<Vec<Block>> {
        vec![vec![
            coefficients(&[(0, -200), (1, 35), (8, -17), (9, 3), (63, 1)]),
            coefficients(&[(0, 100), (2, -1), (5, 6), (40, -3), (56, 2)]),
            coefficients(&[(1, -1)]),
            coefficients(&[(0, 50)]),
        ]]
    }

    #[test]
    fn test_ac_coefficients() {
        let blocks = textured();
        let raster = decode(&TestJpeg::gray(16, 16).build_blocks(&blocks)).raster;
        let mut samples = [0u8; 64];
        for (i, block) in blocks[0].iter().enumerate() {
            idct::idct_block(block, &[1; 64], &mut samples);
            let (bx, by) = (i % 2 * 8, i / 2 * 8);
            for y in 0..8 {
                for x in 0..8 {
                    let got = raster.pixel((bx + x) as u32, (by + y) as u32).r;
                    assert_eq!(got, samples[y * 8 + x], "block {} at {},{}", i, x, y);
                }
            }
        }
        assert_ne!(raster.pixel(0, 0), raster.pixel(7, 0));
    }

    #[test]
    fn test_progressive_ac_refinement() {
        let blocks = textured();
        let sequential = decode(&TestJpeg::gray(16, 16).build_blocks(&blocks)).raster;
        let mut jpeg = TestJpeg::gray(16, 16);
        jpeg.progressive = true;
        let progressive = decode(&jpeg.build_blocks(&blocks)).raster;
        assert_eq!(progressive, sequential);
    }

    #[test]
    fn test_adobe_cmyk_and_ycck() {
        let mut jpeg = TestJpeg {
            width: 8,
            height: 8,
            components: vec![(1, 0x11), (2, 0x11), (3, 0x11), (4, 0x11)],
            ..TestJpeg::default()
        };
        jpeg.segments.push((APP14, b"Adobe\0\x64\0\0\0\0\0".to_vec()));
        // Inverted inks: each channel is scaled by the stored K.
        let data = jpeg.build(&[vec![level(200)], vec![level(100)], vec![level(50)], vec![level(128)]]);
        assert_eq!(decode(&data).raster.pixel(4, 4), RGBA8::new(100, 50, 25, 255));
        let info = JpegCodec.read_info(&data, &ReadParameters::default()).unwrap();
        assert_eq!(info.color_type, ColorType::Cmyk);

        jpeg.segments[0].1[11] = 2;
        let data = jpeg.build(&[vec![level(55)], vec![level(128)], vec![level(128)], vec![level(255)]]);
        assert_eq!(decode(&data).raster.pixel(4, 4), RGBA8::new(200, 200, 200, 255));
        let info = JpegCodec.read_info(&data, &ReadParameters::default()).unwrap();
        assert_eq!(info.color_type, ColorType::Ycck);
    }

    #[test]
    fn test_icc_chunks_reassembled() {
        let mut jpeg = TestJpeg::gray(8, 8);
        for (seq, part) in [(2u8, &b"world"[..]), (1, &b"hello "[..])] {
            let mut body = ICC_SIGNATURE.to_vec();
            body.extend_from_slice(&[seq, 2]);
            body.extend_from_slice(part);
            jpeg.segments.push((APP2, body));
        }
        let data = jpeg.build(&[vec![0]]);
        let profile = JpegCodec.read_icc_profile(&data, &ReadParameters::default()).unwrap();
        assert_eq!(profile.as_deref(), Some(&b"hello world"[..]));
    }

    #[test]
    fn test_truncation() {
        let data = TestJpeg::gray(16, 16).build(&[vec![level(1), level(2), level(3), level(4)]]);
        for cut in [1, 4, 30, data.len() - 6, data.len() - 1] {
            let err = JpegCodec.decode(&data[..cut], &ReadParameters::default()).unwrap_err();
            assert!(err.is_truncation() || matches!(err, ImagingError::InvalidHeader { .. }), "cut {}: {}", cut, err);
        }
        assert!(JpegCodec.decode(&data[..data.len() - 1], &ReadParameters::default()).unwrap_err().is_truncation());
    }

    #[test]
    fn test_unsupported_processes() {
        let mut data = vec![0xFF, SOI];
        segment(&mut data, 0xC9, &[8, 0, 1, 0, 1, 1, 1, 0x11, 0]);
        data.extend_from_slice(&[0xFF, EOI]);
        let err = JpegCodec.decode(&data, &ReadParameters::default()).unwrap_err();
        assert!(matches!(err, ImagingError::UnsupportedFeature { .. }));

        let raster = PixelRaster::from_gray8(1, 1, vec![0]).unwrap();
        let err = JpegCodec.encode(&raster, &Metadata::default(), &EncodeParameters::default()).unwrap_err();
        assert!(matches!(err, ImagingError::UnsupportedFormat { .. }));
    }
}
