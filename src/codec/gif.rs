//! GIF codec (87a and 89a).
//!
//! The decoder walks the whole block stream to the trailer, so a file cut
//! anywhere reports truncation even when the selected frame is intact.
//! Frame `n` is the logical screen after frames `0..=n` have been drawn and
//! disposed in order, starting from a fully transparent screen.

use crate::config::{Compression, EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::io::{ByteReader, ByteWriter, Endian};
use crate::metadata::{ColorType, ImageInfo, Metadata};
use crate::raster::{Palette, PixelRaster, Pixels, RGBA8};

use super::color::{self, ColorPolicy, IndexedSupport};
use super::{lzw, AlphaSupport, DecodedImage, ImageCodec, ImageFormat};

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

const MAX_SUB_BLOCK: usize = 255;

/// GIF codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct GifCodec;

struct Frame<'a> {
    left: u16,
    top: u16,
    width: u16,
    height: u16,
    interlaced: bool,
    local_table: Option<&'a [u8]>,
    transparent: Option<u8>,
    disposal: Disposal,
    min_code_size: u8,
    blocks: Vec<&'a [u8]>,
}

/// What happens to a frame's rectangle before the next frame is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposal {
    Keep,
    Background,
    Previous,
}

impl Disposal {
    fn from_gce(flags: u8) -> Self {
        match (flags >> 2) & 0x07 {
            2 => Disposal::Background,
            3 => Disposal::Previous,
            _ => Disposal::Keep,
        }
    }
}

#[derive(Clone, Copy)]
struct Control {
    transparent: Option<u8>,
    disposal: Disposal,
}

struct Stream<'a> {
    width: u16,
    height: u16,
    global_table: Option<&'a [u8]>,
    table_bits: u8,
    frames: Vec<Frame<'a>>,
    comments: Vec<String>,
}

fn sub_blocks<'a>(r: &mut ByteReader<'a>) -> Result<Vec<&'a [u8]>> {
    let mut blocks = Vec::new();
    loop {
        let len = r.u8()? as usize;
        if len == 0 {
            return Ok(blocks);
        }
        blocks.push(r.bytes(len)?);
    }
}

fn parse<'a>(data: &'a [u8], params: &ReadParameters) -> Result<Stream<'a>> {
    let mut r = ByteReader::new(data, Endian::Little);
    let magic = r.bytes(6)?;
    if magic != &b"GIF87a"[..] && magic != &b"GIF89a"[..] {
        return Err(ImagingError::header(ImageFormat::Gif, "bad signature"));
    }
    let width = r.u16()?;
    let height = r.u16()?;
    params.check_dimensions(width as u64, height as u64)?;
    let flags = r.u8()?;
    r.skip(2)?;
    let table_bits = (flags & 0x07) + 1;
    let global_table = if flags & 0x80 != 0 {
        Some(r.bytes(3 << table_bits)?)
    } else {
        None
    };

    let mut frames = Vec::new();
    let mut comments = Vec::new();
    let mut pending: Option<Control> = None;
    loop {
        match r.u8()? {
            0x2C => {
                let left = r.u16()?;
                let top = r.u16()?;
                let frame_width = r.u16()?;
                let frame_height = r.u16()?;
                let flags = r.u8()?;
                let local_table = if flags & 0x80 != 0 {
                    Some(r.bytes(3 << ((flags & 0x07) + 1))?)
                } else {
                    None
                };
                let min_code_size = r.u8()?;
                let blocks = sub_blocks(&mut r)?;
                let control = pending.take();
                log::trace!("GIF frame {}x{} at {},{}", frame_width, frame_height, left, top);
                frames.push(Frame {
                    left,
                    top,
                    width: frame_width,
                    height: frame_height,
                    interlaced: flags & 0x40 != 0,
                    local_table,
                    transparent: control.and_then(|c| c.transparent),
                    disposal: control.map_or(Disposal::Keep, |c| c.disposal),
                    min_code_size,
                    blocks,
                });
            }
            0x21 => {
                let label = r.u8()?;
                let blocks = sub_blocks(&mut r)?;
                match label {
                    0xF9 => {
                        let gce = blocks.first().copied().unwrap_or_default();
                        pending = (gce.len() >= 4).then(|| Control {
                            transparent: (gce[0] & 0x01 != 0).then_some(gce[3]),
                            disposal: Disposal::from_gce(gce[0]),
                        });
                    }
                    0xFE => {
                        let text: Vec<u8> = blocks.concat();
                        comments.push(text.iter().map(|&b| b as char).collect());
                    }
                    other => log::trace!("GIF: skipping extension 0x{:02X}", other),
                }
            }
            0x3B => break,
            other => {
                return Err(ImagingError::data(ImageFormat::Gif, format!("unknown block 0x{:02X}", other)));
            }
        }
    }

    Ok(Stream {
        width,
        height,
        global_table,
        table_bits,
        frames,
        comments,
    })
}

fn metadata_from(stream: &Stream<'_>) -> Metadata {
    let mut metadata = Metadata::default();
    for comment in &stream.comments {
        metadata.push_text("Comment", comment.clone());
    }
    metadata
}

fn frame_palette(stream: &Stream<'_>, frame: &Frame<'_>) -> Result<Palette> {
    let table = frame
        .local_table
        .or(stream.global_table)
        .ok_or_else(|| ImagingError::data(ImageFormat::Gif, "frame has no color table"))?;
    let colors = table
        .chunks_exact(3)
        .enumerate()
        .map(|(i, c)| {
            let alpha = if frame.transparent == Some(i as u8) { 0 } else { 255 };
            RGBA8::new(c[0], c[1], c[2], alpha)
        })
        .collect();
    Palette::new(colors)
}

/// Row order of an interlaced frame.
fn interlaced_rows(height: usize) -> Vec<usize> {
    [(0, 8), (4, 8), (2, 4), (1, 2)]
        .iter()
        .flat_map(|&(start, step)| (start..height).step_by(step))
        .collect()
}

/// Color indices of `frame` in row order.
fn frame_indices(frame: &Frame<'_>, palette: &Palette) -> Result<Vec<u8>> {
    let (fw, fh) = (frame.width as usize, frame.height as usize);
    let data: Vec<u8> = frame.blocks.concat();
    let decoded = lzw::decode_gif(&data, frame.min_code_size, fw * fh)?;
    if let Some(&bad) = decoded.iter().find(|&&i| i as usize >= palette.len()) {
        return Err(ImagingError::data(ImageFormat::Gif, format!("color index {} outside table", bad)));
    }
    if !frame.interlaced {
        return Ok(decoded);
    }
    let mut indices = vec![0u8; fw * fh];
    for (src, dst) in interlaced_rows(fh).into_iter().enumerate() {
        indices[dst * fw..(dst + 1) * fw].copy_from_slice(&decoded[src * fw..(src + 1) * fw]);
    }
    Ok(indices)
}

/// Logical screen as RGBA, clipped frames drawn on it.
struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Canvas {
    fn new(width: u16, height: u16) -> Self {
        let (width, height) = (width as usize, height as usize);
        Self {
            width,
            height,
            pixels: vec![0; width * height * 4],
        }
    }

    /// Canvas rows and columns covered by `frame`.
    fn clip(&self, frame: &Frame<'_>) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let x0 = (frame.left as usize).min(self.width);
        let y0 = (frame.top as usize).min(self.height);
        let x1 = (frame.left as usize + frame.width as usize).min(self.width);
        let y1 = (frame.top as usize + frame.height as usize).min(self.height);
        (y0..y1, x0..x1)
    }

    fn draw(&mut self, frame: &Frame<'_>, palette: &Palette, indices: &[u8]) {
        let (rows, cols) = self.clip(frame);
        let fw = frame.width as usize;
        for cy in rows {
            for cx in cols.clone() {
                let index = indices[(cy - frame.top as usize) * fw + cx - frame.left as usize];
                if frame.transparent == Some(index) {
                    continue;
                }
                let c = palette.colors()[index as usize];
                let at = (cy * self.width + cx) * 4;
                self.pixels[at..at + 4].copy_from_slice(&[c.r, c.g, c.b, c.a]);
            }
        }
    }

    fn clear(&mut self, frame: &Frame<'_>) {
        let (rows, cols) = self.clip(frame);
        for cy in rows {
            let start = (cy * self.width + cols.start) * 4;
            let end = (cy * self.width + cols.end) * 4;
            self.pixels[start..end].fill(0);
        }
    }
}

fn decode_frame(stream: &Stream<'_>, index: usize) -> Result<PixelRaster> {
    let frame = stream.frames.get(index).ok_or_else(|| {
        ImagingError::InvalidParameter(format!(
            "GIF image index {} out of range ({} frames)",
            index,
            stream.frames.len()
        ))
    })?;
    let (sw, sh) = (stream.width as u32, stream.height as u32);
    let covers = frame.left == 0 && frame.top == 0 && frame.width == stream.width && frame.height == stream.height;
    if covers && (index == 0 || frame.transparent.is_none()) {
        let palette = frame_palette(stream, frame)?;
        let indices = frame_indices(frame, &palette)?;
        return PixelRaster::from_indexed(sw, sh, palette, indices);
    }

    let mut canvas = Canvas::new(stream.width, stream.height);
    for (i, frame) in stream.frames[..=index].iter().enumerate() {
        let palette = frame_palette(stream, frame)?;
        let indices = frame_indices(frame, &palette)?;
        let saved = (frame.disposal == Disposal::Previous && i < index).then(|| canvas.pixels.clone());
        canvas.draw(frame, &palette, &indices);
        if i == index {
            break;
        }
        match frame.disposal {
            Disposal::Keep => {}
            Disposal::Background => canvas.clear(frame),
            Disposal::Previous => {
                if let Some(saved) = saved {
                    canvas.pixels = saved;
                }
            }
        }
    }
    PixelRaster::from_rgba8(sw, sh, canvas.pixels)
}

impl ImageCodec for GifCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Gif
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.starts_with(b"GIF87a") || prefix.starts_with(b"GIF89a")
    }

    fn read_info(&self, data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
        let stream = parse(data, params)?;
        let mut info = ImageInfo::new(ImageFormat::Gif, stream.width as u32, stream.height as u32);
        let first = stream.frames.get(params.image_index);
        let bits = first
            .and_then(|f| f.local_table.map(|t| (t.len() / 3).trailing_zeros() as u16))
            .unwrap_or(stream.table_bits as u16);
        info.bits_per_pixel = bits;
        info.color_type = ColorType::Indexed;
        info.has_transparency = first.map_or(false, |f| f.transparent.is_some());
        info.compression = "LZW".into();
        info.image_count = stream.frames.len();
        info.is_progressive = first.map_or(false, |f| f.interlaced);
        info.comments = stream.comments.clone();
        Ok(info)
    }

    fn read_metadata(&self, data: &[u8], params: &ReadParameters) -> Result<Metadata> {
        Ok(metadata_from(&parse(data, params)?))
    }

    fn decode(&self, data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
        let stream = parse(data, params)?;
        let raster = decode_frame(&stream, params.image_index)?;
        log::debug!(
            "GIF decoded frame {} of {} ({}x{})",
            params.image_index,
            stream.frames.len(),
            raster.width(),
            raster.height()
        );
        Ok(DecodedImage {
            raster,
            metadata: metadata_from(&stream),
        })
    }

    fn encode(&self, raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
        params.validate()?;
        params.compression_or(ImageFormat::Gif, &[Compression::Lzw], Compression::Lzw)?;
        let (width, height) = raster.dimensions();
        if width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(ImagingError::InvalidDimensions {
                width: width as u64,
                height: height as u64,
            });
        }
        let prepared = color::prepare(ImageFormat::Gif, raster, &POLICY, params)?;
        let extra = super::write_metadata(ImageFormat::Gif, metadata, params)?;
        let (palette, indices) = match prepared.pixels() {
            Pixels::Indexed { palette, indices } => (palette, indices),
            other => return Err(color::unexpected_layout(ImageFormat::Gif, other.layout())),
        };

        let mut bits = 1u8;
        while (1usize << bits) < palette.len() {
            bits += 1;
        }
        let transparent = palette.colors().iter().position(|c| c.a == 0);

        let mut out = ByteWriter::new(Endian::Little);
        out.bytes(b"GIF89a");
        out.u16(width as u16);
        out.u16(height as u16);
        out.u8(0x80 | ((bits - 1) << 4) | (bits - 1));
        out.u8(0);
        out.u8(0);
        for c in palette.colors() {
            out.bytes(&[c.r, c.g, c.b]);
        }
        out.zeros(((1usize << bits) - palette.len()) * 3);

        for tag in extra.text.unwrap_or_default() {
            if tag.key != "Comment" {
                if params.strict_metadata {
                    return Err(ImagingError::MetadataUnsupported {
                        format: ImageFormat::Gif,
                        field: "text key",
                    });
                }
                log::debug!("GIF: dropping text key {:?}", tag.key);
                continue;
            }
            out.bytes(&[0x21, 0xFE]);
            let bytes: Vec<u8> = tag.value.chars().map(|c| if (c as u32) < 256 { c as u8 } else { b'?' }).collect();
            for block in bytes.chunks(MAX_SUB_BLOCK) {
                out.u8(block.len() as u8);
                out.bytes(block);
            }
            out.u8(0);
        }
        if let Some(index) = transparent {
            out.bytes(&[0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, index as u8, 0x00]);
        }

        out.u8(0x2C);
        out.u16(0);
        out.u16(0);
        out.u16(width as u16);
        out.u16(height as u16);
        out.u8(0);
        let min_code_size = bits.max(2);
        out.u8(min_code_size);
        let compressed = lzw::encode_gif(indices, min_code_size);
        for block in compressed.chunks(MAX_SUB_BLOCK) {
            out.u8(block.len() as u8);
            out.bytes(block);
        }
        out.u8(0);
        out.u8(0x3B);

        log::debug!(
            "GIF encoded {}x{} with {} colors ({} bytes)",
            width,
            height,
            palette.len(),
            out.len()
        );
        Ok(out.into_inner())
    }
}
