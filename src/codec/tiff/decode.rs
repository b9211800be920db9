//! TIFF reading.

use crate::config::ReadParameters;
use crate::error::{ImagingError, Result};
use crate::io::{expand_bits, packed_len, unpack_samples, Endian};
use crate::metadata::{ColorType, DensityUnit, ImageInfo, Metadata, PixelDensity};
use crate::raster::{Palette, PixelRaster, Pixels, RGBA8};

use super::super::{lzw, packbits, zlib, DecodedImage, ImageFormat};
use super::ifd::{self, Directories, Ifd};
use super::tags::*;
use super::{compression, TEXT_TAGS};

/// Header fields every directory has, read without validation.
struct Basic {
    width: u32,
    height: u32,
    bits: u8,
    samples: usize,
    photometric: u32,
    compression: u32,
}

fn basic(ifd: &Ifd<'_>) -> Result<Basic> {
    let width = ifd.required(IMAGE_WIDTH, "ImageWidth")?.value()?;
    let height = ifd.required(IMAGE_LENGTH, "ImageLength")?.value()?;
    let samples = ifd.value_or(SAMPLES_PER_PIXEL, 1)? as usize;
    let bits = match ifd.get(BITS_PER_SAMPLE) {
        Some(entry) => {
            let values = entry.values()?;
            let first = values.first().copied().unwrap_or(1);
            if values.iter().any(|&v| v != first) {
                return Err(ImagingError::feature(ImageFormat::Tiff, "mixed bits per sample"));
            }
            first
        }
        None => 1,
    };
    let photometric = match ifd.get(PHOTOMETRIC) {
        Some(entry) => entry.value()?,
        None if samples >= 3 => 2,
        None => 1,
    };
    Ok(Basic {
        width,
        height,
        bits: bits.min(255) as u8,
        samples,
        photometric,
        compression: ifd.value_or(COMPRESSION, compression::NONE)?,
    })
}

#[derive(Debug, Clone, Copy)]
struct Alpha {
    index: usize,
    associated: bool,
}

/// Color samples per pixel before any extra samples.
fn color_samples(photometric: u32) -> usize {
    match photometric {
        2 => 3,
        5 => 4,
        _ => 1,
    }
}

/// Alpha channel from ExtraSamples. A single undeclared extra sample after
/// gray or RGB is read as unassociated alpha.
fn alpha_of(extra: Option<&[u32]>, photometric: u32, samples: usize) -> Option<Alpha> {
    let base = color_samples(photometric);
    let alpha = match extra {
        Some(kinds) => kinds.iter().position(|&v| v == 1 || v == 2).map(|i| Alpha {
            index: base + i,
            associated: kinds[i] == 1,
        }),
        None if matches!(photometric, 0 | 1 | 2) && samples == base + 1 => Some(Alpha {
            index: base,
            associated: false,
        }),
        None => None,
    };
    alpha.filter(|a| a.index < samples)
}

struct Image<'a> {
    ifd: &'a Ifd<'a>,
    endian: Endian,
    width: u32,
    height: u32,
    bits: u8,
    samples: usize,
    photometric: u32,
    compression: u32,
    planar: bool,
    predictor: u32,
    reversed_bits: bool,
    alpha: Option<Alpha>,
}

fn describe<'a>(dirs: &'a Directories<'a>, index: usize, params: &ReadParameters) -> Result<Image<'a>> {
    let ifd = dirs.ifds.get(index).ok_or_else(|| {
        ImagingError::InvalidParameter(format!(
            "TIFF image index {} out of range ({} directories)",
            index,
            dirs.ifds.len()
        ))
    })?;
    let b = basic(ifd)?;
    params.check_dimensions(b.width as u64, b.height as u64)?;
    if !matches!(b.bits, 1 | 2 | 4 | 8 | 16) {
        return Err(ImagingError::feature(ImageFormat::Tiff, format!("{} bits per sample", b.bits)));
    }
    if ifd.get(SAMPLE_FORMAT).map(|e| e.values()).transpose()?.map_or(false, |v| v.iter().any(|&f| f != 1)) {
        return Err(ImagingError::feature(ImageFormat::Tiff, "signed or floating point samples"));
    }
    match b.photometric {
        0..=3 => {}
        5 if ifd.value_or(INK_SET, 1)? == 1 => {}
        6 => return Err(ImagingError::feature(ImageFormat::Tiff, "YCbCr photometric interpretation")),
        other => {
            return Err(ImagingError::feature(ImageFormat::Tiff, format!("photometric interpretation {}", other)));
        }
    }
    if b.samples < color_samples(b.photometric) {
        return Err(ImagingError::header(
            ImageFormat::Tiff,
            format!("{} samples for photometric {}", b.samples, b.photometric),
        ));
    }
    if b.photometric == 3 && b.bits > 8 {
        return Err(ImagingError::feature(ImageFormat::Tiff, "16-bit palette"));
    }
    let extra = ifd.get(EXTRA_SAMPLES).map(|e| e.values()).transpose()?;
    let alpha = alpha_of(extra.as_deref(), b.photometric, b.samples);
    let planar = match ifd.value_or(PLANAR_CONFIGURATION, 1)? {
        1 => false,
        2 => true,
        other => {
            return Err(ImagingError::header(ImageFormat::Tiff, format!("planar configuration {}", other)));
        }
    };
    Ok(Image {
        ifd,
        endian: dirs.endian,
        width: b.width,
        height: b.height,
        bits: b.bits,
        samples: b.samples,
        photometric: b.photometric,
        compression: b.compression,
        planar,
        predictor: ifd.value_or(PREDICTOR, 1)?,
        reversed_bits: ifd.value_or(FILL_ORDER, 1)? == 2,
        alpha,
    })
}

/// One strip or tile.
struct Chunk<'a> {
    x: u32,
    y: u32,
    width: u32,
    rows: u32,
    plane: usize,
    data: &'a [u8],
}

fn chunks<'a>(img: &Image<'_>, data: &'a [u8]) -> Result<Vec<Chunk<'a>>> {
    let planes = if img.planar { img.samples } else { 1 };
    let samples_in_chunk = if img.planar { 1 } else { img.samples };
    let tiled = img.ifd.get(TILE_WIDTH).is_some();

    let (chunk_w, chunk_h, offsets_tag, counts_tag) = if tiled {
        let tw = img.ifd.required(TILE_WIDTH, "TileWidth")?.value()?;
        let th = img.ifd.required(TILE_LENGTH, "TileLength")?.value()?;
        if tw == 0 || th == 0 {
            return Err(ImagingError::header(ImageFormat::Tiff, "zero tile size"));
        }
        (tw, th, TILE_OFFSETS, TILE_BYTE_COUNTS)
    } else {
        let rows = img.ifd.value_or(ROWS_PER_STRIP, u32::MAX)?.clamp(1, img.height);
        (img.width, rows, STRIP_OFFSETS, STRIP_BYTE_COUNTS)
    };
    let across = img.width.div_ceil(chunk_w);
    let down = img.height.div_ceil(chunk_h);
    let per_plane = across as usize * down as usize;

    let offsets = img.ifd.required(offsets_tag, "data offsets")?.values()?;
    let counts = match img.ifd.get(counts_tag) {
        Some(entry) => entry.values()?,
        None if img.compression == compression::NONE && !tiled => (0..offsets.len())
            .map(|i| {
                let rows = chunk_h.min(img.height - (i % per_plane) as u32 * chunk_h);
                (rows as usize * packed_len(img.width as usize * samples_in_chunk, img.bits)) as u32
            })
            .collect(),
        None => return Err(ImagingError::header(ImageFormat::Tiff, "missing byte counts")),
    };
    if offsets.len() < per_plane * planes || counts.len() < per_plane * planes {
        return Err(ImagingError::header(
            ImageFormat::Tiff,
            format!("{} data offsets for {} chunks", offsets.len().min(counts.len()), per_plane * planes),
        ));
    }

    let mut out = Vec::with_capacity(per_plane * planes);
    for plane in 0..planes {
        for i in 0..per_plane {
            let k = plane * per_plane + i;
            let start = offsets[k] as usize;
            let end = start.saturating_add(counts[k] as usize);
            let bytes = data.get(start..end).ok_or_else(|| {
                ImagingError::truncated(format!("TIFF chunk {} at {}..{} past end of {} bytes", k, start, end, data.len()))
            })?;
            let x = (i as u32 % across) * chunk_w;
            let y = (i as u32 / across) * chunk_h;
            out.push(Chunk {
                x,
                y,
                width: chunk_w,
                rows: if tiled { chunk_h } else { chunk_h.min(img.height - y) },
                plane,
                data: bytes,
            });
        }
    }
    Ok(out)
}

fn inflate(img: &Image<'_>, raw: &[u8], expected: usize) -> Result<Vec<u8>> {
    let flipped;
    let raw = if img.reversed_bits {
        flipped = raw.iter().map(|b| b.reverse_bits()).collect::<Vec<u8>>();
        &flipped[..]
    } else {
        raw
    };
    match img.compression {
        compression::NONE => raw
            .get(..expected)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| ImagingError::truncated(format!("TIFF strip holds {} of {} bytes", raw.len(), expected))),
        compression::PACKBITS => Ok(packbits::decode(raw, expected)?.0),
        compression::LZW => lzw::decode_tiff(raw, expected),
        compression::DEFLATE | compression::DEFLATE_OLD => {
            let mut out = zlib::decompress(ImageFormat::Tiff, raw, expected)?;
            if out.len() < expected {
                return Err(ImagingError::truncated(format!(
                    "TIFF Deflate strip inflated to {} of {} bytes",
                    out.len(),
                    expected
                )));
            }
            out.truncate(expected);
            Ok(out)
        }
        other => Err(ImagingError::feature(
            ImageFormat::Tiff,
            format!("{} compression", compression::name(other)),
        )),
    }
}

fn undo_predictor(img: &Image<'_>, row: &mut [u8], stride: usize) -> Result<()> {
    match (img.predictor, img.bits) {
        (1, _) => Ok(()),
        (2, 8) => {
            for i in stride..row.len() {
                row[i] = row[i].wrapping_add(row[i - stride]);
            }
            Ok(())
        }
        (2, 16) => {
            let read = |b: &[u8]| match img.endian {
                Endian::Little => u16::from_le_bytes([b[0], b[1]]),
                Endian::Big => u16::from_be_bytes([b[0], b[1]]),
            };
            for i in stride..row.len() / 2 {
                let value = read(&row[i * 2..]).wrapping_add(read(&row[(i - stride) * 2..]));
                let bytes = match img.endian {
                    Endian::Little => value.to_le_bytes(),
                    Endian::Big => value.to_be_bytes(),
                };
                row[i * 2..i * 2 + 2].copy_from_slice(&bytes);
            }
            Ok(())
        }
        (predictor, bits) => Err(ImagingError::feature(
            ImageFormat::Tiff,
            format!("predictor {} with {} bits per sample", predictor, bits),
        )),
    }
}

/// Decode every chunk into one interleaved buffer of 8-bit samples
/// (raw values below 8 bits, high bytes for 16 bits).
fn gather(img: &Image<'_>, data: &[u8]) -> Result<Vec<u8>> {
    let width = img.width as usize;
    let spp = img.samples;
    let mut samples = vec![0u8; width * img.height as usize * spp];
    let in_chunk = if img.planar { 1 } else { spp };

    for chunk in chunks(img, data)? {
        let row_bytes = packed_len(chunk.width as usize * in_chunk, img.bits);
        let mut raw = inflate(img, chunk.data, row_bytes * chunk.rows as usize)?;
        for r in 0..chunk.rows as usize {
            let y = chunk.y as usize + r;
            if y >= img.height as usize {
                break;
            }
            let row = &mut raw[r * row_bytes..(r + 1) * row_bytes];
            undo_predictor(img, row, in_chunk)?;
            let values = if img.bits == 16 {
                let high = if img.endian == Endian::Little { 1 } else { 0 };
                row.chunks_exact(2).map(|p| p[high]).collect()
            } else {
                unpack_samples(row, img.bits, chunk.width as usize * in_chunk)?
            };
            for x in 0..chunk.width as usize {
                let cx = chunk.x as usize + x;
                if cx >= width {
                    break;
                }
                for s in 0..in_chunk {
                    let dest = (y * width + cx) * spp + chunk.plane + s;
                    samples[dest] = values[x * in_chunk + s];
                }
            }
        }
    }
    Ok(samples)
}

fn unpremultiply(c: u8, a: u8) -> u8 {
    if a == 0 {
        0
    } else {
        ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8
    }
}

fn to_raster(img: &Image<'_>, samples: Vec<u8>) -> Result<PixelRaster> {
    let (w, h) = (img.width, img.height);
    let count = w as usize * h as usize;
    let spp = img.samples;
    let depth = if img.bits == 16 { 8 } else { img.bits };
    let scale = |v: u8| expand_bits(v, depth);
    let pixel = |i: usize| &samples[i * spp..(i + 1) * spp];

    let palette = if img.photometric == 3 {
        let map = img.ifd.required(COLOR_MAP, "ColorMap")?.values()?;
        let n = 1usize << img.bits;
        if map.len() < n * 3 {
            return Err(ImagingError::header(ImageFormat::Tiff, "ColorMap too short"));
        }
        let colors = (0..n)
            .map(|i| RGBA8::new((map[i] >> 8) as u8, (map[n + i] >> 8) as u8, (map[2 * n + i] >> 8) as u8, 255))
            .collect();
        Some(Palette::new(colors)?)
    } else {
        None
    };

    let color_of = |p: &[u8]| -> RGBA8 {
        match img.photometric {
            0 => {
                let v = 255 - scale(p[0]);
                RGBA8::new(v, v, v, 255)
            }
            1 => {
                let v = scale(p[0]);
                RGBA8::new(v, v, v, 255)
            }
            2 => RGBA8::new(scale(p[0]), scale(p[1]), scale(p[2]), 255),
            3 => palette.as_ref().and_then(|pal| pal.get(p[0] as usize)).unwrap_or(RGBA8::new(0, 0, 0, 255)),
            _ => {
                let k = 255 - scale(p[3]) as u32;
                let ch = |c: u8| ((255 - scale(c) as u32) * k / 255) as u8;
                RGBA8::new(ch(p[0]), ch(p[1]), ch(p[2]), 255)
            }
        }
    };

    if let Some(alpha) = img.alpha {
        let mut out = Vec::with_capacity(count * 4);
        for i in 0..count {
            let p = pixel(i);
            let a = scale(p[alpha.index]);
            let mut c = color_of(p);
            if alpha.associated {
                c = RGBA8::new(unpremultiply(c.r, a), unpremultiply(c.g, a), unpremultiply(c.b, a), a);
            }
            out.extend_from_slice(&[c.r, c.g, c.b, a]);
        }
        return PixelRaster::from_rgba8(w, h, out);
    }

    match img.photometric {
        0 | 1 if img.bits == 1 => {
            let invert = img.photometric == 0;
            let bits = (0..count).map(|i| (pixel(i)[0] & 1) ^ invert as u8).collect();
            PixelRaster::new(w, h, Pixels::Bitonal(bits))
        }
        0 | 1 => PixelRaster::from_gray8(w, h, (0..count).map(|i| color_of(pixel(i)).r).collect()),
        3 => {
            let indices = (0..count).map(|i| pixel(i)[0]).collect();
            let palette = palette.clone().ok_or_else(|| ImagingError::header(ImageFormat::Tiff, "missing ColorMap"))?;
            PixelRaster::from_indexed(w, h, palette, indices)
        }
        _ => {
            let mut out = Vec::with_capacity(count * 3);
            for i in 0..count {
                let c = color_of(pixel(i));
                out.extend_from_slice(&[c.r, c.g, c.b]);
            }
            PixelRaster::from_rgb8(w, h, out)
        }
    }
}

fn density(ifd: &Ifd<'_>) -> Result<Option<PixelDensity>> {
    let (Some(x), Some(y)) = (ifd.get(X_RESOLUTION), ifd.get(Y_RESOLUTION)) else {
        return Ok(None);
    };
    let unit = match ifd.value_or(RESOLUTION_UNIT, 2)? {
        2 => DensityUnit::Inch,
        3 => DensityUnit::Centimeter,
        _ => return Ok(None),
    };
    match PixelDensity::new(x.rational()?, y.rational()?, unit) {
        Ok(d) => Ok(Some(d)),
        Err(_) => {
            log::warn!("TIFF: ignoring zero resolution");
            Ok(None)
        }
    }
}

fn metadata_of(ifd: &Ifd<'_>) -> Result<Metadata> {
    let mut metadata = Metadata {
        pixel_density: density(ifd)?,
        icc_profile: ifd.get(ICC_PROFILE).map(|e| e.data.to_vec()).filter(|p| !p.is_empty()),
        text: None,
    };
    for (tag, name) in TEXT_TAGS {
        if let Some(entry) = ifd.get(tag) {
            if entry.field_type == ifd::ASCII {
                metadata.push_text(name, entry.ascii());
            }
        }
    }
    Ok(metadata)
}

fn select<'a>(dirs: &'a Directories<'a>, params: &ReadParameters) -> Result<&'a Ifd<'a>> {
    dirs.ifds.get(params.image_index).ok_or_else(|| {
        ImagingError::InvalidParameter(format!(
            "TIFF image index {} out of range ({} directories)",
            params.image_index,
            dirs.ifds.len()
        ))
    })
}

pub(super) fn read_info(data: &[u8], params: &ReadParameters) -> Result<ImageInfo> {
    let dirs = ifd::parse(data)?;
    let ifd = select(&dirs, params)?;
    let b = basic(ifd)?;
    params.check_dimensions(b.width as u64, b.height as u64)?;
    let mut info = ImageInfo::new(ImageFormat::Tiff, b.width, b.height);
    info.bits_per_pixel = (b.bits as usize * b.samples).min(u16::MAX as usize) as u16;
    info.color_type = match b.photometric {
        0 | 1 if b.bits == 1 => ColorType::BlackAndWhite,
        0 | 1 => ColorType::Grayscale,
        2 => ColorType::Rgb,
        3 => ColorType::Indexed,
        5 => ColorType::Cmyk,
        6 => ColorType::YCbCr,
        _ => ColorType::Other,
    };
    let extra = ifd.get(EXTRA_SAMPLES).map(|e| e.values()).transpose()?;
    info.has_transparency = alpha_of(extra.as_deref(), b.photometric, b.samples).is_some();
    info.compression = compression::name(b.compression).into();
    info.image_count = dirs.ifds.len();
    let metadata = metadata_of(ifd)?;
    info.pixel_density = metadata.pixel_density;
    info.comments = metadata.text_value("ImageDescription").map(str::to_string).into_iter().collect();
    Ok(info)
}

pub(super) fn read_metadata(data: &[u8], params: &ReadParameters) -> Result<Metadata> {
    let dirs = ifd::parse(data)?;
    metadata_of(select(&dirs, params)?)
}

pub(super) fn decode(data: &[u8], params: &ReadParameters) -> Result<DecodedImage> {
    let dirs = ifd::parse(data)?;
    let img = describe(&dirs, params.image_index, params)?;
    let samples = gather(&img, data)?;
    let raster = to_raster(&img, samples)?;
    log::debug!(
        "TIFF decoded {}x{} photometric {} {} bits x {} ({})",
        img.width,
        img.height,
        img.photometric,
        img.bits,
        img.samples,
        compression::name(img.compression)
    );
    Ok(DecodedImage {
        raster,
        metadata: metadata_of(img.ifd)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ByteWriter;
    use crate::raster::Layout;

    use super::super::ifd::IfdBuilder;

    fn build(entries: impl FnOnce(&mut IfdBuilder, u32), pixel_data: &[u8]) -> Vec<u8> {
        let mut out = ByteWriter::new(Endian::Little);
        out.bytes(b"II");
        out.u16(42);
        out.u32(0);
        let data_at = out.len() as u32;
        out.bytes(pixel_data);
        let mut builder = IfdBuilder::new();
        entries(&mut builder, data_at);
        let offset = builder.write(&mut out);
        out.set_u32_at(4, offset);
        out.into_inner()
    }

    fn read(data: &[u8]) -> PixelRaster {
        decode(data, &ReadParameters::default()).unwrap().raster
    }

    #[test]
    fn test_planar_rgb() {
        // 2x1 RGB, one strip per plane.
        let data = build(
            |b, at| {
                b.long(IMAGE_WIDTH, 2);
                b.long(IMAGE_LENGTH, 1);
                b.shorts(BITS_PER_SAMPLE, &[8, 8, 8]);
                b.short(PHOTOMETRIC, 2);
                b.short(SAMPLES_PER_PIXEL, 3);
                b.short(PLANAR_CONFIGURATION, 2);
                b.longs(STRIP_OFFSETS, &[at, at + 2, at + 4]);
                b.longs(STRIP_BYTE_COUNTS, &[2, 2, 2]);
            },
            &[10, 20, 30, 40, 50, 60],
        );
        let raster = read(&data);
        assert_eq!(raster.pixel(0, 0), RGBA8::new(10, 30, 50, 255));
        assert_eq!(raster.pixel(1, 0), RGBA8::new(20, 40, 60, 255));
    }

    #[test]
    fn test_undeclared_fourth_sample_is_alpha() {
        let data = build(
            |b, at| {
                b.long(IMAGE_WIDTH, 2);
                b.long(IMAGE_LENGTH, 1);
                b.shorts(BITS_PER_SAMPLE, &[8, 8, 8, 8]);
                b.short(PHOTOMETRIC, 2);
                b.short(SAMPLES_PER_PIXEL, 4);
                b.long(STRIP_OFFSETS, at);
                b.long(STRIP_BYTE_COUNTS, 8);
            },
            &[10, 20, 30, 255, 40, 50, 60, 128],
        );
        let raster = read(&data);
        assert_eq!(raster.layout(), Layout::Rgba);
        assert_eq!(raster.pixel(0, 0), RGBA8::new(10, 20, 30, 255));
        assert_eq!(raster.pixel(1, 0), RGBA8::new(40, 50, 60, 128));
        assert!(read_info(&data, &ReadParameters::default()).unwrap().has_transparency);
    }

    #[test]
    fn test_horizontal_predictor() {
        let data = build(
            |b, at| {
                b.long(IMAGE_WIDTH, 4);
                b.long(IMAGE_LENGTH, 1);
                b.short(BITS_PER_SAMPLE, 8);
                b.short(PHOTOMETRIC, 1);
                b.short(PREDICTOR, 2);
                b.long(STRIP_OFFSETS, at);
                b.long(STRIP_BYTE_COUNTS, 4);
            },
            &[100, 1, 1, 0xFF],
        );
        let raster = read(&data);
        assert_eq!(raster.layout(), Layout::Grayscale);
        let values: Vec<u8> = raster.iter_rgba().map(|c| c.r).collect();
        assert_eq!(values, vec![100, 101, 102, 101]);
    }

    #[test]
    fn test_tiles_white_is_zero() {
        // 3x3 4-bit gray in 2x2 tiles; edge tiles are padded.
        let mut tiles = Vec::new();
        for tile in 0..4u8 {
            tiles.extend_from_slice(&[tile << 4 | tile, tile << 4 | tile]);
        }
        let data = build(
            |b, at| {
                b.long(IMAGE_WIDTH, 3);
                b.long(IMAGE_LENGTH, 3);
                b.short(BITS_PER_SAMPLE, 4);
                b.short(PHOTOMETRIC, 0);
                b.long(TILE_WIDTH, 2);
                b.long(TILE_LENGTH, 2);
                b.longs(TILE_OFFSETS, &[at, at + 2, at + 4, at + 6]);
                b.longs(TILE_BYTE_COUNTS, &[2, 2, 2, 2]);
            },
            &tiles,
        );
        let raster = read(&data);
        assert_eq!(raster.pixel(0, 0).r, 255);
        assert_eq!(raster.pixel(2, 0).r, 255 - 0x11);
        assert_eq!(raster.pixel(0, 2).r, 255 - 0x22);
        assert_eq!(raster.pixel(2, 2).r, 255 - 0x33);
    }

    #[test]
    fn test_big_endian_sixteen_bit() {
        let mut file = vec![b'M', b'M', 0, 42, 0, 0, 0, 8];
        let entries: [(u16, u16, u32, u32); 6] = [
            (IMAGE_WIDTH, 3, 1, 2 << 16),
            (IMAGE_LENGTH, 3, 1, 1 << 16),
            (BITS_PER_SAMPLE, 3, 1, 16 << 16),
            (PHOTOMETRIC, 3, 1, 1 << 16),
            (STRIP_OFFSETS, 4, 1, 8 + 2 + 6 * 12 + 4),
            (STRIP_BYTE_COUNTS, 4, 1, 4),
        ];
        file.extend_from_slice(&6u16.to_be_bytes());
        for (tag, kind, count, value) in entries {
            file.extend_from_slice(&tag.to_be_bytes());
            file.extend_from_slice(&kind.to_be_bytes());
            file.extend_from_slice(&count.to_be_bytes());
            file.extend_from_slice(&value.to_be_bytes());
        }
        file.extend_from_slice(&[0, 0, 0, 0]);
        file.extend_from_slice(&[0x12, 0x34, 0xAB, 0xCD]);
        let raster = read(&file);
        assert_eq!(raster.pixel(0, 0).r, 0x12);
        assert_eq!(raster.pixel(1, 0).r, 0xAB);
    }

    #[test]
    fn test_strip_past_end_is_truncation() {
        let data = build(
            |b, at| {
                b.long(IMAGE_WIDTH, 4);
                b.long(IMAGE_LENGTH, 4);
                b.short(BITS_PER_SAMPLE, 8);
                b.short(PHOTOMETRIC, 1);
                b.long(STRIP_OFFSETS, at);
                b.long(STRIP_BYTE_COUNTS, 1 << 20);
            },
            &[0; 16],
        );
        assert!(decode(&data, &ReadParameters::default()).unwrap_err().is_truncation());
    }

    #[test]
    fn test_unsupported_compression() {
        let data = build(
            |b, at| {
                b.long(IMAGE_WIDTH, 1);
                b.long(IMAGE_LENGTH, 1);
                b.short(COMPRESSION, 4);
                b.short(PHOTOMETRIC, 0);
                b.long(STRIP_OFFSETS, at);
                b.long(STRIP_BYTE_COUNTS, 1);
            },
            &[0],
        );
        let err = decode(&data, &ReadParameters::default()).unwrap_err();
        assert!(matches!(err, ImagingError::UnsupportedFeature { .. }));
        let info = read_info(&data, &ReadParameters::default()).unwrap();
        assert_eq!(info.compression, "CCITT Group 4");
        assert_eq!(info.color_type, ColorType::BlackAndWhite);
    }
}
