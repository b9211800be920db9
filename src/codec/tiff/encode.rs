//! TIFF writing.

use crate::config::{Compression, EncodeParameters};
use crate::error::{ImagingError, Result};
use crate::io::{pack_samples, ByteWriter, Endian};
use crate::metadata::{DensityUnit, Metadata};
use crate::raster::{PixelRaster, Pixels};

use super::super::color::{self, ColorPolicy, IndexedSupport};
use super::super::{lzw, packbits, write_metadata, zlib, AlphaSupport, ImageFormat};
use super::ifd::IfdBuilder;
use super::tags::*;
use super::{compression, TEXT_TAGS};

const POLICY: ColorPolicy = ColorPolicy {
    bitonal: true,
    grayscale: true,
    indexed: Some(IndexedSupport {
        max_colors: 256,
        alpha: AlphaSupport::None,
    }),
    rgb: true,
    rgba: true,
};

/// Uncompressed bytes aimed for in each strip.
const STRIP_TARGET: usize = 8192;

fn rational(value: f64) -> (u32, u32) {
    if (value - value.round()).abs() < 1e-9 && value < u32::MAX as f64 {
        (value.round() as u32, 1)
    } else {
        ((value * 10_000.0).round().min(u32::MAX as f64) as u32, 10_000)
    }
}

/// Samples of the prepared raster packed into rows, plus the tags that
/// describe them.
struct Planes {
    photometric: u16,
    bits: u16,
    samples: u16,
    row_bytes: usize,
    data: Vec<u8>,
}

fn pack(raster: &PixelRaster, builder: &mut IfdBuilder) -> Planes {
    let width = raster.width() as usize;
    let pack_rows = |samples: &[u8], bits: u8| -> Vec<u8> {
        samples.chunks(width).flat_map(|row| pack_samples(row, bits)).collect()
    };
    match raster.pixels() {
        Pixels::Bitonal(bits) => Planes {
            photometric: 1,
            bits: 1,
            samples: 1,
            row_bytes: width.div_ceil(8),
            data: pack_rows(bits, 1),
        },
        Pixels::Grayscale(gray) => Planes {
            photometric: 1,
            bits: 8,
            samples: 1,
            row_bytes: width,
            data: gray.clone(),
        },
        Pixels::Indexed { palette, indices } => {
            let depth: u8 = match palette.len() {
                0..=2 => 1,
                3..=4 => 2,
                5..=16 => 4,
                _ => 8,
            };
            let n = 1usize << depth;
            let mut map = vec![0u16; n * 3];
            for (i, c) in palette.colors().iter().enumerate() {
                map[i] = c.r as u16 * 257;
                map[n + i] = c.g as u16 * 257;
                map[2 * n + i] = c.b as u16 * 257;
            }
            builder.shorts(COLOR_MAP, &map);
            Planes {
                photometric: 3,
                bits: depth as u16,
                samples: 1,
                row_bytes: (width * depth as usize).div_ceil(8),
                data: pack_rows(indices, depth),
            }
        }
        Pixels::Rgb(rgb) => Planes {
            photometric: 2,
            bits: 8,
            samples: 3,
            row_bytes: width * 3,
            data: rgb.clone(),
        },
        Pixels::Rgba(rgba) => {
            builder.short(EXTRA_SAMPLES, 2);
            Planes {
                photometric: 2,
                bits: 8,
                samples: 4,
                row_bytes: width * 4,
                data: rgba.clone(),
            }
        }
    }
}

fn compress_strip(strip: &[u8], row_bytes: usize, scheme: Compression, level: Option<u8>) -> Vec<u8> {
    match scheme {
        Compression::None => strip.to_vec(),
        Compression::Rle => {
            let mut out = Vec::with_capacity(strip.len() + strip.len() / 64 + 1);
            for row in strip.chunks(row_bytes) {
                packbits::encode(row, &mut out);
            }
            out
        }
        Compression::Lzw => lzw::encode_tiff(strip),
        Compression::Deflate => zlib::compress(strip, level),
    }
}

/// Write `raster` as a single-image little-endian TIFF.
pub(super) fn encode(raster: &PixelRaster, metadata: &Metadata, params: &EncodeParameters) -> Result<Vec<u8>> {
    params.validate()?;
    let scheme = params.compression_or(
        ImageFormat::Tiff,
        &[Compression::None, Compression::Rle, Compression::Lzw, Compression::Deflate],
        Compression::Lzw,
    )?;
    let prepared = color::prepare(ImageFormat::Tiff, raster, &POLICY, params)?;
    let extra = write_metadata(ImageFormat::Tiff, metadata, params)?;
    let (width, height) = prepared.dimensions();

    let mut builder = IfdBuilder::new();
    let planes = pack(&prepared, &mut builder);
    let rows_per_strip = (STRIP_TARGET / planes.row_bytes.max(1)).clamp(1, height as usize);

    let mut out = ByteWriter::with_capacity(Endian::Little, planes.data.len() / 2 + 256);
    out.bytes(b"II");
    out.u16(42);
    out.u32(0);

    let mut offsets = Vec::new();
    let mut counts = Vec::new();
    for strip in planes.data.chunks(rows_per_strip * planes.row_bytes) {
        let packed = compress_strip(strip, planes.row_bytes, scheme, params.compression_level);
        if out.len() % 2 == 1 {
            out.u8(0);
        }
        offsets.push(out.len() as u32);
        counts.push(packed.len() as u32);
        out.bytes(&packed);
    }

    let code = match scheme {
        Compression::None => compression::NONE,
        Compression::Rle => compression::PACKBITS,
        Compression::Lzw => compression::LZW,
        Compression::Deflate => compression::DEFLATE,
    };
    builder.long(IMAGE_WIDTH, width);
    builder.long(IMAGE_LENGTH, height);
    builder.shorts(BITS_PER_SAMPLE, &vec![planes.bits; planes.samples as usize]);
    builder.short(COMPRESSION, code as u16);
    builder.short(PHOTOMETRIC, planes.photometric);
    builder.longs(STRIP_OFFSETS, &offsets);
    builder.short(SAMPLES_PER_PIXEL, planes.samples);
    builder.long(ROWS_PER_STRIP, rows_per_strip as u32);
    builder.longs(STRIP_BYTE_COUNTS, &counts);
    builder.short(PLANAR_CONFIGURATION, 1);

    if let Some(density) = extra.density {
        let (x_num, x_den) = rational(density.horizontal());
        let (y_num, y_den) = rational(density.vertical());
        builder.rational(X_RESOLUTION, x_num, x_den);
        builder.rational(Y_RESOLUTION, y_num, y_den);
        builder.short(
            RESOLUTION_UNIT,
            match density.unit() {
                DensityUnit::Inch => 2,
                DensityUnit::Centimeter => 3,
            },
        );
    }
    if let Some(icc) = extra.icc_profile {
        builder.undefined(ICC_PROFILE, icc);
    }
    for tag in extra.text.unwrap_or_default() {
        match TEXT_TAGS.iter().find(|(_, name)| *name == tag.key) {
            Some(&(code, _)) => builder.ascii(code, &tag.value.replace('\0', " ")),
            None if params.strict_metadata => {
                return Err(ImagingError::MetadataUnsupported {
                    format: ImageFormat::Tiff,
                    field: "text key",
                });
            }
            None => log::debug!("TIFF: dropping text key {:?}", tag.key),
        }
    }

    let ifd_offset = builder.write(&mut out);
    out.set_u32_at(4, ifd_offset);
    log::debug!(
        "TIFF encoded {}x{} photometric {} in {} strips ({:?})",
        width,
        height,
        planes.photometric,
        offsets.len(),
        scheme
    );
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ImageCodec, TiffCodec};
    use crate::config::ReadParameters;
    use crate::metadata::{PixelDensity, TextTag};
    use crate::raster::{Layout, Palette, RGBA8};

    fn roundtrip(raster: &PixelRaster, params: &EncodeParameters) -> PixelRaster {
        let data = encode(raster, &Metadata::default(), params).unwrap();
        TiffCodec.decode(&data, &ReadParameters::default()).unwrap().raster
    }

    fn gradient(width: u32, height: u32) -> PixelRaster {
        let data = (0..width * height)
            .flat_map(|i| [(i % 256) as u8, (i * 7 % 256) as u8, (i / 3 % 256) as u8, (255 - i % 128) as u8])
            .collect();
        PixelRaster::from_rgba8(width, height, data).unwrap()
    }

    #[test]
    fn test_every_compression_roundtrips() {
        let raster = gradient(300, 40);
        for scheme in [Compression::None, Compression::Rle, Compression::Lzw, Compression::Deflate] {
            let decoded = roundtrip(&raster, &EncodeParameters::default().with_compression(scheme));
            assert_eq!(decoded.layout(), Layout::Rgba, "{:?}", scheme);
            assert!(decoded.same_pixels(&raster), "{:?}", scheme);
        }
    }

    #[test]
    fn test_layouts_are_kept() {
        let bitonal = PixelRaster::new(10, 3, Pixels::Bitonal((0..30).map(|i| (i % 3 == 0) as u8).collect())).unwrap();
        assert_eq!(roundtrip(&bitonal, &EncodeParameters::default()), bitonal);

        let gray = PixelRaster::from_gray8(2, 2, vec![0, 80, 160, 240]).unwrap();
        assert_eq!(roundtrip(&gray, &EncodeParameters::default()), gray);

        let palette = Palette::new(vec![RGBA8::new(255, 0, 0, 255), RGBA8::new(0, 0, 255, 255), RGBA8::new(9, 9, 9, 255)]).unwrap();
        let indexed = PixelRaster::from_indexed(3, 1, palette, vec![2, 1, 0]).unwrap();
        let decoded = roundtrip(&indexed, &EncodeParameters::default());
        assert_eq!(decoded.layout(), Layout::Indexed);
        assert!(decoded.same_pixels(&indexed));

        let single = PixelRaster::from_rgb8(1, 1, vec![1, 2, 3]).unwrap();
        assert!(roundtrip(&single, &EncodeParameters::default()).same_pixels(&single));
    }

    #[test]
    fn test_metadata_roundtrip() {
        let metadata = Metadata {
            pixel_density: Some(PixelDensity::from_pixels_per_inch(75.0, 150.0).unwrap()),
            icc_profile: Some(vec![7; 300]),
            text: Some(vec![TextTag::new("Software", "pixelcodec"), TextTag::new("Rating", "5")]),
        };
        let raster = gradient(4, 4);
        let data = encode(&raster, &metadata, &EncodeParameters::default()).unwrap();
        let read = TiffCodec.read_metadata(&data, &ReadParameters::default()).unwrap();
        let density = read.pixel_density.unwrap();
        assert_eq!(density.horizontal_dpi(), 75.0);
        assert_eq!(density.vertical_dpi(), 150.0);
        assert_eq!(read.icc_profile.as_deref(), Some(&[7u8; 300][..]));
        assert_eq!(read.text_value("Software"), Some("pixelcodec"));
        assert_eq!(read.text_value("Rating"), None);

        let strict = EncodeParameters {
            strict_metadata: true,
            ..EncodeParameters::default()
        };
        let err = encode(&raster, &metadata, &strict).unwrap_err();
        assert!(matches!(err, ImagingError::MetadataUnsupported { .. }));
    }

    #[test]
    fn test_fractional_resolution() {
        assert_eq!(rational(300.0), (300, 1));
        assert_eq!(rational(28.35), (283_500, 10_000));
    }

    #[test]
    fn test_truncated_file() {
        let data = encode(&gradient(50, 50), &Metadata::default(), &EncodeParameters::default()).unwrap();
        for cut in [10, data.len() / 2, data.len() - 1] {
            let err = TiffCodec.decode(&data[..cut], &ReadParameters::default()).unwrap_err();
            assert!(err.is_truncation(), "cut at {}: {}", cut, err);
        }
    }
}
