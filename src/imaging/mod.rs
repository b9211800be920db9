//! Stream-level entry points.
//!
//! Every function reads the whole stream into memory, picks a codec
//! (from `format_hint` or by identification) and hands the bytes over.
//! `None` parameters behave exactly like the `Default` parameters.

use std::io::{BufRead, Read, Write};

use crate::codec::{self, DecodedImage, ImageCodec, ImageFormat};
use crate::config::{EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::metadata::{ImageInfo, Metadata};
use crate::raster::PixelRaster;

fn read_all<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    Ok(data)
}

/// Resolve the codec for `data` and return it with the effective parameters.
fn select(data: &[u8], params: Option<&ReadParameters>) -> Result<(&'static dyn ImageCodec, ReadParameters)> {
    let params = params.cloned().unwrap_or_default();
    let format = match params.format_hint {
        Some(format) => format,
        None => codec::identify(data).ok_or(ImagingError::UnknownFormat)?,
    };
    log::trace!("selected {} for {} byte stream", format, data.len());
    Ok((codec::decoder_for(format)?, params))
}

/// Decode the selected image from `data`.
pub fn decode_bytes(data: &[u8], params: Option<&ReadParameters>) -> Result<DecodedImage> {
    let (codec, params) = select(data, params)?;
    codec.decode(data, &params)
}

/// Header facts about the image held in `data`.
pub fn info_from_bytes(data: &[u8], params: Option<&ReadParameters>) -> Result<ImageInfo> {
    let (codec, params) = select(data, params)?;
    codec.read_info(data, &params)
}

/// Decode an image from a stream.
pub fn read_image<R: Read>(mut reader: R, params: Option<&ReadParameters>) -> Result<PixelRaster> {
    Ok(read_image_with_metadata(&mut reader, params)?.raster)
}

/// Decode an image and its ancillary data from a stream.
pub fn read_image_with_metadata<R: Read>(mut reader: R, params: Option<&ReadParameters>) -> Result<DecodedImage> {
    let data = read_all(&mut reader)?;
    let decoded = decode_bytes(&data, params)?;
    log::debug!(
        "read {}x{} {:?} raster from {} bytes",
        decoded.raster.width(),
        decoded.raster.height(),
        decoded.raster.layout(),
        data.len()
    );
    Ok(decoded)
}

/// Encode `raster` in `format` and return the bytes.
pub fn encode_to_vec(
    raster: &PixelRaster,
    format: ImageFormat,
    params: Option<&EncodeParameters>,
) -> Result<Vec<u8>> {
    encode_with_metadata_to_vec(raster, &Metadata::default(), format, params)
}

/// Encode `raster` and `metadata` in `format` and return the bytes.
pub fn encode_with_metadata_to_vec(
    raster: &PixelRaster,
    metadata: &Metadata,
    format: ImageFormat,
    params: Option<&EncodeParameters>,
) -> Result<Vec<u8>> {
    let default = EncodeParameters::default();
    let params = params.unwrap_or(&default);
    let codec = codec::encoder_for(format)?;
    let data = codec.encode(raster, metadata, params)?;
    log::debug!(
        "encoded {}x{} raster as {} in {} bytes",
        raster.width(),
        raster.height(),
        format,
        data.len()
    );
    Ok(data)
}

/// Encode `raster` in `format` to a stream.
pub fn write_image<W: Write>(
    raster: &PixelRaster,
    writer: W,
    format: ImageFormat,
    params: Option<&EncodeParameters>,
) -> Result<()> {
    write_image_with_metadata(raster, &Metadata::default(), writer, format, params)
}

/// Encode `raster` with `metadata` in `format` to a stream.
///
/// Nothing is written unless encoding succeeds.
pub fn write_image_with_metadata<W: Write>(
    raster: &PixelRaster,
    metadata: &Metadata,
    mut writer: W,
    format: ImageFormat,
    params: Option<&EncodeParameters>,
) -> Result<()> {
    let data = encode_with_metadata_to_vec(raster, metadata, format, params)?;
    writer.write_all(&data)?;
    writer.flush()?;
    Ok(())
}

/// Header facts about an image without decoding pixels.
pub fn get_image_info<R: Read>(mut reader: R, params: Option<&ReadParameters>) -> Result<ImageInfo> {
    let data = read_all(&mut reader)?;
    info_from_bytes(&data, params)
}

/// Width and height of an image.
pub fn get_image_size<R: Read>(reader: R, params: Option<&ReadParameters>) -> Result<(u32, u32)> {
    let info = get_image_info(reader, params)?;
    Ok((info.width, info.height))
}

/// Ancillary data of an image without decoding pixels.
pub fn get_metadata<R: Read>(mut reader: R, params: Option<&ReadParameters>) -> Result<Metadata> {
    let data = read_all(&mut reader)?;
    let (codec, params) = select(&data, params)?;
    codec.read_metadata(&data, &params)
}

/// Embedded ICC profile, if any.
pub fn get_icc_profile<R: Read>(mut reader: R, params: Option<&ReadParameters>) -> Result<Option<Vec<u8>>> {
    let data = read_all(&mut reader)?;
    let (codec, params) = select(&data, params)?;
    codec.read_icc_profile(&data, &params)
}

/// Identify the format of a stream without consuming it.
pub fn identify<R: BufRead + ?Sized>(reader: &mut R) -> Result<ImageFormat> {
    codec::identify_stream(reader)?.ok_or(ImagingError::UnknownFormat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> PixelRaster {
        PixelRaster::from_rgb8(3, 2, (0..18).map(|i| i as u8 * 13).collect()).unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let raster = sample();
        let mut out = Vec::new();
        write_image(&raster, &mut out, ImageFormat::Png, None).unwrap();
        assert_eq!(get_image_size(Cursor::new(&out), None).unwrap(), (3, 2));
        let decoded = read_image(Cursor::new(&out), None).unwrap();
        assert!(decoded.same_pixels(&raster));
    }

    #[test]
    fn test_format_hint_skips_identification() {
        let data = encode_to_vec(&sample(), ImageFormat::Tga, None).unwrap();
        let hinted = ReadParameters::with_format(ImageFormat::Tga);
        assert!(read_image(Cursor::new(&data), Some(&hinted)).is_ok());
        let wrong = ReadParameters::with_format(ImageFormat::Gif);
        assert!(read_image(Cursor::new(&data), Some(&wrong)).is_err());
    }

    #[test]
    fn test_unknown_format_everywhere() {
        let junk = b"definitely not an image".to_vec();
        assert!(matches!(read_image(Cursor::new(&junk), None), Err(ImagingError::UnknownFormat)));
        assert!(matches!(get_image_info(Cursor::new(&junk), None), Err(ImagingError::UnknownFormat)));
        assert!(matches!(get_metadata(Cursor::new(&junk), None), Err(ImagingError::UnknownFormat)));
        assert!(matches!(get_icc_profile(Cursor::new(&junk), None), Err(ImagingError::UnknownFormat)));
        assert!(matches!(identify(&mut Cursor::new(&junk)), Err(ImagingError::UnknownFormat)));
    }

    #[test]
    fn test_failed_encode_writes_nothing() {
        let mut out = Vec::new();
        let err = write_image(&sample(), &mut out, ImageFormat::Jpeg, None).unwrap_err();
        assert!(matches!(err, ImagingError::UnsupportedFormat { .. }));
        assert!(out.is_empty());
    }
}
