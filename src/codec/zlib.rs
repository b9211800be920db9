//! zlib wrappers around `miniz_oxide`.

use miniz_oxide::inflate::TINFLStatus;

use crate::error::{ImagingError, Result};

use super::ImageFormat;

/// Level used when the caller does not pick one.
pub(crate) const DEFAULT_LEVEL: u8 = 6;

/// Compress `data` into a zlib stream.
pub(crate) fn compress(data: &[u8], level: Option<u8>) -> Vec<u8> {
    miniz_oxide::deflate::compress_to_vec_zlib(data, level.unwrap_or(DEFAULT_LEVEL).min(10))
}

/// Inflate a zlib stream, producing at most about `limit` bytes.
pub(crate) fn decompress(format: ImageFormat, data: &[u8], limit: usize) -> Result<Vec<u8>> {
    miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(data, limit.saturating_add(64)).map_err(
        |err| match err.status {
            TINFLStatus::FailedCannotMakeProgress | TINFLStatus::NeedsMoreInput => {
                ImagingError::truncated(format!("{} zlib stream ended early", format))
            }
            TINFLStatus::HasMoreOutput => {
                ImagingError::data(format, "zlib stream inflates past the expected size")
            }
            TINFLStatus::Adler32Mismatch => ImagingError::data(format, "zlib checksum mismatch"),
            status => ImagingError::data(format, format!("corrupt zlib stream ({:?})", status)),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_and_truncation() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let packed = compress(&data, Some(9));
        assert_eq!(decompress(ImageFormat::Png, &packed, data.len()).unwrap(), data);

        let err = decompress(ImageFormat::Png, &packed[..packed.len() / 2], data.len()).unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn test_corrupt_stream() {
        let err = decompress(ImageFormat::Tiff, &[0x78, 0x9C, 0xFF, 0xFF, 0xFF], 10).unwrap_err();
        assert!(matches!(err, ImagingError::InvalidData { .. } | ImagingError::TruncatedData(_)));
    }
}
