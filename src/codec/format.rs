//! Image format identifiers.

use serde::{Deserialize, Serialize};

/// Every format known to the registry.
///
/// The discriminant doubles as the index into the registry table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Portable Network Graphics.
    Png = 0,
    /// Graphics Interchange Format.
    Gif,
    /// Tagged Image File Format.
    Tiff,
    /// JPEG/JFIF, read only.
    Jpeg,
    /// Windows bitmap.
    Bmp,
    /// Windows icon or cursor.
    Ico,
    /// Photoshop document, read only.
    Psd,
    /// ZSoft Paintbrush.
    Pcx,
    /// Multi-page PCX container.
    Dcx,
    /// Netpbm bitmap.
    Pbm,
    /// Netpbm graymap.
    Pgm,
    /// Netpbm pixmap.
    Ppm,
    /// Netpbm arbitrary map.
    Pam,
    /// Truevision TGA.
    Tga,
    /// Wireless bitmap.
    Wbmp,
    /// X BitMap.
    Xbm,
    /// X PixMap.
    Xpm,
}

impl ImageFormat {
    /// All formats in registry order.
    pub const ALL: [ImageFormat; 17] = [
        ImageFormat::Png,
        ImageFormat::Gif,
        ImageFormat::Tiff,
        ImageFormat::Jpeg,
        ImageFormat::Bmp,
        ImageFormat::Ico,
        ImageFormat::Psd,
        ImageFormat::Pcx,
        ImageFormat::Dcx,
        ImageFormat::Pbm,
        ImageFormat::Pgm,
        ImageFormat::Ppm,
        ImageFormat::Pam,
        ImageFormat::Tga,
        ImageFormat::Wbmp,
        ImageFormat::Xbm,
        ImageFormat::Xpm,
    ];

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::Png => "PNG",
            ImageFormat::Gif => "GIF",
            ImageFormat::Tiff => "TIFF",
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Bmp => "BMP",
            ImageFormat::Ico => "ICO",
            ImageFormat::Psd => "PSD",
            ImageFormat::Pcx => "PCX",
            ImageFormat::Dcx => "DCX",
            ImageFormat::Pbm => "PBM",
            ImageFormat::Pgm => "PGM",
            ImageFormat::Ppm => "PPM",
            ImageFormat::Pam => "PAM",
            ImageFormat::Tga => "TGA",
            ImageFormat::Wbmp => "WBMP",
            ImageFormat::Xbm => "XBM",
            ImageFormat::Xpm => "XPM",
        }
    }

    /// Common file extensions, preferred first.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            ImageFormat::Png => &["png"],
            ImageFormat::Gif => &["gif"],
            ImageFormat::Tiff => &["tif", "tiff"],
            ImageFormat::Jpeg => &["jpg", "jpeg", "jpe", "jfif"],
            ImageFormat::Bmp => &["bmp", "dib"],
            ImageFormat::Ico => &["ico", "cur"],
            ImageFormat::Psd => &["psd"],
            ImageFormat::Pcx => &["pcx", "pcc"],
            ImageFormat::Dcx => &["dcx"],
            ImageFormat::Pbm => &["pbm"],
            ImageFormat::Pgm => &["pgm"],
            ImageFormat::Ppm => &["ppm", "pnm"],
            ImageFormat::Pam => &["pam"],
            ImageFormat::Tga => &["tga", "icb", "vda", "vst"],
            ImageFormat::Wbmp => &["wbmp"],
            ImageFormat::Xbm => &["xbm"],
            ImageFormat::Xpm => &["xpm"],
        }
    }

    /// Preferred file extension.
    pub fn extension(self) -> &'static str {
        self.extensions()[0]
    }

    /// Look a format up by file extension, ignoring case.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.extensions().contains(&ext.as_str()))
    }

    /// MIME type.
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Tiff => "image/tiff",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Ico => "image/vnd.microsoft.icon",
            ImageFormat::Psd => "image/vnd.adobe.photoshop",
            ImageFormat::Pcx => "image/x-pcx",
            ImageFormat::Dcx => "image/x-dcx",
            ImageFormat::Pbm => "image/x-portable-bitmap",
            ImageFormat::Pgm => "image/x-portable-graymap",
            ImageFormat::Ppm => "image/x-portable-pixmap",
            ImageFormat::Pam => "image/x-portable-arbitrarymap",
            ImageFormat::Tga => "image/x-tga",
            ImageFormat::Wbmp => "image/vnd.wap.wbmp",
            ImageFormat::Xbm => "image/x-xbitmap",
            ImageFormat::Xpm => "image/x-xpixmap",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminants_follow_table_order() {
        for (i, format) in ImageFormat::ALL.iter().enumerate() {
            assert_eq!(*format as usize, i);
        }
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(ImageFormat::from_extension("TIF"), Some(ImageFormat::Tiff));
        assert_eq!(ImageFormat::from_extension("cur"), Some(ImageFormat::Ico));
        assert_eq!(ImageFormat::from_extension("webp"), None);
    }
}
