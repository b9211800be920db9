//! Error types for the image codec library.

use thiserror::Error;

use crate::codec::ImageFormat;

/// Result type alias for the library.
pub type Result<T> = std::result::Result<T, ImagingError>;

/// Which side of a codec an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Decoding pixels or metadata.
    Read,
    /// Encoding pixels.
    Write,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Read => write!(f, "reading"),
            Operation::Write => write!(f, "writing"),
        }
    }
}

/// Main error type for the image codec library.
#[derive(Error, Debug)]
pub enum ImagingError {
    /// No registered signature matched the stream.
    #[error("Unknown image format")]
    UnknownFormat,

    /// The format was recognized but the requested operation is not implemented.
    #[error("{format} does not support {operation}")]
    UnsupportedFormat {
        /// Format that was selected.
        format: ImageFormat,
        /// Operation that was requested.
        operation: Operation,
    },

    /// A structural field violates the format definition.
    #[error("Invalid {format} header: {reason}")]
    InvalidHeader {
        /// Format being parsed.
        format: ImageFormat,
        /// What was wrong.
        reason: String,
    },

    /// Width or height is zero or beyond the configured limit.
    #[error("Invalid image dimensions {width}x{height}")]
    InvalidDimensions {
        /// Declared width.
        width: u64,
        /// Declared height.
        height: u64,
    },

    /// The stream ended before the declared content.
    #[error("Truncated data: {0}")]
    TruncatedData(String),

    /// The compressed payload is corrupt.
    #[error("Invalid {format} data: {reason}")]
    InvalidData {
        /// Format being parsed.
        format: ImageFormat,
        /// What was wrong.
        reason: String,
    },

    /// A valid but unimplemented variant of the format.
    #[error("Unsupported {format} feature: {feature}")]
    UnsupportedFeature {
        /// Format being parsed.
        format: ImageFormat,
        /// The feature that was encountered.
        feature: String,
    },

    /// The raster needs a color capability the target format lacks.
    #[error("{format} cannot store a {required} image without lossy conversion")]
    UnsupportedColorMode {
        /// Target format.
        format: ImageFormat,
        /// Representation the raster requires.
        required: String,
    },

    /// A metadata field cannot be represented by the target format.
    #[error("{format} cannot store {field} metadata")]
    MetadataUnsupported {
        /// Target format.
        format: ImageFormat,
        /// Metadata field that was requested.
        field: &'static str,
    },

    /// An encode or read parameter is out of range for the format.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A caller-built raster violates the raster invariants.
    #[error("Invalid raster: {0}")]
    InvalidRaster(String),

    /// Parameter file could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImagingError {
    pub(crate) fn header(format: ImageFormat, reason: impl Into<String>) -> Self {
        ImagingError::InvalidHeader {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn data(format: ImageFormat, reason: impl Into<String>) -> Self {
        ImagingError::InvalidData {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn feature(format: ImageFormat, feature: impl Into<String>) -> Self {
        ImagingError::UnsupportedFeature {
            format,
            feature: feature.into(),
        }
    }

    pub(crate) fn truncated(context: impl Into<String>) -> Self {
        ImagingError::TruncatedData(context.into())
    }

    /// Whether this error reports a stream that ended early.
    pub fn is_truncation(&self) -> bool {
        matches!(self, ImagingError::TruncatedData(_))
    }
}

impl From<toml::de::Error> for ImagingError {
    fn from(err: toml::de::Error) -> Self {
        ImagingError::Config(err.to_string())
    }
}
