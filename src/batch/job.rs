//! Batch job definitions.

use std::path::PathBuf;

use crate::codec::ImageFormat;
use crate::error::ImagingError;

/// Status of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Job is waiting to be processed.
    Pending,
    /// Job completed successfully.
    Completed,
    /// Job failed with an error.
    Failed,
    /// Job was cancelled before it ran.
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// One file to convert.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Position in the batch.
    pub id: u64,

    /// Source file path.
    pub source_path: PathBuf,

    /// Destination file path.
    pub output_path: PathBuf,
}

impl ConversionJob {
    /// Create a new job.
    pub fn new(id: u64, source_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            id,
            source_path,
            output_path,
        }
    }

    /// Get the file name.
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// What a successful conversion did.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    /// Format the source was identified as.
    pub source_format: ImageFormat,
    /// Format written.
    pub target_format: ImageFormat,
    /// Image width.
    pub width: u32,
    /// Image height.
    pub height: u32,
    /// Source file size.
    pub input_bytes: u64,
    /// Written file size.
    pub output_bytes: u64,
}

/// Result of a batch job.
#[derive(Debug)]
pub struct JobResult {
    /// The job that was processed.
    pub job: ConversionJob,

    /// Outcome (if successful).
    pub outcome: Option<ConversionOutcome>,

    /// Error (if failed).
    pub error: Option<ImagingError>,

    /// Time taken in milliseconds.
    pub duration_ms: u64,
}

impl JobResult {
    /// Result for a job that never ran.
    pub fn cancelled(job: ConversionJob) -> Self {
        Self {
            job,
            outcome: None,
            error: None,
            duration_ms: 0,
        }
    }

    /// Check if the job was successful.
    pub fn is_success(&self) -> bool {
        self.outcome.is_some() && self.error.is_none()
    }

    /// Get the status based on the result.
    pub fn status(&self) -> JobStatus {
        if self.outcome.is_some() {
            JobStatus::Completed
        } else if self.error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Cancelled
        }
    }
}

impl std::fmt::Display for JobResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref outcome) = self.outcome {
            write!(
                f,
                "{}: {} -> {} ({}x{}, {} -> {} bytes, {}ms)",
                self.job.file_name(),
                outcome.source_format,
                outcome.target_format,
                outcome.width,
                outcome.height,
                outcome.input_bytes,
                outcome.output_bytes,
                self.duration_ms
            )
        } else if let Some(ref error) = self.error {
            write!(f, "{}: {} - {}", self.job.file_name(), self.status(), error)
        } else {
            write!(f, "{}: {}", self.job.file_name(), self.status())
        }
    }
}
