//! Parallel conversion of many image files to one target format.
//!
//! # Example
//!
//! ```rust,ignore
//! use pixelcodec::batch::BatchConverter;
//! use pixelcodec::ImageFormat;
//! use std::path::Path;
//!
//! let converter = BatchConverter::new(ImageFormat::Png)
//!     .max_parallel(4)
//!     .recursive(true);
//!
//! let stats = converter.convert_directory(Path::new("./scans"))?;
//! println!("Converted {} of {} files", stats.successful, stats.total_files);
//! ```

mod file_discovery;
mod job;
mod scheduler;

pub use file_discovery::{discover_images, FileDiscovery};
pub use job::{ConversionJob, ConversionOutcome, JobResult, JobStatus};
pub use scheduler::BatchScheduler;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::codec::ImageFormat;
use crate::config::{EncodeParameters, ReadParameters};
use crate::error::{ImagingError, Result};
use crate::imaging;

/// Totals for one batch run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchStats {
    /// Total files processed.
    pub total_files: usize,
    /// Successfully converted files.
    pub successful: usize,
    /// Failed files.
    pub failed: usize,
    /// Files skipped after cancellation.
    pub cancelled: usize,
    /// Total source size.
    pub total_input_bytes: u64,
    /// Total written size.
    pub total_output_bytes: u64,
    /// Total processing time in milliseconds.
    pub total_time_ms: u64,
}

/// Convert one file, writing the result to `output`.
///
/// The source is identified by content, not extension. The output file is
/// only created once encoding has succeeded.
pub fn convert_file(
    source: &Path,
    output: &Path,
    target: ImageFormat,
    read_params: Option<&ReadParameters>,
    params: Option<&EncodeParameters>,
) -> Result<ConversionOutcome> {
    let data = std::fs::read(source)?;
    let source_format = match read_params.and_then(|p| p.format_hint) {
        Some(format) => format,
        None => crate::codec::identify(&data).ok_or(ImagingError::UnknownFormat)?,
    };
    let decoded = imaging::decode_bytes(&data, read_params)?;
    let encoded = imaging::encode_with_metadata_to_vec(&decoded.raster, &decoded.metadata, target, params)?;
    std::fs::write(output, &encoded)?;
    log::info!(
        "{} ({}) -> {} ({})",
        source.display(),
        source_format,
        output.display(),
        target
    );
    Ok(ConversionOutcome {
        source_format,
        target_format: target,
        width: decoded.raster.width(),
        height: decoded.raster.height(),
        input_bytes: data.len() as u64,
        output_bytes: encoded.len() as u64,
    })
}

/// Converts every image in a directory tree to one format.
pub struct BatchConverter {
    /// Format to write.
    target: ImageFormat,

    /// Encode options applied to every file.
    params: EncodeParameters,

    /// Maximum parallel jobs.
    max_parallel: usize,

    /// Whether to scan directories recursively.
    recursive: bool,

    /// Output directory; defaults to next to each source.
    output_dir: Option<PathBuf>,

    /// Whether to mirror the source tree below `output_dir`.
    preserve_structure: bool,

    /// Cancellation flag.
    cancelled: Arc<AtomicBool>,
}

impl BatchConverter {
    /// Create a converter writing `target`.
    pub fn new(target: ImageFormat) -> Self {
        Self {
            target,
            params: EncodeParameters::default(),
            max_parallel: num_cpus::get(),
            recursive: false,
            output_dir: None,
            preserve_structure: true,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the encode parameters.
    pub fn params(mut self, params: EncodeParameters) -> Self {
        self.params = params;
        self
    }

    /// Set maximum parallel jobs.
    pub fn max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n.max(1);
        self
    }

    /// Enable recursive directory scanning.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set output directory.
    pub fn output_dir(mut self, path: PathBuf) -> Self {
        self.output_dir = Some(path);
        self
    }

    /// Set whether to preserve directory structure.
    pub fn preserve_structure(mut self, preserve: bool) -> Self {
        self.preserve_structure = preserve;
        self
    }

    /// Request cancellation of the running batch.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Convert every image file in `input_dir`.
    pub fn convert_directory(&self, input_dir: &Path) -> Result<BatchStats> {
        self.convert_directory_with_progress(input_dir, |_, _, _| {})
    }

    /// Convert every image file in `input_dir`, reporting each finished job.
    pub fn convert_directory_with_progress<P>(&self, input_dir: &Path, progress: P) -> Result<BatchStats>
    where
        P: Fn(&JobResult, usize, usize) + Send + Sync,
    {
        let files = FileDiscovery::new().recursive(self.recursive).discover(input_dir)?;
        if files.is_empty() {
            return Err(ImagingError::InvalidParameter(format!(
                "No image files found in {}",
                input_dir.display()
            )));
        }
        log::info!("Found {} image files in {}", files.len(), input_dir.display());
        self.convert_files(&files, Some(input_dir), progress)
    }

    /// Convert a list of files.
    pub fn convert_files<P>(&self, files: &[PathBuf], base_dir: Option<&Path>, progress: P) -> Result<BatchStats>
    where
        P: Fn(&JobResult, usize, usize) + Send + Sync,
    {
        let start_time = Instant::now();
        let jobs: Vec<ConversionJob> = files
            .iter()
            .enumerate()
            .map(|(idx, file)| ConversionJob::new(idx as u64, file.clone(), self.output_path(file, base_dir)))
            .collect();

        let scheduler = BatchScheduler::new(self.max_parallel);
        let cancelled = self.cancelled.clone();
        let results = scheduler.schedule(
            jobs,
            |job| {
                if cancelled.load(Ordering::SeqCst) {
                    return JobResult::cancelled(job.clone());
                }
                self.run_job(job)
            },
            progress,
        )?;

        let mut stats = BatchStats {
            total_files: results.len(),
            ..Default::default()
        };
        for result in &results {
            match result.status() {
                JobStatus::Completed => {
                    stats.successful += 1;
                    if let Some(ref outcome) = result.outcome {
                        stats.total_input_bytes += outcome.input_bytes;
                        stats.total_output_bytes += outcome.output_bytes;
                    }
                }
                JobStatus::Failed => {
                    stats.failed += 1;
                    log::warn!("{}", result);
                }
                JobStatus::Cancelled | JobStatus::Pending => stats.cancelled += 1,
            }
        }
        stats.total_time_ms = start_time.elapsed().as_millis() as u64;
        Ok(stats)
    }

    fn run_job(&self, job: &ConversionJob) -> JobResult {
        let start = Instant::now();
        let result = self.prepare_output(job).and_then(|()| {
            convert_file(&job.source_path, &job.output_path, self.target, None, Some(&self.params))
        });
        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(outcome) => JobResult {
                job: job.clone(),
                outcome: Some(outcome),
                error: None,
                duration_ms,
            },
            Err(e) => JobResult {
                job: job.clone(),
                outcome: None,
                error: Some(e),
                duration_ms,
            },
        }
    }

    fn prepare_output(&self, job: &ConversionJob) -> Result<()> {
        if job.output_path == job.source_path {
            return Err(ImagingError::InvalidParameter(format!(
                "{} would overwrite its source",
                job.output_path.display()
            )));
        }
        if let Some(parent) = job.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Destination for `file`: the target extension, in the output
    /// directory when one is set.
    fn output_path(&self, file: &Path, base_dir: Option<&Path>) -> PathBuf {
        let renamed = file.with_extension(self.target.extension());
        let Some(output_dir) = self.output_dir.as_ref() else {
            return renamed;
        };

        if self.preserve_structure {
            if let Some(relative) = base_dir.and_then(|base| renamed.strip_prefix(base).ok()) {
                return output_dir.join(relative);
            }
        }

        match renamed.file_name() {
            Some(name) => output_dir.join(name),
            None => renamed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::PixelRaster;
    use std::fs;
    use tempfile::TempDir;

    fn write_sample(path: &Path, format: ImageFormat) {
        let raster = PixelRaster::from_rgb8(4, 3, (0..36).map(|i| (i * 7) as u8).collect()).unwrap();
        fs::write(path, imaging::encode_to_vec(&raster, format, None).unwrap()).unwrap();
    }

    #[test]
    fn test_converter_builder() {
        let converter = BatchConverter::new(ImageFormat::Png)
            .max_parallel(0)
            .recursive(true)
            .output_dir(PathBuf::from("/output"));
        assert_eq!(converter.max_parallel, 1);
        assert!(converter.recursive);
        assert_eq!(
            converter.output_path(Path::new("/input/a/b.bmp"), Some(Path::new("/input"))),
            PathBuf::from("/output/a/b.png")
        );
        let flat = converter.preserve_structure(false);
        assert_eq!(
            flat.output_path(Path::new("/input/a/b.bmp"), Some(Path::new("/input"))),
            PathBuf::from("/output/b.png")
        );
    }

    #[test]
    fn test_convert_directory() {
        let dir = TempDir::new().unwrap();
        write_sample(&dir.path().join("one.bmp"), ImageFormat::Bmp);
        write_sample(&dir.path().join("two.tga"), ImageFormat::Tga);
        fs::write(dir.path().join("broken.gif"), b"GIF89a").unwrap();
        let out = dir.path().join("out");

        let converter = BatchConverter::new(ImageFormat::Png).max_parallel(2).output_dir(out.clone());
        let stats = converter.convert_directory(dir.path()).unwrap();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert!(out.join("one.png").exists());
        assert!(out.join("two.png").exists());
        assert!(!out.join("broken.png").exists());
    }

    #[test]
    fn test_refuses_to_overwrite_source() {
        let dir = TempDir::new().unwrap();
        write_sample(&dir.path().join("same.png"), ImageFormat::Png);
        let stats = BatchConverter::new(ImageFormat::Png).convert_directory(dir.path()).unwrap();
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        write_sample(&dir.path().join("a.bmp"), ImageFormat::Bmp);
        let converter = BatchConverter::new(ImageFormat::Png);
        converter.cancel();
        let stats = converter.convert_directory(dir.path()).unwrap();
        assert_eq!(stats.cancelled, 1);
        assert!(!dir.path().join("a.png").exists());
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(BatchConverter::new(ImageFormat::Png).convert_directory(dir.path()).is_err());
    }
}
