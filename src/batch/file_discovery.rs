//! File discovery for batch processing.

use std::path::{Path, PathBuf};

use crate::codec::ImageFormat;
use crate::error::{ImagingError, Result};

/// Finds image files by extension.
pub struct FileDiscovery {
    /// Whether to scan recursively.
    recursive: bool,

    /// Formats to accept; empty accepts every known extension.
    formats: Vec<ImageFormat>,

    /// Maximum depth for recursive scanning (None = unlimited).
    max_depth: Option<usize>,

    /// Whether to follow symbolic links.
    follow_symlinks: bool,
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl FileDiscovery {
    /// Create a new file discovery with default settings.
    pub fn new() -> Self {
        Self {
            recursive: false,
            formats: Vec::new(),
            max_depth: None,
            follow_symlinks: false,
        }
    }

    /// Enable recursive scanning.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set maximum depth for recursive scanning.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Only accept files whose extension belongs to `format`.
    pub fn format(mut self, format: ImageFormat) -> Self {
        self.formats.push(format);
        self
    }

    /// Enable following symbolic links.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Discover files in the given directory, sorted by path.
    pub fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(ImagingError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Not a directory: {}", dir.display()),
            )));
        }

        let mut files = Vec::new();
        self.discover_recursive(dir, 0, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn discover_recursive(&self, dir: &Path, depth: usize, files: &mut Vec<PathBuf>) -> Result<()> {
        if let Some(max) = self.max_depth {
            if depth > max {
                return Ok(());
            }
        }

        let entries = std::fs::read_dir(dir).map_err(|e| {
            ImagingError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read directory {}: {}", dir.display(), e),
            ))
        })?;

        for entry in entries {
            let path = entry?.path();

            let metadata = if self.follow_symlinks {
                std::fs::metadata(&path)
            } else {
                std::fs::symlink_metadata(&path)
            };
            let Ok(metadata) = metadata else {
                log::debug!("skipping unreadable entry {}", path.display());
                continue;
            };

            if metadata.is_dir() {
                if self.recursive {
                    self.discover_recursive(&path, depth + 1, files)?;
                }
            } else if metadata.is_file() && self.accepts(&path) {
                files.push(path);
            }
        }

        Ok(())
    }

    /// Whether `path` has an extension of an accepted format.
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(format) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ImageFormat::from_extension)
        else {
            return false;
        };
        self.formats.is_empty() || self.formats.contains(&format)
    }
}

/// Every image file under `dir`.
pub fn discover_images(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    FileDiscovery::new().recursive(recursive).discover(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_directory() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.png"), "content").unwrap();
        fs::write(dir.path().join("b.TIF"), "content").unwrap();
        fs::write(dir.path().join("notes.txt"), "content").unwrap();
        let subdir = dir.path().join("icons");
        fs::create_dir(&subdir).unwrap();
        fs::write(subdir.join("c.ico"), "content").unwrap();
        dir
    }

    #[test]
    fn test_discovery_non_recursive() {
        let dir = create_test_directory();
        let files = FileDiscovery::new().discover(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_discovery_recursive() {
        let dir = create_test_directory();
        let files = discover_images(dir.path(), true).unwrap();
        assert_eq!(files.len(), 3);
        let limited = FileDiscovery::new().recursive(true).max_depth(0).discover(dir.path()).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_discovery_by_format() {
        let dir = create_test_directory();
        let files = FileDiscovery::new().format(ImageFormat::Tiff).discover(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("b.TIF"));
    }

    #[test]
    fn test_discovery_nonexistent_directory() {
        assert!(FileDiscovery::new().discover(Path::new("/nonexistent/path")).is_err());
    }
}
