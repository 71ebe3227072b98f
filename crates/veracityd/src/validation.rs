use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("path must be absolute: {0}")]
    RelativePath(PathBuf),
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),
    #[error("unsupported file format '{found}'; allowed: {allowed}")]
    UnsupportedFormat { found: String, allowed: String },
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("cannot inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A video that passed request validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedVideo {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

/// Check a submitted path against the extension allow-list and size limit.
pub fn validate_video(
    path: &Path,
    allowed_formats: &[String],
    max_size: u64,
) -> Result<ValidatedVideo, ValidationError> {
    if !path.is_absolute() {
        return Err(ValidationError::RelativePath(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    if !allowed_formats.iter().any(|f| *f == extension) {
        return Err(ValidationError::UnsupportedFormat {
            found: extension,
            allowed: allowed_formats.join(","),
        });
    }

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ValidationError::NotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(ValidationError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if !metadata.is_file() {
        return Err(ValidationError::NotAFile(path.to_path_buf()));
    }
    if metadata.len() > max_size {
        return Err(ValidationError::TooLarge {
            size: metadata.len(),
            max: max_size,
        });
    }

    Ok(ValidatedVideo {
        path: path.to_path_buf(),
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size: metadata.len(),
    })
}
