use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the checksum manifest expected in a model directory.
pub const MANIFEST_NAME: &str = "SHA256SUMS";

/// System-wide model directory used when running as root.
pub const SYSTEM_MODEL_DIR: &str = "/var/lib/veracity/models";

/// Determine the model directory.
///
/// `VERACITY_MODEL_DIR` wins when set. Otherwise root (UID 0) uses
/// [`SYSTEM_MODEL_DIR`] and other users `$XDG_DATA_HOME/veracity/models`
/// (~/.local/share/veracity/models).
pub fn default_model_dir() -> PathBuf {
    resolve_model_dir(
        std::env::var_os("VERACITY_MODEL_DIR").map(PathBuf::from),
        is_root(),
        std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn resolve_model_dir(
    explicit: Option<PathBuf>,
    root: bool,
    data_home: Option<PathBuf>,
    home: Option<PathBuf>,
) -> PathBuf {
    if let Some(dir) = explicit.filter(|d| !d.as_os_str().is_empty()) {
        return dir;
    }
    if root {
        return PathBuf::from(SYSTEM_MODEL_DIR);
    }
    data_home
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| {
            home.unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local/share")
        })
        .join("veracity/models")
}

fn is_root() -> bool {
    // SAFETY: geteuid is always safe to call.
    unsafe { libc::geteuid() == 0 }
}

/// One manifest line: expected digest and file name relative to the model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub sha256: String,
    pub name: String,
}

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model manifest not found: {0}")]
    MissingManifest(PathBuf),

    #[error("malformed manifest line {line}: {content:?}")]
    MalformedManifest { line: usize, content: String },

    #[error("model file not found: {name} ({path})")]
    MissingModel { name: String, path: PathBuf },

    #[error("failed to open model file: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read model file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "model checksum mismatch for {name} ({path})\n  expected: {expected}\n  got:      {got}"
    )]
    ChecksumMismatch {
        name: String,
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Parse `sha256sum`-style manifest content.
///
/// Accepts `<hex>  <name>` and binary-mode `<hex> *<name>` lines; blank lines
/// and `#` comments are skipped.
pub fn parse_manifest(content: &str) -> Result<Vec<ManifestEntry>, ModelIntegrityError> {
    let mut entries = Vec::new();
    for (i, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = || ModelIntegrityError::MalformedManifest {
            line: i + 1,
            content: raw.to_string(),
        };

        let (digest, name) = line.split_once(char::is_whitespace).ok_or_else(malformed)?;
        let name = name.trim_start().trim_start_matches('*');
        let valid_digest = digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit());
        if !valid_digest || name.is_empty() {
            return Err(malformed());
        }

        entries.push(ManifestEntry {
            sha256: digest.to_ascii_lowercase(),
            name: name.to_string(),
        });
    }
    Ok(entries)
}

/// Read and parse the manifest in `model_dir`.
pub fn read_manifest(model_dir: &Path) -> Result<Vec<ManifestEntry>, ModelIntegrityError> {
    let path = model_dir.join(MANIFEST_NAME);
    if !path.exists() {
        return Err(ModelIntegrityError::MissingManifest(path));
    }
    let content = fs::read_to_string(&path).map_err(|source| ModelIntegrityError::Read {
        path: path.clone(),
        source,
    })?;
    parse_manifest(&content)
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| ModelIntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| ModelIntegrityError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn verify_file_sha256(
    name: &str,
    path: &Path,
    expected_sha256: &str,
) -> Result<(), ModelIntegrityError> {
    if !path.exists() {
        return Err(ModelIntegrityError::MissingModel {
            name: name.to_string(),
            path: path.to_path_buf(),
        });
    }

    let digest = sha256_file_hex(path)?;
    if !digest.eq_ignore_ascii_case(expected_sha256) {
        return Err(ModelIntegrityError::ChecksumMismatch {
            name: name.to_string(),
            path: path.to_path_buf(),
            expected: expected_sha256.to_string(),
            got: digest,
        });
    }

    Ok(())
}

/// Verify every file listed in the directory's manifest. Returns the verified entries.
pub fn verify_models_dir(model_dir: &Path) -> Result<Vec<ManifestEntry>, ModelIntegrityError> {
    let entries = read_manifest(model_dir)?;
    for entry in &entries {
        let path = model_dir.join(&entry.name);
        verify_file_sha256(&entry.name, &path, &entry.sha256)?;
    }

    Ok(entries)
}
