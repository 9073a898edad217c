//! Where images come from and where saved copies go.
//!
//! Uploads land in a temporary directory that disappears with the process.
//! A saved prediction therefore keeps its own copy in the private image
//! directory, and the record points at that copy.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::{Builder, TempDir};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const FILE_SCHEME: &str = "file://";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    #[error("image i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Location of a picked image: a `file://` URI or a plain path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    reference: String,
    path: PathBuf,
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self, ImageError> {
        let reference = reference.trim();
        let invalid = || ImageError::InvalidReference(reference.to_string());
        if reference.is_empty() {
            return Err(ImageError::InvalidReference("empty reference".to_string()));
        }

        let path = match reference.strip_prefix(FILE_SCHEME) {
            Some(rest) => {
                let rest = rest.strip_prefix("localhost").unwrap_or(rest);
                if !rest.starts_with('/') {
                    return Err(invalid());
                }
                PathBuf::from(percent_decode(rest).ok_or_else(invalid)?)
            }
            None if reference.contains("://") => return Err(invalid()),
            None => PathBuf::from(reference),
        };

        Ok(ImageRef {
            reference: reference.to_string(),
            path,
        })
    }

    pub fn from_path(path: &Path) -> Self {
        ImageRef {
            reference: file_uri(path),
            path: path.to_path_buf(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.reference
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the image. A file that is not there is a bad reference, not an i/o failure.
    pub fn read(&self) -> Result<Vec<u8>, ImageError> {
        fs::read(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ImageError::InvalidReference(self.reference.clone()),
            _ => ImageError::Io(e),
        })
    }
}

/// `file://` URI for an absolute path, percent-encoding anything outside the
/// unreserved set.
pub fn file_uri(path: &Path) -> String {
    let mut uri = String::from(FILE_SCHEME);
    for byte in path.to_string_lossy().bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                uri.push(char::from(byte))
            }
            _ => uri.push_str(&format!("%{byte:02X}")),
        }
    }
    uri
}

fn percent_decode(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

fn extension_for(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("jpg")
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// `path` sits directly in `dir`.
fn directly_inside(path: &Path, dir: &Path) -> bool {
    path.parent().map(|parent| parent == dir).unwrap_or(false)
}

/// Temporary holding area for uploaded images.
pub struct UploadDir {
    dir: TempDir,
}

impl UploadDir {
    pub fn new() -> Result<Self, ImageError> {
        let dir = Builder::new().prefix("asclepius_uploads").tempdir()?;
        debug!(path = %dir.path().display(), "created upload directory");
        Ok(UploadDir { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn save(&self, bytes: &[u8]) -> Result<ImageRef, ImageError> {
        let filename = format!("{}.{}", Uuid::new_v4(), extension_for(bytes));
        let path = self.dir.path().join(filename);
        fs::write(&path, bytes)?;
        Ok(ImageRef::from_path(&path))
    }

    /// Accepts only references this directory handed out.
    pub fn resolve(&self, reference: &str) -> Result<ImageRef, ImageError> {
        let image = ImageRef::parse(reference)?;
        if !directly_inside(image.path(), self.path()) {
            return Err(ImageError::InvalidReference(reference.trim().to_string()));
        }
        Ok(image)
    }
}

/// App-private directory holding copies of saved images.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ImageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(ImageStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies the bytes behind `source` to a new, timestamp-named file and
    /// returns the copy's `file://` URI.
    pub fn save_copy(&self, source: &ImageRef) -> Result<String, ImageError> {
        let bytes = source.read()?;
        let filename = format!(
            "prediction_{}_{}.{}",
            unix_millis(),
            &Uuid::new_v4().simple().to_string()[..8],
            extension_for(&bytes)
        );
        let destination = self.root.join(filename);
        fs::write(&destination, &bytes)?;
        debug!(from = source.as_str(), to = %destination.display(), "copied image");
        Ok(file_uri(&destination))
    }

    /// Resolves a copy's URI, refusing anything outside this store.
    pub fn resolve(&self, uri: &str) -> Result<PathBuf, ImageError> {
        let image = ImageRef::parse(uri)?;
        if !directly_inside(image.path(), &self.root) {
            return Err(ImageError::InvalidReference(uri.to_string()));
        }
        Ok(image.path().to_path_buf())
    }

    pub fn remove(&self, uri: &str) -> Result<(), ImageError> {
        fs::remove_file(self.resolve(uri)?)?;
        Ok(())
    }
}
