//! Local file storage for served and received files.

use crate::error::TransferError;
use crate::message::RemoteFile;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Check that `name` is a single, plain path component.
///
/// # Errors
///
/// Returns `TransferError::InvalidFilename` for empty names, `.`/`..`, names
/// containing separators or NUL bytes, and absolute paths.
pub fn sanitize_filename(name: &str) -> Result<&str, TransferError> {
    let trimmed = name.trim();
    let invalid = || TransferError::InvalidFilename(name.to_string());

    if trimmed.is_empty() || trimmed.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(trimmed).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(trimmed),
        _ => Err(invalid()),
    }
}

/// A directory files are listed from, read from and written into
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Open `root`, creating it if missing
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Storage directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Regular files in the directory, sorted by name
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be read.
    pub fn list(&self) -> io::Result<Vec<RemoteFile>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                files.push(RemoteFile::new(name, metadata.len()));
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Path of `name` inside the storage directory
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidFilename` if `name` would escape it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, TransferError> {
        Ok(self.root.join(sanitize_filename(name)?))
    }

    /// Open `name` for reading, returning the file and its size
    ///
    /// # Errors
    ///
    /// Returns `TransferError::FileNotFound` if `name` is not a regular file.
    pub fn open_file(&self, name: &str) -> Result<(File, u64), TransferError> {
        let path = self.resolve(name)?;
        let not_found = || TransferError::FileNotFound(name.to_string());

        let metadata = fs::metadata(&path).map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }
        let file = File::open(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => not_found(),
            _ => TransferError::from(err),
        })?;
        Ok((file, metadata.len()))
    }

    /// Write `bytes` as `name`, replacing any existing file
    ///
    /// # Errors
    ///
    /// Returns an error for invalid names or failed writes.
    pub fn save(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, TransferError> {
        let path = self.resolve(name)?;
        fs::write(&path, bytes)?;
        Ok(path)
    }
}
