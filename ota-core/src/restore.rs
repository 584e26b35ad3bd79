//! Restoring backed-up files after a filesystem update.
//!
//! Restore uploads are matched to manifest entries by position only; the
//! manifest decides how many uploads are expected before the reboot.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::error::OtaError;
use crate::paths::{parent_dir, resolve, validate_upload_path};

/// Files captured by the last backup walk, in traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreManifest {
    entries: Vec<String>,
}

impl RestoreManifest {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }
}

/// Position inside the manifest while a restore is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreCursor {
    pub index: usize,
    pub active: bool,
}

/// What a completed restore upload did to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreProgress {
    /// Entry `index` (0-based) of `total` restored, more to come.
    Advanced { index: usize, total: usize },
    /// The last entry was restored; the cursor is reset.
    Finished { total: usize },
}

impl RestoreCursor {
    /// Start a restore of `manifest`. Returns `false` (and stays inactive)
    /// for an empty manifest.
    pub fn activate(&mut self, manifest: &RestoreManifest) -> bool {
        self.index = 0;
        self.active = !manifest.is_empty();
        self.active
    }

    pub fn reset(&mut self) {
        self.index = 0;
        self.active = false;
    }

    /// Account for one completed upload. `None` when no restore is running.
    pub fn advance(&mut self, manifest: &RestoreManifest, uploaded: &str) -> Option<RestoreProgress> {
        if !self.active {
            return None;
        }

        let total = manifest.len();
        match manifest.get(self.index) {
            Some(expected) if expected != uploaded => info!(
                "Restore file complete: {} (slot {} held {})",
                uploaded, self.index, expected
            ),
            _ => info!("Restore file complete: {} (index: {})", uploaded, self.index),
        }

        let restored = self.index;
        self.index += 1;
        if self.index >= total {
            self.reset();
            Some(RestoreProgress::Finished { total })
        } else {
            Some(RestoreProgress::Advanced {
                index: restored,
                total,
            })
        }
    }
}

/// General-purpose file store below the filesystem mount point.
#[derive(Debug, Clone)]
pub struct FileStore {
    mount: PathBuf,
}

impl FileStore {
    pub fn new(mount: impl Into<PathBuf>) -> Self {
        Self {
            mount: mount.into(),
        }
    }

    pub fn mount(&self) -> &Path {
        &self.mount
    }

    /// Create (or truncate) `path`, creating missing parent directories.
    pub fn create(&self, path: &str) -> Result<FileUpload, OtaError> {
        let logical = validate_upload_path(path)?;
        if let Some(dir) = parent_dir(&logical) {
            let real_dir = resolve(&self.mount, dir)?;
            if !real_dir.exists() {
                fs::create_dir_all(&real_dir)?;
            }
        }

        let real = resolve(&self.mount, &logical)?;
        let file = File::create(&real)?;
        info!("Upload Start: {logical}");
        Ok(FileUpload {
            logical,
            file: Some(file),
            written: 0,
        })
    }

    /// Open `path` for reading (backup download).
    pub fn open(&self, path: &str) -> Result<File, OtaError> {
        let logical = validate_upload_path(path)?;
        Ok(File::open(resolve(&self.mount, &logical)?)?)
    }
}

/// A file being written by a chunked upload.
#[derive(Debug)]
pub struct FileUpload {
    logical: String,
    file: Option<File>,
    written: usize,
}

impl FileUpload {
    pub fn path(&self) -> &str {
        &self.logical
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), OtaError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| OtaError::NoFileUpload(self.logical.clone()))?;
        file.write_all(data)?;
        self.written += data.len();
        Ok(())
    }

    /// Flush and close the file, returning the total size written.
    pub fn finish(mut self) -> Result<usize, OtaError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            // SPIFFS has no fsync
            if let Err(e) = file.sync_all() {
                warn!("sync of {} failed: {}", self.logical, e);
            }
        }
        info!("Upload Complete: {} ,size: {} Bytes", self.logical, self.written);
        Ok(self.written)
    }
}
