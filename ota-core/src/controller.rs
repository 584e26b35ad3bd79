//! Owner of all update state on the device.
//!
//! The HTTP glue calls into one `UpdateController`; the control loop calls
//! [`UpdateController::tick`]. Nothing here spawns threads or blocks beyond
//! the synchronous sink and file writes.

use std::fs::File;

use log::{info, warn};
use serde::Serialize;

use crate::config::{DeviceIdentity, OtaSettings};
use crate::device_info::DeviceInfo;
use crate::error::OtaError;
use crate::listener::UpdateListener;
use crate::paths::validate_upload_path;
use crate::reboot::{Clock, RebootScheduler, Restart, SystemClock};
use crate::restore::{FileStore, FileUpload, RestoreCursor, RestoreManifest, RestoreProgress};
use crate::session::{IngestOutcome, TransferState, UpdateMode, UpdateSession};
use crate::sink::ImageSink;
use crate::walker::{self, DirTree};

struct NoopListener;

impl UpdateListener for NoopListener {}

/// Result of one chunk of a file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUploadOutcome {
    pub path: String,
    pub bytes_written: usize,
    pub finished: bool,
    pub restore: Option<RestoreProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreStatus {
    pub active: bool,
    pub index: usize,
    pub total: usize,
}

/// Everything a status query reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateStatus {
    pub state: TransferState,
    pub mode: UpdateMode,
    pub bytes_transferred: usize,
    pub total_size: Option<usize>,
    pub error: Option<String>,
    pub restore: RestoreStatus,
    pub reboot_pending: bool,
    pub auto_reboot: bool,
}

pub struct UpdateController<S: ImageSink, C: Clock = SystemClock> {
    sink: S,
    clock: C,
    settings: OtaSettings,
    identity: DeviceIdentity,
    session: UpdateSession,
    manifest: RestoreManifest,
    backup_tree: Option<DirTree>,
    cursor: RestoreCursor,
    scheduler: RebootScheduler,
    files: FileStore,
    upload: Option<FileUpload>,
    listener: Box<dyn UpdateListener + Send>,
}

impl<S: ImageSink> UpdateController<S> {
    pub fn new(sink: S, settings: OtaSettings, identity: DeviceIdentity) -> Self {
        Self::with_clock(sink, SystemClock, settings, identity)
    }
}

impl<S: ImageSink, C: Clock> UpdateController<S, C> {
    pub fn with_clock(sink: S, clock: C, settings: OtaSettings, identity: DeviceIdentity) -> Self {
        let scheduler = RebootScheduler::new(settings.reboot_grace(), settings.auto_reboot);
        let files = FileStore::new(&settings.fs_mount);
        Self {
            sink,
            clock,
            settings,
            identity,
            session: UpdateSession::default(),
            manifest: RestoreManifest::default(),
            backup_tree: None,
            cursor: RestoreCursor::default(),
            scheduler,
            files,
            upload: None,
            listener: Box::new(NoopListener),
        }
    }

    pub fn set_listener(&mut self, listener: impl UpdateListener + Send + 'static) {
        self.listener = Box::new(listener);
    }

    pub fn set_auto_reboot(&mut self, enable: bool) {
        self.settings.auto_reboot = enable;
        self.scheduler.set_auto_reboot(enable);
    }

    pub fn settings(&self) -> &OtaSettings {
        &self.settings
    }

    pub fn session(&self) -> &UpdateSession {
        &self.session
    }

    pub fn manifest(&self) -> &RestoreManifest {
        &self.manifest
    }

    pub fn cursor(&self) -> RestoreCursor {
        self.cursor
    }

    pub fn reboot_pending(&self) -> bool {
        self.scheduler.pending().is_some()
    }

    /// The filesystem is being rewritten or restored; its contents no longer
    /// describe what has to be brought back.
    fn manifest_frozen(&self) -> bool {
        self.cursor.active
            || (self.session.mode() == UpdateMode::Filesystem
                && self.session.state() == TransferState::Receiving)
    }

    /// Walk the backup root and replace the restore manifest.
    ///
    /// While a filesystem image is being received or restored the manifest is
    /// frozen and the last tree is returned instead.
    pub fn refresh_backup(&mut self) -> Option<DirTree> {
        let root = self.settings.backup_root()?.to_string();
        if self.manifest_frozen() {
            return self.backup_tree.clone();
        }

        let snapshot = walker::walk(self.files.mount(), &root);
        info!(
            "Backup snapshot of {}: {} files to restore",
            root,
            snapshot.manifest.len()
        );
        self.manifest = snapshot.manifest;
        self.backup_tree = Some(snapshot.tree.clone());
        Some(snapshot.tree)
    }

    /// Identity plus, when a backup root is configured, a fresh backup tree.
    pub fn device_info(&mut self) -> DeviceInfo {
        let backup = self.refresh_backup();
        DeviceInfo::new(&self.identity, backup)
    }

    /// Begin a firmware or filesystem update.
    ///
    /// For filesystem updates the backup root is walked first: the image about
    /// to be written destroys those files. A rejected start leaves any pending
    /// reboot and running restore as they were.
    pub fn start(&mut self, mode: UpdateMode, checksum: Option<&str>) -> Result<(), OtaError> {
        let previous = (
            self.scheduler.clone(),
            self.cursor,
            self.manifest.clone(),
            self.backup_tree.clone(),
        );

        self.scheduler.cancel();
        if mode == UpdateMode::Filesystem {
            self.cursor.reset();
            if self.refresh_backup().is_none() {
                self.manifest = RestoreManifest::default();
            }
        }

        if let Err(e) = self
            .session
            .start(&mut self.sink, self.listener.as_mut(), mode, checksum)
        {
            (self.scheduler, self.cursor, self.manifest, self.backup_tree) = previous;
            return Err(e);
        }

        let (scheduler, cursor, manifest, _) = previous;
        if scheduler.pending().is_some() {
            warn!("New update started, cancelling pending reboot");
        }
        if mode == UpdateMode::Filesystem && cursor.active {
            warn!(
                "Restore interrupted at {} of {} files",
                cursor.index,
                manifest.len()
            );
        }
        Ok(())
    }

    /// Feed one chunk of the image; see [`UpdateSession::ingest`].
    pub fn ingest(&mut self, index: usize, bytes: &[u8], is_final: bool) -> Result<IngestOutcome, OtaError> {
        let outcome = self.session.ingest(
            &mut self.sink,
            self.listener.as_mut(),
            index,
            bytes,
            is_final,
        )?;
        if matches!(outcome, IngestOutcome::Completed { .. }) {
            self.complete_side_effects();
        }
        Ok(outcome)
    }

    /// Abandon the running update, if any.
    pub fn abort(&mut self) -> bool {
        self.session.abort(&mut self.sink)
    }

    /// Drop the open file upload, if any. The partial file stays on disk.
    pub fn abort_file(&mut self) -> bool {
        match self.upload.take() {
            Some(upload) => {
                warn!(
                    "Upload of {} aborted after {} bytes",
                    upload.path(),
                    upload.written()
                );
                true
            }
            None => false,
        }
    }

    fn complete_side_effects(&mut self) {
        match self.session.mode() {
            UpdateMode::Filesystem if self.cursor.activate(&self.manifest) => {
                info!(
                    "Waiting for {} files to be restored before reboot",
                    self.manifest.len()
                );
            }
            _ => {
                info!("No files to restore");
                self.scheduler.request(self.clock.now());
            }
        }
    }

    /// Write one chunk of a file upload into the file store.
    ///
    /// Index 0 opens (and truncates) the file; later chunks must continue at
    /// the byte offset written so far. When a restore is running,
    /// each finished upload fills the next manifest slot; the last one
    /// requests the reboot.
    pub fn ingest_file(
        &mut self,
        filename: &str,
        index: usize,
        bytes: &[u8],
        is_final: bool,
    ) -> Result<FileUploadOutcome, OtaError> {
        if index == 0 {
            if let Some(previous) = self.upload.take() {
                warn!(
                    "Upload of {} abandoned after {} bytes",
                    previous.path(),
                    previous.written()
                );
            }
            self.upload = Some(self.files.create(filename)?);
        }

        let logical = validate_upload_path(filename)?;
        let upload = match self.upload.as_mut() {
            Some(upload) if upload.path() == logical => upload,
            _ => return Err(OtaError::NoFileUpload(logical)),
        };

        let expected = upload.written();
        if index != expected {
            let err = OtaError::ChunkOutOfOrder { expected, got: index };
            warn!("Upload of {logical} abandoned: {err}");
            self.upload = None;
            return Err(err);
        }

        if !bytes.is_empty() {
            if let Err(e) = upload.write(bytes) {
                self.upload = None;
                return Err(e);
            }
        }

        if !is_final {
            return Ok(FileUploadOutcome {
                path: logical,
                bytes_written: upload.written(),
                finished: false,
                restore: None,
            });
        }

        let Some(upload) = self.upload.take() else {
            return Err(OtaError::NoFileUpload(logical));
        };
        let bytes_written = upload.finish()?;
        let restore = self.cursor.advance(&self.manifest, &logical);
        if let Some(RestoreProgress::Finished { total }) = restore {
            info!("Restore finished ({total} files), initiate reboot");
            self.scheduler.request(self.clock.now());
        }

        Ok(FileUploadOutcome {
            path: logical,
            bytes_written,
            finished: true,
            restore,
        })
    }

    /// Open a file below the mount point for download.
    pub fn open_file(&self, path: &str) -> Result<File, OtaError> {
        self.files.open(path)
    }

    pub fn status(&self) -> UpdateStatus {
        UpdateStatus {
            state: self.session.state(),
            mode: self.session.mode(),
            bytes_transferred: self.session.bytes_transferred(),
            total_size: self.session.total_size(),
            error: self.session.error().map(str::to_string),
            restore: RestoreStatus {
                active: self.cursor.active,
                index: self.cursor.index,
                total: self.manifest.len(),
            },
            reboot_pending: self.reboot_pending(),
            auto_reboot: self.scheduler.auto_reboot(),
        }
    }

    /// Poll the reboot scheduler. Call regularly from the control loop.
    pub fn tick<R: Restart + ?Sized>(&mut self, restart: &mut R) -> bool {
        let now = self.clock.now();
        self.scheduler.tick(now, restart)
    }

    /// Restart right away if a reboot is pending, ignoring the auto-reboot
    /// setting.
    pub fn reboot_now<R: Restart + ?Sized>(&mut self, restart: &mut R) -> bool {
        self.scheduler.fire_now(restart)
    }
}
