//! OTA Core - Hardware-independent update logic for the ESP32 OTA updater
//!
//! This crate contains the transfer state machine, backup/restore walker and
//! reboot scheduling. Everything here can be tested on the host platform
//! without requiring ESP32 hardware; the firmware crate plugs in the flash
//! sink, the HTTP transport and the restart primitive.

pub mod checksum;
pub mod config;
pub mod controller;
pub mod device_info;
pub mod error;
pub mod listener;
pub mod paths;
pub mod reboot;
pub mod restore;
pub mod session;
pub mod sink;
pub mod walker;

#[cfg(test)]
pub(crate) mod testing;

pub use checksum::{DigestVerifier, ExpectedDigest};
pub use config::{DeviceIdentity, OtaSettings};
pub use controller::{FileUploadOutcome, UpdateController, UpdateStatus};
pub use device_info::DeviceInfo;
pub use error::{OtaError, SinkError};
pub use listener::UpdateListener;
pub use reboot::{Clock, RebootScheduler, Restart, SystemClock};
pub use restore::{RestoreCursor, RestoreManifest, RestoreProgress};
pub use session::{IngestOutcome, TransferState, UpdateMode, UpdateSession};
pub use sink::{ImageSink, ImageTarget};
pub use walker::{BackupSnapshot, DirNode, DirTree};
