/// Configuration structures that can be tested independently
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Update behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtaSettings {
    /// Restart automatically once an update (and any restore) finished.
    pub auto_reboot: bool,
    /// Time between the reboot request and the actual restart, so the HTTP
    /// response can reach the client first.
    pub reboot_grace_ms: u64,
    /// VFS mount point of the data filesystem.
    pub fs_mount: String,
    /// Logical path (relative to `fs_mount`) preserved across a filesystem
    /// update. `None` disables backup/restore.
    pub backup_root: Option<String>,
    /// Read buffer size used when streaming request bodies.
    pub chunk_size: usize,
}

impl Default for OtaSettings {
    fn default() -> Self {
        Self {
            auto_reboot: true,
            reboot_grace_ms: 2000,
            fs_mount: "/spiffs".to_string(),
            backup_root: None,
            chunk_size: 4096,
        }
    }
}

impl OtaSettings {
    pub fn reboot_grace(&self) -> Duration {
        Duration::from_millis(self.reboot_grace_ms)
    }

    /// Backup root, treating an empty string as "not configured".
    pub fn backup_root(&self) -> Option<&str> {
        self.backup_root.as_deref().filter(|root| !root.is_empty())
    }
}

/// Identity strings reported to update clients. None of these are
/// interpreted by the updater itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceIdentity {
    pub owner: String,
    pub repository: String,
    pub branch: String,
    pub build: u16,
    pub firmware_version: String,
    pub firmware_variant: String,
    pub hardware_id: String,
    pub chip_family: String,
}
