// SPIFFS mount handling for the general-purpose file store

use anyhow::Result;
use esp_idf_sys::{
    esp, esp_spiffs_info, esp_spiffs_mounted, esp_vfs_spiffs_conf_t, esp_vfs_spiffs_register,
    esp_vfs_spiffs_unregister, EspError,
};
use std::ffi::CString;

const MAX_OPEN_FILES: usize = 5;

/// The first SPIFFS data partition, mounted into the VFS at `base_path`.
///
/// The image sink unmounts it while a filesystem image is written and
/// mounts it again afterwards.
pub struct Spiffs {
    base_path: CString,
}

impl Spiffs {
    pub fn new(base_path: &str) -> Result<Self> {
        Ok(Self {
            base_path: CString::new(base_path)?,
        })
    }

    pub fn base_path(&self) -> &str {
        self.base_path.to_str().unwrap_or("/spiffs")
    }

    pub fn is_mounted(&self) -> bool {
        unsafe { esp_spiffs_mounted(std::ptr::null()) }
    }

    /// Mount, formatting the partition if it holds no valid filesystem.
    pub fn mount(&self) -> Result<(), EspError> {
        if self.is_mounted() {
            return Ok(());
        }

        let conf = esp_vfs_spiffs_conf_t {
            base_path: self.base_path.as_ptr(),
            partition_label: std::ptr::null(),
            max_files: MAX_OPEN_FILES as _,
            format_if_mount_failed: true,
        };
        esp!(unsafe { esp_vfs_spiffs_register(&conf) })?;

        match self.usage() {
            Some((total, used)) => log::info!(
                "SPIFFS mounted at {} ({} of {} bytes used)",
                self.base_path(),
                used,
                total
            ),
            None => log::info!("SPIFFS mounted at {}", self.base_path()),
        }
        Ok(())
    }

    pub fn unmount(&self) -> Result<(), EspError> {
        if !self.is_mounted() {
            return Ok(());
        }
        esp!(unsafe { esp_vfs_spiffs_unregister(std::ptr::null()) })?;
        log::info!("SPIFFS unmounted from {}", self.base_path());
        Ok(())
    }

    /// `(total, used)` bytes.
    pub fn usage(&self) -> Option<(usize, usize)> {
        let mut total = 0;
        let mut used = 0;
        esp!(unsafe { esp_spiffs_info(std::ptr::null(), &mut total, &mut used) }).ok()?;
        Some((total as usize, used as usize))
    }
}
