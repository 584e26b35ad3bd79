// Flash sink - writes update images using the ESP-IDF OTA and partition APIs

use core::ffi::c_void;
use esp_idf_sys::{
    esp_err_t, esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_next_update_partition,
    esp_ota_handle_t, esp_ota_set_boot_partition, esp_ota_write, esp_partition_erase_range,
    esp_partition_find_first, esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS,
    esp_partition_t, esp_partition_type_t_ESP_PARTITION_TYPE_DATA, esp_partition_write,
    EspError, ESP_ERR_INVALID_CRC, ESP_ERR_INVALID_SIZE, ESP_ERR_INVALID_STATE,
    ESP_ERR_NOT_FOUND, ESP_OK, OTA_SIZE_UNKNOWN,
};
use ota_core::{DigestVerifier, ExpectedDigest, ImageSink, ImageTarget, SinkError};

use super::storage::Spiffs;

const SECTOR_SIZE: usize = 4096;

enum ActiveImage {
    App {
        handle: esp_ota_handle_t,
        partition: *const esp_partition_t,
    },
    Data {
        partition: *const esp_partition_t,
        offset: usize,
        erased: usize,
    },
}

pub struct EspImageSink {
    storage: Spiffs,
    active: Option<ActiveImage>,
    verifier: DigestVerifier,
    last_error: Option<SinkError>,
}

// SAFETY: the partition pointers refer to ESP-IDF's partition table, which is
// static for the lifetime of the program; the OTA handle is a plain integer.
unsafe impl Send for EspImageSink {}

impl EspImageSink {
    pub fn new(storage: Spiffs) -> Self {
        Self {
            storage,
            active: None,
            verifier: DigestVerifier::default(),
            last_error: None,
        }
    }

    fn partition_for(target: ImageTarget) -> *const esp_partition_t {
        unsafe {
            match target {
                ImageTarget::Firmware => esp_ota_get_next_update_partition(core::ptr::null()),
                ImageTarget::Filesystem => esp_partition_find_first(
                    esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_DATA_SPIFFS,
                    core::ptr::null(),
                ),
            }
        }
    }

    fn reject_begin(&mut self, err: SinkError) -> SinkError {
        self.verifier.clear();
        self.record(err)
    }

    fn record(&mut self, err: SinkError) -> SinkError {
        log::error!("Flash error: {}", err);
        self.last_error = Some(err.clone());
        err
    }

    fn remount(&mut self) -> Result<(), SinkError> {
        self.storage
            .mount()
            .map_err(|e| SinkError::new(e.code(), format!("Filesystem remount failed: {e}")))
    }

    fn release(&mut self, image: ActiveImage) {
        match image {
            ActiveImage::App { handle, .. } => {
                unsafe { esp_ota_abort(handle) };
            }
            ActiveImage::Data { .. } => {
                if let Err(e) = self.remount() {
                    self.record(e);
                }
            }
        }
    }

    fn write_data(
        partition: *const esp_partition_t,
        offset: &mut usize,
        erased: &mut usize,
        data: &[u8],
    ) -> Result<(), SinkError> {
        let capacity = unsafe { (*partition).size } as usize;
        let end = *offset + data.len();
        if end > capacity {
            return Err(SinkError::new(
                ESP_ERR_INVALID_SIZE as i32,
                format!("Image exceeds filesystem partition ({end} > {capacity} bytes)"),
            ));
        }

        // Erase sector by sector ahead of the write position
        while *erased < end {
            let code = unsafe { esp_partition_erase_range(partition, *erased, SECTOR_SIZE) };
            check(code, "Partition erase failed")?;
            *erased += SECTOR_SIZE;
        }

        let code = unsafe {
            esp_partition_write(partition, *offset, data.as_ptr() as *const c_void, data.len())
        };
        check(code, "Partition write failed")?;
        *offset = end;
        Ok(())
    }
}

impl ImageSink for EspImageSink {
    fn size_hint(&self, target: ImageTarget) -> Option<usize> {
        let partition = Self::partition_for(target);
        if partition.is_null() {
            None
        } else {
            Some(unsafe { (*partition).size } as usize)
        }
    }

    fn expect_digest(&mut self, digest: ExpectedDigest) -> Result<(), SinkError> {
        self.verifier.expect(digest);
        Ok(())
    }

    fn begin(&mut self, size: Option<usize>, target: ImageTarget) -> Result<(), SinkError> {
        if let Some(previous) = self.active.take() {
            log::warn!("Releasing unfinished image before starting a new one");
            self.release(previous);
        }
        self.verifier.reset();
        self.last_error = None;

        let partition = Self::partition_for(target);
        if partition.is_null() {
            return Err(self.reject_begin(SinkError::new(
                ESP_ERR_NOT_FOUND as i32,
                format!("No {target:?} partition available"),
            )));
        }

        let image = match target {
            ImageTarget::Firmware => {
                let mut handle: esp_ota_handle_t = 0;
                let image_size = size.unwrap_or(OTA_SIZE_UNKNOWN as usize);
                let code = unsafe { esp_ota_begin(partition, image_size as _, &mut handle) };
                if let Err(e) = check(code, "OTA begin failed") {
                    return Err(self.reject_begin(e));
                }
                ActiveImage::App { handle, partition }
            }
            ImageTarget::Filesystem => {
                if let Err(e) = self.storage.unmount() {
                    log::warn!("SPIFFS unmount failed: {:?}", e);
                }
                ActiveImage::Data {
                    partition,
                    offset: 0,
                    erased: 0,
                }
            }
        };

        log::info!(
            "Writing {:?} image to partition at 0x{:x}",
            target,
            unsafe { (*partition).address }
        );
        self.active = Some(image);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let result = match self.active.as_mut() {
            None => Err(SinkError::new(
                ESP_ERR_INVALID_STATE as i32,
                "No image in progress",
            )),
            Some(ActiveImage::App { handle, .. }) => {
                let code = unsafe {
                    esp_ota_write(*handle, data.as_ptr() as *const c_void, data.len() as _)
                };
                check(code, "OTA write failed")
            }
            Some(ActiveImage::Data {
                partition,
                offset,
                erased,
            }) => Self::write_data(*partition, offset, erased, data),
        };

        match result {
            Ok(()) => {
                self.verifier.update(data);
                data.len()
            }
            Err(e) => {
                self.record(e);
                0
            }
        }
    }

    fn end(&mut self, finalize: bool) -> Result<(), SinkError> {
        let Some(image) = self.active.take() else {
            return Err(self.record(SinkError::new(
                ESP_ERR_INVALID_STATE as i32,
                "No image in progress",
            )));
        };

        if !finalize {
            self.release(image);
            self.verifier.clear();
            return Ok(());
        }

        if let Err(actual) = self.verifier.verify() {
            self.release(image);
            return Err(self.record(SinkError::new(
                ESP_ERR_INVALID_CRC as i32,
                format!("Checksum mismatch: got {actual}"),
            )));
        }

        match image {
            ActiveImage::App { handle, partition } => {
                let code = unsafe { esp_ota_end(handle) };
                if let Err(e) = check(code, "OTA end failed") {
                    return Err(self.record(e));
                }
                let code = unsafe { esp_ota_set_boot_partition(partition) };
                if let Err(e) = check(code, "Setting boot partition failed") {
                    return Err(self.record(e));
                }
                log::info!("New firmware set as boot partition");
            }
            ActiveImage::Data { offset, .. } => {
                log::info!("Filesystem image written ({} bytes)", offset);
                if let Err(e) = self.remount() {
                    return Err(self.record(e));
                }
            }
        }
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(image) = self.active.take() {
            log::warn!("Aborting image write");
            self.release(image);
        }
        self.verifier.clear();
    }

    fn error(&self) -> Option<SinkError> {
        self.last_error.clone()
    }
}

impl Drop for EspImageSink {
    fn drop(&mut self) {
        // Clean up any ongoing OTA operation
        if let Some(ActiveImage::App { handle, .. }) = self.active.take() {
            unsafe { esp_ota_abort(handle) };
        }
    }
}

fn check(code: esp_err_t, context: &str) -> Result<(), SinkError> {
    if code == ESP_OK as esp_err_t {
        return Ok(());
    }
    let name = EspError::from(code)
        .map(|e| e.to_string())
        .unwrap_or_else(|| format!("error {code}"));
    Err(SinkError::new(code, format!("{context}: {name}")))
}
