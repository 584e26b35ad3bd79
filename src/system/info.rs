use ota_core::DeviceIdentity;

use crate::version;

/// Hardware id reported to update clients: the factory MAC as bare hex.
pub fn format_hardware_id(mac: &[u8; 6]) -> String {
    mac.iter().map(|b| format!("{b:02X}")).collect()
}

#[cfg(target_os = "espidf")]
pub fn chip_family() -> &'static str {
    use esp_idf_sys::*;

    let mut chip = esp_chip_info_t::default();
    unsafe { esp_chip_info(&mut chip) };

    match chip.model {
        esp_chip_model_t_CHIP_ESP32S3 => "ESP32-S3",
        esp_chip_model_t_CHIP_ESP32C3 => "ESP32-C3",
        esp_chip_model_t_CHIP_ESP32S2 => "ESP32-S2",
        esp_chip_model_t_CHIP_ESP32C6 => "ESP32-C6",
        esp_chip_model_t_CHIP_ESP32H2 => "ESP32-H2",
        _ => "ESP32",
    }
}

#[cfg(target_os = "espidf")]
pub fn hardware_id() -> String {
    let mut mac = [0u8; 6];
    let result = unsafe { esp_idf_sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) };
    if result != esp_idf_sys::ESP_OK as i32 {
        log::warn!("Failed to read factory MAC: error {}", result);
    }
    format_hardware_id(&mac)
}

/// Label of the app partition the firmware is running from
#[cfg(target_os = "espidf")]
pub fn running_partition() -> String {
    unsafe {
        let partition = esp_idf_sys::esp_ota_get_running_partition();
        if partition.is_null() {
            return "unknown".to_string();
        }
        std::ffi::CStr::from_ptr((*partition).label.as_ptr())
            .to_string_lossy()
            .into_owned()
    }
}

/// Identity reported by `/getdeviceinfo`, from build metadata and the chip.
pub fn device_identity(chip_family: &str, hardware_id: String) -> DeviceIdentity {
    DeviceIdentity {
        owner: version::GIT_OWNER.to_string(),
        repository: version::GIT_REPO.to_string(),
        branch: version::GIT_BRANCH.to_string(),
        build: version::build_number(),
        firmware_version: version::full_version(),
        firmware_variant: version::FW_VARIANT.to_string(),
        hardware_id,
        chip_family: chip_family.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_id_is_uppercase_hex() {
        assert_eq!(
            format_hardware_id(&[0x24, 0x0a, 0xc4, 0x00, 0x01, 0xff]),
            "240AC40001FF"
        );
    }

    #[test]
    fn test_identity_uses_build_version() {
        let identity = device_identity("ESP32-S3", "AABB".to_string());
        assert_eq!(identity.chip_family, "ESP32-S3");
        assert_eq!(identity.hardware_id, "AABB");
        assert_eq!(identity.firmware_version, version::full_version());
    }
}
