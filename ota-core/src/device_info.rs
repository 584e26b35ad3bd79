use serde::Serialize;

use crate::config::DeviceIdentity;
use crate::walker::DirTree;

/// Snapshot returned by the device info endpoint. Field names follow what
/// update clients already expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub owner: String,
    pub repository: String,
    #[serde(rename = "chipfamily")]
    pub chip_family: String,
    pub branch: String,
    pub build: u16,
    #[serde(rename = "FWVersion")]
    pub firmware_version: String,
    #[serde(rename = "HwId")]
    pub hardware_id: String,
    #[serde(rename = "FWVariant")]
    pub firmware_variant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<DirTree>,
}

impl DeviceInfo {
    pub fn new(identity: &DeviceIdentity, backup: Option<DirTree>) -> Self {
        Self {
            owner: identity.owner.clone(),
            repository: identity.repository.clone(),
            chip_family: identity.chip_family.clone(),
            branch: identity.branch.clone(),
            build: identity.build,
            firmware_version: identity.firmware_version.clone(),
            hardware_id: identity.hardware_id.clone(),
            firmware_variant: identity.firmware_variant.clone(),
            backup,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
