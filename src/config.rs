use ota_core::OtaSettings;
use serde::{Deserialize, Serialize};

#[cfg(target_os = "espidf")]
use anyhow::Result;
#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};

#[cfg(target_os = "espidf")]
const CONFIG_NAMESPACE: &str = "ota";
#[cfg(target_os = "espidf")]
const CONFIG_KEY: &str = "config";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,

    pub http_port: u16,
    pub log_level: String,

    // Update behaviour
    pub ota: OtaSettings,
}

impl Default for Config {
    fn default() -> Self {
        // Get WiFi credentials from environment variables set by build.rs
        // These come from wifi_config.h which should NOT be committed to git
        Self {
            wifi_ssid: env!("WIFI_SSID").to_string(),
            wifi_password: env!("WIFI_PASSWORD").to_string(),
            http_port: 80,
            log_level: "info".to_string(),
            ota: OtaSettings {
                backup_root: Some("/".to_string()),
                ..Default::default()
            },
        }
    }
}

#[cfg(target_os = "espidf")]
pub fn load_or_default(nvs_partition: EspDefaultNvsPartition) -> Result<Config> {
    match load_from_nvs(nvs_partition.clone()) {
        Ok(mut config) => {
            log::info!("Loaded configuration from NVS");

            // If NVS has empty WiFi credentials, use the compiled-in ones
            if config.wifi_ssid.is_empty() {
                let default_config = Config::default();
                log::warn!(
                    "NVS WiFi credentials empty, using compiled defaults: SSID='{}'",
                    default_config.wifi_ssid
                );
                config.wifi_ssid = default_config.wifi_ssid;
                config.wifi_password = default_config.wifi_password;

                if let Err(e) = save_to_nvs_partition(nvs_partition, &config) {
                    log::warn!("Failed to save updated config with WiFi credentials: {:?}", e);
                }
            }

            Ok(config)
        }
        Err(e) => {
            log::warn!("Failed to load config from NVS: {:?}, using defaults", e);
            let config = Config::default();

            // Try to save default config to NVS for next time
            if let Err(save_err) = save_to_nvs_partition(nvs_partition, &config) {
                log::warn!("Failed to save default config to NVS: {:?}", save_err);
            }

            Ok(config)
        }
    }
}

#[cfg(target_os = "espidf")]
fn load_from_nvs(nvs_partition: EspDefaultNvsPartition) -> Result<Config> {
    let nvs = EspNvs::new(nvs_partition, CONFIG_NAMESPACE, true)?;

    let mut buf = vec![0u8; 2048]; // Max config size
    let data = nvs
        .get_blob(CONFIG_KEY, &mut buf)?
        .ok_or_else(|| anyhow::anyhow!("Config not found in NVS"))?;

    let config: Config = serde_json::from_slice(data)?;

    Ok(config)
}

#[cfg(target_os = "espidf")]
fn save_to_nvs_partition(nvs_partition: EspDefaultNvsPartition, config: &Config) -> Result<()> {
    let mut nvs = EspNvs::new(nvs_partition, CONFIG_NAMESPACE, true)?;

    let json = serde_json::to_vec(config)?;
    nvs.set_blob(CONFIG_KEY, &json)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_back_up_whole_filesystem() {
        let config = Config::default();
        assert_eq!(config.ota.backup_root(), Some("/"));
        assert_eq!(config.ota.fs_mount, "/spiffs");
        assert!(config.ota.auto_reboot);
        assert_eq!(config.http_port, 80);
    }

    #[test]
    fn test_stored_config_without_ota_section() {
        let config: Config =
            serde_json::from_str(r#"{"wifi_ssid":"lab","wifi_password":"secret"}"#).unwrap();
        assert_eq!(config.wifi_ssid, "lab");
        assert_eq!(config.ota.reboot_grace_ms, 2000);
        assert_eq!(config.log_level, "info");
    }
}
