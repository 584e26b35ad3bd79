pub mod error_handler;
pub mod validators;
#[cfg(target_os = "espidf")]
pub mod web_server;
#[cfg(target_os = "espidf")]
pub mod wifi;

#[cfg(target_os = "espidf")]
pub use manager::NetworkManager;

/// Request type every route handler receives.
#[cfg(target_os = "espidf")]
pub type HttpRequest<'r, 'c> =
    esp_idf_svc::http::server::Request<&'r mut esp_idf_svc::http::server::EspHttpConnection<'c>>;

#[cfg(target_os = "espidf")]
mod manager {
    use anyhow::Result;
    use esp_idf_hal::modem::Modem;
    use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};

    use super::wifi::WifiManager;

    pub struct NetworkManager {
        wifi: WifiManager,
    }

    impl NetworkManager {
        pub fn new(
            modem: Modem,
            sys_loop: EspSystemEventLoop,
            nvs: EspDefaultNvsPartition,
            ssid: String,
            password: String,
        ) -> Result<Self> {
            let wifi = WifiManager::new(modem, sys_loop, nvs, ssid, password)?;
            Ok(Self { wifi })
        }

        pub fn connect(&mut self) -> Result<()> {
            let signal = self.wifi.connect()?;
            log::info!(
                "WiFi connected to {} ({} dBm), IP: {:?}",
                self.wifi.ssid,
                signal,
                self.wifi.get_ip()
            );
            Ok(())
        }

        pub fn is_connected(&self) -> bool {
            self.wifi.get_ip().is_some()
        }

        pub fn get_ip(&self) -> Option<String> {
            self.wifi.get_ip()
        }
    }
}
