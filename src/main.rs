#![cfg_attr(not(target_os = "espidf"), allow(dead_code))]

use anyhow::Result;

// Generate ESP-IDF app descriptor
// Note: This macro generates warnings about cfg conditions but they're harmless
#[cfg(target_os = "espidf")]
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod config;
mod logging;
mod network;
mod ota;
mod system;
mod version;

#[cfg(target_os = "espidf")]
fn main() -> Result<()> {
    use esp_idf_hal::{delay::FreeRtos, peripherals::Peripherals};
    use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};
    use log::{error, info, warn};
    use ota_core::UpdateController;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use crate::network::{web_server::UpdateServer, NetworkManager};
    use crate::ota::{EspImageSink, ProgressLogger, Spiffs};

    const WIFI_RETRY_INTERVAL: Duration = Duration::from_secs(30);
    const LOOP_DELAY_MS: u32 = 100;

    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();
    logging::init_logger().map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    info!("ESP32 OTA updater {} starting", version::full_version());
    info!("Reset reason: {}", system::reset::get_reset_reason());
    info!("Running from partition: {}", system::info::running_partition());
    system::reset::mark_running_app_valid();

    // Take peripherals and system event loop
    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let config = config::load_or_default(nvs.clone())?;
    if !logging::set_max_level_from_str(&config.log_level) {
        warn!("Unknown log level '{}', keeping info", config.log_level);
    }
    info!(
        "WiFi credentials: SSID='{}', Password={}",
        config.wifi_ssid,
        if config.wifi_password.is_empty() { "<empty>" } else { "<set>" }
    );

    // File store used for backup and restore
    let storage = Spiffs::new(&config.ota.fs_mount)?;
    if let Err(e) = storage.mount() {
        error!("SPIFFS mount failed: {:?}", e);
    }

    let identity = system::info::device_identity(
        system::info::chip_family(),
        system::info::hardware_id(),
    );
    info!(
        "Device {} ({}), auto reboot {}",
        identity.hardware_id,
        identity.chip_family,
        if config.ota.auto_reboot { "on" } else { "off" }
    );

    let mut controller = UpdateController::new(EspImageSink::new(storage), config.ota.clone(), identity);
    controller.set_listener(ProgressLogger::new());
    let controller = Arc::new(Mutex::new(controller));

    let mut network = NetworkManager::new(
        peripherals.modem,
        sys_loop,
        nvs,
        config.wifi_ssid.clone(),
        config.wifi_password.clone(),
    )?;

    let mut server: Option<UpdateServer> = None;
    let mut last_attempt: Option<Instant> = None;
    let mut restart = system::reset::restart;

    info!("Entering main loop");
    loop {
        let due = last_attempt.map_or(true, |at| at.elapsed() >= WIFI_RETRY_INTERVAL);
        if server.is_none() && due {
            last_attempt = Some(Instant::now());
            if !network.is_connected() {
                if let Err(e) = network.connect() {
                    warn!("WiFi connect failed: {:?}, retrying in {:?}", e, WIFI_RETRY_INTERVAL);
                }
            }
            if network.is_connected() {
                match UpdateServer::new(controller.clone(), config.http_port) {
                    Ok(started) => {
                        info!(
                            "OTA interface available at http://{}/",
                            network.get_ip().unwrap_or_default()
                        );
                        server = Some(started);
                    }
                    Err(e) => error!("Failed to start web server: {:?}", e),
                }
            }
        }

        match controller.lock() {
            Ok(mut ctrl) => {
                ctrl.tick(&mut restart);
            }
            Err(e) => error!("Failed to lock OTA controller: {}", e),
        }

        FreeRtos::delay_ms(LOOP_DELAY_MS);
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> Result<()> {
    logging::init_logger().map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;
    log::warn!(
        "esp32-ota-updater {} only runs on ESP-IDF targets; the host build exists for tests",
        version::full_version()
    );
    Ok(())
}
