/// Restart primitive handed to the reboot scheduler
use log::info;

/// Flush the log and restart the chip
pub fn restart() {
    info!("Restarting device...");

    // Ensure log is flushed
    log::logger().flush();

    // Small delay to ensure UART output completes
    esp_idf_hal::delay::Ets::delay_us(1000);

    unsafe { esp_idf_sys::esp_restart() }
}

/// Get the last reset reason as a string
pub fn get_reset_reason() -> &'static str {
    let reason = unsafe { esp_idf_sys::esp_reset_reason() };

    match reason {
        esp_idf_sys::esp_reset_reason_t_ESP_RST_UNKNOWN => "Unknown",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_POWERON => "Power-on",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_EXT => "External pin",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SW => "Software reset",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_PANIC => "Panic",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_INT_WDT => "Interrupt watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_TASK_WDT => "Task watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_WDT => "Other watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_DEEPSLEEP => "Deep sleep",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_BROWNOUT => "Brownout",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SDIO => "SDIO",
        _ => "Unknown reason code",
    }
}

/// Confirm the running image after an update so the bootloader keeps it
pub fn mark_running_app_valid() {
    let result = unsafe { esp_idf_sys::esp_ota_mark_app_valid_cancel_rollback() };
    if result == esp_idf_sys::ESP_OK as i32 {
        info!("Running firmware marked valid");
    } else {
        log::warn!("Could not mark running firmware valid: error {}", result);
    }
}
