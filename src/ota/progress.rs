use ota_core::UpdateListener;

const UNKNOWN_SIZE_STEP: usize = 64 * 1024;

/// Logs update progress in 10% steps (every 64 KiB when the size is unknown).
#[derive(Debug, Default)]
pub struct ProgressLogger {
    last_step: Option<usize>,
}

impl ProgressLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the step just crossed, if this progress report crosses one.
    fn crossed_step(&mut self, current: usize, total: Option<usize>) -> Option<usize> {
        let step = match total {
            Some(total) if total > 0 => (current.min(total) * 10 / total) * 10,
            _ => current / UNKNOWN_SIZE_STEP,
        };
        if self.last_step == Some(step) {
            return None;
        }
        self.last_step = Some(step);
        Some(step)
    }
}

impl UpdateListener for ProgressLogger {
    fn on_start(&mut self) {
        self.last_step = None;
        log::info!("OTA Update started");
    }

    fn on_progress(&mut self, current: usize, total: Option<usize>) {
        if let Some(step) = self.crossed_step(current, total) {
            match total {
                Some(total) if total > 0 => {
                    log::info!("OTA Progress: {}% ({}/{} bytes)", step, current, total)
                }
                _ => log::info!("OTA Progress: {} bytes", current),
            }
        }
    }

    fn on_end(&mut self, success: bool) {
        if success {
            log::info!("OTA Update complete");
        } else {
            log::error!("OTA Update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_size_logs_each_tenth_once() {
        let mut logger = ProgressLogger::new();
        assert_eq!(logger.crossed_step(50, Some(1000)), Some(0));
        assert_eq!(logger.crossed_step(90, Some(1000)), None);
        assert_eq!(logger.crossed_step(100, Some(1000)), Some(10));
        assert_eq!(logger.crossed_step(560, Some(1000)), Some(50));
        assert_eq!(logger.crossed_step(1000, Some(1000)), Some(100));
    }

    #[test]
    fn test_partition_larger_than_image() {
        // total is the partition size, so completion can land well below 100%
        let mut logger = ProgressLogger::new();
        assert_eq!(logger.crossed_step(4096, Some(1_048_576)), Some(0));
        assert_eq!(logger.crossed_step(2_000_000, Some(1_048_576)), Some(100));
    }

    #[test]
    fn test_unknown_size_logs_per_64k() {
        let mut logger = ProgressLogger::new();
        assert_eq!(logger.crossed_step(4096, None), Some(0));
        assert_eq!(logger.crossed_step(8192, None), None);
        assert_eq!(logger.crossed_step(65536, None), Some(1));
    }

    #[test]
    fn test_start_resets_steps() {
        let mut logger = ProgressLogger::new();
        logger.crossed_step(100, Some(100));
        logger.on_start();
        assert_eq!(logger.crossed_step(100, Some(100)), Some(100));
    }
}
