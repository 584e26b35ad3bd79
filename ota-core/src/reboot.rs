//! Deferred restart.
//!
//! A reboot is only requested here; the control loop polls the scheduler and
//! the restart happens once the grace period has passed, so the HTTP response
//! that triggered it can still reach the client.

use std::time::{Duration, Instant};

use log::{debug, info};

/// Monotonic time source.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Platform restart primitive. On the device this never returns.
pub trait Restart {
    fn restart(&mut self);
}

impl<F: FnMut()> Restart for F {
    fn restart(&mut self) {
        self()
    }
}

#[derive(Debug, Clone)]
pub struct RebootScheduler {
    grace: Duration,
    auto_reboot: bool,
    requested_at: Option<Instant>,
}

impl RebootScheduler {
    pub fn new(grace: Duration, auto_reboot: bool) -> Self {
        Self {
            grace,
            auto_reboot,
            requested_at: None,
        }
    }

    pub fn set_auto_reboot(&mut self, enable: bool) {
        self.auto_reboot = enable;
    }

    pub fn auto_reboot(&self) -> bool {
        self.auto_reboot
    }

    /// Record a reboot request. With auto-reboot disabled the request is kept
    /// but [`poll`](Self::poll) never acts on it.
    pub fn request(&mut self, now: Instant) {
        if self.requested_at.is_none() {
            self.requested_at = Some(now);
        }
        if self.auto_reboot {
            info!("Reboot requested, restarting in {} ms", self.grace.as_millis());
        } else {
            info!("Reboot requested, auto-reboot disabled - waiting for manual restart");
        }
    }

    pub fn pending(&self) -> Option<Instant> {
        self.requested_at
    }

    pub fn cancel(&mut self) {
        if self.requested_at.take().is_some() {
            debug!("Pending reboot cancelled");
        }
    }

    /// `true` once a pending request has aged past the grace period and
    /// auto-reboot is on. Clears the request when it fires.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.auto_reboot {
            return false;
        }
        match self.requested_at {
            Some(at) if now.saturating_duration_since(at) >= self.grace => {
                self.requested_at = None;
                true
            }
            _ => false,
        }
    }

    /// Poll and restart through `restart` when due.
    pub fn tick<R: Restart + ?Sized>(&mut self, now: Instant, restart: &mut R) -> bool {
        if !self.poll(now) {
            return false;
        }
        info!("Rebooting...");
        log::logger().flush();
        restart.restart();
        true
    }

    /// External trigger: restart immediately if any request is pending,
    /// regardless of auto-reboot and grace.
    pub fn fire_now<R: Restart + ?Sized>(&mut self, restart: &mut R) -> bool {
        if self.requested_at.take().is_none() {
            return false;
        }
        info!("Rebooting on external trigger...");
        log::logger().flush();
        restart.restart();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_millis(2000);

    #[test]
    fn test_poll_waits_for_grace() {
        let t0 = Instant::now();
        let mut scheduler = RebootScheduler::new(GRACE, true);
        assert!(!scheduler.poll(t0));

        scheduler.request(t0);
        assert!(!scheduler.poll(t0));
        assert!(!scheduler.poll(t0 + Duration::from_millis(1999)));
        assert!(scheduler.poll(t0 + GRACE));
        // cleared after firing
        assert!(!scheduler.poll(t0 + GRACE * 2));
        assert!(scheduler.pending().is_none());
    }

    #[test]
    fn test_poll_never_fires_when_disabled() {
        let t0 = Instant::now();
        let mut scheduler = RebootScheduler::new(GRACE, false);
        scheduler.request(t0);
        assert!(!scheduler.poll(t0 + Duration::from_secs(3600)));
        assert_eq!(scheduler.pending(), Some(t0));
    }

    #[test]
    fn test_repeat_request_keeps_first_timestamp() {
        let t0 = Instant::now();
        let mut scheduler = RebootScheduler::new(GRACE, true);
        scheduler.request(t0);
        scheduler.request(t0 + Duration::from_millis(1500));
        assert!(scheduler.poll(t0 + GRACE));
    }

    #[test]
    fn test_tick_invokes_restart_once() {
        let t0 = Instant::now();
        let mut scheduler = RebootScheduler::new(GRACE, true);
        let mut restarts = 0;
        let mut restart = || restarts += 1;

        scheduler.request(t0);
        assert!(!scheduler.tick(t0 + Duration::from_millis(10), &mut restart));
        assert!(scheduler.tick(t0 + Duration::from_millis(2500), &mut restart));
        assert!(!scheduler.tick(t0 + Duration::from_millis(5000), &mut restart));
        assert_eq!(restarts, 1);
    }

    #[test]
    fn test_fire_now_ignores_policy() {
        let t0 = Instant::now();
        let mut scheduler = RebootScheduler::new(GRACE, false);
        let mut fired = false;
        let mut restart = || fired = true;
        assert!(!scheduler.fire_now(&mut restart));

        scheduler.request(t0);
        assert!(scheduler.fire_now(&mut restart));
        assert!(fired);
    }
}
