//! Restart circuit breaker.
//!
//! Counts consecutive failed restart attempts and disarms auto-restart at
//! the configured threshold. Unlike a classic breaker there is no timed
//! half-open probe: once Disabled it stays Disabled until an operator
//! resets it, which is what keeps a flapping agent from being restarted
//! forever.

use sentinel_common::BreakerMode;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RestartBreaker {
    consecutive_failures: u32,
    threshold: u32,
    mode: BreakerMode,
}

impl RestartBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            threshold,
            mode: BreakerMode::Armed,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.mode == BreakerMode::Armed
    }

    pub fn mode(&self) -> BreakerMode {
        self.mode
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Record a failed restart. Returns true when this exact failure trips
    /// the breaker (transition Armed -> Disabled).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.mode == BreakerMode::Armed && self.consecutive_failures >= self.threshold {
            self.mode = BreakerMode::Disabled;
            warn!(
                failures = self.consecutive_failures,
                threshold = self.threshold,
                "restart breaker tripped, auto-restart disabled until manual reset"
            );
            return true;
        }

        false
    }

    /// Record a successful restart; the consecutive counter starts over.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Manual operator reset: re-arm and clear the counter.
    pub fn reset(&mut self) {
        info!("restart breaker reset, auto-restart re-armed");
        self.consecutive_failures = 0;
        self.mode = BreakerMode::Armed;
    }
}
