//! Rate limiting for outgoing telemetry.

use std::time::Duration;

use tokio::time::Instant;

/// Allows one send per interval. The first call is always allowed.
#[derive(Debug)]
pub struct TelemetryThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl TelemetryThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Changes the interval. Takes effect relative to the last send.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn ready(&self, now: Instant) -> bool {
        match self.last_sent {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Records an attempt, successful or not.
    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }
}
