//! Bounded retry with exponential backoff for collaborator readiness.

use std::time::Duration;

use fidodom_types::OdomError;

/// How hard [`connect`](crate::engine::OdometryFusionEngine::connect) tries
/// before reporting the collaborators as not ready.
#[derive(Debug, Clone, PartialEq)]
pub struct StartupPolicy {
    /// Wait after the first failed probe.
    pub initial_delay: Duration,
    /// Upper bound on the wait between probes.
    pub max_delay: Duration,
    /// Factor applied to the wait after every failed probe.
    pub multiplier: f64,
    /// Probes before giving up.
    pub max_attempts: u32,
    /// Bound on each individual collaborator call during a probe.
    pub attempt_timeout: Duration,
    /// Pause after a successful probe so the transform buffer can fill.
    pub settle_delay: Duration,
}

impl Default for StartupPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: 8,
            attempt_timeout: Duration::from_secs(2),
            settle_delay: Duration::from_secs(2),
        }
    }
}

impl StartupPolicy {
    /// Wait to use after `current`, capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// The waits between consecutive probes: `max_attempts - 1` entries.
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 1..self.max_attempts {
            delays.push(delay);
            delay = self.next_delay(delay);
        }
        delays
    }

    /// Reject policies that could never succeed or would shrink the backoff.
    pub fn validate(&self) -> Result<(), OdomError> {
        if self.max_attempts == 0 {
            return Err(OdomError::Config("startup.max_attempts must be at least 1".into()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(OdomError::Config(format!(
                "startup.multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.attempt_timeout.is_zero() {
            return Err(OdomError::Config("startup.attempt_timeout must be positive".into()));
        }
        Ok(())
    }
}
