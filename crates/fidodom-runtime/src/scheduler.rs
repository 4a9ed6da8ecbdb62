//! Fixed-rate cycle pacing.

use std::time::Duration;

use fidodom_types::OdomError;
use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

use crate::bounded::CancelToken;
use crate::engine::{CycleStats, OdometryFusionEngine};

/// Drives [`OdometryFusionEngine::run_cycle`] at `rate_hz`.
///
/// A cycle that overruns its slot delays the next one rather than
/// triggering a burst of catch-up cycles.
#[derive(Debug, Clone)]
pub struct CycleScheduler {
    period: Duration,
    max_cycles: Option<u64>,
    cancel: CancelToken,
}

impl CycleScheduler {
    /// # Errors
    ///
    /// Returns [`OdomError::Config`] unless `rate_hz` is finite and positive.
    pub fn new(rate_hz: f64, cancel: CancelToken) -> Result<Self, OdomError> {
        if !rate_hz.is_finite() || rate_hz <= 0.0 {
            return Err(OdomError::Config(format!("rate_hz must be positive, got {rate_hz}")));
        }
        let period = Duration::try_from_secs_f64(1.0 / rate_hz)
            .map_err(|e| OdomError::Config(format!("rate_hz {rate_hz}: {e}")))?;
        Ok(Self {
            period,
            max_cycles: None,
            cancel,
        })
    }

    /// Stop after `cycles` cycles.
    pub fn with_cycle_limit(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run until cancelled or the cycle limit is reached.
    pub async fn run(&self, engine: &mut OdometryFusionEngine) -> CycleStats {
        self.run_with(engine, |_| {}).await
    }

    /// Like [`run`](Self::run), calling `before_cycle` with the zero-based
    /// tick index ahead of every cycle.
    pub async fn run_with<F>(&self, engine: &mut OdometryFusionEngine, mut before_cycle: F) -> CycleStats
    where
        F: FnMut(u64),
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = 0u64;

        info!(period_ms = self.period.as_millis() as u64, max_cycles = ?self.max_cycles, "cycle scheduler started");
        loop {
            if let Some(max) = self.max_cycles
                && tick >= max
            {
                break;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            before_cycle(tick);
            engine.run_cycle().await;
            tick += 1;
        }

        let stats = engine.stats().clone();
        info!(
            cycles = stats.cycles,
            emitted = stats.emitted,
            skipped = stats.skipped(),
            timeouts = stats.timeouts,
            "cycle scheduler stopped"
        );
        stats
    }
}
