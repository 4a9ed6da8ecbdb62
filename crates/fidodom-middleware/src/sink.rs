//! The `OdometrySink` seam and its transports.
//!
//! Emission is fire-and-forget: the engine does not wait for, or react to,
//! delivery.  Transports must carry the [`OdometryEstimate`] field-for-field.

use std::io::Write;
use std::sync::Mutex;

use fidodom_types::{Event, EventPayload, OdometryEstimate};
use tracing::warn;

use crate::bus::{EventBus, Topic};

/// Receives each estimate the engine produces.
pub trait OdometrySink: Send + Sync {
    fn emit(&self, estimate: &OdometryEstimate);
}

// ────────────────────────────────────────────────────────────────────────────
// Bus
// ────────────────────────────────────────────────────────────────────────────

/// Publishes estimates on [`Topic::Odometry`].
#[derive(Debug, Clone)]
pub struct BusOdometrySink {
    bus: EventBus,
    source: String,
}

impl BusOdometrySink {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            source: "fidodom-middleware::odometry".to_string(),
        }
    }
}

impl OdometrySink for BusOdometrySink {
    fn emit(&self, estimate: &OdometryEstimate) {
        let event = Event::new(self.source.clone(), EventPayload::Odometry(estimate.clone()));
        // No subscribers is a normal condition.
        self.bus.publish_lossy(Topic::Odometry, event);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// JSON lines
// ────────────────────────────────────────────────────────────────────────────

/// Writes one JSON object per estimate, newline-delimited.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|p| p.into_inner())
    }
}

impl<W: Write + Send> OdometrySink for JsonLinesSink<W> {
    fn emit(&self, estimate: &OdometryEstimate) {
        let line = match serde_json::to_string(estimate) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialise odometry estimate");
                return;
            }
        };
        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            warn!(error = %e, "failed to write odometry estimate");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Recording
// ────────────────────────────────────────────────────────────────────────────

/// Keeps every estimate in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    estimates: Mutex<Vec<OdometryEstimate>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn estimates(&self) -> Vec<OdometryEstimate> {
        self.estimates.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.estimates.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OdometrySink for RecordingSink {
    fn emit(&self, estimate: &OdometryEstimate) {
        self.estimates
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(estimate.clone());
    }
}
