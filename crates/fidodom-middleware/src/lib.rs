//! `fidodom-middleware` – where estimates and diagnostics leave the engine.
//!
//! # Modules
//!
//! - [`bus`] – [`EventBus`]: typed, topic-based broadcast bus with an
//!   `Odometry` lane and a `Diagnostics` lane.
//! - [`sink`] – [`OdometrySink`]: the fire-and-forget output seam, with
//!   bus, JSON-lines, and in-memory implementations.

pub mod bus;
pub mod sink;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use sink::{BusOdometrySink, JsonLinesSink, OdometrySink, RecordingSink};
