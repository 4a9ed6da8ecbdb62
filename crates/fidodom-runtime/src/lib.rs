//! `fidodom-runtime` – The Odometry Fusion Engine
//!
//! Turns periodic fiducial detections into odometry estimates, one cycle at
//! a time.
//!
//! # Modules
//!
//! - [`engine`] – [`OdometryFusionEngine`][engine::OdometryFusionEngine]:
//!   source fallback, frame conversion, velocity estimation and packaging.
//!   Owns the single piece of persistent state, the previous pose.
//! - [`bounded`] – [`call_with_deadline`][bounded::call_with_deadline] and
//!   [`CancelToken`][bounded::CancelToken]: every collaborator call is raced
//!   against a timeout and a shared cancellation flag.
//! - [`startup`] – [`StartupPolicy`][startup::StartupPolicy]: bounded retry
//!   with exponential backoff used by
//!   [`OdometryFusionEngine::connect`][engine::OdometryFusionEngine::connect].
//! - [`scheduler`] – [`CycleScheduler`][scheduler::CycleScheduler]: paces
//!   cycles at a fixed rate until cancelled or a cycle limit is reached.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod bounded;
pub mod engine;
pub mod scheduler;
pub mod startup;
pub mod telemetry;

pub use bounded::{CancelToken, call_with_deadline};
pub use engine::{Collaborators, CycleStats, EngineConfig, OdometryFusionEngine};
pub use scheduler::CycleScheduler;
pub use startup::StartupPolicy;
pub use telemetry::{TracerProviderGuard, init_tracing};
