//! `fidodom` – fiducial odometry from the command line.
//!
//! Runs the Odometry Fusion Engine against a simulated rig: two cameras
//! looking at a landmark at a known odometry position while the robot drives
//! at constant velocity.  It:
//!
//! 1. Loads `~/.fidodom/config.toml` (or `--config <path>`), applying
//!    `FIDODOM_*` environment overrides.
//! 2. Probes the collaborators with bounded retries before the first cycle.
//! 3. Paces cycles at `rate_hz`, printing every estimate (or JSON lines with
//!    `--json`).
//! 4. Stops cleanly on **Ctrl-C** or after `--cycles N`, printing the cycle
//!    counters.
//!
//! `fidodom --print-schema` prints the JSON Schema of the emitted estimate.

mod config;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tracing::{debug, warn};

use fidodom_hal::ImageSource;
use fidodom_hal::sim::{LandmarkRig, SimCamera, SimClock, Visibility};
use fidodom_middleware::{BusOdometrySink, EventBus, JsonLinesSink, OdometrySink, Topic};
use fidodom_perception::{
    FiniteDifferenceRpy, Quaternion, RotationLogMap, StaticTransformProvider, Transform3D, Vec3,
};
use fidodom_runtime::{
    CancelToken, Collaborators, CycleScheduler, CycleStats, OdometryFusionEngine, init_tracing,
};
use fidodom_types::{EventPayload, OdomError, OdometryEstimate, Vector3Msg};

use config::{Config, VelocityModelKind};

/// Fiducial landmark odometry.
#[derive(Debug, Parser)]
#[command(name = "fidodom", author, version, about = "Landmark-anchored odometry from fiducial detections")]
struct Args {
    /// Path to the TOML configuration. Defaults to ~/.fidodom/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many cycles instead of running until Ctrl-C.
    #[arg(long)]
    cycles: Option<u64>,

    /// Write estimates to stdout as JSON lines.
    #[arg(long)]
    json: bool,

    /// Skip the collaborator readiness probe.
    #[arg(long)]
    no_connect: bool,

    /// Print the JSON Schema of the odometry estimate and exit.
    #[arg(long)]
    print_schema: bool,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{}: {err}", "error".red().bold());
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    if args.print_schema {
        let schema = schemars::schema_for!(OdometryEstimate);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    // Tracing must be up before the Tokio runtime; see telemetry.
    let _guard = init_tracing("fidodom");

    let path = args.config.clone().unwrap_or_else(config::config_path);
    let cfg = config::load_or_default(&path)?;
    debug!(path = %path.display(), ?cfg, "configuration loaded");

    if !args.json {
        print_banner(&cfg, &path);
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let cancel = CancelToken::new();
    let cancel_on_signal = cancel.clone();
    let quiet = args.json;
    if let Err(e) = ctrlc::set_handler(move || {
        if !quiet {
            eprintln!();
            eprintln!("{}", "⚠  Ctrl-C received – stopping after the current cycle …".yellow().bold());
        }
        cancel_on_signal.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use --cycles to bound the run");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let stats = runtime.block_on(run(cfg, &args, cancel))?;

    if !args.json {
        print_stats(&stats);
    }
    Ok(())
}

async fn run(cfg: Config, args: &Args, cancel: CancelToken) -> Result<CycleStats, OdomError> {
    let bus = EventBus::default();
    let clock = SimClock::new();

    let sink: Arc<dyn OdometrySink> = if args.json {
        Arc::new(JsonLinesSink::new(std::io::stdout()))
    } else {
        tokio::spawn(print_estimates(bus.clone()));
        Arc::new(BusOdometrySink::new(bus.clone()))
    };
    tokio::spawn(log_diagnostics(bus.clone()));

    let collaborators = simulated_rig(&cfg, &clock, sink);
    let mut engine = OdometryFusionEngine::new(cfg.engine_config(), collaborators)
        .with_diagnostics(bus)
        .with_cancel_token(cancel.clone());
    engine = match cfg.velocity_model {
        VelocityModelKind::FiniteDifferenceRpy => engine.with_velocity_model(FiniteDifferenceRpy),
        VelocityModelKind::RotationLogMap => engine.with_velocity_model(RotationLogMap),
    };

    if !args.no_connect {
        match engine.connect(&cfg.startup_policy()).await {
            Ok(()) => {}
            Err(OdomError::Cancelled(_)) => return Ok(engine.stats().clone()),
            Err(e) => return Err(e),
        }
    }

    let mut scheduler = CycleScheduler::new(cfg.rate_hz, cancel)?;
    if let Some(cycles) = args.cycles {
        scheduler = scheduler.with_cycle_limit(cycles);
    }
    let period = scheduler.period().as_secs_f64();
    let stats = scheduler
        .run_with(&mut engine, |tick| clock.set(tick as f64 * period))
        .await;
    Ok(stats)
}

/// Cameras, landmark detector and transform tree of the simulated robot.
///
/// Each camera's optical frame is `<source>_optical`, aligned with the
/// footprint.
fn simulated_rig(cfg: &Config, clock: &SimClock, sink: Arc<dyn OdometrySink>) -> Collaborators {
    let primary_frame = format!("{}_optical", cfg.primary_source);
    let secondary_frame = format!("{}_optical", cfg.secondary_source);

    let primary: Arc<dyn ImageSource> = Arc::new(SimCamera::new(
        cfg.primary_source.clone(),
        primary_frame.clone(),
        clock.clone(),
    ));
    let secondary: Arc<dyn ImageSource> = Arc::new(SimCamera::new(
        cfg.secondary_source.clone(),
        secondary_frame.clone(),
        clock.clone(),
    ));

    let [lx, ly, lz] = cfg.sim.landmark;
    let [sx, sy, sz] = cfg.sim.start;
    let [vx, vy, vz] = cfg.sim.velocity;
    let primary_visibility = if cfg.sim.primary_period_s > 0.0 {
        Visibility::Periodic {
            period: cfg.sim.primary_period_s,
            visible_for: cfg.sim.primary_visible_s,
        }
    } else {
        Visibility::Always
    };
    let rig = LandmarkRig::new(
        Vector3Msg::new(lx, ly, lz),
        Vector3Msg::new(sx, sy, sz),
        Vector3Msg::new(vx, vy, vz),
    )
    .with_visibility(cfg.primary_source.clone(), primary_visibility);

    let transforms = StaticTransformProvider::new()
        .with_transform(
            &cfg.odometry_frame,
            &cfg.landmark_frame,
            Transform3D::new(Vec3::new(lx, ly, lz), Quaternion::identity()),
        )
        .with_transform(&cfg.footprint_frame, &primary_frame, Transform3D::identity())
        .with_transform(&cfg.footprint_frame, &secondary_frame, Transform3D::identity());

    Collaborators {
        primary,
        secondary,
        detector: Arc::new(rig),
        transforms: Arc::new(transforms),
        sink,
    }
}

async fn print_estimates(bus: EventBus) {
    let mut rx = bus.subscribe_to(Topic::Odometry);
    while let Some(event) = rx.next().await {
        if let EventPayload::Odometry(estimate) = event.payload {
            let p = estimate.pose.pose.position;
            let v = estimate.twist.twist.linear;
            println!(
                "  {} t={:>7.2}s  pos=({:>7.3}, {:>7.3}, {:>7.3})  vel=({:>6.3}, {:>6.3}, {:>6.3})",
                "●".green(),
                estimate.header.stamp,
                p.x,
                p.y,
                p.z,
                v.x,
                v.y,
                v.z,
            );
        }
    }
}

async fn log_diagnostics(bus: EventBus) {
    let mut rx = bus.subscribe_to(Topic::Diagnostics);
    while let Some(event) = rx.next().await {
        match event.payload {
            EventPayload::CycleSkipped { cycle, reason } => {
                debug!(cycle, reason = reason.label(), "skip reported");
            }
            EventPayload::Readiness(readiness) => debug!(?readiness, "readiness reported"),
            _ => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(cfg: &Config, path: &std::path::Path) {
    println!();
    println!("{}", "  fidodom – fiducial odometry".bold().cyan());
    println!(
        "  config   {}",
        if path.exists() {
            path.display().to_string().bold()
        } else {
            "defaults".dimmed()
        }
    );
    println!(
        "  frames   {} → {} (landmark {}, camera {})",
        cfg.odometry_frame.bold(),
        cfg.footprint_frame.bold(),
        cfg.landmark_frame,
        cfg.camera_frame
    );
    println!(
        "  sources  {} then {} @ {} Hz",
        cfg.primary_source.bold(),
        cfg.secondary_source,
        cfg.rate_hz
    );
    println!();
}

fn print_stats(stats: &CycleStats) {
    println!();
    println!("{}", "  Cycle summary".bold());
    println!("    cycles              {}", stats.cycles);
    println!("    emitted             {}", stats.emitted.to_string().green());
    println!("    from secondary      {}", stats.secondary_used);
    println!("    no marker           {}", stats.no_marker);
    println!("    collaborator errors {}", stats.collaborator_failures.to_string().yellow());
    println!("    timeouts            {}", stats.timeouts);
    println!("    cancelled           {}", stats.cancelled);
    println!("    zero-twist estimates {}", stats.velocity_fallbacks);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_rig_recovers_ground_truth() {
        let mut cfg = Config::default();
        cfg.sim.primary_period_s = 0.0;
        let clock = SimClock::new();
        let sink = Arc::new(fidodom_middleware::RecordingSink::new());
        let collaborators = simulated_rig(&cfg, &clock, sink.clone());
        let mut engine = OdometryFusionEngine::new(cfg.engine_config(), collaborators);

        clock.set(2.0);
        let estimate = engine.run_cycle().await.expect("landmark visible");
        let expected_x = cfg.sim.start[0] + cfg.sim.velocity[0] * 2.0;
        assert!((estimate.pose.pose.position.x - expected_x).abs() < 1e-9);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn run_honours_cycle_limit() {
        let mut cfg = Config::default();
        cfg.rate_hz = 200.0;
        let args = Args {
            config: None,
            cycles: Some(3),
            json: false,
            no_connect: true,
            print_schema: false,
        };
        let stats = run(cfg, &args, CancelToken::new()).await.unwrap();
        assert_eq!(stats.cycles, 3);
        assert!(stats.emitted >= 1);
    }

    #[test]
    fn schema_names_every_estimate_field() {
        let schema = serde_json::to_value(schemars::schema_for!(OdometryEstimate)).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        for field in ["header", "child_frame_id", "pose", "twist"] {
            assert!(properties.contains_key(field), "missing {field}");
        }
    }

    #[test]
    fn args_parse_flags() {
        let args = Args::parse_from(["fidodom", "--cycles", "10", "--json", "--config", "/tmp/x.toml"]);
        assert_eq!(args.cycles, Some(10));
        assert!(args.json);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/x.toml")));
    }
}
