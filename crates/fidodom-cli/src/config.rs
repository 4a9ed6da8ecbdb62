//! Configuration – reads/writes `~/.fidodom/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fidodom_runtime::{EngineConfig, StartupPolicy};
use fidodom_types::OdomError;
use serde::{Deserialize, Serialize};

/// Which velocity model the engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VelocityModelKind {
    #[default]
    FiniteDifferenceRpy,
    RotationLogMap,
}

impl std::str::FromStr for VelocityModelKind {
    type Err = OdomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "finite_difference_rpy" => Ok(Self::FiniteDifferenceRpy),
            "rotation_log_map" => Ok(Self::RotationLogMap),
            other => Err(OdomError::Config(format!("unknown velocity model '{other}'"))),
        }
    }
}

/// Persisted configuration stored in `~/.fidodom/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Frame id stamped on the derived robot pose.
    #[serde(default = "default_camera_frame")]
    pub camera_frame: String,

    #[serde(default = "default_footprint_frame")]
    pub footprint_frame: String,

    /// Frame attached to the landmark.
    #[serde(default = "default_landmark_frame")]
    pub landmark_frame: String,

    #[serde(default = "default_odometry_frame")]
    pub odometry_frame: String,

    /// Cycles per second.
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,

    /// Log every pipeline stage at `info` level.
    #[serde(default)]
    pub debug: bool,

    /// Camera queried first each cycle.
    #[serde(default = "default_primary_source")]
    pub primary_source: String,

    /// Camera queried when the primary sees nothing.
    #[serde(default = "default_secondary_source")]
    pub secondary_source: String,

    #[serde(default)]
    pub velocity_model: VelocityModelKind,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub startup: Startup,

    #[serde(default)]
    pub sim: Sim,
}

/// Per-call deadlines in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_image_ms")]
    pub image_ms: u64,
    #[serde(default = "default_detection_ms")]
    pub detection_ms: u64,
    #[serde(default = "default_transform_ms")]
    pub transform_ms: u64,
}

/// Readiness probing before the first cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Startup {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

/// The simulated rig driven by `fidodom run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sim {
    /// Landmark position in the odometry frame.
    #[serde(default = "default_landmark")]
    pub landmark: [f64; 3],
    /// Robot position at t = 0.
    #[serde(default)]
    pub start: [f64; 3],
    /// Constant robot velocity in m/s.
    #[serde(default = "default_velocity")]
    pub velocity: [f64; 3],
    /// The primary camera sees the landmark for `primary_visible_s` out of
    /// every `primary_period_s` seconds.  A zero period means always.
    #[serde(default = "default_primary_period_s")]
    pub primary_period_s: f64,
    #[serde(default = "default_primary_visible_s")]
    pub primary_visible_s: f64,
}

fn default_camera_frame() -> String {
    "camera_link".to_string()
}
fn default_footprint_frame() -> String {
    "footprint".to_string()
}
fn default_landmark_frame() -> String {
    "bin_footprint".to_string()
}
fn default_odometry_frame() -> String {
    "odom".to_string()
}
fn default_rate_hz() -> f64 {
    5.0
}
fn default_primary_source() -> String {
    "rear_cam".to_string()
}
fn default_secondary_source() -> String {
    "kinect".to_string()
}
fn default_image_ms() -> u64 {
    500
}
fn default_detection_ms() -> u64 {
    1000
}
fn default_transform_ms() -> u64 {
    200
}
fn default_initial_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    5000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_attempts() -> u32 {
    8
}
fn default_attempt_timeout_ms() -> u64 {
    2000
}
fn default_settle_ms() -> u64 {
    2000
}
fn default_landmark() -> [f64; 3] {
    [6.0, 0.0, 0.0]
}
fn default_velocity() -> [f64; 3] {
    [0.25, 0.0, 0.0]
}
fn default_primary_period_s() -> f64 {
    4.0
}
fn default_primary_visible_s() -> f64 {
    3.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_frame: default_camera_frame(),
            footprint_frame: default_footprint_frame(),
            landmark_frame: default_landmark_frame(),
            odometry_frame: default_odometry_frame(),
            rate_hz: default_rate_hz(),
            debug: false,
            primary_source: default_primary_source(),
            secondary_source: default_secondary_source(),
            velocity_model: VelocityModelKind::default(),
            timeouts: Timeouts::default(),
            startup: Startup::default(),
            sim: Sim::default(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            image_ms: default_image_ms(),
            detection_ms: default_detection_ms(),
            transform_ms: default_transform_ms(),
        }
    }
}

impl Default for Startup {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl Default for Sim {
    fn default() -> Self {
        Self {
            landmark: default_landmark(),
            start: [0.0; 3],
            velocity: default_velocity(),
            primary_period_s: default_primary_period_s(),
            primary_visible_s: default_primary_visible_s(),
        }
    }
}

impl Config {
    /// The resolved boundary configuration handed to the engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            camera_frame: self.camera_frame.clone(),
            footprint_frame: self.footprint_frame.clone(),
            landmark_frame: self.landmark_frame.clone(),
            odometry_frame: self.odometry_frame.clone(),
            debug: self.debug,
            rate_hz: self.rate_hz,
            image_timeout: Duration::from_millis(self.timeouts.image_ms),
            detection_timeout: Duration::from_millis(self.timeouts.detection_ms),
            transform_timeout: Duration::from_millis(self.timeouts.transform_ms),
        }
    }

    pub fn startup_policy(&self) -> StartupPolicy {
        StartupPolicy {
            initial_delay: Duration::from_millis(self.startup.initial_delay_ms),
            max_delay: Duration::from_millis(self.startup.max_delay_ms),
            multiplier: self.startup.multiplier,
            max_attempts: self.startup.max_attempts,
            attempt_timeout: Duration::from_millis(self.startup.attempt_timeout_ms),
            settle_delay: Duration::from_millis(self.startup.settle_ms),
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), OdomError> {
        if !self.rate_hz.is_finite() || self.rate_hz <= 0.0 {
            return Err(OdomError::Config(format!(
                "rate_hz must be positive, got {}",
                self.rate_hz
            )));
        }
        let frames = [
            ("camera_frame", &self.camera_frame),
            ("footprint_frame", &self.footprint_frame),
            ("landmark_frame", &self.landmark_frame),
            ("odometry_frame", &self.odometry_frame),
            ("primary_source", &self.primary_source),
            ("secondary_source", &self.secondary_source),
        ];
        if let Some((name, _)) = frames.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(OdomError::Config(format!("{name} must not be empty")));
        }
        if self.primary_source == self.secondary_source {
            return Err(OdomError::Config(
                "primary_source and secondary_source must differ".to_string(),
            ));
        }
        if self.timeouts.image_ms == 0
            || self.timeouts.detection_ms == 0
            || self.timeouts.transform_ms == 0
        {
            return Err(OdomError::Config("timeouts must be positive".to_string()));
        }
        self.startup_policy().validate()
    }
}

/// Return the path to `~/.fidodom/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".fidodom").join("config.toml")
}

/// Load the config from `path`, or the defaults when the file is absent.
/// Environment overrides are applied in both cases, then the result is
/// validated.
pub fn load_or_default(path: &Path) -> Result<Config, OdomError> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, OdomError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        OdomError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| OdomError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `FIDODOM_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FIDODOM_CAMERA_FRAME` | `camera_frame` |
/// | `FIDODOM_FOOTPRINT_FRAME` | `footprint_frame` |
/// | `FIDODOM_LANDMARK_FRAME` | `landmark_frame` |
/// | `FIDODOM_ODOMETRY_FRAME` | `odometry_frame` |
/// | `FIDODOM_RATE_HZ` | `rate_hz` |
/// | `FIDODOM_DEBUG` | `debug` |
/// | `FIDODOM_VELOCITY_MODEL` | `velocity_model` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("FIDODOM_CAMERA_FRAME") {
        cfg.camera_frame = v;
    }
    if let Some(v) = lookup("FIDODOM_FOOTPRINT_FRAME") {
        cfg.footprint_frame = v;
    }
    if let Some(v) = lookup("FIDODOM_LANDMARK_FRAME") {
        cfg.landmark_frame = v;
    }
    if let Some(v) = lookup("FIDODOM_ODOMETRY_FRAME") {
        cfg.odometry_frame = v;
    }
    if let Some(v) = lookup("FIDODOM_RATE_HZ")
        && let Ok(rate) = v.parse::<f64>()
    {
        cfg.rate_hz = rate;
    }
    if let Some(v) = lookup("FIDODOM_DEBUG") {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => cfg.debug = true,
            "0" | "false" | "no" | "off" => cfg.debug = false,
            _ => {}
        }
    }
    if let Some(v) = lookup("FIDODOM_VELOCITY_MODEL")
        && let Ok(model) = v.parse::<VelocityModelKind>()
    {
        cfg.velocity_model = model;
    }
}

/// Save the config to a specific path, creating parent directories.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), OdomError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| OdomError::Config(format!("failed to create config directory: {e}")))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| OdomError::Config(format!("failed to serialise config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        OdomError::Config(format!("failed to write config at {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_deployed_node() {
        let cfg = Config::default();
        assert_eq!(cfg.camera_frame, "camera_link");
        assert_eq!(cfg.footprint_frame, "footprint");
        assert_eq!(cfg.landmark_frame, "bin_footprint");
        assert_eq!(cfg.odometry_frame, "odom");
        assert_eq!(cfg.rate_hz, 5.0);
        assert!(!cfg.debug);
        assert_eq!(cfg.primary_source, "rear_cam");
        assert_eq!(cfg.secondary_source, "kinect");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "rate_hz = 10.0\nvelocity_model = \"rotation_log_map\"\n[timeouts]\nimage_ms = 50\n",
        )
        .unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.rate_hz, 10.0);
        assert_eq!(cfg.velocity_model, VelocityModelKind::RotationLogMap);
        assert_eq!(cfg.timeouts.image_ms, 50);
        assert_eq!(cfg.timeouts.detection_ms, 1000);
        assert_eq!(cfg.landmark_frame, "bin_footprint");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "rate_hz = \"fast\"\n").unwrap();
        assert!(matches!(load_from(&path), Err(OdomError::Config(_))));
    }

    #[test]
    fn config_path_points_to_fidodom_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".fidodom"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn env_overrides_frames_and_rate() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            env(&[
                ("FIDODOM_LANDMARK_FRAME", "dock"),
                ("FIDODOM_RATE_HZ", "12.5"),
                ("FIDODOM_DEBUG", "true"),
            ]),
        );
        assert_eq!(cfg.landmark_frame, "dock");
        assert_eq!(cfg.rate_hz, 12.5);
        assert!(cfg.debug);
    }

    #[test]
    fn env_override_ignores_unparseable_values() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            env(&[
                ("FIDODOM_RATE_HZ", "fast"),
                ("FIDODOM_DEBUG", "maybe"),
                ("FIDODOM_VELOCITY_MODEL", "kalman"),
            ]),
        );
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn env_override_selects_velocity_model() {
        let mut cfg = Config::default();
        apply_overrides_from(&mut cfg, env(&[("FIDODOM_VELOCITY_MODEL", "rotation_log_map")]));
        assert_eq!(cfg.velocity_model, VelocityModelKind::RotationLogMap);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let zero_rate = Config {
            rate_hz: 0.0,
            ..Config::default()
        };
        assert!(matches!(zero_rate.validate(), Err(OdomError::Config(_))));

        let empty_frame = Config {
            odometry_frame: " ".to_string(),
            ..Config::default()
        };
        assert!(empty_frame.validate().is_err());

        let same_sources = Config {
            secondary_source: "rear_cam".to_string(),
            ..Config::default()
        };
        assert!(same_sources.validate().is_err());

        let mut no_attempts = Config::default();
        no_attempts.startup.max_attempts = 0;
        assert!(no_attempts.validate().is_err());
    }

    #[test]
    fn engine_config_carries_resolved_values() {
        let mut cfg = Config::default();
        cfg.timeouts.transform_ms = 75;
        cfg.debug = true;
        let engine = cfg.engine_config();
        assert_eq!(engine.landmark_frame, "bin_footprint");
        assert_eq!(engine.transform_timeout, Duration::from_millis(75));
        assert!(engine.debug);
        assert_eq!(cfg.startup_policy().max_attempts, 8);
    }
}
