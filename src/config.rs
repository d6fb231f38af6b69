//! Robot configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/robot.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `LIQUID_HANDLER_`
//!
//! Every field has a default, so a missing file yields a configuration for the
//! reference Smoothieboard gantry.
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! LIQUID_HANDLER_LOGGING__LEVEL=debug
//! LIQUID_HANDLER_SERIAL__PORT=/dev/ttyACM0
//! LIQUID_HANDLER_SERIAL__BAUD_RATE=115200
//! ```
//!
//! # Example
//!
//! ```toml
//! [serial]
//! device_name = "Smoothieboard"
//! exchange_timeout_ms = 30000
//!
//! [driver.homed_position]
//! X = 418.0
//! Y = 353.0
//! Z = 218.0
//!
//! [[movers]]
//! name = "gantry"
//! axes = { x = "X", y = "Y" }
//!
//! [[movers]]
//! name = "left-pipette"
//! axes = { z = "Z" }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::AxisValues;
use crate::error::RobotResult;
use crate::mover::{Axis, AxisMapping};
use crate::pose_tree::Point;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/robot.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "LIQUID_HANDLER_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File or environment could not be read or deserialized
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Values loaded but inconsistent
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level robot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Serial link to the motion controller
    #[serde(default)]
    pub serial: SerialConfig,
    /// Motion controller settings
    #[serde(default)]
    pub driver: DriverConfig,
    /// Motion groups sharing the driver
    #[serde(default = "default_movers")]
    pub movers: Vec<MoverConfig>,
    /// Tip probe geometry
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Directory holding labware records
    #[serde(default = "default_labware_dir")]
    pub labware_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// Serial connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Description substring used to discover the controller
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Explicit port; skips discovery when set
    #[serde(default)]
    pub port: Option<String>,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout of an idle connection in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Bound on a normal exchange in milliseconds
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_ms: u64,
    /// Bound on the single recovery attempt in milliseconds
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_ms: u64,
}

/// Motion controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Acknowledgment token terminating every reply
    #[serde(default = "default_ack")]
    pub ack: String,
    /// Speed applied after connecting (mm/s)
    #[serde(default = "default_speed")]
    pub default_speed: f64,
    /// Motor current per physical axis (A)
    #[serde(default)]
    pub default_current: BTreeMap<String, f64>,
    /// Travel limit per physical axis after homing
    #[serde(default = "default_homed_position")]
    pub homed_position: BTreeMap<String, f64>,
}

/// One motion group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoverConfig {
    /// Frame name, unique across movers
    pub name: String,
    /// Logical to physical axis mapping (e.g. `x = "X"`)
    pub axes: BTreeMap<String, String>,
    /// Placement of the mounted instrument relative to the mover
    #[serde(default)]
    pub instrument_offset: Point,
}

/// Tip probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Nominal top centre of the switch board
    #[serde(default = "default_probe_center")]
    pub center: Point,
    /// External bounding box of the probe unit
    #[serde(default = "default_probe_dimensions")]
    pub dimensions: Point,
    /// Length of the mounted tip
    #[serde(default = "default_tip_length")]
    pub tip_length: f64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            serial: SerialConfig::default(),
            driver: DriverConfig::default(),
            movers: default_movers(),
            probe: ProbeConfig::default(),
            labware_dir: default_labware_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            port: None,
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout(),
            exchange_timeout_ms: default_exchange_timeout(),
            recovery_timeout_ms: default_recovery_timeout(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            ack: default_ack(),
            default_speed: default_speed(),
            default_current: BTreeMap::new(),
            homed_position: default_homed_position(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            center: default_probe_center(),
            dimensions: default_probe_dimensions(),
            tip_length: default_tip_length(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_device_name() -> String {
    "Smoothieboard".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_read_timeout() -> u64 {
    5000
}

fn default_exchange_timeout() -> u64 {
    30_000
}

fn default_recovery_timeout() -> u64 {
    10_000
}

fn default_ack() -> String {
    "ok\r\nok\r\n".to_string()
}

fn default_speed() -> f64 {
    400.0
}

fn default_homed_position() -> BTreeMap<String, f64> {
    crate::driver::mock::DEFAULT_HOMED_POSITION
        .into_iter()
        .map(|(axis, value)| (axis.to_string(), value))
        .collect()
}

fn default_movers() -> Vec<MoverConfig> {
    vec![MoverConfig {
        name: "gantry".to_string(),
        axes: [("x", "X"), ("y", "Y"), ("z", "Z")]
            .into_iter()
            .map(|(logical, physical)| (logical.to_string(), physical.to_string()))
            .collect(),
        instrument_offset: Point::ORIGIN,
    }]
}

fn default_probe_center() -> Point {
    Point::new(295.0, 300.0, 55.0)
}

fn default_probe_dimensions() -> Point {
    Point::new(35.0, 40.0, 60.0)
}

fn default_tip_length() -> f64 {
    46.0
}

fn default_labware_dir() -> PathBuf {
    PathBuf::from("labware")
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl RobotConfig {
    /// Load configuration from `config/robot.toml` and environment variables
    ///
    /// Environment variables take precedence over the file. After loading,
    /// configuration is validated.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Baud rate and timeouts are non-zero
    /// - Acknowledgment token is not empty
    /// - Physical axes are single letters
    /// - Mover names are unique and their axes are x, y or z
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(ConfigError::ValidationError(
                "baud_rate must be greater than 0".to_string(),
            ));
        }
        for (name, value) in [
            ("read_timeout_ms", self.serial.read_timeout_ms),
            ("exchange_timeout_ms", self.serial.exchange_timeout_ms),
            ("recovery_timeout_ms", self.serial.recovery_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.driver.ack.is_empty() {
            return Err(ConfigError::ValidationError(
                "driver ack must not be empty".to_string(),
            ));
        }
        for axis in self
            .driver
            .homed_position
            .keys()
            .chain(self.driver.default_current.keys())
        {
            if !is_axis_letter(axis) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid physical axis '{}'. Must be a single letter",
                    axis
                )));
            }
        }

        let mut names = HashSet::new();
        for mover in &self.movers {
            if !names.insert(&mover.name) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate mover name: '{}'",
                    mover.name
                )));
            }
            mover
                .mapping()
                .map_err(|e| ConfigError::ValidationError(format!("mover '{}': {}", mover.name, e)))?;
        }

        Ok(())
    }

    /// Find a mover by name.
    pub fn mover(&self, name: &str) -> Option<&MoverConfig> {
        self.movers.iter().find(|mover| mover.name == name)
    }
}

impl SerialConfig {
    /// Idle read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Normal exchange bound.
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    /// Recovery bound.
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

impl DriverConfig {
    /// Homed position keyed by upper-case axis letter.
    pub fn homed_position(&self) -> AxisValues {
        axis_values(&self.homed_position)
    }

    /// Default motor current keyed by upper-case axis letter.
    pub fn default_current(&self) -> AxisValues {
        axis_values(&self.default_current)
    }
}

impl MoverConfig {
    /// Parsed axis mapping.
    pub fn mapping(&self) -> RobotResult<AxisMapping> {
        AxisMapping::from_names(
            self.axes
                .iter()
                .map(|(logical, physical)| (logical.as_str(), physical.as_str())),
        )
    }

    /// Whether this mover drives the given logical axis.
    pub fn drives(&self, axis: Axis) -> bool {
        self.axes.contains_key(axis.as_str())
    }
}

fn is_axis_letter(name: &str) -> bool {
    let mut chars = name.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_alphabetic())
}

fn axis_values(map: &BTreeMap<String, f64>) -> AxisValues {
    map.iter()
        .filter_map(|(axis, value)| {
            axis.chars()
                .next()
                .map(|letter| (letter.to_ascii_uppercase(), *value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = RobotConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.serial.device_name, "Smoothieboard");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.recovery_timeout(), Duration::from_secs(10));
        assert_eq!(config.driver.ack, "ok\r\nok\r\n");
        assert_eq!(config.driver.homed_position()[&'B'], 19.0);
        assert_eq!(config.movers.len(), 1);
    }

    #[test]
    fn test_load_movers_from_file() {
        let file = write_config(
            r#"
[serial]
port = "/dev/ttyACM0"
exchange_timeout_ms = 1000

[[movers]]
name = "gantry"
axes = { x = "X", y = "Y" }

[[movers]]
name = "left"
axes = { z = "Z" }
instrument_offset = { x = -30.5, y = 1.0, z = 0.0 }
"#,
        );
        let config = RobotConfig::load_from(file.path()).unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.serial.exchange_timeout(), Duration::from_secs(1));

        let left = config.mover("left").unwrap();
        assert_eq!(left.mapping().unwrap().get(Axis::Z), Some('Z'));
        assert!(!left.drives(Axis::X));
        assert!(config.mover("gantry").unwrap().drives(Axis::Y));
        assert_eq!(left.instrument_offset, Point::new(-30.5, 1.0, 0.0));
        assert_eq!(config.mover("gantry").unwrap().instrument_offset, Point::ORIGIN);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = RobotConfig::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_invalid_mover_axis() {
        let file = write_config(
            r#"
[[movers]]
name = "bad"
axes = { w = "X" }
"#,
        );
        assert!(matches!(
            RobotConfig::load_from(file.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_duplicate_mover_names() {
        let mut config = RobotConfig::default();
        config.movers.extend(default_movers());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = RobotConfig::default();
        config.serial.recovery_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_ack_rejected() {
        let mut config = RobotConfig::default();
        config.driver.ack.clear();
        assert!(config.validate().is_err());
    }
}
