//! Loading a complete robot configuration file.

use std::time::Duration;

use liquid_handler::calibration::calibrate_labware;
use liquid_handler::config::{ConfigError, RobotConfig};
use liquid_handler::labware::{JsonLabwareStore, LabwareRecord, LabwareStore};
use liquid_handler::{Axis, Frame, Point, PoseTree, ROOT};
use tempfile::{NamedTempFile, TempDir};

fn config_file(content: &str) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    std::fs::write(file.path(), content).unwrap();
    file
}

#[test]
fn test_full_configuration() {
    let file = config_file(
        r#"
labware_dir = "/var/lib/liquid_handler/labware"

[logging]
level = "debug"
json = true

[serial]
device_name = "Smoothie"
baud_rate = 250000
read_timeout_ms = 2000
exchange_timeout_ms = 15000
recovery_timeout_ms = 20000

[driver]
ack = "ok\r\n"
default_speed = 150.0

[driver.default_current]
X = 1.2
Y = 1.5

[driver.homed_position]
X = 400.0
Y = 350.0
Z = 220.0

[probe]
center = { x = 295.0, y = 300.0, z = 55.0 }
dimensions = { x = 35.0, y = 40.0, z = 60.0 }
tip_length = 51.7

[[movers]]
name = "gantry"
axes = { x = "X", y = "Y" }

[[movers]]
name = "right-pipette"
axes = { z = "A" }
"#,
    );

    let config = RobotConfig::load_from(file.path()).unwrap();

    assert!(config.logging.json);
    assert_eq!(config.serial.device_name, "Smoothie");
    assert_eq!(config.serial.baud_rate, 250_000);
    assert_eq!(config.serial.read_timeout(), Duration::from_secs(2));
    assert_eq!(config.serial.recovery_timeout(), Duration::from_secs(20));
    assert_eq!(config.driver.ack, "ok\r\n");

    let homed = config.driver.homed_position();
    assert_eq!(homed.len(), 3);
    assert_eq!(homed[&'Z'], 220.0);
    assert_eq!(config.driver.default_current()[&'Y'], 1.5);

    assert_eq!(config.probe.center, Point::new(295.0, 300.0, 55.0));
    assert_eq!(config.probe.tip_length, 51.7);

    let pipette = config.mover("right-pipette").unwrap().mapping().unwrap();
    assert_eq!(pipette.get(Axis::Z), Some('A'));
    assert_eq!(pipette.get(Axis::X), None);
    assert_eq!(
        config.labware_dir.to_str(),
        Some("/var/lib/liquid_handler/labware")
    );
}

#[test]
fn test_malformed_file_is_load_error() {
    let file = config_file("[serial\nbaud_rate = ");
    assert!(matches!(
        RobotConfig::load_from(file.path()),
        Err(ConfigError::LoadError(_))
    ));
}

#[test]
fn test_wrong_type_is_load_error() {
    let file = config_file("[serial]\nbaud_rate = \"fast\"\n");
    assert!(matches!(
        RobotConfig::load_from(file.path()),
        Err(ConfigError::LoadError(_))
    ));
}

#[test]
fn test_multi_letter_physical_axis_is_rejected() {
    let file = config_file("[driver.homed_position]\nXY = 1.0\n");
    assert!(matches!(
        RobotConfig::load_from(file.path()),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn test_shipped_configuration_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/robot.toml");
    let config = RobotConfig::load_from(path).unwrap();
    assert_eq!(config.movers.len(), 2);
    assert_eq!(config.driver.ack, "ok\r\nok\r\n");
    assert_eq!(config.driver.default_current()[&'A'], 1.7);
}

#[test]
fn test_labware_dir_feeds_labware_calibration() {
    let dir = TempDir::new().unwrap();
    let file = config_file(&format!("labware_dir = {:?}\n", dir.path().display().to_string()));
    let config = RobotConfig::load_from(file.path()).unwrap();
    assert_eq!(config.labware_dir, dir.path());

    let mut store = JsonLabwareStore::new(&config.labware_dir);
    store
        .save(&LabwareRecord::new("trough-12").with_well("A1", Point::new(13.5, 8.0, 0.0)))
        .unwrap();

    let frame = Frame::named("trough-12");
    let tree = PoseTree::new().add(frame.clone(), ROOT, Point::ORIGIN).unwrap();
    let delta = Point::new(0.5, -0.25, 1.0);
    let tree = calibrate_labware(&tree, &mut store, "trough-12", &frame, delta, true).unwrap();

    let reloaded = JsonLabwareStore::new(&config.labware_dir).load("trough-12").unwrap();
    assert_eq!(reloaded.offset, delta);
    assert_eq!(reloaded.well("A1"), Some(Point::new(14.0, 7.75, 1.0)));
    assert_eq!(tree.absolute(&frame).unwrap(), delta);
}
