//! Core library for the liquid_handler robot controller.
//!
//! This library contains the pose tracking, axis-mapped motion and serial firmware
//! control for a liquid-handling gantry. It is used by the `liquid_handler` CLI and
//! can be embedded in protocol runners.
//!
//! - [`pose_tree`]: immutable frame hierarchy and coordinate conversion
//! - [`mover`]: logical x/y/z motion groups over a shared driver
//! - [`driver`]: the motion controller interface, G-code and mock implementations
//! - [`serial`]: the command/acknowledge exchange protocol and its transports
//! - [`calibration`] and [`labware`]: frame calibration, tip probing, labware records

pub mod calibration;
pub mod config;
pub mod driver;
pub mod error;
pub mod labware;
pub mod logging;
pub mod mover;
pub mod pose_tree;
pub mod serial;

pub use error::{RobotError, RobotResult};
pub use mover::{Axis, AxisMapping, Mover, Target};
pub use pose_tree::{Frame, Point, PoseTree, ROOT};
