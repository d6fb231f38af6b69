//! Motion driver interface.
//!
//! [`MotionDriver`] is the hardware-agnostic surface the [`Mover`](crate::mover::Mover)
//! dispatches into. Physical axes are identified by their firmware letters
//! (`'X'`, `'Y'`, `'Z'`, `'A'`, `'B'`, `'C'` on the reference board).
//! Implementations handle the protocol details:
//!
//! - [`smoothie::SmoothieDriver`] speaks G-code over a [`SerialConnection`](crate::serial::SerialConnection)
//! - [`mock::MockDriver`] simulates the controller and records every call
//!
//! All calls are synchronous and block until the firmware has acknowledged them.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::RobotResult;

pub mod mock;
pub mod smoothie;

pub use mock::{DriverCall, MockDriver};
pub use smoothie::SmoothieDriver;

/// Per-physical-axis values (targets, positions, currents), keyed by axis letter.
pub type AxisValues = BTreeMap<char, f64>;

/// Set of physical axis letters.
pub type AxisSet = BTreeSet<char>;

/// Multi-axis motion controller driven by discrete commands.
///
/// ## Position snapshots
/// - [`position`](MotionDriver::position) is the driver's live view of where each
///   axis is. After a move it is the commanded target (open loop); after homing or
///   probing it is what the firmware reported.
/// - [`homed_position`](MotionDriver::homed_position) is the travel limit each axis
///   reaches when homed.
///
/// ## Stacks
/// Speed and current can be pushed and popped so a caller can override them
/// temporarily and restore the previous value afterwards.
pub trait MotionDriver: Send {
    /// Move the given axes to absolute targets. Axes not in `target` are not touched.
    fn move_to(&mut self, target: &AxisValues) -> RobotResult<()>;

    /// Home the given axes.
    fn home(&mut self, axes: &AxisSet) -> RobotResult<()>;

    /// Quicker homing: approach to within `safety_margin` of the homed position, then home.
    fn fast_home(&mut self, axes: &AxisSet, safety_margin: f64) -> RobotResult<()>;

    /// Set the motion speed (mm/s).
    fn set_speed(&mut self, value: f64) -> RobotResult<()>;

    /// Save the current speed.
    fn push_speed(&mut self) -> RobotResult<()>;

    /// Restore the most recently pushed speed.
    fn pop_speed(&mut self) -> RobotResult<()>;

    /// Set motor current per axis, keyed by upper-case axis letter.
    fn set_current(&mut self, settings: &AxisValues) -> RobotResult<()>;

    /// Save the current motor current settings.
    fn push_current(&mut self) -> RobotResult<()>;

    /// Restore the most recently pushed motor current settings.
    fn pop_current(&mut self) -> RobotResult<()>;

    /// Move `axis` by `movement` until a physical switch triggers.
    fn probe_axis(&mut self, axis: char, movement: f64) -> RobotResult<()>;

    /// Dwell without moving.
    fn delay(&mut self, seconds: f64) -> RobotResult<()>;

    /// Live position snapshot.
    fn position(&self) -> AxisValues;

    /// Travel-limit snapshot reached after homing.
    fn homed_position(&self) -> AxisValues;
}
