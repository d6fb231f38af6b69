//! Axis-mapped motion dispatcher.
//!
//! A [`Mover`] turns logical jog/move/home/probe requests into [`MotionDriver`] calls
//! while keeping the [`PoseTree`] consistent. It is both an actuator and a node of the
//! tree: its own [`Frame`] lives under the destination frame, and its local pose is
//! the destination-space position of the axes it drives.
//!
//! ## Coordinate flow
//! - Callers speak in the *source* frame (usually [`ROOT`](crate::pose_tree::ROOT)).
//! - Targets are converted into the *destination* frame, which is the coordinate
//!   system the driver's axes live in.
//! - After a move the pose is updated from the commanded target (open loop). After
//!   homing or probing it is re-read from the driver, since the stop point is only
//!   known once the hardware reports it.
//!
//! ## Homing
//! `needs_to_home` starts `true`. Every motion operation homes first while it is set,
//! and only a successful [`home`](Mover::home) / [`fast_home`](Mover::fast_home)
//! clears it. Nothing inside the mover sets it back; owners call
//! [`require_home`](Mover::require_home) on disconnect.
//!
//! ## Concurrency
//! Operations take a snapshot and return a new one. Callers that share a tree
//! between movers must route updates through a single writer.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::driver::{AxisSet, AxisValues, MotionDriver};
use crate::error::{RobotError, RobotResult};
use crate::pose_tree::{Frame, Point, PoseTree};

/// Logical axis name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Axis {
    /// Left/right
    X,
    /// Front/back
    Y,
    /// Up/down
    Z,
}

impl Axis {
    /// All logical axes in `x, y, z` order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Lower-case axis name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Axis {
    type Err = RobotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            other => Err(RobotError::precondition(format!(
                "axis value should be x, y or z, got {:?}",
                other
            ))),
        }
    }
}

/// Mapping from logical axes to physical driver axis letters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisMapping {
    axes: BTreeMap<Axis, char>,
}

impl AxisMapping {
    /// Build a mapping from `(logical, physical)` pairs. At least one axis is required.
    pub fn new(pairs: impl IntoIterator<Item = (Axis, char)>) -> RobotResult<Self> {
        let axes: BTreeMap<Axis, char> = pairs.into_iter().collect();
        if axes.is_empty() {
            return Err(RobotError::precondition("axis mapping must not be empty"));
        }
        Ok(Self { axes })
    }

    /// Parse a mapping such as `{"x": "X", "z": "A"}`.
    pub fn from_names<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> RobotResult<Self> {
        let mut parsed = Vec::new();
        for (logical, physical) in pairs {
            let axis: Axis = logical.parse()?;
            let mut letters = physical.chars();
            let letter = match (letters.next(), letters.next()) {
                (Some(letter), None) => letter,
                _ => {
                    return Err(RobotError::precondition(format!(
                        "physical axis for {} must be a single letter, got {:?}",
                        axis, physical
                    )))
                }
            };
            parsed.push((axis, letter));
        }
        Self::new(parsed)
    }

    /// Physical letter for a logical axis, if mapped.
    pub fn get(&self, axis: Axis) -> Option<char> {
        self.axes.get(&axis).copied()
    }

    /// Whether a logical axis is mapped.
    pub fn contains(&self, axis: Axis) -> bool {
        self.axes.contains_key(&axis)
    }

    /// Mapped `(logical, physical)` pairs in `x, y, z` order.
    pub fn iter(&self) -> impl Iterator<Item = (Axis, char)> + '_ {
        self.axes.iter().map(|(axis, letter)| (*axis, *letter))
    }

    /// All mapped physical letters.
    pub fn physical_axes(&self) -> AxisSet {
        self.axes.values().copied().collect()
    }
}

/// Per-call target for [`Mover::move_to`], in source-frame coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Target {
    /// X target
    pub x: Option<f64>,
    /// Y target
    pub y: Option<f64>,
    /// Z target
    pub z: Option<f64>,
}

impl Target {
    /// Value for one axis.
    pub fn get(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Copy with one axis set.
    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        match axis {
            Axis::X => self.x = Some(value),
            Axis::Y => self.y = Some(value),
            Axis::Z => self.z = Some(value),
        }
        self
    }

    /// Point with unset axes as zero.
    fn or_zero(&self) -> Point {
        Point::new(
            self.x.unwrap_or(0.0),
            self.y.unwrap_or(0.0),
            self.z.unwrap_or(0.0),
        )
    }
}

/// Motion group bound to a shared driver and a pair of frames.
pub struct Mover<D: MotionDriver> {
    frame: Frame,
    driver: Arc<Mutex<D>>,
    mapping: AxisMapping,
    src: Frame,
    dst: Frame,
    axis_maximum: BTreeMap<Axis, f64>,
    needs_to_home: bool,
}

impl<D: MotionDriver> Mover<D> {
    /// Create a mover identified by `frame`.
    ///
    /// `src` is the frame callers express targets in; `dst` is the frame the driver
    /// axes move in. Register the mover's frame with [`attach`](Mover::attach).
    pub fn new(
        frame: Frame,
        driver: Arc<Mutex<D>>,
        mapping: AxisMapping,
        src: Frame,
        dst: Frame,
    ) -> Self {
        Self {
            frame,
            driver,
            mapping,
            src,
            dst,
            axis_maximum: BTreeMap::new(),
            needs_to_home: true,
        }
    }

    /// The mover's own frame.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Source frame of incoming targets.
    pub fn src(&self) -> &Frame {
        &self.src
    }

    /// Destination frame the driver moves in.
    pub fn dst(&self) -> &Frame {
        &self.dst
    }

    /// Logical to physical axis mapping.
    pub fn mapping(&self) -> &AxisMapping {
        &self.mapping
    }

    /// Whether the next motion operation will home first.
    pub fn needs_to_home(&self) -> bool {
        self.needs_to_home
    }

    /// Force a home before the next motion operation (e.g. after a disconnect).
    pub fn require_home(&mut self) {
        self.needs_to_home = true;
    }

    /// Insert the mover's frame into `tree` under the destination frame, at the origin.
    pub fn attach(&self, tree: &PoseTree) -> RobotResult<PoseTree> {
        tree.add(self.frame.clone(), self.dst.clone(), Point::ORIGIN)
    }

    /// The mover's current position expressed in the source frame.
    pub fn current_position(&self, tree: &PoseTree) -> RobotResult<Point> {
        tree.convert(&self.frame, &self.src, Point::ORIGIN)
    }

    /// Move one mapped axis by `distance` relative to where it is now.
    pub fn jog(&mut self, tree: &PoseTree, axis: Axis, distance: f64) -> RobotResult<PoseTree> {
        self.physical(axis)?;
        let tree = self.ensure_homed(tree)?;

        let current = self.current_position(&tree)?;
        let mut target = Target::default();
        for (mapped, _) in self.mapping.iter() {
            target = target.with(mapped, current.get(mapped));
        }
        target = target.with(axis, current.get(axis) + distance);

        self.move_to(&tree, target)
    }

    /// Move to `target`, given in the source frame.
    ///
    /// Every mapped axis must have a value. Unmapped axes are never sent to the
    /// driver. The recorded pose is the converted target, with axes the caller did
    /// not supply recorded as zero.
    pub fn move_to(&mut self, tree: &PoseTree, target: Target) -> RobotResult<PoseTree> {
        for (axis, _) in self.mapping.iter() {
            if target.get(axis).is_none() {
                return Err(RobotError::precondition(format!(
                    "value must be set for each mapped axis, missing {}",
                    axis
                )));
            }
        }
        let tree = self.ensure_homed(tree)?;

        let converted = tree.convert(&self.src, &self.dst, target.or_zero())?;
        let driver_target: AxisValues = self
            .mapping
            .iter()
            .map(|(axis, letter)| (letter, converted.get(axis)))
            .collect();

        debug!(mover = %self.frame, target = ?driver_target, "Dispatching move");
        self.driver()?.move_to(&driver_target)?;

        // Stepper motors are open loop, so the commanded target is the new pose.
        let recorded = Point::new(
            target.x.map_or(0.0, |_| converted.x),
            target.y.map_or(0.0, |_| converted.y),
            target.z.map_or(0.0, |_| converted.z),
        );
        tree.set_local_pose(&self.frame, recorded)
    }

    /// Home every mapped axis and resynchronise the pose from the driver.
    pub fn home(&mut self, tree: &PoseTree) -> RobotResult<PoseTree> {
        let axes = self.mapping.physical_axes();
        info!(mover = %self.frame, axes = ?axes, "Homing");
        self.driver()?.home(&axes)?;
        self.needs_to_home = false;
        self.update_pose_from_driver(tree)
    }

    /// Like [`home`](Mover::home), using the driver's faster homing routine.
    pub fn fast_home(&mut self, tree: &PoseTree, safety_margin: f64) -> RobotResult<PoseTree> {
        let axes = self.mapping.physical_axes();
        info!(mover = %self.frame, axes = ?axes, safety_margin, "Fast homing");
        self.driver()?.fast_home(&axes, safety_margin)?;
        self.needs_to_home = false;
        self.update_pose_from_driver(tree)
    }

    /// Set the driver speed.
    pub fn set_speed(&self, value: f64) -> RobotResult<()> {
        self.driver()?.set_speed(value)
    }

    /// Save the driver speed.
    pub fn push_speed(&self) -> RobotResult<()> {
        self.driver()?.push_speed()
    }

    /// Restore the last saved driver speed.
    pub fn pop_speed(&self) -> RobotResult<()> {
        self.driver()?.pop_speed()
    }

    /// Set motor current for every mapped axis.
    pub fn set_current(&self, power: f64) -> RobotResult<()> {
        let settings: AxisValues = self
            .mapping
            .iter()
            .map(|(_, letter)| (letter.to_ascii_uppercase(), power))
            .collect();
        self.driver()?.set_current(&settings)
    }

    /// Save the motor current settings.
    pub fn push_current(&self) -> RobotResult<()> {
        self.driver()?.push_current()
    }

    /// Restore the last saved motor current settings.
    pub fn pop_current(&self) -> RobotResult<()> {
        self.driver()?.pop_current()
    }

    /// Probe along a mapped axis and resynchronise the pose from where it stopped.
    pub fn probe(&mut self, tree: &PoseTree, axis: Axis, movement: f64) -> RobotResult<PoseTree> {
        let letter = self.physical(axis)?;
        let tree = self.ensure_homed(tree)?;

        info!(mover = %self.frame, axis = %axis, movement, "Probing");
        self.driver()?.probe_axis(letter, movement)?;
        self.update_pose_from_driver(&tree)
    }

    /// Dwell for `seconds`.
    pub fn delay(&self, seconds: f64) -> RobotResult<()> {
        self.driver()?.delay(seconds)
    }

    /// Maximum travel of a mapped axis, in the source frame.
    ///
    /// Computed once per axis from the driver's homed position and cached for the
    /// lifetime of the mover.
    pub fn axis_maximum(&mut self, tree: &PoseTree, axis: Axis) -> RobotResult<f64> {
        let letter = self.physical(axis)?;
        if let Some(cached) = self.axis_maximum.get(&axis) {
            return Ok(*cached);
        }

        let limit = self
            .driver()?
            .homed_position()
            .get(&letter)
            .copied()
            .ok_or_else(|| {
                RobotError::precondition(format!("driver reports no homed position for {}", letter))
            })?;
        let in_src = tree.convert(&self.dst, &self.src, Point::ORIGIN.with(axis, limit))?;
        let maximum = in_src.get(axis);

        self.axis_maximum.insert(axis, maximum);
        Ok(maximum)
    }

    /// Overwrite the mover's pose with the driver's reported position.
    ///
    /// Mapped axes missing from the driver's snapshot, and unmapped axes, read as 0.
    pub fn update_pose_from_driver(&self, tree: &PoseTree) -> RobotResult<PoseTree> {
        let position = self.driver()?.position();
        let read = |axis: Axis| {
            self.mapping
                .get(axis)
                .and_then(|letter| position.get(&letter).copied())
                .unwrap_or(0.0)
        };
        let point = Point::new(read(Axis::X), read(Axis::Y), read(Axis::Z));

        debug!(mover = %self.frame, position = %point, "Pose resynchronised from driver");
        tree.set_local_pose(&self.frame, point)
    }

    fn ensure_homed(&mut self, tree: &PoseTree) -> RobotResult<PoseTree> {
        if self.needs_to_home {
            self.home(tree)
        } else {
            Ok(tree.clone())
        }
    }

    fn physical(&self, axis: Axis) -> RobotResult<char> {
        self.mapping
            .get(axis)
            .ok_or_else(|| RobotError::precondition(format!("mapping is not set for {}", axis)))
    }

    fn driver(&self) -> RobotResult<MutexGuard<'_, D>> {
        self.driver.lock().map_err(|_| RobotError::DriverPoisoned)
    }
}
