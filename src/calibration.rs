//! Frame calibration and tip probing.
//!
//! [`calibrate_with_delta`] nudges a frame relative to its parent, and
//! [`calibrate_labware`] does the same while carrying the shift into the stored
//! labware record. [`probe_center`] locates a tip against a switch box of known
//! size by touching it from five sides:
//!
//! ```text
//!            +y
//!        ┌────▼────┐
//!   -x ► │    z    │ ◄ +x       z probe comes down from above
//!        └────▲────┘
//!            -y
//! ```
//!
//! Each side is approached from [`SWITCH_CLEARANCE`] outside the box at a height
//! where the nozzle clears it. The two readings per horizontal axis are averaged
//! and the centre is refined as probing proceeds. [`update_instrument_offset`]
//! turns the measured centre into a corrected instrument offset and tip length.

use tracing::{debug, info};

use crate::driver::MotionDriver;
use crate::error::{RobotError, RobotResult};
use crate::labware::LabwareStore;
use crate::mover::{Axis, Mover, Target};
use crate::pose_tree::{Frame, Point, PoseTree, ROOT};

/// Sideways offset when probing in x, so the tip hits the raised end of the plate.
pub const X_SWITCH_OFFSET_MM: f64 = 2.0;
/// Sideways offset when probing in y.
pub const Y_SWITCH_OFFSET_MM: f64 = 5.0;
/// Offset in y when probing in z.
pub const Z_SWITCH_OFFSET_MM: f64 = 5.0;
/// Minimum tip height above the deck while probing sideways.
pub const Z_DECK_CLEARANCE: f64 = 5.0;
/// Nozzle clearance above the probe box.
pub const Z_PROBE_CLEARANCE: f64 = 5.0;
/// Start height of the z probe above the box centre.
pub const Z_PROBE_START_CLEARANCE: f64 = 20.0;
/// Retreat after each touch, to release the switch.
pub const BOUNCE_DISTANCE_MM: f64 = 5.0;
/// How far outside the probe box each sideways probe starts.
pub const SWITCH_CLEARANCE: f64 = 7.5;
/// Travel height between hot spots, above the box centre.
pub const Z_CROSSOVER_CLEARANCE: f64 = Z_PROBE_CLEARANCE + 30.0;

/// Switch box the tip is probed against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probe {
    /// Nominal top centre of the switch board, in `ROOT`
    pub center: Point,
    /// External bounding box of the probe unit
    pub dimensions: Point,
}

/// Starting point and travel of one probing touch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HotSpot {
    /// Axis being probed
    pub axis: Axis,
    /// Start position relative to the probe centre (z is absolute for sideways touches)
    pub start: Point,
    /// Signed probing travel
    pub distance: f64,
}

/// Shift `frame` by `delta` relative to its parent.
pub fn calibrate_with_delta(tree: &PoseTree, frame: &Frame, delta: Point) -> RobotResult<PoseTree> {
    let parent = tree
        .parent(frame)?
        .ok_or_else(|| RobotError::precondition("ROOT cannot be calibrated"))?;
    let local = tree.convert(frame, parent, Point::ORIGIN)?;
    debug!(frame = %frame, delta = %delta, "Calibrating frame");
    tree.set_local_pose(frame, local + delta)
}

/// Shift a labware frame by `delta` and carry the shift into its stored record.
///
/// The record is written back only when `save` is set; either way the returned
/// tree has the frame moved.
pub fn calibrate_labware<S: LabwareStore + ?Sized>(
    tree: &PoseTree,
    store: &mut S,
    name: &str,
    frame: &Frame,
    delta: Point,
    save: bool,
) -> RobotResult<PoseTree> {
    let mut record = store.load(name)?;
    let tree = calibrate_with_delta(tree, frame, delta)?;
    record.shift(delta);
    if save {
        store.save(&record)?;
    }
    info!(labware = name, delta = %delta, saved = save, "Labware calibrated");
    Ok(tree)
}

/// The five touches, in probing order: -x, +x, -y, +y, z.
pub fn hot_spots(probe: &Probe, tip_length: f64) -> [HotSpot; 5] {
    let size = probe.dimensions;
    let rel_x = size.x / 2.0 + SWITCH_CLEARANCE;
    let rel_y = size.y / 2.0 + SWITCH_CLEARANCE;

    let nozzle_safe_z = round3(size.z - tip_length + Z_PROBE_CLEARANCE);
    let z_start = Z_DECK_CLEARANCE.max(nozzle_safe_z);

    [
        HotSpot {
            axis: Axis::X,
            start: Point::new(-rel_x, X_SWITCH_OFFSET_MM, z_start),
            distance: size.x,
        },
        HotSpot {
            axis: Axis::X,
            start: Point::new(rel_x, X_SWITCH_OFFSET_MM, z_start),
            distance: -size.x,
        },
        HotSpot {
            axis: Axis::Y,
            start: Point::new(Y_SWITCH_OFFSET_MM, -rel_y, z_start),
            distance: size.y,
        },
        HotSpot {
            axis: Axis::Y,
            start: Point::new(Y_SWITCH_OFFSET_MM, rel_y, z_start),
            distance: -size.y,
        },
        HotSpot {
            axis: Axis::Z,
            start: Point::new(0.0, Z_SWITCH_OFFSET_MM, Z_PROBE_START_CLEARANCE),
            distance: -size.z,
        },
    ]
}

/// Travel height between touches.
pub fn safe_height(probe: &Probe) -> f64 {
    probe.center.z + Z_CROSSOVER_CLEARANCE
}

/// Locate the tip at `tip_frame` against `probe`.
///
/// `tip_frame` must sit somewhere under the mover's frame. The mover needs all three
/// logical axes mapped. Returns the advanced tree and the measured centre, in `ROOT`.
pub fn probe_center<D: MotionDriver>(
    tree: &PoseTree,
    mover: &mut Mover<D>,
    tip_frame: &Frame,
    probe: &Probe,
    tip_length: f64,
) -> RobotResult<(PoseTree, Point)> {
    for axis in Axis::ALL {
        if !mover.mapping().contains(axis) {
            return Err(RobotError::precondition(format!(
                "probing needs axis {} mapped on {}",
                axis,
                mover.frame()
            )));
        }
    }

    info!(mover = %mover.frame(), tip = %tip_frame, tip_length, "Tip probe started");
    let mut tree = if mover.needs_to_home() {
        mover.home(tree)?
    } else {
        tree.clone()
    };

    let mut center = probe.center;
    let safe = safe_height(probe);
    let mut readings: Vec<f64> = Vec::with_capacity(2);

    tree = move_tip(&tree, mover, tip_frame, Target::default().with(Axis::Z, safe))?;

    for spot in hot_spots(probe, tip_length) {
        let start = match spot.axis {
            Axis::Z => spot.start + center,
            _ => Point::new(spot.start.x + center.x, spot.start.y + center.y, spot.start.z),
        };

        tree = move_tip(
            &tree,
            mover,
            tip_frame,
            Target::default()
                .with(Axis::X, start.x)
                .with(Axis::Y, start.y),
        )?;
        tree = move_tip(&tree, mover, tip_frame, Target::default().with(Axis::Z, start.z))?;
        tree = mover.probe(&tree, spot.axis, spot.distance)?;

        let value = tree.absolute(tip_frame)?.get(spot.axis);
        readings.push(value);

        if spot.axis == Axis::Z {
            center = center.with(Axis::Z, value);
            readings.clear();
        } else if readings.len() == 2 {
            center = center.with(spot.axis, (readings[0] + readings[1]) / 2.0);
            readings.clear();
        }
        debug!(axis = %spot.axis, value, center = %center, "Probe touch");

        let bounce = value - BOUNCE_DISTANCE_MM * spot.distance.signum();
        tree = move_tip(&tree, mover, tip_frame, Target::default().with(spot.axis, bounce))?;
        tree = move_tip(&tree, mover, tip_frame, Target::default().with(Axis::Z, safe))?;
    }

    info!(center = %center, "Tip probe finished");
    Ok((tree, center))
}

/// Fold a probe measurement back into the instrument's placement.
///
/// The horizontal error between `measured` and `nominal` moves `instrument_frame`
/// the opposite way. The vertical error is a tip length error, so the tree keeps
/// the instrument's height and the returned offset has z at zero.
///
/// Returns the advanced tree, the instrument's new offset relative to `mover_frame`
/// and the tip length delta.
pub fn update_instrument_offset(
    tree: &PoseTree,
    instrument_frame: &Frame,
    mover_frame: &Frame,
    measured: Point,
    nominal: Point,
) -> RobotResult<(PoseTree, Point, f64)> {
    let delta = measured - nominal;
    debug!(instrument = %instrument_frame, delta = %delta, "Measured probe centre error");

    let shift = Point::new(-delta.x, -delta.y, 0.0);
    let tree = calibrate_with_delta(tree, instrument_frame, shift)?;
    let offset = tree
        .convert(instrument_frame, mover_frame, Point::ORIGIN)?
        .with(Axis::Z, 0.0);

    info!(
        instrument = %instrument_frame,
        offset = %offset,
        tip_delta = delta.z,
        "Instrument offset updated"
    );
    Ok((tree, offset, delta.z))
}

/// Move so the tip reaches the given `ROOT` coordinates, holding unset axes.
fn move_tip<D: MotionDriver>(
    tree: &PoseTree,
    mover: &mut Mover<D>,
    tip_frame: &Frame,
    target: Target,
) -> RobotResult<PoseTree> {
    let tip = tree.absolute(tip_frame)?;
    let tip_offset = tip - tree.absolute(mover.frame())?;

    let goal = Point::new(
        target.x.unwrap_or(tip.x),
        target.y.unwrap_or(tip.y),
        target.z.unwrap_or(tip.z),
    );
    let in_src = tree.convert(&ROOT, mover.src(), goal - tip_offset)?;

    let full = Axis::ALL
        .into_iter()
        .fold(Target::default(), |acc, axis| acc.with(axis, in_src.get(axis)));
    mover.move_to(tree, full)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
