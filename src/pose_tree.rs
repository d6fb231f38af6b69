//! Coordinate frame tree.
//!
//! A [`PoseTree`] is an immutable snapshot mapping every [`Frame`] to its parent and
//! its local translation relative to that parent. Updates return a new snapshot and
//! leave the old one untouched, so a stale snapshot can still be inspected after the
//! robot has moved on.
//!
//! Invariants held by every snapshot:
//! - [`ROOT`] is the only frame without a parent and is always present.
//! - Every other frame's parent is present in the same snapshot.
//! - There are no cycles (frames are only ever inserted under existing parents and
//!   updates never re-parent).
//!
//! # Example
//!
//! ```
//! use liquid_handler::pose_tree::{Frame, Point, PoseTree, ROOT};
//!
//! # fn main() -> liquid_handler::error::RobotResult<()> {
//! let a = Frame::named("A");
//! let b = Frame::named("B");
//! let tree = PoseTree::new()
//!     .add(a.clone(), ROOT, Point::new(10.0, 0.0, 0.0))?
//!     .add(b.clone(), a, Point::new(0.0, 5.0, 0.0))?;
//!
//! assert_eq!(tree.convert(&b, &ROOT, Point::ORIGIN)?, Point::new(10.0, 5.0, 0.0));
//! assert_eq!(tree.convert(&ROOT, &b, Point::ORIGIN)?, Point::new(-10.0, -5.0, 0.0));
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RobotError, RobotResult};
use crate::mover::Axis;

/// Immutable 3D point or translation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
    /// Z component
    pub z: f64,
}

impl Point {
    /// The origin `(0, 0, 0)`.
    pub const ORIGIN: Point = Point {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Create a point from its three components.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Component along a logical axis.
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Copy of this point with one component replaced.
    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
        self
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Point {
    type Output = Point;

    fn neg(self) -> Point {
        Point::new(-self.x, -self.y, -self.z)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Identity of a node in the pose tree.
///
/// Frames are cheap to clone and compare; a named frame may stand for a deck slot,
/// a mount, an instrument, a piece of labware or a [`Mover`](crate::mover::Mover).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Frame {
    /// The top-level frame, which has no parent.
    Root,
    /// Any other frame, identified by name.
    Named(Arc<str>),
}

/// The distinguished top-level frame.
pub const ROOT: Frame = Frame::Root;

static ROOT_FRAME: Frame = Frame::Root;

impl Frame {
    /// Create a named frame.
    pub fn named(name: impl AsRef<str>) -> Self {
        Frame::Named(Arc::from(name.as_ref()))
    }

    /// Whether this is [`ROOT`].
    pub fn is_root(&self) -> bool {
        matches!(self, Frame::Root)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Root => f.write_str("ROOT"),
            Frame::Named(name) => f.write_str(name),
        }
    }
}

/// A frame's placement relative to its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    /// Parent frame
    pub parent: Frame,
    /// Local translation relative to `parent`
    pub offset: Point,
}

/// Immutable snapshot of the frame tree.
///
/// Cloning a snapshot is O(1). An update clones the whole node map (trees are a
/// handful of frames) and leaves the previous snapshot valid; nodes are not shared
/// between snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseTree {
    nodes: Arc<BTreeMap<Frame, Pose>>,
}

impl PoseTree {
    /// Tree containing only [`ROOT`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `frame` is part of this snapshot. [`ROOT`] always is.
    pub fn contains(&self, frame: &Frame) -> bool {
        frame.is_root() || self.nodes.contains_key(frame)
    }

    /// Number of frames including [`ROOT`].
    pub fn len(&self) -> usize {
        self.nodes.len() + 1
    }

    /// Always false; a tree holds at least [`ROOT`].
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Non-root frames in this snapshot.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.nodes.keys()
    }

    /// Pose of a non-root frame.
    pub fn pose(&self, frame: &Frame) -> RobotResult<&Pose> {
        self.nodes
            .get(frame)
            .ok_or_else(|| RobotError::FrameNotFound(frame.clone()))
    }

    /// Parent of `frame`, or `None` for [`ROOT`].
    pub fn parent(&self, frame: &Frame) -> RobotResult<Option<&Frame>> {
        if frame.is_root() {
            return Ok(None);
        }
        Ok(Some(&self.pose(frame)?.parent))
    }

    /// Insert `frame` under an existing `parent` at local offset `point`.
    pub fn add(&self, frame: Frame, parent: Frame, point: Point) -> RobotResult<PoseTree> {
        if self.contains(&frame) {
            return Err(RobotError::DuplicateFrame(frame));
        }
        if !self.contains(&parent) {
            return Err(RobotError::FrameNotFound(parent));
        }

        Ok(self.updated(|nodes| {
            nodes.insert(
                frame,
                Pose {
                    parent,
                    offset: point,
                },
            );
        }))
    }

    /// Detach a leaf frame.
    pub fn remove(&self, frame: &Frame) -> RobotResult<PoseTree> {
        if frame.is_root() {
            return Err(RobotError::precondition("ROOT cannot be removed"));
        }
        self.pose(frame)?;
        if self.nodes.values().any(|pose| &pose.parent == frame) {
            return Err(RobotError::precondition(format!(
                "frame {} still has children",
                frame
            )));
        }

        Ok(self.updated(|nodes| {
            nodes.remove(frame);
        }))
    }

    /// Replace the local offset of an existing frame, keeping its parent.
    ///
    /// This updates, it never inserts: an absent frame is [`RobotError::FrameNotFound`].
    pub fn set_local_pose(&self, frame: &Frame, point: Point) -> RobotResult<PoseTree> {
        let parent = self.pose(frame)?.parent.clone();

        Ok(self.updated(|nodes| {
            nodes.insert(
                frame.clone(),
                Pose {
                    parent,
                    offset: point,
                },
            );
        }))
    }

    /// Express `point`, given in `src`'s local space, in `dst`'s local space.
    ///
    /// Offsets are summed from each frame up to their lowest common ancestor, so the
    /// identity law (`src == dst`) and parent/child conversions are exact.
    pub fn convert(&self, src: &Frame, dst: &Frame, point: Point) -> RobotResult<Point> {
        let src_chain = self.ancestry(src)?;
        let dst_chain = self.ancestry(dst)?;

        // ROOT terminates both chains, so a common ancestor always exists.
        let common = src_chain
            .iter()
            .copied()
            .find(|frame| dst_chain.contains(frame))
            .unwrap_or(&ROOT_FRAME);

        let up_from_src = self.offset_to(&src_chain, common)?;
        let up_from_dst = self.offset_to(&dst_chain, common)?;
        Ok(point + (up_from_src - up_from_dst))
    }

    /// Position of `frame`'s origin in [`ROOT`] coordinates.
    pub fn absolute(&self, frame: &Frame) -> RobotResult<Point> {
        self.convert(frame, &ROOT, Point::ORIGIN)
    }

    /// New snapshot with `edit` applied to a copy of the node map.
    fn updated(&self, edit: impl FnOnce(&mut BTreeMap<Frame, Pose>)) -> PoseTree {
        let mut next = self.clone();
        edit(Arc::make_mut(&mut next.nodes));
        next
    }

    /// `frame` followed by each ancestor, ending at [`ROOT`].
    fn ancestry(&self, frame: &Frame) -> RobotResult<Vec<&Frame>> {
        let mut chain = Vec::new();
        let mut current = frame;
        loop {
            if current.is_root() {
                chain.push(&ROOT_FRAME);
                return Ok(chain);
            }
            let (key, pose) = self
                .nodes
                .get_key_value(current)
                .ok_or_else(|| RobotError::FrameNotFound(current.clone()))?;
            chain.push(key);
            current = &pose.parent;
        }
    }

    /// Sum of local offsets along `chain` until `stop` is reached.
    fn offset_to(&self, chain: &[&Frame], stop: &Frame) -> RobotResult<Point> {
        let mut total = Point::ORIGIN;
        for frame in chain.iter().take_while(|frame| **frame != stop) {
            total = total + self.pose(frame)?.offset;
        }
        Ok(total)
    }
}
