//! Coordinate conversion laws over randomly shaped pose trees.

use liquid_handler::{Frame, Point, PoseTree, RobotError, ROOT};
use proptest::prelude::*;
use proptest::sample::Index;

fn coordinate() -> impl Strategy<Value = f64> {
    -1000.0..1000.0f64
}

fn point() -> impl Strategy<Value = Point> {
    (coordinate(), coordinate(), coordinate()).prop_map(|(x, y, z)| Point::new(x, y, z))
}

/// Tree with frames `f0..fn`, each attached to ROOT or an earlier frame.
fn random_tree() -> impl Strategy<Value = (PoseTree, Vec<Frame>)> {
    prop::collection::vec((any::<Index>(), point()), 1..12).prop_map(|specs| {
        let mut tree = PoseTree::new();
        let mut frames: Vec<Frame> = Vec::new();
        for (i, (parent_index, offset)) in specs.into_iter().enumerate() {
            let slot = parent_index.index(i + 1);
            let parent = if slot == 0 {
                ROOT
            } else {
                frames[slot - 1].clone()
            };
            let frame = Frame::named(format!("f{}", i));
            tree = tree.add(frame.clone(), parent, offset).unwrap();
            frames.push(frame);
        }
        (tree, frames)
    })
}

fn close(a: Point, b: Point) -> bool {
    let tolerance = 1e-6;
    (a.x - b.x).abs() < tolerance && (a.y - b.y).abs() < tolerance && (a.z - b.z).abs() < tolerance
}

proptest! {
    #[test]
    fn identity_is_exact((tree, frames) in random_tree(), pick in any::<Index>(), p in point()) {
        let frame = pick.get(&frames);
        prop_assert_eq!(tree.convert(frame, frame, p).unwrap(), p);
    }

    #[test]
    fn child_to_parent_adds_offset((tree, frames) in random_tree(), pick in any::<Index>(), p in point()) {
        let frame = pick.get(&frames);
        let pose = tree.pose(frame).unwrap();
        prop_assert_eq!(tree.convert(frame, &pose.parent, p).unwrap(), p + pose.offset);
    }

    #[test]
    fn conversion_round_trips(
        (tree, frames) in random_tree(),
        a in any::<Index>(),
        b in any::<Index>(),
        p in point(),
    ) {
        let src = a.get(&frames);
        let dst = b.get(&frames);
        let there = tree.convert(src, dst, p).unwrap();
        let back = tree.convert(dst, src, there).unwrap();
        prop_assert!(close(back, p), "{} != {}", back, p);
    }

    #[test]
    fn write_then_read((tree, frames) in random_tree(), pick in any::<Index>(), q in point()) {
        let frame = pick.get(&frames);
        let parent = tree.parent(frame).unwrap().unwrap().clone();
        let updated = tree.set_local_pose(frame, q).unwrap();
        prop_assert_eq!(updated.convert(frame, &parent, Point::ORIGIN).unwrap(), q);
        // The old snapshot is untouched.
        prop_assert_eq!(tree.pose(frame).unwrap().offset, tree.convert(frame, &parent, Point::ORIGIN).unwrap());
    }
}

#[test]
fn test_deck_and_pipette_tree() {
    let deck = Frame::named("deck");
    let slot = Frame::named("slot-5");
    let plate = Frame::named("plate");
    let gantry = Frame::named("gantry");
    let pipette = Frame::named("pipette");

    let tree = PoseTree::new()
        .add(deck.clone(), ROOT, Point::new(10.0, 20.0, 0.0))
        .unwrap()
        .add(slot.clone(), deck.clone(), Point::new(132.5, 90.5, 0.0))
        .unwrap()
        .add(plate.clone(), slot.clone(), Point::new(0.0, 0.0, 10.0))
        .unwrap()
        .add(gantry.clone(), ROOT, Point::new(100.0, 100.0, 150.0))
        .unwrap()
        .add(pipette.clone(), gantry.clone(), Point::new(-34.0, 0.0, -50.0))
        .unwrap();

    assert_eq!(
        tree.absolute(&plate).unwrap(),
        Point::new(142.5, 110.5, 10.0)
    );
    assert_eq!(tree.absolute(&pipette).unwrap(), Point::new(66.0, 100.0, 100.0));
    // Plate origin seen from the pipette.
    assert_eq!(
        tree.convert(&plate, &pipette, Point::ORIGIN).unwrap(),
        Point::new(76.5, 10.5, -90.0)
    );
}

#[test]
fn test_old_snapshots_survive_updates() {
    let frame = Frame::named("carriage");
    let before = PoseTree::new().add(frame.clone(), ROOT, Point::ORIGIN).unwrap();
    let after = before
        .set_local_pose(&frame, Point::new(1.0, 2.0, 3.0))
        .unwrap();

    assert_eq!(before.absolute(&frame).unwrap(), Point::ORIGIN);
    assert_eq!(after.absolute(&frame).unwrap(), Point::new(1.0, 2.0, 3.0));
}

#[test]
fn test_unknown_frames_fail() {
    let tree = PoseTree::new();
    let ghost = Frame::named("ghost");
    assert!(matches!(
        tree.convert(&ghost, &ROOT, Point::ORIGIN),
        Err(RobotError::FrameNotFound(_))
    ));
    assert!(matches!(
        tree.set_local_pose(&ghost, Point::ORIGIN),
        Err(RobotError::FrameNotFound(_))
    ));
}
