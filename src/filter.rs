// src/filter.rs
//! Room-adjacency collision filter.
//!
//! Runs for every broadphase pair before narrow-phase. The decision only looks
//! at containers and the room graph, never at geometry. When in doubt it defers
//! to the default dispatch: a wrong accept costs CPU, a wrong reject loses a
//! collision.

use rapier3d::prelude::{PairFilterContext, PhysicsHooks, RigidBodyHandle, RigidBodySet, SolverFlags};

use crate::container::{ContainerId, ContainerTable};
use crate::room::{RoomGraph, RoomId};

/// What the filter knows about one body of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PairSide {
    pub container: Option<ContainerId>,
    pub room: Option<RoomId>,
    /// Fixed or kinematic.
    pub immovable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Drop the pair before narrow-phase.
    Reject,
    /// Let the regular narrow-phase handle it.
    Default,
}

pub fn filter_pair(a: &PairSide, b: &PairSide, rooms: &RoomGraph) -> Verdict {
    if let (Some(ca), Some(cb)) = (a.container, b.container) {
        if ca == cb {
            return if a.immovable || b.immovable { Verdict::Reject } else { Verdict::Default };
        }
    }

    match (a.room, b.room) {
        (Some(ra), Some(rb)) if !rooms.rooms_are_near(ra, rb) => Verdict::Reject,
        _ => Verdict::Default,
    }
}

/// `PhysicsHooks` adapter over a room graph and container table.
pub struct RoomNearFilter<'a> {
    rooms: &'a RoomGraph,
    containers: &'a ContainerTable,
}

impl<'a> RoomNearFilter<'a> {
    pub fn new(rooms: &'a RoomGraph, containers: &'a ContainerTable) -> Self {
        Self { rooms, containers }
    }

    fn side(&self, bodies: &RigidBodySet, handle: Option<RigidBodyHandle>) -> PairSide {
        let Some(handle) = handle else { return PairSide::default() };
        let immovable = bodies
            .get(handle)
            .map_or(false, |b| b.is_fixed() || b.is_kinematic());
        match self.containers.lookup(handle) {
            Some((id, c)) => PairSide { container: Some(id), room: c.room, immovable },
            None => PairSide { immovable, ..PairSide::default() },
        }
    }

    fn verdict(&self, context: &PairFilterContext) -> Verdict {
        let a = self.side(context.bodies, context.rigid_body1);
        let b = self.side(context.bodies, context.rigid_body2);
        filter_pair(&a, &b, self.rooms)
    }
}

impl PhysicsHooks for RoomNearFilter<'_> {
    fn filter_contact_pair(&self, context: &PairFilterContext) -> Option<SolverFlags> {
        match self.verdict(context) {
            Verdict::Reject => None,
            Verdict::Default => Some(SolverFlags::COMPUTE_IMPULSES),
        }
    }

    fn filter_intersection_pair(&self, context: &PairFilterContext) -> bool {
        self.verdict(context) == Verdict::Default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{EngineContainer, ObjectKind};
    use crate::geometry::Aabb;
    use crate::physics::{groups, PhysicsWorld};
    use crate::room::Room;
    use nalgebra::{Point3, Vector3};
    use rapier3d::prelude::*;

    fn three_rooms() -> RoomGraph {
        let bounds = Aabb::new(Point3::new(-4096.0, -4096.0, -4096.0), Point3::new(4096.0, 4096.0, 4096.0));
        let mut rooms: Vec<Room> = (0..3).map(|i| Room::new(RoomId(i), bounds, 0, 0)).collect();
        rooms[0].near_rooms = vec![RoomId(1)];
        rooms[1].near_rooms = vec![RoomId(0), RoomId(2)];
        rooms[2].near_rooms = vec![RoomId(1)];
        RoomGraph::new(rooms)
    }

    fn side(container: u32, room: Option<u32>) -> PairSide {
        PairSide { container: Some(ContainerId(container)), room: room.map(RoomId), immovable: false }
    }

    #[test]
    fn adjacent_rooms_pass_and_distant_rooms_reject() {
        let rooms = three_rooms();
        let (b0, b1, b2) = (side(0, Some(0)), side(1, Some(1)), side(2, Some(2)));
        assert_eq!(filter_pair(&b0, &b1, &rooms), Verdict::Default);
        assert_eq!(filter_pair(&b1, &b2, &rooms), Verdict::Default);
        assert_eq!(filter_pair(&b0, &b2, &rooms), Verdict::Reject);
        assert_eq!(filter_pair(&b2, &b0, &rooms), Verdict::Reject);
    }

    #[test]
    fn roomless_pairs_are_never_rejected() {
        let rooms = three_rooms();
        for room in [None, Some(0), Some(1), Some(2)] {
            for immovable in [false, true] {
                let roomless = PairSide { immovable, ..side(9, None) };
                let other = side(3, room);
                assert_eq!(filter_pair(&roomless, &other, &rooms), Verdict::Default);
                assert_eq!(filter_pair(&other, &roomless, &rooms), Verdict::Default);
            }
        }
        assert_eq!(filter_pair(&PairSide::default(), &PairSide::default(), &rooms), Verdict::Default);
    }

    #[test]
    fn same_container_rejects_only_with_immovable_part() {
        let rooms = three_rooms();
        let free = side(4, Some(0));
        let stuck = PairSide { immovable: true, ..free };
        assert_eq!(filter_pair(&free, &free, &rooms), Verdict::Default);
        assert_eq!(filter_pair(&free, &stuck, &rooms), Verdict::Reject);
        assert_eq!(filter_pair(&stuck, &free, &rooms), Verdict::Reject);
    }

    /// Two overlapping boxes; returns how far the first one moved after a few steps.
    fn overlap_displacement(room_a: u32, room_b: u32) -> f32 {
        let rooms = three_rooms();
        let mut physics = PhysicsWorld::new(Vector3::zeros(), 8);
        let mut containers = ContainerTable::new();

        let mut spawn = |room: u32, x: f32| {
            let body = physics.insert_body(
                RigidBodyBuilder::dynamic().translation(vector![x, 0.0, 0.0]).build(),
                [ColliderBuilder::cuboid(50.0, 50.0, 50.0)
                    .collision_groups(groups::dynamic())
                    .active_hooks(ActiveHooks::FILTER_CONTACT_PAIRS)
                    .build()],
            );
            let id = containers.insert(EngineContainer { kind: ObjectKind::PhysicsMisc, room: Some(RoomId(room)) });
            containers.bind(body, id);
            body
        };
        let a = spawn(room_a, 0.0);
        let _b = spawn(room_b, 40.0);

        for _ in 0..5 {
            physics.step(1.0 / 60.0, &RoomNearFilter::new(&rooms, &containers));
        }
        physics.body_position(a).map_or(0.0, |p| p.translation.vector.norm())
    }

    #[test]
    fn hook_drops_contacts_between_distant_rooms() {
        assert!(overlap_displacement(0, 2) < 1.0e-3);
        assert!(overlap_displacement(0, 1) > 1.0e-3);
    }
}
