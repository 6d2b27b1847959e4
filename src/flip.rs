// src/flip.rs
//! Flip maps and flip states.
//!
//! Every flip group has a 5-bit activation mask, filled in by triggers, and a
//! swapped/unswapped state. A group only flips once its mask is complete. Levels
//! older than TR4 keep one global state and flip every room at once.

use thiserror::Error;

use crate::config::EngineVersion;
use crate::container::ContainerTable;
use crate::physics::PhysicsWorld;
use crate::room::RoomGraph;

/// Mask value at which a group is allowed to flip.
pub const FLIP_MASK_FULL: u8 = 0x1F;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlipError {
    #[error("wrong flipmap index = {0}")]
    WrongIndex(u32),
}

/// How a new mask merges into the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipOp {
    Or,
    Xor,
}

#[derive(Debug, Clone)]
pub struct FlipState {
    map: Vec<u8>,
    state: Vec<bool>,
    per_group: bool,
}

impl FlipState {
    pub fn new(groups: usize, version: EngineVersion) -> Self {
        let groups = groups.max(1);
        Self {
            map: vec![0; groups],
            state: vec![false; groups],
            per_group: version.per_group_flips(),
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.map.len()
    }

    fn check(&self, group: u32) -> Result<usize, FlipError> {
        let index = group as usize;
        if index < self.map.len() {
            Ok(index)
        } else {
            Err(FlipError::WrongIndex(group))
        }
    }

    pub fn map(&self, group: u32) -> Result<u8, FlipError> {
        self.check(group).map(|g| self.map[g])
    }

    pub fn state(&self, group: u32) -> Result<bool, FlipError> {
        self.check(group).map(|g| self.state[g])
    }

    /// Merges `mask` into the group's map and returns the new value.
    pub fn set_map(&mut self, group: u32, mask: u8, op: FlipOp) -> Result<u8, FlipError> {
        let g = self.check(group)?;
        match op {
            FlipOp::Or => self.map[g] |= mask,
            FlipOp::Xor => self.map[g] ^= mask,
        }
        Ok(self.map[g])
    }

    /// Swaps the group's rooms to the requested state once its mask is full.
    ///
    /// Returns how many rooms actually swapped. Rooms already in the requested
    /// state are left alone, so repeating a call changes nothing.
    pub fn set_state(
        &mut self,
        group: u32,
        state: bool,
        rooms: &mut RoomGraph,
        physics: &mut PhysicsWorld,
        containers: &mut ContainerTable,
    ) -> Result<usize, FlipError> {
        let g = self.check(group)?;
        if self.map[g] != FLIP_MASK_FULL {
            log::debug!("flip group {} not armed (map = {:#04x})", group, self.map[g]);
            return Ok(0);
        }

        let targets: Vec<_> = if self.per_group {
            rooms.ids_in_group(g as u8)
        } else {
            rooms.iter().map(|r| r.id).collect()
        };

        let mut swapped = 0;
        for id in targets {
            let changed = if state {
                rooms.swap_to_alternate(id, physics, containers)
            } else {
                rooms.swap_to_base(id, physics, containers)
            };
            swapped += changed as usize;
        }

        let slot = if self.per_group { g } else { 0 };
        self.state[slot] = state;
        log::debug!("flip group {} -> {} ({} rooms)", group, state, swapped);
        Ok(swapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Aabb;
    use crate::room::{Room, RoomId};
    use nalgebra::{Point3, Vector3};

    /// Rooms 0/1 are a pair in group 1, rooms 2/3 a pair in group 2.
    fn two_pairs() -> RoomGraph {
        let bounds = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1024.0, 1024.0, 1024.0));
        let mut rooms: Vec<Room> = (0..4).map(|i| Room::new(RoomId(i), bounds, 1, 1)).collect();
        for (base, alt, group) in [(0usize, 1usize, 1u8), (2, 3, 2)] {
            rooms[base].alternate_room = Some(RoomId(alt as u32));
            rooms[alt].base_room = Some(RoomId(base as u32));
            rooms[alt].active = false;
            rooms[base].alternate_group = group;
            rooms[alt].alternate_group = group;
        }
        RoomGraph::new(rooms)
    }

    fn active(rooms: &RoomGraph) -> Vec<bool> {
        rooms.iter().map(|r| r.active).collect()
    }

    #[test]
    fn map_merges_with_or_and_xor() {
        let mut flips = FlipState::new(4, EngineVersion::Tr4);
        assert_eq!(flips.set_map(1, 0x03, FlipOp::Or), Ok(0x03));
        assert_eq!(flips.set_map(1, 0x1C, FlipOp::Or), Ok(FLIP_MASK_FULL));
        assert_eq!(flips.set_map(1, 0x01, FlipOp::Xor), Ok(0x1E));
        assert_eq!(flips.map(1), Ok(0x1E));
        assert_eq!(flips.set_map(4, 1, FlipOp::Or), Err(FlipError::WrongIndex(4)));
    }

    #[test]
    fn state_needs_full_mask_and_flips_only_its_group() {
        let mut rooms = two_pairs();
        let mut physics = PhysicsWorld::new(Vector3::zeros(), 8);
        let mut containers = ContainerTable::new();
        let mut flips = FlipState::new(3, EngineVersion::Tr4);

        assert_eq!(flips.set_state(1, true, &mut rooms, &mut physics, &mut containers), Ok(0));
        assert_eq!(active(&rooms), vec![true, false, true, false]);

        flips.set_map(1, FLIP_MASK_FULL, FlipOp::Or).unwrap();
        assert_eq!(flips.set_state(1, true, &mut rooms, &mut physics, &mut containers), Ok(1));
        assert_eq!(active(&rooms), vec![false, true, true, false]);
        assert_eq!(flips.state(1), Ok(true));
        assert_eq!(flips.state(2), Ok(false));

        // Same state again: nothing swaps.
        assert_eq!(flips.set_state(1, true, &mut rooms, &mut physics, &mut containers), Ok(0));
        assert_eq!(active(&rooms), vec![false, true, true, false]);

        assert_eq!(flips.set_state(1, false, &mut rooms, &mut physics, &mut containers), Ok(1));
        assert_eq!(active(&rooms), vec![true, false, true, false]);
        assert_eq!(
            flips.set_state(9, true, &mut rooms, &mut physics, &mut containers),
            Err(FlipError::WrongIndex(9))
        );
    }

    #[test]
    fn old_levels_flip_every_room_through_slot_zero() {
        let mut rooms = two_pairs();
        let mut physics = PhysicsWorld::new(Vector3::zeros(), 8);
        let mut containers = ContainerTable::new();
        let mut flips = FlipState::new(3, EngineVersion::Tr2);
        flips.set_map(1, FLIP_MASK_FULL, FlipOp::Or).unwrap();

        assert_eq!(flips.set_state(1, true, &mut rooms, &mut physics, &mut containers), Ok(2));
        assert_eq!(active(&rooms), vec![false, true, false, true]);
        assert_eq!(flips.state(0), Ok(true));
        assert_eq!(flips.state(1), Ok(false));
    }
}
