// src/room.rs
//! Rooms, sectors and the room graph.
//!
//! Rooms live in an index-stable arena. Cross references (near rooms, portals,
//! alternates, stacked sectors) are [`RoomId`]s, never pointers. The graph answers
//! "which room is this point in" by coherence: the caller's last known room is
//! tried first, then its near rooms, and only then every room.

use nalgebra::{Isometry3, Point3, Vector3};
use rapier3d::prelude::RigidBodyHandle;

use crate::container::{ContainerId, ContainerTable};
use crate::geometry::{Aabb, SECTOR_SIZE};
use crate::physics::{groups, PhysicsWorld};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(pub u32);

impl RoomId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Address of one sector: room plus flat grid index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectorRef {
    pub room: RoomId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sector {
    pub index_x: u16,
    pub index_y: u16,
    pub floor: f32,
    pub ceiling: f32,
    pub material: u16,
    pub flags: u32,
    pub trig_index: Option<u32>,
    pub portal_to_room: Option<RoomId>,
    pub sector_above: Option<SectorRef>,
    pub sector_below: Option<SectorRef>,
    pub owner_room: RoomId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticMesh {
    pub object_id: u32,
    pub position: Point3<f32>,
    pub body: Option<RigidBodyHandle>,
}

/// What a swap to this room changed in other rooms, so the reverse swap can undo it.
#[derive(Debug, Clone, Default, PartialEq)]
struct Relinks {
    sectors: Vec<SectorRef>,
    near: Vec<RoomId>,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub bounds: Aabb,
    pub transform: Isometry3<f32>,
    pub sectors_x: u16,
    pub sectors_y: u16,
    pub sectors: Vec<Sector>,
    pub near_rooms: Vec<RoomId>,
    pub alternate_room: Option<RoomId>,
    pub base_room: Option<RoomId>,
    pub alternate_group: u8,
    pub flags: u32,
    pub active: bool,
    pub static_meshes: Vec<StaticMesh>,
    pub containers: Vec<ContainerId>,
    /// Fixed body carrying the room's own geometry.
    pub body: Option<RigidBodyHandle>,
    relinks: Relinks,
}

impl Room {
    pub fn new(id: RoomId, bounds: Aabb, sectors_x: u16, sectors_y: u16) -> Self {
        let origin = Vector3::new(bounds.min.x, bounds.min.y, 0.0);
        Self {
            id,
            bounds,
            transform: Isometry3::translation(origin.x, origin.y, origin.z),
            sectors_x,
            sectors_y,
            sectors: Vec::new(),
            near_rooms: Vec::new(),
            alternate_room: None,
            base_room: None,
            alternate_group: 0,
            flags: 0,
            active: true,
            static_meshes: Vec::new(),
            containers: Vec::new(),
            body: None,
            relinks: Relinks::default(),
        }
    }

    #[inline]
    pub fn origin(&self) -> Vector3<f32> {
        self.transform.translation.vector
    }

    /// Grid index of the cell under `p`, clamped to the grid.
    pub fn sector_index(&self, p: &Point3<f32>) -> Option<usize> {
        if self.sectors_x == 0 || self.sectors_y == 0 {
            return None;
        }
        let origin = self.origin();
        let x = ((p.x - origin.x) / SECTOR_SIZE).floor() as i64;
        let y = ((p.y - origin.y) / SECTOR_SIZE).floor() as i64;
        let x = x.clamp(0, self.sectors_x as i64 - 1) as usize;
        let y = y.clamp(0, self.sectors_y as i64 - 1) as usize;
        let index = x * self.sectors_y as usize + y;
        (index < self.sectors.len()).then_some(index)
    }

    #[inline]
    pub fn sector_at(&self, p: &Point3<f32>) -> Option<&Sector> {
        self.sector_index(p).map(|i| &self.sectors[i])
    }

    /// Fills the grid with open cells spanning the room's height.
    pub fn fill_sectors(&mut self) {
        self.sectors = (0..self.sectors_x)
            .flat_map(|x| (0..self.sectors_y).map(move |y| (x, y)))
            .map(|(x, y)| Sector {
                index_x: x,
                index_y: y,
                floor: self.bounds.min.z,
                ceiling: self.bounds.max.z,
                material: 0,
                flags: 0,
                trig_index: None,
                portal_to_room: None,
                sector_above: None,
                sector_below: None,
                owner_room: self.id,
            })
            .collect();
    }

    /// World-space center of a sector cell at the room's floor.
    pub fn sector_center(&self, index: usize) -> Option<Point3<f32>> {
        let s = self.sectors.get(index)?;
        let o = self.origin();
        Some(Point3::new(
            o.x + (s.index_x as f32 + 0.5) * SECTOR_SIZE,
            o.y + (s.index_y as f32 + 0.5) * SECTOR_SIZE,
            s.floor,
        ))
    }

    /// Every body owned by the room geometry itself.
    fn geometry_bodies(&self) -> impl Iterator<Item = RigidBodyHandle> + '_ {
        self.body
            .into_iter()
            .chain(self.static_meshes.iter().filter_map(|m| m.body))
    }
}

/// How [`RoomGraph::locate`] found its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPath {
    /// The hint room contains the point.
    Hint,
    /// The hint's sector is a portal; its (flip-resolved) target was returned.
    Portal,
    /// A stacked sector above or below the hint.
    Vertical,
    /// One of the hint's near rooms.
    Near,
    /// Linear scan over every room.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    pub room: Option<RoomId>,
    pub path: LookupPath,
}

// ============================================================================
// ROOM GRAPH
// ============================================================================

#[derive(Debug, Default)]
pub struct RoomGraph {
    rooms: Vec<Room>,
}

impl RoomGraph {
    pub fn new(rooms: Vec<Room>) -> Self {
        Self { rooms }
    }

    #[inline]
    pub fn get(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(id.index())
    }

    #[inline]
    pub fn get_mut(&mut self, id: RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(id.index())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.iter()
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }

    #[inline]
    pub fn sector(&self, at: SectorRef) -> Option<&Sector> {
        self.get(at.room)?.sectors.get(at.index)
    }

    /// Adjacency oracle for collision filtering. Symmetric: either side's list counts.
    pub fn rooms_are_near(&self, a: RoomId, b: RoomId) -> bool {
        if a == b {
            return true;
        }
        let listed = |x: RoomId, y: RoomId| self.get(x).map_or(false, |r| r.near_rooms.contains(&y));
        listed(a, b) || listed(b, a)
    }

    /// The active member of a base/alternate pair.
    pub fn check_flip(&self, id: RoomId) -> RoomId {
        let Some(room) = self.get(id) else { return id };
        if room.active {
            return id;
        }
        let active = |other: Option<RoomId>| other.filter(|o| self.get(*o).map_or(false, |r| r.active));
        active(room.base_room)
            .or_else(|| active(room.alternate_room))
            .unwrap_or(id)
    }

    pub fn sector_at(&self, id: RoomId, p: &Point3<f32>) -> Option<&Sector> {
        self.get(id)?.sector_at(p)
    }

    #[inline]
    pub fn find_room_by_position(&self, p: &Point3<f32>, hint: Option<RoomId>) -> Option<RoomId> {
        self.locate(p, hint).room
    }

    /// Coherence lookup. Only scans every room when the hint and its neighbours fail.
    pub fn locate(&self, p: &Point3<f32>, hint: Option<RoomId>) -> Located {
        let Some(hint) = hint.map(|h| self.check_flip(h)).and_then(|h| self.get(h)) else {
            return self.locate_global(p);
        };

        if hint.active {
            if hint.bounds.contains(p) {
                let portal = hint.sector_at(p).and_then(|s| s.portal_to_room);
                return match portal {
                    Some(target) => Located { room: Some(self.check_flip(target)), path: LookupPath::Portal },
                    None => Located { room: Some(hint.id), path: LookupPath::Hint },
                };
            }
            if hint.bounds.contains_xy(p) {
                if let Some(room) = self.walk_stack(hint, p) {
                    return Located { room: Some(room), path: LookupPath::Vertical };
                }
            }
        }

        for near in &hint.near_rooms {
            let near = self.check_flip(*near);
            if let Some(room) = self.get(near) {
                if room.active && room.bounds.contains(p) {
                    return Located { room: Some(near), path: LookupPath::Near };
                }
            }
        }

        self.locate_global(p)
    }

    fn locate_global(&self, p: &Point3<f32>) -> Located {
        let room = self
            .rooms
            .iter()
            .find(|r| r.active && r.bounds.contains(p))
            .map(|r| r.id);
        Located { room, path: LookupPath::Global }
    }

    /// Follows `sector_above`/`sector_below` links from the hint toward `p`.
    fn walk_stack(&self, from: &Room, p: &Point3<f32>) -> Option<RoomId> {
        let up = p.z > from.bounds.max.z;
        let mut next = from.sector_at(p).and_then(|s| if up { s.sector_above } else { s.sector_below });
        let mut hops = 0;
        while let Some(at) = next {
            if hops > self.rooms.len() {
                break;
            }
            hops += 1;
            let room = self.get(self.check_flip(at.room))?;
            if room.active && room.bounds.contains(p) {
                return Some(room.id);
            }
            let sector = self.sector(at)?;
            next = if up { sector.sector_above } else { sector.sector_below };
        }
        None
    }

    // ------------------------------------------------------------------------
    // Enable / disable
    // ------------------------------------------------------------------------

    /// Returns the room's geometry to the collision pipeline.
    pub fn enable(&mut self, id: RoomId, physics: &mut PhysicsWorld) -> bool {
        let Some(room) = self.get_mut(id) else { return false };
        if room.active {
            return false;
        }
        room.active = true;
        for body in room.geometry_bodies() {
            physics.set_body_groups(body, groups::static_geometry());
        }
        log::debug!("room {} enabled", id.0);
        true
    }

    /// Excludes the room's geometry from every pair. Bodies stay in the world.
    pub fn disable(&mut self, id: RoomId, physics: &mut PhysicsWorld) -> bool {
        let Some(room) = self.get_mut(id) else { return false };
        if !room.active {
            return false;
        }
        room.active = false;
        for body in room.geometry_bodies() {
            physics.set_body_groups(body, groups::disabled());
        }
        log::debug!("room {} disabled", id.0);
        true
    }

    // ------------------------------------------------------------------------
    // Alternate swaps
    // ------------------------------------------------------------------------

    /// Replaces an active base room by its alternate. No-op unless the room has an
    /// alternate and is currently active.
    pub fn swap_to_alternate(
        &mut self,
        id: RoomId,
        physics: &mut PhysicsWorld,
        containers: &mut ContainerTable,
    ) -> bool {
        let Some(room) = self.get(id) else { return false };
        let Some(alt) = room.alternate_room else { return false };
        if !room.active || self.get(alt).is_none() {
            return false;
        }

        self.disable(id, physics);
        self.disable(alt, physics);
        let relinks = self.relink(id, alt);
        if let Some(alt_room) = self.get_mut(alt) {
            alt_room.relinks = relinks;
        }
        self.swap_containers(id, alt, containers);
        self.enable(alt, physics);

        log::debug!("room {} swapped to alternate {}", id.0, alt.0);
        true
    }

    /// Restores the base of an active alternate room, undoing exactly the relinks
    /// the forward swap made.
    pub fn swap_to_base(
        &mut self,
        id: RoomId,
        physics: &mut PhysicsWorld,
        containers: &mut ContainerTable,
    ) -> bool {
        let Some(room) = self.get(id) else { return false };
        let Some(base) = room.base_room else { return false };
        if !room.active || self.get(base).is_none() {
            return false;
        }

        self.disable(id, physics);
        self.disable(base, physics);
        let relinks = self.get_mut(id).map(|r| std::mem::take(&mut r.relinks)).unwrap_or_default();
        self.restore(id, base, relinks);
        self.swap_containers(id, base, containers);
        self.enable(base, physics);

        log::debug!("room {} swapped back to base {}", id.0, base.0);
        true
    }

    /// Points every portal and near link aimed at `from` to `to`, outside the pair.
    fn relink(&mut self, from: RoomId, to: RoomId) -> Relinks {
        let mut relinks = Relinks::default();
        for room in self.rooms.iter_mut() {
            if room.id == from || room.id == to {
                continue;
            }
            for (index, sector) in room.sectors.iter_mut().enumerate() {
                if sector.portal_to_room == Some(from) {
                    sector.portal_to_room = Some(to);
                    relinks.sectors.push(SectorRef { room: room.id, index });
                }
            }
            if room.near_rooms.contains(&from) && !room.near_rooms.contains(&to) {
                for near in room.near_rooms.iter_mut().filter(|n| **n == from) {
                    *near = to;
                }
                relinks.near.push(room.id);
            }
        }
        relinks
    }

    fn restore(&mut self, from: RoomId, to: RoomId, relinks: Relinks) {
        for at in relinks.sectors {
            if let Some(sector) = self.get_mut(at.room).and_then(|r| r.sectors.get_mut(at.index)) {
                if sector.portal_to_room == Some(from) {
                    sector.portal_to_room = Some(to);
                }
            }
        }
        for id in relinks.near {
            if let Some(room) = self.get_mut(id) {
                for near in room.near_rooms.iter_mut().filter(|n| **n == from) {
                    *near = to;
                }
            }
        }
    }

    fn swap_containers(&mut self, a: RoomId, b: RoomId, containers: &mut ContainerTable) {
        let (Some(ra), Some(rb)) = (self.get(a), self.get(b)) else { return };
        let (list_a, list_b) = (ra.containers.clone(), rb.containers.clone());
        for c in &list_a {
            containers.set_room(*c, Some(b));
        }
        for c in &list_b {
            containers.set_room(*c, Some(a));
        }
        if let Some(r) = self.get_mut(a) {
            r.containers = list_b;
        }
        if let Some(r) = self.get_mut(b) {
            r.containers = list_a;
        }
    }

    /// Moves a container between room object lists.
    pub fn move_container(&mut self, id: ContainerId, from: Option<RoomId>, to: Option<RoomId>) {
        if from == to {
            return;
        }
        if let Some(room) = from.and_then(|r| self.get_mut(r)) {
            room.containers.retain(|c| *c != id);
        }
        if let Some(room) = to.and_then(|r| self.get_mut(r)) {
            if !room.containers.contains(&id) {
                room.containers.push(id);
            }
        }
    }

    pub fn ids_in_group(&self, group: u8) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|r| r.alternate_group == group)
            .map(|r| r.id)
            .collect()
    }
}
