// src/level.rs
//! Level assembly.
//!
//! The loader describes rooms, models, entities and loose bodies; [`LevelBuilder`]
//! wires up the room graph (near lists, portals, alternate pairs, stacked sectors),
//! creates one body per physical thing with its container, and hands back a ready
//! [`World`].

use std::collections::HashMap;

use nalgebra::{Isometry3, Point3, Vector3};
use rapier3d::prelude::*;

use crate::config::{EngineConfig, SetupLibrary};
use crate::container::{ContainerId, ContainerTable, EngineContainer, ObjectKind};
use crate::context::OptionContext;
use crate::entity::{Bone, Entity, EntityId, ModelId, SkeletalModel};
use crate::error::Result;
use crate::flip::FlipState;
use crate::geometry::{Aabb, SECTOR_SIZE};
use crate::notify::NotificationSink;
use crate::physics::{groups, PhysicsWorld};
use crate::room::{Room, RoomGraph, RoomId, SectorRef, StaticMesh};
use crate::world::World;

/// Thickness of the slab collider under each floor sector.
pub const FLOOR_THICKNESS: f32 = 32.0;

/// Largest gap between a room's ceiling and another's floor still treated as stacked.
pub const STACK_TOLERANCE: f32 = 1.0;

/* -------------------------------------------------------------------------- */
/*                               Descriptions                                  */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, PartialEq)]
pub struct SectorDesc {
    pub floor: f32,
    pub ceiling: f32,
    pub material: u16,
    pub flags: u32,
    pub trig_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticMeshDesc {
    pub object_id: u32,
    pub position: [f32; 3],
    pub half_extents: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoomDesc {
    pub min: [f32; 3],
    pub max: [f32; 3],
    pub flags: u32,
    /// Grid cells in `x * sectors_y + y` order. Empty means open floor everywhere.
    pub sectors: Vec<SectorDesc>,
    pub static_meshes: Vec<StaticMeshDesc>,
}

impl RoomDesc {
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max, ..Default::default() }
    }

    /// Grid size, one cell per started sector.
    pub fn grid(&self) -> (u16, u16) {
        let cells = |lo: f32, hi: f32| ((hi - lo) / SECTOR_SIZE).ceil().max(1.0) as u16;
        (cells(self.min[0], self.max[0]), cells(self.min[1], self.max[1]))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoneDesc {
    pub local: Isometry3<f32>,
    pub parent: Option<usize>,
    pub half_extents: [f32; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityDesc {
    pub model: ModelId,
    pub transform: Isometry3<f32>,
    /// Starting room; looked up from the position when absent.
    pub room: Option<RoomId>,
    pub bones: Vec<BoneDesc>,
    pub is_character: bool,
}

/// A loose dynamic body with no owner.
#[derive(Debug, Clone, PartialEq)]
pub struct MiscBodyDesc {
    pub position: [f32; 3],
    pub half_extents: [f32; 3],
    pub mass: f32,
}

/* -------------------------------------------------------------------------- */
/*                                 Builder                                     */
/* -------------------------------------------------------------------------- */

pub struct LevelBuilder {
    config: EngineConfig,
    physics: PhysicsWorld,
    containers: ContainerTable,
    rooms: Vec<RoomDesc>,
    links: Vec<(RoomId, RoomId)>,
    portals: Vec<(RoomId, usize, RoomId)>,
    alternates: Vec<(RoomId, RoomId, u8)>,
    models: HashMap<ModelId, SkeletalModel>,
    entities: Vec<Entity>,
    misc: Vec<(RigidBodyHandle, ContainerId)>,
    character: Option<EntityId>,
    setups: SetupLibrary,
}

impl LevelBuilder {
    pub fn new(config: EngineConfig) -> Self {
        let physics = PhysicsWorld::new(Vector3::from(config.gravity), config.max_solver_iterations);
        Self {
            config,
            physics,
            containers: ContainerTable::new(),
            rooms: Vec::new(),
            links: Vec::new(),
            portals: Vec::new(),
            alternates: Vec::new(),
            models: HashMap::new(),
            entities: Vec::new(),
            misc: Vec::new(),
            character: None,
            setups: SetupLibrary::default(),
        }
    }

    pub fn add_room(&mut self, desc: RoomDesc) -> RoomId {
        self.rooms.push(desc);
        RoomId(self.rooms.len() as u32 - 1)
    }

    /// Marks two rooms as near each other. Recorded on both sides.
    pub fn link(&mut self, a: RoomId, b: RoomId) {
        self.links.push((a, b));
    }

    /// Makes one sector of `room` a portal into `target`.
    pub fn portal(&mut self, room: RoomId, sector: usize, target: RoomId) {
        self.portals.push((room, sector, target));
    }

    /// Pairs `base` with `alternate` in a flip group. The alternate starts inactive.
    pub fn alternate(&mut self, base: RoomId, alternate: RoomId, group: u8) {
        self.alternates.push((base, alternate, group));
    }

    pub fn add_model(&mut self, model: SkeletalModel) {
        self.models.insert(model.id, model);
    }

    pub fn set_setups(&mut self, setups: SetupLibrary) {
        self.setups = setups;
    }

    /// The player character. Only characters can wear hair.
    pub fn set_character(&mut self, id: EntityId) {
        if let Some(entity) = self.entities.get_mut(id.0 as usize) {
            entity.is_character = true;
            self.character = Some(id);
        }
    }

    /// Creates the entity with one kinematic body per bone.
    pub fn add_entity(&mut self, desc: EntityDesc) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        let container = self.containers.insert(EngineContainer { kind: ObjectKind::Entity(id), room: desc.room });

        let bones = desc
            .bones
            .iter()
            .map(|bone| {
                let [hx, hy, hz] = bone.half_extents;
                let body = RigidBodyBuilder::kinematic_position_based()
                    .position(desc.transform * bone.local)
                    .build();
                let collider = ColliderBuilder::cuboid(hx, hy, hz)
                    .collision_groups(groups::kinematic())
                    .active_hooks(ActiveHooks::FILTER_CONTACT_PAIRS)
                    .build();
                let handle = self.physics.insert_body(body, [collider]);
                self.containers.bind(handle, container);
                Bone { local: bone.local, parent: bone.parent, body: Some(handle) }
            })
            .collect();

        let mut entity = Entity::new(id, desc.model, desc.transform, bones, container);
        entity.is_character = desc.is_character;
        entity.room = desc.room;
        self.entities.push(entity);
        id
    }

    /// Creates a free dynamic box. Its room is found from the position at build time.
    pub fn add_misc_body(&mut self, desc: MiscBodyDesc) -> RigidBodyHandle {
        let [hx, hy, hz] = desc.half_extents;
        let volume = 8.0 * hx * hy * hz;
        let body = RigidBodyBuilder::dynamic()
            .translation(Vector3::from(desc.position))
            .build();
        let collider = ColliderBuilder::cuboid(hx, hy, hz)
            .density(if volume > 0.0 { desc.mass / volume } else { 1.0 })
            .collision_groups(groups::dynamic())
            .active_hooks(ActiveHooks::FILTER_CONTACT_PAIRS)
            .build();
        let handle = self.physics.insert_body(body, [collider]);
        let container = self.containers.insert(EngineContainer { kind: ObjectKind::PhysicsMisc, room: None });
        self.containers.bind(handle, container);
        self.misc.push((handle, container));
        handle
    }

    fn validate(&self) -> Result<()> {
        self.config.validate()?;
        let count = self.rooms.len() as u32;
        let known = |id: RoomId| id.0 < count;

        for (i, room) in self.rooms.iter().enumerate() {
            crate::ensure!(
                (0..3).all(|k| room.min[k] < room.max[k]),
                "room {} has empty bounds",
                i
            );
            let (sx, sy) = room.grid();
            crate::ensure!(
                room.sectors.is_empty() || room.sectors.len() == sx as usize * sy as usize,
                "room {} has {} sectors, grid is {} x {}",
                i,
                room.sectors.len(),
                sx,
                sy
            );
        }
        for &(a, b) in &self.links {
            crate::ensure!(known(a) && known(b), "near link {} <-> {} names a missing room", a.0, b.0);
        }
        for &(room, sector, target) in &self.portals {
            crate::ensure!(known(target), "portal {} -> {} names a missing room", room.0, target.0);
            let (sx, sy) = self
                .rooms
                .get(room.index())
                .context(format!("portal source room {} does not exist", room.0))?
                .grid();
            crate::ensure!(
                sector < sx as usize * sy as usize,
                "portal sector {} out of range in room {}",
                sector,
                room.0
            );
        }
        let mut paired = Vec::new();
        for &(base, alt, _) in &self.alternates {
            crate::ensure!(known(base) && known(alt), "alternate {} / {} names a missing room", base.0, alt.0);
            crate::ensure!(base != alt, "room {} can not be its own alternate", base.0);
            crate::ensure!(
                !paired.contains(&base) && !paired.contains(&alt),
                "room {} or {} is already paired",
                base.0,
                alt.0
            );
            paired.extend([base, alt]);
        }
        for entity in &self.entities {
            if let Some(room) = entity.room {
                crate::ensure!(known(room), "entity {} starts in missing room {}", entity.id.0, room.0);
            }
        }
        Ok(())
    }

    fn room(id: RoomId, desc: &RoomDesc) -> Room {
        let (sx, sy) = desc.grid();
        let bounds = Aabb::new(Point3::from(desc.min), Point3::from(desc.max));
        let mut room = Room::new(id, bounds, sx, sy);
        room.flags = desc.flags;
        room.fill_sectors();
        for (sector, given) in room.sectors.iter_mut().zip(&desc.sectors) {
            sector.floor = given.floor;
            sector.ceiling = given.ceiling;
            sector.material = given.material;
            sector.flags = given.flags;
            sector.trig_index = given.trig_index;
        }
        room
    }

    /// Links each sector to the sector straight above it in a room stacked on top.
    fn link_stacks(rooms: &mut [Room]) {
        let mut links = Vec::new();
        for lower in rooms.iter().filter(|r| r.base_room.is_none()) {
            for upper in rooms.iter().filter(|r| r.base_room.is_none() && r.id != lower.id) {
                if (upper.bounds.min.z - lower.bounds.max.z).abs() > STACK_TOLERANCE {
                    continue;
                }
                for index in 0..lower.sectors.len() {
                    let Some(center) = lower.sector_center(index) else { continue };
                    if !upper.bounds.contains_xy(&center) {
                        continue;
                    }
                    if let Some(above) = upper.sector_index(&center) {
                        links.push((SectorRef { room: lower.id, index }, SectorRef { room: upper.id, index: above }));
                    }
                }
            }
        }
        for (below, above) in links {
            let lower = &mut rooms[below.room.index()].sectors[below.index];
            if lower.sector_above.is_none() {
                lower.sector_above = Some(above);
            }
            let upper = &mut rooms[above.room.index()].sectors[above.index];
            if upper.sector_below.is_none() {
                upper.sector_below = Some(below);
            }
        }
    }

    /// Fixed body for the room: one floor slab per sector that is not open to a room below.
    fn room_geometry(room: &mut Room, physics: &mut PhysicsWorld, containers: &mut ContainerTable) {
        let room_groups = if room.active { groups::static_geometry() } else { groups::disabled() };
        let half = SECTOR_SIZE * 0.5;
        let slabs: Vec<Collider> = (0..room.sectors.len())
            .filter(|i| room.sectors[*i].sector_below.is_none())
            .filter_map(|i| room.sector_center(i))
            .map(|c| {
                ColliderBuilder::cuboid(half, half, FLOOR_THICKNESS * 0.5)
                    .translation(vector![c.x, c.y, c.z - FLOOR_THICKNESS * 0.5])
                    .collision_groups(room_groups)
                    .active_hooks(ActiveHooks::FILTER_CONTACT_PAIRS)
                    .build()
            })
            .collect();

        let handle = physics.insert_body(RigidBodyBuilder::fixed().build(), slabs);
        let container = containers.insert(EngineContainer { kind: ObjectKind::RoomGeometry(room.id), room: Some(room.id) });
        containers.bind(handle, container);
        room.body = Some(handle);
    }

    fn static_mesh(
        room: &mut Room,
        desc: &StaticMeshDesc,
        physics: &mut PhysicsWorld,
        containers: &mut ContainerTable,
    ) {
        let [hx, hy, hz] = desc.half_extents;
        let mesh_groups = if room.active { groups::static_geometry() } else { groups::disabled() };
        let body = RigidBodyBuilder::fixed().translation(Vector3::from(desc.position)).build();
        let collider = ColliderBuilder::cuboid(hx, hy, hz)
            .collision_groups(mesh_groups)
            .active_hooks(ActiveHooks::FILTER_CONTACT_PAIRS)
            .build();
        let handle = physics.insert_body(body, [collider]);
        let index = room.static_meshes.len();
        let container = containers.insert(EngineContainer {
            kind: ObjectKind::StaticMesh { room: room.id, index },
            room: Some(room.id),
        });
        containers.bind(handle, container);
        room.static_meshes.push(StaticMesh {
            object_id: desc.object_id,
            position: Point3::from(desc.position),
            body: Some(handle),
        });
    }

    pub fn build(mut self, sink: Box<dyn NotificationSink>) -> Result<World> {
        self.validate()?;

        let mut rooms: Vec<Room> = self
            .rooms
            .iter()
            .enumerate()
            .map(|(i, desc)| Self::room(RoomId(i as u32), desc))
            .collect();

        for &(a, b) in &self.links {
            if a == b {
                continue;
            }
            for (from, to) in [(a, b), (b, a)] {
                let near = &mut rooms[from.index()].near_rooms;
                if !near.contains(&to) {
                    near.push(to);
                }
            }
        }
        for &(room, sector, target) in &self.portals {
            rooms[room.index()].sectors[sector].portal_to_room = Some(target);
        }
        let mut groups_used = 1;
        for &(base, alt, group) in &self.alternates {
            rooms[base.index()].alternate_room = Some(alt);
            rooms[base.index()].alternate_group = group;
            let alt_room = &mut rooms[alt.index()];
            alt_room.base_room = Some(base);
            alt_room.alternate_group = group;
            alt_room.active = false;
            groups_used = groups_used.max(group as usize + 1);
        }
        Self::link_stacks(&mut rooms);

        for (room, desc) in rooms.iter_mut().zip(&self.rooms) {
            Self::room_geometry(room, &mut self.physics, &mut self.containers);
            for mesh in &desc.static_meshes {
                Self::static_mesh(room, mesh, &mut self.physics, &mut self.containers);
            }
        }

        let mut graph = RoomGraph::new(rooms);

        for &(handle, container) in &self.misc {
            let Some(position) = self.physics.body_position(handle) else { continue };
            let room = graph.find_room_by_position(&Point3::from(position.translation.vector), None);
            self.containers.set_room(container, room);
            graph.move_container(container, None, room);
        }

        for entity in self.entities.iter_mut() {
            let room = entity.room.or_else(|| graph.find_room_by_position(&entity.position(), None));
            entity.room = room;
            self.containers.set_room(entity.container, room);
            graph.move_container(entity.container, None, room);
        }

        log::info!(
            "level built: {} rooms, {} entities, {} bodies, {} flip groups",
            graph.len(),
            self.entities.len(),
            self.physics.body_count(),
            groups_used
        );

        let mut world = World::new(self.config);
        world.flips = FlipState::new(groups_used, world.config.version);
        world.physics = self.physics;
        world.rooms = graph;
        world.containers = self.containers;
        world.models = self.models;
        world.character = self.character;
        world.setups = self.setups;
        world.set_sink(sink);

        let ids: Vec<u32> = self.entities.iter().map(|e| e.id.0).collect();
        world.entities = self.entities;
        for id in ids {
            world.update_entity_room_pos(id);
        }
        Ok(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingSink;

    fn build(level: LevelBuilder) -> World {
        level.build(Box::new(RecordingSink::new())).unwrap()
    }

    #[test]
    fn grid_covers_started_sectors() {
        assert_eq!(RoomDesc::new([0.0; 3], [2048.0, 1024.0, 512.0]).grid(), (2, 1));
        assert_eq!(RoomDesc::new([0.0; 3], [2100.0, 10.0, 512.0]).grid(), (3, 1));
    }

    #[test]
    fn near_links_are_recorded_both_ways() {
        let mut level = LevelBuilder::new(EngineConfig::default());
        let a = level.add_room(RoomDesc::new([0.0; 3], [1024.0; 3]));
        let b = level.add_room(RoomDesc::new([1024.0, 0.0, 0.0], [2048.0, 1024.0, 1024.0]));
        level.link(a, b);
        level.link(b, a);
        let world = build(level);
        assert_eq!(world.rooms().get(a).unwrap().near_rooms, vec![b]);
        assert_eq!(world.rooms().get(b).unwrap().near_rooms, vec![a]);
    }

    #[test]
    fn alternates_start_inactive_and_disabled() {
        let mut level = LevelBuilder::new(EngineConfig::default());
        let base = level.add_room(RoomDesc::new([0.0; 3], [1024.0; 3]));
        let alt = level.add_room(RoomDesc::new([0.0; 3], [1024.0; 3]));
        level.alternate(base, alt, 3);
        let world = build(level);

        let alt_room = world.rooms().get(alt).unwrap();
        assert!(!alt_room.active);
        assert_eq!(alt_room.base_room, Some(base));
        assert_eq!(world.rooms().get(base).unwrap().alternate_room, Some(alt));
        assert_eq!(world.physics().body_groups(alt_room.body.unwrap()), Some(groups::disabled()));
        assert_eq!(world.flips().count(), 4);
        assert_eq!(world.find_room(&Point3::new(500.0, 500.0, 500.0), None), Some(base));
    }

    #[test]
    fn stacked_rooms_link_sectors_and_open_the_floor() {
        let mut level = LevelBuilder::new(EngineConfig::default());
        let lower = level.add_room(RoomDesc::new([0.0, 0.0, 0.0], [2048.0, 1024.0, 1024.0]));
        let upper = level.add_room(RoomDesc::new([1024.0, 0.0, 1024.0], [2048.0, 1024.0, 2048.0]));
        let world = build(level);

        let low = world.rooms().get(lower).unwrap();
        assert_eq!(low.sectors[0].sector_above, None);
        assert_eq!(low.sectors[1].sector_above, Some(SectorRef { room: upper, index: 0 }));
        let up = world.rooms().get(upper).unwrap();
        assert_eq!(up.sectors[0].sector_below, Some(SectorRef { room: lower, index: 1 }));

        let floor = world.physics().bodies[up.body.unwrap()].colliders().len();
        assert_eq!(floor, 0);
        assert_eq!(world.physics().bodies[low.body.unwrap()].colliders().len(), 2);
    }

    #[test]
    fn bodies_get_containers_and_rooms() {
        let mut level = LevelBuilder::new(EngineConfig::default());
        let mut desc = RoomDesc::new([0.0; 3], [1024.0; 3]);
        desc.static_meshes.push(StaticMeshDesc { object_id: 7, position: [100.0, 100.0, 50.0], half_extents: [50.0; 3] });
        let room = level.add_room(desc);
        let ball = level.add_misc_body(MiscBodyDesc { position: [500.0, 500.0, 500.0], half_extents: [10.0; 3], mass: 1.0 });
        let lost = level.add_misc_body(MiscBodyDesc { position: [5000.0, 0.0, 0.0], half_extents: [10.0; 3], mass: 1.0 });
        let e = level.add_entity(EntityDesc {
            model: ModelId(0),
            transform: Isometry3::translation(300.0, 300.0, 200.0),
            room: None,
            bones: vec![BoneDesc { local: Isometry3::identity(), parent: None, half_extents: [20.0; 3] }],
            is_character: false,
        });
        let world = build(level);

        assert_eq!(world.room_of_body(ball), Some(room));
        assert_eq!(world.room_of_body(lost), None);
        let entity = world.entity(e).unwrap();
        assert_eq!(entity.room, Some(room));
        assert_eq!(entity.current_sector, Some(SectorRef { room, index: 0 }));

        let r = world.rooms().get(room).unwrap();
        assert_eq!(r.containers.len(), 2);
        let mesh = r.static_meshes[0].body.unwrap();
        assert_eq!(
            world.containers().lookup(mesh).map(|(_, c)| c.kind),
            Some(ObjectKind::StaticMesh { room, index: 0 })
        );
        assert_eq!(world.physics().body_count(), 5);
    }

    #[test]
    fn rejects_broken_references() {
        let mut level = LevelBuilder::new(EngineConfig::default());
        let a = level.add_room(RoomDesc::new([0.0; 3], [1024.0; 3]));
        level.portal(a, 4, a);
        assert!(level.build(Box::new(RecordingSink::new())).is_err());

        let mut level = LevelBuilder::new(EngineConfig::default());
        let a = level.add_room(RoomDesc::new([0.0; 3], [1024.0; 3]));
        level.link(a, RoomId(9));
        assert!(level.build(Box::new(RecordingSink::new())).is_err());

        let mut level = LevelBuilder::new(EngineConfig::default());
        let a = level.add_room(RoomDesc::new([0.0; 3], [1024.0; 3]));
        let b = level.add_room(RoomDesc::new([0.0; 3], [1024.0; 3]));
        let c = level.add_room(RoomDesc::new([0.0; 3], [1024.0; 3]));
        level.alternate(a, b, 1);
        level.alternate(a, c, 1);
        assert!(level.build(Box::new(RecordingSink::new())).is_err());
    }
}
