// src/world.rs
//! The engine context: one physics world, the room graph, the container table and
//! the entity arena, owned together and stepped together.
//!
//! Nothing here is global. Script-facing operations live on [`World`]; bad ids are
//! reported to the notification sink and answered with `None`/`false`.

use std::collections::HashMap;
use std::fmt::Write as _;

use nalgebra::{Isometry3, Point3, Vector3};
use rapier3d::prelude::RigidBodyHandle;

use crate::config::{EngineConfig, HairSetup, RagdollSetup, SetupLibrary};
use crate::container::ContainerTable;
use crate::entity::{Entity, EntityId, ModelId, SkeletalModel};
use crate::error::Result;
use crate::filter::RoomNearFilter;
use crate::flip::{FlipOp, FlipState};
use crate::hair::Hair;
use crate::notify::{LogSink, NotificationSink, Warning};
use crate::physics::PhysicsWorld;
use crate::ragdoll;
use crate::room::{Room, RoomGraph, RoomId, SectorRef};
use crate::time::StepClock;

/// What the current sector of an entity looks like.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectorInfo {
    pub at: SectorRef,
    pub flags: u32,
    pub trig_index: Option<u32>,
    pub material: u16,
    /// The entity entered this sector on its last room update.
    pub changed: bool,
}

pub struct World {
    pub(crate) config: EngineConfig,
    pub(crate) physics: PhysicsWorld,
    pub(crate) rooms: RoomGraph,
    pub(crate) containers: ContainerTable,
    pub(crate) entities: Vec<Entity>,
    pub(crate) models: HashMap<ModelId, SkeletalModel>,
    pub(crate) flips: FlipState,
    pub(crate) setups: SetupLibrary,
    pub(crate) character: Option<EntityId>,
    clock: StepClock,
    sink: Box<dyn NotificationSink>,
}

impl World {
    /// An empty world. Levels are populated through [`crate::level::LevelBuilder`].
    pub fn new(config: EngineConfig) -> Self {
        let gravity = Vector3::from(config.gravity);
        Self {
            physics: PhysicsWorld::new(gravity, config.max_solver_iterations),
            rooms: RoomGraph::default(),
            containers: ContainerTable::new(),
            entities: Vec::new(),
            models: HashMap::new(),
            flips: FlipState::new(1, config.version),
            setups: SetupLibrary::default(),
            character: None,
            clock: StepClock::new(config.fixed_dt, config.max_substeps),
            sink: Box::new(LogSink),
            config,
        }
    }

    pub fn set_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sink = sink;
    }

    pub fn set_setups(&mut self, setups: SetupLibrary) {
        self.setups = setups;
    }

    #[inline]
    pub(crate) fn notify(&self, warning: Warning) {
        self.sink.warn(warning);
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    #[inline] pub fn config(&self) -> &EngineConfig { &self.config }
    #[inline] pub fn physics(&self) -> &PhysicsWorld { &self.physics }
    #[inline] pub fn physics_mut(&mut self) -> &mut PhysicsWorld { &mut self.physics }
    #[inline] pub fn rooms(&self) -> &RoomGraph { &self.rooms }
    #[inline] pub fn containers(&self) -> &ContainerTable { &self.containers }
    #[inline] pub fn flips(&self) -> &FlipState { &self.flips }
    #[inline] pub fn character(&self) -> Option<EntityId> { self.character }
    #[inline] pub fn entity_count(&self) -> usize { self.entities.len() }

    #[inline]
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.0 as usize)
    }

    #[inline]
    pub fn model(&self, id: ModelId) -> Option<&SkeletalModel> {
        self.models.get(&id)
    }

    /// Room by id, warning on a bad id.
    pub fn room(&self, id: u32) -> Option<&Room> {
        let room = self.rooms.get(RoomId(id));
        if room.is_none() {
            self.notify(Warning::WrongRoom(id));
        }
        room
    }

    /// Last resolved room of the container bound to `body`.
    #[inline]
    pub fn room_of_body(&self, body: RigidBodyHandle) -> Option<RoomId> {
        self.containers.room_of_body(body)
    }

    // ------------------------------------------------------------------------
    // Simulation
    // ------------------------------------------------------------------------

    /// Runs one fixed step, then re-resolves the rooms of moving bodies.
    pub fn step(&mut self) {
        let dt = self.clock.fixed_dt();
        self.step_with(dt);
    }

    /// Advances by one rendered frame; returns how many physics steps ran.
    pub fn update(&mut self, frame_dt: f32) -> usize {
        let steps = self.clock.advance(frame_dt).count();
        let dt = self.clock.fixed_dt();
        for _ in 0..steps {
            self.step_with(dt);
        }
        steps
    }

    fn step_with(&mut self, dt: f32) {
        let _span = tracing::debug_span!("physics_step", dt).entered();
        {
            let filter = RoomNearFilter::new(&self.rooms, &self.containers);
            self.physics.step(dt, &filter);
        }
        self.resolve_rooms();
    }

    /// Tick-end pass: physics-misc bodies and ragdolled entities get their room
    /// looked up again, seeded with the room they had after the last step.
    fn resolve_rooms(&mut self) {
        let _span = tracing::trace_span!("room_resolve").entered();

        for (handle, id) in self.containers.misc_bodies() {
            let Some(body) = self.physics.bodies.get(handle) else { continue };
            if body.is_fixed() {
                continue;
            }
            let point = Point3::from(*body.translation());
            let hint = self.containers.get(id).and_then(|c| c.room);
            let room = self.rooms.find_room_by_position(&point, hint);
            if room != hint {
                log::trace!("misc body {:?}: room {:?} -> {:?}", handle, hint, room);
                self.rooms.move_container(id, hint, room);
                self.containers.set_room(id, room);
            }
        }

        for index in 0..self.entities.len() {
            let entity = &self.entities[index];
            if !entity.is_ragdolled() {
                continue;
            }
            let Some(root) = entity.bone_body(0).and_then(|b| self.physics.body_position(b)) else { continue };
            let point = Point3::from(root.translation.vector);
            let room = self.rooms.find_room_by_position(&point, entity.room);
            self.relocate_entity(index, room);
        }
    }

    /// Moves the entity's container between room lists; its hairs always follow.
    fn relocate_entity(&mut self, index: usize, room: Option<RoomId>) {
        let Some(entity) = self.entities.get_mut(index) else { return };
        if entity.room != room {
            let old = entity.room;
            entity.room = room;
            self.rooms.move_container(entity.container, old, room);
            self.containers.set_room(entity.container, room);
        }
        sync_hair_rooms(entity, &mut self.containers);
    }

    // ------------------------------------------------------------------------
    // Gravity
    // ------------------------------------------------------------------------

    #[inline]
    pub fn gravity(&self) -> Vector3<f32> {
        self.physics.gravity()
    }

    pub fn set_gravity(&mut self, gravity: Vector3<f32>) {
        self.physics.set_gravity(gravity);
        log::info!("gravity = ({:.3}, {:.3}, {:.3})", gravity.x, gravity.y, gravity.z);
    }

    // ------------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------------

    pub fn set_room_enabled(&mut self, id: u32, enabled: bool) -> bool {
        if self.rooms.get(RoomId(id)).is_none() {
            self.notify(Warning::WrongRoom(id));
            return false;
        }
        if enabled {
            self.rooms.enable(RoomId(id), &mut self.physics)
        } else {
            self.rooms.disable(RoomId(id), &mut self.physics)
        }
    }

    #[inline]
    pub fn find_room(&self, point: &Point3<f32>, hint: Option<RoomId>) -> Option<RoomId> {
        self.rooms.find_room_by_position(point, hint)
    }

    /// Human-readable dump of one room, also written to the debug log.
    pub fn dump_room(&self, id: u32) -> Option<String> {
        let room = self.room(id)?;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "ROOM = {}, ({} x {}), bottom = {}, top = {}, active = {}, flags = {:#06x}",
            room.id.0, room.sectors_x, room.sectors_y, room.bounds.min.z, room.bounds.max.z, room.active, room.flags
        );
        let _ = writeln!(
            out,
            "alternate_room = {:?}, base_room = {:?}, alternate_group = {}",
            room.alternate_room.map(|r| r.0),
            room.base_room.map(|r| r.0),
            room.alternate_group
        );
        let near: Vec<u32> = room.near_rooms.iter().map(|r| r.0).collect();
        let _ = writeln!(out, "near = {:?}", near);
        for (i, s) in room.sectors.iter().enumerate() {
            let _ = writeln!(
                out,
                "sector[{}] ({}, {}): floor = {}, ceiling = {}, flags = {:#x}, material = {}, trig = {:?}, portal = {:?}",
                i, s.index_x, s.index_y, s.floor, s.ceiling, s.flags, s.material, s.trig_index,
                s.portal_to_room.map(|r| r.0)
            );
        }
        for mesh in &room.static_meshes {
            let _ = writeln!(out, "static mesh = {} at {:?}", mesh.object_id, mesh.position.coords.as_slice());
        }
        for c in &room.containers {
            if let Some(container) = self.containers.get(*c) {
                let _ = writeln!(out, "object = {:?}", container.kind);
            }
        }
        log::debug!("{}", out);
        Some(out)
    }

    // ------------------------------------------------------------------------
    // Flips
    // ------------------------------------------------------------------------

    pub fn flip_map(&self, group: u32) -> Option<u8> {
        self.flips.map(group).map_err(|_| self.notify(Warning::WrongFlipIndex(group))).ok()
    }

    pub fn flip_state(&self, group: u32) -> Option<bool> {
        self.flips.state(group).map_err(|_| self.notify(Warning::WrongFlipIndex(group))).ok()
    }

    pub fn set_flip_map(&mut self, group: u32, mask: u8, op: FlipOp) -> Option<u8> {
        match self.flips.set_map(group, mask, op) {
            Ok(map) => Some(map),
            Err(_) => {
                self.notify(Warning::WrongFlipIndex(group));
                None
            }
        }
    }

    /// Any nonzero `state` means flipped.
    pub fn set_flip_state(&mut self, group: u32, state: u32) -> Option<usize> {
        let result = self.flips.set_state(
            group,
            state != 0,
            &mut self.rooms,
            &mut self.physics,
            &mut self.containers,
        );
        match result {
            Ok(swapped) => {
                if swapped > 0 {
                    self.sync_entity_rooms();
                }
                Some(swapped)
            }
            Err(_) => {
                self.notify(Warning::WrongFlipIndex(group));
                None
            }
        }
    }

    /// Room swaps move whole container lists; entity room references follow them.
    fn sync_entity_rooms(&mut self) {
        for entity in self.entities.iter_mut() {
            if let Some(container) = self.containers.get(entity.container) {
                entity.room = container.room;
            }
            sync_hair_rooms(entity, &mut self.containers);
        }
    }

    // ------------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------------

    fn entity_index(&self, id: u32) -> Option<usize> {
        let index = id as usize;
        (index < self.entities.len()).then_some(index)
    }

    fn character_index(&self, id: u32) -> Option<usize> {
        let index = self.entity_index(id).filter(|i| self.entities[*i].is_character);
        if index.is_none() {
            self.notify(Warning::NoCharacter(id));
        }
        index
    }

    fn existing_entity(&self, id: u32) -> Option<usize> {
        let index = self.entity_index(id);
        if index.is_none() {
            self.notify(Warning::NoEntity(id));
        }
        index
    }

    /// New entity transform and bone poses; animated bone bodies follow on the next step.
    pub fn set_entity_pose(&mut self, id: u32, transform: Isometry3<f32>, bones: &[Isometry3<f32>]) -> bool {
        let Some(index) = self.existing_entity(id) else { return false };
        let entity = &mut self.entities[index];
        entity.transform = transform;
        for (bone, local) in entity.bones.iter_mut().zip(bones) {
            bone.local = *local;
        }
        if entity.is_ragdolled() {
            return true;
        }
        for bone in &entity.bones {
            let Some(body) = bone.body.and_then(|h| self.physics.bodies.get_mut(h)) else { continue };
            if body.is_kinematic() {
                body.set_next_kinematic_position(transform * bone.local);
            }
        }
        true
    }

    /// Resolves the entity's room and sector by coherence and tracks sector changes.
    pub fn update_entity_room_pos(&mut self, id: u32) -> Option<RoomId> {
        let index = self.existing_entity(id)?;
        let entity = &self.entities[index];
        let point = entity.position();
        let room = self.rooms.find_room_by_position(&point, entity.room)?;
        let sector = self
            .rooms
            .get(room)
            .and_then(|r| r.sector_index(&point))
            .map(|index| SectorRef { room, index });
        let room = sector
            .and_then(|s| self.rooms.sector(s))
            .map_or(room, |s| s.owner_room);

        self.relocate_entity(index, Some(room));
        let entity = &mut self.entities[index];
        entity.last_sector = entity.current_sector;
        entity.current_sector = sector;
        Some(room)
    }

    /// Scripted room move. The player character only has its room reference updated.
    pub fn set_entity_room_move(
        &mut self,
        id: u32,
        room: Option<u32>,
        move_type: Option<u16>,
        dir_flag: Option<u16>,
    ) -> bool {
        let Some(index) = self.existing_entity(id) else { return false };

        if let Some(room) = room {
            if self.rooms.get(RoomId(room)).is_none() {
                self.notify(Warning::WrongRoom(room));
            } else {
                let target = Some(RoomId(room));
                let is_player = self.character == Some(self.entities[index].id);
                let entity = &mut self.entities[index];
                if is_player {
                    entity.room = target;
                    self.containers.set_room(entity.container, target);
                } else if entity.room != target {
                    self.rooms.move_container(entity.container, entity.room, target);
                    self.containers.set_room(entity.container, target);
                    entity.room = target;
                }
            }
        }

        self.update_entity_room_pos(id);

        let entity = &mut self.entities[index];
        if let Some(move_type) = move_type {
            entity.move_type = move_type;
        }
        if let Some(dir_flag) = dir_flag {
            entity.dir_flag = dir_flag;
        }
        true
    }

    pub fn entity_sector_info(&self, id: u32) -> Option<SectorInfo> {
        let entity = self.entity(EntityId(id))?;
        let at = entity.current_sector?;
        let sector = self.rooms.sector(at)?;
        Some(SectorInfo {
            at,
            flags: sector.flags,
            trig_index: sector.trig_index,
            material: sector.material,
            changed: entity.current_sector != entity.last_sector,
        })
    }

    // ------------------------------------------------------------------------
    // Hair
    // ------------------------------------------------------------------------

    pub fn add_hair(&mut self, entity_id: u32, setup_index: u32) -> bool {
        let Some(index) = self.character_index(entity_id) else { return false };
        let Some(setup) = self.setups.hair(setup_index).cloned() else {
            self.notify(Warning::NoHairSetup(setup_index));
            return false;
        };
        if !self.models.contains_key(&ModelId(setup.model)) {
            self.notify(Warning::NoModel(setup.model));
            return false;
        }

        match self.attach_hair(index, &setup) {
            Ok(()) => true,
            Err(err) => {
                self.notify(Warning::CantCreateHair { entity: entity_id, reason: err.to_string() });
                false
            }
        }
    }

    fn attach_hair(&mut self, index: usize, setup: &HairSetup) -> Result<()> {
        let entity = &self.entities[index];
        let mut hair = Hair::new();
        hair.create(
            setup,
            entity,
            self.models.get(&ModelId(setup.model)),
            entity.hairs.len(),
            &mut self.physics,
            &mut self.containers,
        )?;
        self.entities[index].hairs.push(hair);
        Ok(())
    }

    /// Destroys every hair of the character.
    pub fn reset_hair(&mut self, entity_id: u32) -> bool {
        let Some(index) = self.character_index(entity_id) else { return false };
        if self.entities[index].hairs.is_empty() {
            self.notify(Warning::CantResetHair(entity_id));
            return false;
        }
        let mut hairs = std::mem::take(&mut self.entities[index].hairs);
        for hair in hairs.iter_mut() {
            hair.destroy(&mut self.physics, &mut self.containers);
        }
        true
    }

    pub fn hair_render_matrices(&self, entity_id: u32, hair: usize) -> Option<Vec<Isometry3<f32>>> {
        let entity = self.entity(EntityId(entity_id))?;
        let hair = entity.hairs.get(hair)?;
        let bone = entity.bone_world(hair.owner_body())?;
        Some(hair.render_matrices(&self.physics, &bone))
    }

    // ------------------------------------------------------------------------
    // Ragdolls
    // ------------------------------------------------------------------------

    pub fn add_ragdoll(&mut self, entity_id: u32, setup_index: u32) -> bool {
        let Some(index) = self.existing_entity(entity_id) else { return false };
        let Some(setup) = self.setups.ragdoll(setup_index).cloned() else {
            self.notify(Warning::NoRagdollSetup(setup_index));
            return false;
        };

        if let Some(previous) = self.entities[index].ragdoll.take() {
            ragdoll::delete(previous, &self.entities[index], &mut self.physics, &mut self.containers);
        }

        match self.attach_ragdoll(index, &setup) {
            Ok(()) => true,
            Err(err) => {
                self.notify(Warning::CantCreateRagdoll { entity: entity_id, reason: err.to_string() });
                false
            }
        }
    }

    fn attach_ragdoll(&mut self, index: usize, setup: &RagdollSetup) -> Result<()> {
        let created = ragdoll::create(&self.entities[index], setup, &mut self.physics, &mut self.containers)?;
        self.entities[index].ragdoll = Some(created);
        Ok(())
    }

    pub fn remove_ragdoll(&mut self, entity_id: u32) -> bool {
        let Some(index) = self.existing_entity(entity_id) else { return false };
        let Some(active) = self.entities[index].ragdoll.take() else {
            self.notify(Warning::CantRemoveRagdoll(entity_id));
            return false;
        };
        ragdoll::delete(active, &self.entities[index], &mut self.physics, &mut self.containers);
        true
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Empties the world between steps: joints, then bodies, then every arena.
    pub fn unload(&mut self) {
        self.physics.clear();
        self.containers.clear();
        self.entities.clear();
        self.models.clear();
        self.rooms.clear();
        self.flips = FlipState::new(1, self.config.version);
        self.character = None;
        self.clock.reset();
        log::info!("world unloaded");
    }
}

fn sync_hair_rooms(entity: &Entity, containers: &mut ContainerTable) {
    for container in entity.hairs.iter().filter_map(Hair::container) {
        containers.set_room(container, entity.room);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HairProps, RagdollBodySetup};
    use crate::error::Error;
    use crate::filter::{filter_pair, PairSide, Verdict};
    use crate::hair::HairError;
    use crate::ragdoll::RagdollError;
    use crate::container::ObjectKind;
    use crate::entity::{BaseMesh, MeshTreeNode};
    use crate::flip::FLIP_MASK_FULL;
    use crate::level::{BoneDesc, EntityDesc, LevelBuilder, MiscBodyDesc, RoomDesc};
    use crate::notify::RecordingSink;
    use std::sync::Arc;

    fn zero_g() -> EngineConfig {
        EngineConfig { gravity: [0.0; 3], ..EngineConfig::default() }
    }

    fn hair_setup() -> HairSetup {
        HairSetup {
            model: 9,
            link_body: 1,
            props: HairProps {
                root_weight: 1.0,
                tail_weight: 0.5,
                hair_inertia: 5.0,
                hair_friction: 0.5,
                hair_bouncing: 0.0,
                joint_overlap: 0.9,
                joint_cfm: 0.1,
                joint_erp: 0.8,
                hair_damping: [0.3, 0.3],
            },
            head_offset: [0.0, 40.0, 0.0],
            root_angle: [0.0; 3],
        }
    }

    /// Two rooms side by side, a character with a two-bone skeleton in room 0 and a
    /// third entity that is not a character.
    fn level(config: EngineConfig) -> (World, RecordingSink, RigidBodyHandle) {
        let mut level = LevelBuilder::new(config);
        let r0 = level.add_room(RoomDesc::new([0.0, 0.0, 0.0], [2048.0, 2048.0, 2048.0]));
        let r1 = level.add_room(RoomDesc::new([2048.0, 0.0, 0.0], [4096.0, 2048.0, 2048.0]));
        level.link(r0, r1);

        let strand = Arc::new(BaseMesh::cuboid([-8.0, -64.0, -8.0], [8.0, 0.0, 8.0]));
        level.add_model(SkeletalModel {
            id: ModelId(9),
            mesh_tree: (0..3)
                .map(|i: usize| MeshTreeNode { mesh: Arc::clone(&strand), offset: Vector3::new(0.0, -64.0, 0.0), parent: i.checked_sub(1) })
                .collect(),
        });

        let skeleton = vec![
            BoneDesc { local: Isometry3::identity(), parent: None, half_extents: [64.0, 64.0, 128.0] },
            BoneDesc { local: Isometry3::translation(0.0, 0.0, 200.0), parent: Some(0), half_extents: [32.0, 32.0, 32.0] },
        ];
        let lara = level.add_entity(EntityDesc {
            model: ModelId(0),
            transform: Isometry3::translation(500.0, 500.0, 800.0),
            room: None,
            bones: skeleton.clone(),
            is_character: true,
        });
        level.set_character(lara);
        level.add_entity(EntityDesc {
            model: ModelId(1),
            transform: Isometry3::translation(1500.0, 1500.0, 800.0),
            room: None,
            bones: skeleton,
            is_character: false,
        });

        let crate_body = level.add_misc_body(MiscBodyDesc {
            position: [1900.0, 1000.0, 600.0],
            half_extents: [32.0, 32.0, 32.0],
            mass: 10.0,
        });

        let mut setups = SetupLibrary::default();
        setups.hair.insert(0, hair_setup());
        setups.ragdoll.insert(
            0,
            RagdollSetup {
                joint_cfm: 0.1,
                joint_erp: 0.8,
                body_setup: vec![
                    RagdollBodySetup { mass: 5.0, damping: [0.1, 0.1], restitution: 0.0, friction: 0.9 };
                    2
                ],
                joint_setup: vec![crate::config::RagdollJointSetup {
                    body_index: 1,
                    joint_type: crate::config::RagdollJointKind::Point,
                    body1_offset: [0.0, 0.0, 100.0],
                    body2_offset: [0.0, 0.0, -100.0],
                    body1_angle: [0.0; 3],
                    body2_angle: [0.0; 3],
                    joint_limit: [0.0; 3],
                }],
            },
        );
        level.set_setups(setups);

        let sink = RecordingSink::new();
        let world = level.build(Box::new(sink.clone())).unwrap();
        (world, sink, crate_body)
    }

    #[test]
    fn misc_bodies_follow_their_room_after_each_step() {
        let (mut world, _sink, body) = level(zero_g());
        assert_eq!(world.room_of_body(body), Some(RoomId(0)));

        world.physics_mut().bodies[body].set_linvel(Vector3::new(3000.0, 0.0, 0.0), true);
        for _ in 0..30 {
            world.step();
        }

        assert_eq!(world.room_of_body(body), Some(RoomId(1)));
        let id = world.containers().container_of(body).unwrap();
        assert!(world.rooms().get(RoomId(1)).unwrap().containers.contains(&id));
        assert!(!world.rooms().get(RoomId(0)).unwrap().containers.contains(&id));
    }

    #[test]
    fn misc_body_outside_every_room_has_no_room() {
        let (mut world, _sink, body) = level(zero_g());
        let id = world.containers().container_of(body).unwrap();
        world.physics_mut().bodies[body].set_translation(Vector3::new(9000.0, 0.0, 600.0), true);
        world.step();

        assert_eq!(world.room_of_body(body), None);
        assert!(world.rooms().iter().all(|r| !r.containers.contains(&id)));
    }

    #[test]
    fn update_runs_fixed_steps() {
        let (mut world, _sink, _) = level(zero_g());
        let dt = world.config().fixed_dt;
        assert_eq!(world.update(dt * 0.5), 0);
        assert_eq!(world.update(dt * 0.6), 1);
        assert_eq!(world.update(10.0), world.config().max_substeps as usize);
    }

    #[test]
    fn gravity_is_applied_on_next_step() {
        let (mut world, _sink, body) = level(zero_g());
        world.step();
        let z0 = world.physics().body_position(body).unwrap().translation.vector.z;
        world.set_gravity(Vector3::new(0.0, 0.0, -4500.0));
        assert_eq!(world.gravity(), Vector3::new(0.0, 0.0, -4500.0));
        world.step();
        let z1 = world.physics().body_position(body).unwrap().translation.vector.z;
        assert!(z1 < z0);
    }

    #[test]
    fn bad_ids_warn_and_change_nothing() {
        let (mut world, sink, _) = level(zero_g());
        assert!(world.room(77).is_none());
        assert!(!world.set_room_enabled(77, false));
        assert!(world.flip_map(40).is_none());
        assert!(!world.add_hair(1, 0));
        assert!(!world.add_hair(0, 5));
        assert!(!world.remove_ragdoll(0));
        assert!(!world.add_ragdoll(99, 0));
        assert_eq!(
            sink.take(),
            vec![
                Warning::WrongRoom(77),
                Warning::WrongRoom(77),
                Warning::WrongFlipIndex(40),
                Warning::NoCharacter(1),
                Warning::NoHairSetup(5),
                Warning::CantRemoveRagdoll(0),
                Warning::NoEntity(99),
            ]
        );
    }

    #[test]
    fn hair_attach_and_reset_through_world() {
        let (mut world, sink, _) = level(EngineConfig::default());
        let bodies = world.physics().body_count();

        assert!(world.add_hair(0, 0));
        assert_eq!(world.physics().body_count(), bodies + 3);
        assert_eq!(world.entity(EntityId(0)).unwrap().hairs.len(), 1);
        for _ in 0..30 {
            world.step();
        }
        let matrices = world.hair_render_matrices(0, 0).unwrap();
        assert_eq!(matrices.len(), 4);
        assert!(matrices.iter().all(|m| m.translation.vector.iter().all(|c| c.is_finite())));

        assert!(world.reset_hair(0));
        assert_eq!(world.physics().body_count(), bodies);
        assert_eq!(world.physics().joint_count(), 0);
        assert!(!world.reset_hair(0));
        assert_eq!(sink.take(), vec![Warning::CantResetHair(0)]);
    }

    #[test]
    fn failed_hair_leaves_world_untouched() {
        let (mut world, sink, _) = level(EngineConfig::default());
        let mut broken = hair_setup();
        broken.link_body = 12;
        world.setups.hair.insert(1, broken);
        let before = (world.physics().body_count(), world.physics().joint_count(), world.containers().len());

        assert!(!world.add_hair(0, 1));
        assert_eq!(
            (world.physics().body_count(), world.physics().joint_count(), world.containers().len()),
            before
        );
        assert!(matches!(sink.take().as_slice(), [Warning::CantCreateHair { entity: 0, .. }]));
    }

    #[test]
    fn missing_hair_model_is_reported() {
        let (mut world, sink, _) = level(EngineConfig::default());
        let mut orphan = hair_setup();
        orphan.model = 404;
        world.setups.hair.insert(2, orphan);
        let bodies = world.physics().body_count();

        assert!(!world.add_hair(0, 2));
        assert_eq!(sink.take(), vec![Warning::NoModel(404)]);
        assert_eq!(world.physics().body_count(), bodies);
    }

    #[test]
    fn construction_errors_convert_into_crate_error() {
        let (mut world, _sink, _) = level(EngineConfig::default());
        let mut broken = hair_setup();
        broken.link_body = 12;
        assert!(matches!(
            world.attach_hair(0, &broken),
            Err(Error::Hair(HairError::LinkBodyOutOfRange { link_body: 12, bones: 2 }))
        ));

        let mut short = world.setups.ragdoll(0).cloned().unwrap();
        short.body_setup.pop();
        assert!(matches!(
            world.attach_ragdoll(1, &short),
            Err(Error::Ragdoll(RagdollError::BodyCountMismatch { setup: 1, bones: 2 }))
        ));
        assert!(world.entity(EntityId(1)).unwrap().ragdoll.is_none());
    }

    #[test]
    fn hair_follows_its_character_through_a_flip() {
        let mut level = LevelBuilder::new(zero_g());
        let base = level.add_room(RoomDesc::new([0.0, 0.0, 0.0], [2048.0, 2048.0, 2048.0]));
        let flipped = level.add_room(RoomDesc::new([0.0, 0.0, 0.0], [2048.0, 2048.0, 2048.0]));
        level.alternate(base, flipped, 1);
        level.add_model(SkeletalModel {
            id: ModelId(9),
            mesh_tree: (0..2)
                .map(|i: usize| MeshTreeNode {
                    mesh: Arc::new(BaseMesh::cuboid([-8.0, -64.0, -8.0], [8.0, 0.0, 8.0])),
                    offset: Vector3::new(0.0, -64.0, 0.0),
                    parent: i.checked_sub(1),
                })
                .collect(),
        });
        let lara = level.add_entity(EntityDesc {
            model: ModelId(0),
            transform: Isometry3::translation(500.0, 500.0, 800.0),
            room: None,
            bones: vec![
                BoneDesc { local: Isometry3::identity(), parent: None, half_extents: [64.0, 64.0, 128.0] },
                BoneDesc { local: Isometry3::translation(0.0, 0.0, 200.0), parent: Some(0), half_extents: [32.0; 3] },
            ],
            is_character: true,
        });
        level.set_character(lara);
        let mut setups = SetupLibrary::default();
        setups.hair.insert(0, hair_setup());
        level.set_setups(setups);
        let mut world = level.build(Box::new(RecordingSink::new())).unwrap();

        assert!(world.add_hair(0, 0));
        world.set_flip_map(1, FLIP_MASK_FULL, FlipOp::Or);
        assert_eq!(world.set_flip_state(1, 1), Some(1));
        world.step();
        assert_eq!(world.update_entity_room_pos(0), Some(flipped));

        let entity = world.entity(EntityId(0)).unwrap();
        assert_eq!(entity.room, Some(flipped));
        let hair_container = entity.hairs[0].container().unwrap();
        assert_eq!(world.containers().get(hair_container).and_then(|c| c.room), Some(flipped));

        let bone = entity.bone_body(1).unwrap();
        let hair = entity.hairs[0].elements()[0].body;
        let side = |body| PairSide {
            container: world.containers().container_of(body),
            room: world.room_of_body(body),
            immovable: world.physics().bodies[body].is_kinematic(),
        };
        assert_eq!(filter_pair(&side(hair), &side(bone), world.rooms()), Verdict::Default);
    }

    #[test]
    fn ragdoll_round_trip_and_room_tracking() {
        let (mut world, _sink, _) = level(EngineConfig::default());
        assert!(world.add_ragdoll(1, 0));
        let container = world.entity(EntityId(1)).unwrap().container;
        assert!(matches!(
            world.containers().get(container).map(|c| c.kind),
            Some(ObjectKind::RagdollPart { .. })
        ));
        for _ in 0..20 {
            world.step();
        }
        assert_eq!(world.entity(EntityId(1)).unwrap().room, Some(RoomId(0)));
        assert!(world.remove_ragdoll(1));
        assert_eq!(world.physics().joint_count(), 0);
    }

    #[test]
    fn entity_room_move_and_sector_tracking() {
        let (mut world, _sink, _) = level(zero_g());

        let info = world.entity_sector_info(1).unwrap();
        assert_eq!(info.at.room, RoomId(0));
        assert_eq!(info.at.index, 3);

        let moved = Isometry3::translation(2500.0, 100.0, 800.0);
        assert!(world.set_entity_pose(1, moved, &[]));
        assert!(world.set_entity_room_move(1, Some(1), Some(2), None));
        let entity = world.entity(EntityId(1)).unwrap();
        assert_eq!(entity.room, Some(RoomId(1)));
        assert_eq!(entity.move_type, 2);
        let info = world.entity_sector_info(1).unwrap();
        assert_eq!(info.at, SectorRef { room: RoomId(1), index: 0 });
        assert!(info.changed);

        let container = entity.container;
        assert!(world.rooms().get(RoomId(1)).unwrap().containers.contains(&container));
        assert!(!world.rooms().get(RoomId(0)).unwrap().containers.contains(&container));

        world.update_entity_room_pos(1);
        assert!(!world.entity_sector_info(1).unwrap().changed);
    }

    #[test]
    fn player_room_move_only_updates_reference() {
        let (mut world, _sink, _) = level(zero_g());
        let container = world.entity(EntityId(0)).unwrap().container;
        assert!(world.set_entity_room_move(0, Some(1), None, None));
        // Lara still stands in room 0, so the position update pulls her back.
        assert_eq!(world.entity(EntityId(0)).unwrap().room, Some(RoomId(0)));
        assert!(world.rooms().get(RoomId(0)).unwrap().containers.contains(&container));
    }

    #[test]
    fn flip_through_world_swaps_group_rooms() {
        let mut level = LevelBuilder::new(zero_g());
        let a = level.add_room(RoomDesc::new([0.0, 0.0, 0.0], [1024.0, 1024.0, 1024.0]));
        let b = level.add_room(RoomDesc::new([1024.0, 0.0, 0.0], [2048.0, 1024.0, 1024.0]));
        let b_alt = level.add_room(RoomDesc::new([1024.0, 0.0, 0.0], [2048.0, 1024.0, 1024.0]));
        level.link(a, b);
        level.portal(a, 0, b);
        level.alternate(b, b_alt, 1);
        let mut world = level.build(Box::new(RecordingSink::new())).unwrap();

        assert_eq!(world.set_flip_state(1, 1), Some(0));
        assert_eq!(world.set_flip_map(1, FLIP_MASK_FULL, FlipOp::Or), Some(FLIP_MASK_FULL));
        assert_eq!(world.set_flip_state(1, 7), Some(1));
        assert_eq!(world.flip_state(1), Some(true));
        assert_eq!(world.rooms().get(a).unwrap().sectors[0].portal_to_room, Some(b_alt));
        assert_eq!(world.find_room(&Point3::new(1500.0, 500.0, 500.0), Some(a)), Some(b_alt));

        assert_eq!(world.set_flip_state(1, 0), Some(1));
        assert_eq!(world.rooms().get(a).unwrap().sectors[0].portal_to_room, Some(b));
        assert!(world.set_flip_state(5, 1).is_none());
    }

    #[test]
    fn dump_and_unload() {
        let (mut world, _sink, _) = level(zero_g());
        let dump = world.dump_room(0).unwrap();
        assert!(dump.starts_with("ROOM = 0"));
        assert!(dump.contains("near = [1]"));

        world.unload();
        assert_eq!(world.physics().body_count(), 0);
        assert_eq!(world.physics().joint_count(), 0);
        assert!(world.containers().is_empty());
        assert!(world.rooms().is_empty());
        assert_eq!(world.entity_count(), 0);
        world.step();
    }
}
