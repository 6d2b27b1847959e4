// src/container.rs
//! Identity side-table for physics bodies.
//!
//! Every rigid body the core registers gets exactly one [`EngineContainer`]: what
//! kind of object owns it and which room it was last resolved into. The table is
//! keyed by body handle, so the filter and the tick pass never downcast user data.

use std::collections::HashMap;

use rapier3d::prelude::RigidBodyHandle;

use crate::entity::EntityId;
use crate::room::RoomId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub u32);

/// Logical owner of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Animated bone body of an entity.
    Entity(EntityId),
    /// Collision body of a room's static mesh.
    StaticMesh { room: RoomId, index: usize },
    /// Room geometry body.
    RoomGeometry(RoomId),
    /// Free dynamic body with no higher-level owner.
    PhysicsMisc,
    /// Every element of one hair chain hanging off `entity`.
    Hair { entity: EntityId, hair: usize },
    /// Bone bodies of an entity while it is ragdolled.
    RagdollPart { entity: EntityId },
}

impl ObjectKind {
    #[inline]
    pub fn is_physics_misc(&self) -> bool {
        matches!(self, ObjectKind::PhysicsMisc)
    }

    #[inline]
    pub fn entity(&self) -> Option<EntityId> {
        match *self {
            ObjectKind::Entity(e) => Some(e),
            ObjectKind::Hair { entity, .. } | ObjectKind::RagdollPart { entity, .. } => Some(entity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineContainer {
    pub kind: ObjectKind,
    /// Last room this container was resolved into, if any.
    pub room: Option<RoomId>,
}

/// Container arena plus the body → container index.
#[derive(Debug, Default)]
pub struct ContainerTable {
    slots: Vec<Option<EngineContainer>>,
    free: Vec<u32>,
    by_body: HashMap<RigidBodyHandle, ContainerId>,
}

impl ContainerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, container: EngineContainer) -> ContainerId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(container);
                ContainerId(slot)
            }
            None => {
                self.slots.push(Some(container));
                ContainerId(self.slots.len() as u32 - 1)
            }
        }
    }

    /// Drops the container and every body binding pointing at it.
    pub fn remove(&mut self, id: ContainerId) -> Option<EngineContainer> {
        let taken = self.slots.get_mut(id.0 as usize)?.take()?;
        self.by_body.retain(|_, c| *c != id);
        self.free.push(id.0);
        Some(taken)
    }

    #[inline]
    pub fn get(&self, id: ContainerId) -> Option<&EngineContainer> {
        self.slots.get(id.0 as usize)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, id: ContainerId) -> Option<&mut EngineContainer> {
        self.slots.get_mut(id.0 as usize)?.as_mut()
    }

    /// Attaches a body to a container. A body is bound to at most one container.
    pub fn bind(&mut self, body: RigidBodyHandle, id: ContainerId) {
        self.by_body.insert(body, id);
    }

    /// Clears a body's identity. Must happen before the body leaves the world.
    pub fn unbind(&mut self, body: RigidBodyHandle) -> Option<ContainerId> {
        self.by_body.remove(&body)
    }

    #[inline]
    pub fn container_of(&self, body: RigidBodyHandle) -> Option<ContainerId> {
        self.by_body.get(&body).copied()
    }

    #[inline]
    pub fn lookup(&self, body: RigidBodyHandle) -> Option<(ContainerId, &EngineContainer)> {
        let id = self.container_of(body)?;
        self.get(id).map(|c| (id, c))
    }

    #[inline]
    pub fn room_of_body(&self, body: RigidBodyHandle) -> Option<RoomId> {
        self.lookup(body).and_then(|(_, c)| c.room)
    }

    pub fn set_room(&mut self, id: ContainerId, room: Option<RoomId>) {
        if let Some(c) = self.get_mut(id) {
            c.room = room;
        }
    }

    /// Bodies bound to physics-misc containers.
    pub fn misc_bodies(&self) -> Vec<(RigidBodyHandle, ContainerId)> {
        let mut out: Vec<_> = self
            .by_body
            .iter()
            .filter(|(_, id)| self.get(**id).map_or(false, |c| c.kind.is_physics_misc()))
            .map(|(b, id)| (*b, *id))
            .collect();
        out.sort_by_key(|(_, id)| *id);
        out
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_body.clear();
    }
}
