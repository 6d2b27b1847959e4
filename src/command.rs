// src/command.rs
//! Script-facing command surface.
//!
//! Scripts never touch world internals. Every call is a [`Command`], executed
//! between steps, answered with a [`Reply`]. Positions cross this boundary as
//! `glam` vectors.

use glam::Vec3;
use nalgebra::Vector3;

use crate::flip::FlipOp;
use crate::geometry::{to_glam, to_na, to_point};
use crate::notify::Warning;
use crate::room::RoomId;
use crate::world::{SectorInfo, World};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetRoomEnabled { room: u32, enabled: bool },
    GetRoom(u32),
    FindRoom { position: Vec3, hint: Option<u32> },
    /// No arguments reads gravity, one sets the vertical axis, three set all axes.
    Gravity(Vec<f32>),
    GetFlipMap(u32),
    SetFlipMap { group: u32, mask: u8, op: FlipOp },
    GetFlipState(u32),
    SetFlipState { group: u32, state: u32 },
    AddHair { entity: u32, setup: u32 },
    ResetHair(u32),
    AddRagdoll { entity: u32, setup: u32 },
    RemoveRagdoll(u32),
    SetEntityRoomMove { entity: u32, room: Option<u32>, move_type: Option<u16>, dir_flag: Option<u16> },
    UpdateEntityRoomPos(u32),
    GetEntitySectorInfo(u32),
    DumpRoom(u32),
}

/// Summary of one room for scripts.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSummary {
    pub id: u32,
    pub active: bool,
    pub min: Vec3,
    pub max: Vec3,
    pub sectors: (u16, u16),
    pub alternate_room: Option<u32>,
    pub base_room: Option<u32>,
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Nothing to report, or the command named something that does not exist.
    None,
    Done(bool),
    Room(RoomSummary),
    RoomId(u32),
    Gravity(Vec3),
    FlipMap(u8),
    FlipState(bool),
    Swapped(usize),
    Sector(SectorInfo),
    Dump(String),
}

impl Reply {
    fn from_option<T>(value: Option<T>, f: impl FnOnce(T) -> Reply) -> Reply {
        value.map_or(Reply::None, f)
    }
}

impl World {
    pub fn execute(&mut self, command: Command) -> Reply {
        log::trace!("execute {:?}", command);
        match command {
            Command::SetRoomEnabled { room, enabled } => Reply::Done(self.set_room_enabled(room, enabled)),
            Command::GetRoom(id) => Reply::from_option(self.room(id), |r| {
                Reply::Room(RoomSummary {
                    id: r.id.0,
                    active: r.active,
                    min: to_glam(&r.bounds.min.coords),
                    max: to_glam(&r.bounds.max.coords),
                    sectors: (r.sectors_x, r.sectors_y),
                    alternate_room: r.alternate_room.map(|a| a.0),
                    base_room: r.base_room.map(|b| b.0),
                    flags: r.flags,
                })
            }),
            Command::FindRoom { position, hint } => {
                let found = self.find_room(&to_point(position), hint.map(RoomId));
                Reply::from_option(found, |r| Reply::RoomId(r.0))
            }
            Command::Gravity(args) => self.gravity_command(&args),
            Command::GetFlipMap(group) => Reply::from_option(self.flip_map(group), Reply::FlipMap),
            Command::SetFlipMap { group, mask, op } => {
                Reply::from_option(self.set_flip_map(group, mask, op), Reply::FlipMap)
            }
            Command::GetFlipState(group) => Reply::from_option(self.flip_state(group), Reply::FlipState),
            Command::SetFlipState { group, state } => {
                Reply::from_option(self.set_flip_state(group, state), Reply::Swapped)
            }
            Command::AddHair { entity, setup } => Reply::Done(self.add_hair(entity, setup)),
            Command::ResetHair(entity) => Reply::Done(self.reset_hair(entity)),
            Command::AddRagdoll { entity, setup } => Reply::Done(self.add_ragdoll(entity, setup)),
            Command::RemoveRagdoll(entity) => Reply::Done(self.remove_ragdoll(entity)),
            Command::SetEntityRoomMove { entity, room, move_type, dir_flag } => {
                Reply::Done(self.set_entity_room_move(entity, room, move_type, dir_flag))
            }
            Command::UpdateEntityRoomPos(entity) => {
                Reply::from_option(self.update_entity_room_pos(entity), |r| Reply::RoomId(r.0))
            }
            Command::GetEntitySectorInfo(entity) => {
                Reply::from_option(self.entity_sector_info(entity), Reply::Sector)
            }
            Command::DumpRoom(room) => Reply::from_option(self.dump_room(room), Reply::Dump),
        }
    }

    fn gravity_command(&mut self, args: &[f32]) -> Reply {
        match *args {
            [] => {
                let g = to_glam(&self.gravity());
                log::info!("gravity = ({:.3}, {:.3}, {:.3})", g.x, g.y, g.z);
                Reply::Gravity(g)
            }
            [z] => {
                self.set_gravity(Vector3::new(0.0, 0.0, z));
                Reply::Gravity(Vec3::new(0.0, 0.0, z))
            }
            [x, y, z] => {
                let g = Vec3::new(x, y, z);
                self.set_gravity(to_na(g));
                Reply::Gravity(g)
            }
            _ => {
                self.notify(Warning::WrongArgsCount("0, 1 or 3"));
                Reply::None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::flip::FLIP_MASK_FULL;
    use crate::level::{LevelBuilder, RoomDesc};
    use crate::notify::RecordingSink;

    /// Rooms 0-1 and 1-2 are near, 0-2 are not. Room 3 is the alternate of room 2.
    fn world() -> (World, RecordingSink) {
        let mut level = LevelBuilder::new(EngineConfig::default());
        let r0 = level.add_room(RoomDesc::new([0.0, 0.0, 0.0], [1024.0, 1024.0, 1024.0]));
        let r1 = level.add_room(RoomDesc::new([1024.0, 0.0, 0.0], [2048.0, 1024.0, 1024.0]));
        let r2 = level.add_room(RoomDesc::new([2048.0, 0.0, 0.0], [3072.0, 1024.0, 1024.0]));
        let r3 = level.add_room(RoomDesc::new([2048.0, 0.0, 0.0], [3072.0, 1024.0, 1024.0]));
        level.link(r0, r1);
        level.link(r1, r2);
        level.alternate(r2, r3, 1);
        let sink = RecordingSink::new();
        let world = level.build(Box::new(sink.clone())).unwrap();
        (world, sink)
    }

    #[test]
    fn gravity_arity() {
        let (mut world, sink) = world();
        assert_eq!(world.execute(Command::Gravity(vec![])), Reply::Gravity(Vec3::new(0.0, 0.0, -4500.0)));

        world.execute(Command::Gravity(vec![1.0, 2.0, 3.0]));
        assert_eq!(world.gravity(), Vector3::new(1.0, 2.0, 3.0));

        world.execute(Command::Gravity(vec![-100.0]));
        assert_eq!(world.gravity(), Vector3::new(0.0, 0.0, -100.0));

        assert_eq!(world.execute(Command::Gravity(vec![1.0, 2.0])), Reply::None);
        assert_eq!(world.gravity(), Vector3::new(0.0, 0.0, -100.0));
        assert_eq!(sink.take(), vec![Warning::WrongArgsCount("0, 1 or 3")]);
    }

    #[test]
    fn room_queries() {
        let (mut world, sink) = world();
        let Reply::Room(summary) = world.execute(Command::GetRoom(3)) else { panic!("expected a room") };
        assert!(!summary.active);
        assert_eq!(summary.base_room, Some(2));
        assert_eq!(summary.sectors, (1, 1));

        assert_eq!(
            world.execute(Command::FindRoom { position: Vec3::new(1500.0, 500.0, 500.0), hint: Some(0) }),
            Reply::RoomId(1)
        );
        assert_eq!(
            world.execute(Command::FindRoom { position: Vec3::new(9000.0, 0.0, 0.0), hint: None }),
            Reply::None
        );
        assert_eq!(world.execute(Command::GetRoom(12)), Reply::None);
        assert_eq!(world.execute(Command::DumpRoom(12)), Reply::None);
        assert_eq!(sink.take(), vec![Warning::WrongRoom(12), Warning::WrongRoom(12)]);
    }

    #[test]
    fn flip_commands() {
        let (mut world, sink) = world();
        assert_eq!(world.execute(Command::GetFlipState(1)), Reply::FlipState(false));
        assert_eq!(
            world.execute(Command::SetFlipMap { group: 1, mask: 0x0F, op: FlipOp::Or }),
            Reply::FlipMap(0x0F)
        );
        assert_eq!(world.execute(Command::SetFlipState { group: 1, state: 1 }), Reply::Swapped(0));
        assert_eq!(
            world.execute(Command::SetFlipMap { group: 1, mask: 0x10, op: FlipOp::Xor }),
            Reply::FlipMap(FLIP_MASK_FULL)
        );
        assert_eq!(world.execute(Command::SetFlipState { group: 1, state: 1 }), Reply::Swapped(1));
        assert_eq!(world.execute(Command::GetFlipState(1)), Reply::FlipState(true));
        assert_eq!(
            world.execute(Command::FindRoom { position: Vec3::new(2500.0, 500.0, 500.0), hint: Some(1) }),
            Reply::RoomId(3)
        );

        assert_eq!(world.execute(Command::GetFlipMap(9)), Reply::None);
        assert_eq!(sink.take(), vec![Warning::WrongFlipIndex(9)]);
    }

    #[test]
    fn room_toggle_and_bad_entities() {
        let (mut world, sink) = world();
        assert_eq!(world.execute(Command::SetRoomEnabled { room: 0, enabled: false }), Reply::Done(true));
        assert!(!world.rooms().get(RoomId(0)).unwrap().active);
        assert_eq!(world.execute(Command::SetRoomEnabled { room: 0, enabled: true }), Reply::Done(true));

        assert_eq!(world.execute(Command::AddHair { entity: 4, setup: 0 }), Reply::Done(false));
        assert_eq!(world.execute(Command::RemoveRagdoll(4)), Reply::Done(false));
        assert_eq!(world.execute(Command::GetEntitySectorInfo(4)), Reply::None);
        assert_eq!(sink.take(), vec![Warning::NoCharacter(4), Warning::NoEntity(4)]);
    }
}
