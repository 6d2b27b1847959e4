// src/lib.rs
//! Room-portal physics core: a room graph with portals and flip pairs, a
//! room-adjacency collision filter over a rapier world, and articulated hair and
//! ragdoll attachments driven by per-level setup records.

// -------------------------------
// Foundations
// -------------------------------
pub mod context;
pub mod error;
pub mod geometry;
pub mod notify;
pub mod config;
pub mod time;

// -------------------------------
// Physics core
// -------------------------------
pub mod physics;
pub mod container;
pub mod room;
pub mod filter;
pub mod flip;

// -------------------------------
// Entities & attachments
// -------------------------------
pub mod entity;
pub mod hair;
pub mod ragdoll;

// -------------------------------
// World & script surface
// -------------------------------
pub mod world;
pub mod level;
pub mod command;

pub use command::{Command, Reply};
pub use config::{EngineConfig, EngineVersion, SetupLibrary};
pub use error::{Error, Result};
pub use level::LevelBuilder;
pub use notify::{LogSink, NotificationSink, RecordingSink, Warning};
pub use room::RoomId;
pub use world::World;
