// src/main.rs
//! Headless demo: three rooms, a flippable room pair and a character with hair.
//! Usage: `portal_engine [engine_config.json] [setups.json]`

use std::fs::File;
use std::io::Write;
use std::panic;
use std::backtrace::Backtrace;
use std::sync::Arc;

use anyhow::Context as _;
use log::{info, LevelFilter};
use nalgebra::{Isometry3, Point3, Vector3};

use portal_engine::config::{HairProps, HairSetup};
use portal_engine::entity::{BaseMesh, EntityId, MeshTreeNode, ModelId, SkeletalModel};
use portal_engine::flip::{FlipOp, FLIP_MASK_FULL};
use portal_engine::level::{BoneDesc, EntityDesc, MiscBodyDesc, RoomDesc};
use portal_engine::{Command, EngineConfig, LevelBuilder, LogSink, Reply, SetupLibrary, World};

const FRAME_DT: f32 = 1.0 / 60.0;
const HAIR_MODEL: u32 = 30;
const CRASH_REPORT: &str = "portal_engine_panic.log";

fn main() -> anyhow::Result<()> {
    setup_diagnostics();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => EngineConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => EngineConfig::default(),
    };
    let setups = match args.next() {
        Some(path) => SetupLibrary::load(&path).with_context(|| format!("loading {}", path))?,
        None => demo_setups(),
    };

    info!("Starting portal_engine demo...");
    let mut world = demo_level(config, setups)?;

    if world.execute(Command::AddHair { entity: 0, setup: 0 }) != Reply::Done(true) {
        anyhow::bail!("demo character refused its hair");
    }

    run(&mut world, 3.0);
    report(&world);

    world.execute(Command::SetFlipMap { group: 1, mask: FLIP_MASK_FULL, op: FlipOp::Or });
    if let Reply::Swapped(n) = world.execute(Command::SetFlipState { group: 1, state: 1 }) {
        info!("flip group 1 swapped {} room(s)", n);
    }
    world.execute(Command::Gravity(vec![-2000.0]));

    run(&mut world, 1.0);
    report(&world);

    world.unload();
    Ok(())
}

fn run(world: &mut World, seconds: f32) {
    let frames = (seconds / FRAME_DT).round() as u32;
    let steps: usize = (0..frames).map(|_| world.update(FRAME_DT)).sum();
    info!("simulated {:.1}s in {} steps", seconds, steps);
}

fn report(world: &World) {
    for id in 0..world.entity_count() as u32 {
        if let Some(entity) = world.entity(EntityId(id)) {
            info!(
                "entity {} at {:?} in room {:?}",
                id,
                entity.position().coords.as_slice(),
                entity.room.map(|r| r.0)
            );
        }
    }
    for (body, container) in world.containers().misc_bodies() {
        let room = world.containers().get(container).and_then(|c| c.room);
        let z = world.physics().body_position(body).map(|p| p.translation.vector.z);
        info!("misc body {:?} in room {:?} (z = {:?})", body, room.map(|r| r.0), z);
    }
    let sample = Point3::new(4000.0, 1024.0, 300.0);
    if let Some(room) = world.find_room(&sample, None) {
        info!("sample point resolves to room {}", room.0);
    }
}

/// Rooms 0-1-2 in a row, room 3 the flipped version of room 2.
fn demo_level(config: EngineConfig, setups: SetupLibrary) -> anyhow::Result<World> {
    let mut level = LevelBuilder::new(config);
    let r0 = level.add_room(RoomDesc::new([0.0, 0.0, 0.0], [2048.0, 2048.0, 2048.0]));
    let r1 = level.add_room(RoomDesc::new([2048.0, 0.0, 0.0], [3072.0, 2048.0, 2048.0]));
    let r2 = level.add_room(RoomDesc::new([3072.0, 0.0, 0.0], [5120.0, 2048.0, 2048.0]));
    let r3 = level.add_room(RoomDesc::new([3072.0, 0.0, 0.0], [5120.0, 2048.0, 2048.0]));
    level.link(r0, r1);
    level.link(r1, r2);
    level.alternate(r2, r3, 1);

    let strand = Arc::new(BaseMesh::cuboid([-12.0, -12.0, -96.0], [12.0, 12.0, 0.0]));
    level.add_model(SkeletalModel {
        id: ModelId(HAIR_MODEL),
        mesh_tree: (0..6)
            .map(|i: usize| MeshTreeNode {
                mesh: Arc::clone(&strand),
                offset: Vector3::new(0.0, 0.0, -96.0),
                parent: i.checked_sub(1),
            })
            .collect(),
    });

    let lara = level.add_entity(EntityDesc {
        model: ModelId(0),
        transform: Isometry3::translation(1024.0, 1024.0, 0.0),
        room: None,
        bones: vec![
            BoneDesc { local: Isometry3::translation(0.0, 0.0, 400.0), parent: None, half_extents: [64.0, 48.0, 160.0] },
            BoneDesc { local: Isometry3::translation(0.0, 0.0, 640.0), parent: Some(0), half_extents: [40.0, 40.0, 48.0] },
        ],
        is_character: true,
    });
    level.set_character(lara);

    for x in [1500.0, 2600.0, 4000.0] {
        level.add_misc_body(MiscBodyDesc { position: [x, 1024.0, 900.0], half_extents: [64.0; 3], mass: 20.0 });
    }

    level.set_setups(setups);
    level.build(Box::new(LogSink)).context("building demo level")
}

fn demo_setups() -> SetupLibrary {
    let mut setups = SetupLibrary::default();
    setups.hair.insert(
        0,
        HairSetup {
            model: HAIR_MODEL,
            link_body: 1,
            props: HairProps {
                root_weight: 1.0,
                tail_weight: 0.25,
                hair_inertia: 8.0,
                hair_friction: 0.3,
                hair_bouncing: 0.1,
                joint_overlap: 0.92,
                joint_cfm: 0.05,
                joint_erp: 0.85,
                hair_damping: [0.3, 0.7],
            },
            head_offset: [0.0, -40.0, 48.0],
            root_angle: [-0.3, 0.0, 0.0],
        },
    );
    setups
}

/// `env_logger` for the `log` facade, plus a panic hook that leaves a report behind.
fn setup_diagnostics() {
    env_logger::Builder::new()
        .filter_level(if cfg!(debug_assertions) { LevelFilter::Debug } else { LevelFilter::Info })
        .format_timestamp_millis()
        .format_target(false)
        .parse_default_env()
        .init();

    panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let reason = payload
            .downcast_ref::<&'static str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let report = format!(
            "portal_engine panicked at {}\n{}\n\n{}",
            location,
            reason,
            Backtrace::force_capture()
        );
        log::error!("{}", report);

        match File::create(CRASH_REPORT).and_then(|mut file| file.write_all(report.as_bytes())) {
            Ok(()) => eprintln!("panic report written to {}", CRASH_REPORT),
            Err(err) => eprintln!("{}\n(could not write {}: {})", report, CRASH_REPORT, err),
        }
    }));
}
