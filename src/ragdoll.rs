// src/ragdoll.rs
//! Ragdoll attachment: turns an entity's kinematic bone bodies into a jointed
//! dynamic skeleton, and back.
//!
//! Same all-or-nothing lifetime as hair. Every precondition is checked before
//! the first body changes type; removal drops joints before touching bodies.

use nalgebra::Vector3;
use rapier3d::prelude::*;
use thiserror::Error;

use crate::config::{RagdollJointKind, RagdollJointSetup, RagdollSetup};
use crate::container::{ContainerTable, ObjectKind};
use crate::entity::Entity;
use crate::geometry::frame;
use crate::physics::{groups, JointSoftness, PhysicsWorld};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RagdollError {
    #[error("setup has {setup} bodies, entity has {bones} bones")]
    BodyCountMismatch { setup: usize, bones: usize },
    #[error("bone {0} has no rigid body")]
    MissingBody(usize),
    #[error("joint references bone {0}, which does not exist")]
    JointOutOfRange(u16),
    #[error("joint references root bone {0}, which has no parent")]
    NoParentBone(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RagdollJoint {
    pub handle: ImpulseJointHandle,
    pub parent: RigidBodyHandle,
    pub child: RigidBodyHandle,
    pub kind: RagdollJointKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ragdoll {
    pub joints: Vec<RagdollJoint>,
    pub softness: JointSoftness,
}

fn build_joint(setup: &RagdollJointSetup) -> GenericJoint {
    let frame1 = frame(Vector3::from(setup.body1_offset), setup.body1_angle);
    let frame2 = frame(Vector3::from(setup.body2_offset), setup.body2_angle);
    let limit = setup.joint_limit;

    let builder = match setup.joint_type {
        RagdollJointKind::Point => GenericJointBuilder::new(JointAxesMask::LOCKED_SPHERICAL_AXES),
        RagdollJointKind::Hinge => GenericJointBuilder::new(JointAxesMask::LOCKED_REVOLUTE_AXES)
            .limits(JointAxis::AngX, [limit[0].min(limit[1]), limit[0].max(limit[1])]),
        RagdollJointKind::Cone => GenericJointBuilder::new(JointAxesMask::LOCKED_SPHERICAL_AXES)
            .limits(JointAxis::AngZ, [-limit[0].abs(), limit[0].abs()])
            .limits(JointAxis::AngY, [-limit[1].abs(), limit[1].abs()])
            .limits(JointAxis::AngX, [-limit[2].abs(), limit[2].abs()]),
    };

    builder
        .local_frame1(frame1)
        .local_frame2(frame2)
        .contacts_enabled(false)
        .build()
}

/// Parent/child bone bodies of every joint, or the first reason the setup can't apply.
fn resolve(entity: &Entity, setup: &RagdollSetup, physics: &PhysicsWorld) -> Result<Vec<(RigidBodyHandle, RigidBodyHandle)>, RagdollError> {
    if setup.body_setup.len() != entity.bones.len() {
        return Err(RagdollError::BodyCountMismatch { setup: setup.body_setup.len(), bones: entity.bones.len() });
    }
    for (i, bone) in entity.bones.iter().enumerate() {
        if !bone.body.map_or(false, |b| physics.bodies.contains(b)) {
            return Err(RagdollError::MissingBody(i));
        }
    }

    setup
        .joint_setup
        .iter()
        .map(|joint| {
            let index = joint.body_index as usize;
            let bone = entity.bones.get(index).ok_or(RagdollError::JointOutOfRange(joint.body_index))?;
            let parent = bone.parent.ok_or(RagdollError::NoParentBone(joint.body_index))?;
            let parent_body = entity.bone_body(parent).ok_or(RagdollError::MissingBody(parent))?;
            let child_body = bone.body.ok_or(RagdollError::MissingBody(index))?;
            Ok((parent_body, child_body))
        })
        .collect()
}

/// Switches the entity's bone bodies to dynamic and joins them.
pub fn create(
    entity: &Entity,
    setup: &RagdollSetup,
    physics: &mut PhysicsWorld,
    containers: &mut ContainerTable,
) -> Result<Ragdoll, RagdollError> {
    let pairs = resolve(entity, setup, physics)?;

    for (bone, body_setup) in entity.bones.iter().zip(&setup.body_setup) {
        let Some(handle) = bone.body else { continue };
        if let Some(body) = physics.bodies.get_mut(handle) {
            body.set_body_type(RigidBodyType::Dynamic, true);
            body.set_additional_mass(body_setup.mass.max(f32::EPSILON), true);
            body.set_linear_damping(body_setup.damping[0]);
            body.set_angular_damping(body_setup.damping[1]);
            body.wake_up(true);
        }
        let colliders: Vec<_> = physics.bodies.get(handle).map(|b| b.colliders().to_vec()).unwrap_or_default();
        for collider in colliders {
            if let Some(c) = physics.colliders.get_mut(collider) {
                c.set_restitution(body_setup.restitution);
                c.set_friction(body_setup.friction);
            }
        }
        physics.set_body_groups(handle, groups::dynamic());
    }

    let joints = setup
        .joint_setup
        .iter()
        .zip(pairs)
        .map(|(joint, (parent, child))| RagdollJoint {
            handle: physics.insert_joint(parent, child, build_joint(joint)),
            parent,
            child,
            kind: joint.joint_type,
        })
        .collect();

    let softness = JointSoftness::new(setup.joint_cfm, setup.joint_erp);
    physics.request_joint_softness(softness);

    if let Some(container) = containers.get_mut(entity.container) {
        container.kind = ObjectKind::RagdollPart { entity: entity.id };
    }

    log::debug!("ragdoll created for entity {}", entity.id.0);
    Ok(Ragdoll { joints, softness })
}

/// Removes the joints, then hands the bone bodies back to animation.
pub fn delete(ragdoll: Ragdoll, entity: &Entity, physics: &mut PhysicsWorld, containers: &mut ContainerTable) {
    for joint in ragdoll.joints {
        physics.remove_joint(joint.handle);
    }
    physics.release_joint_softness(ragdoll.softness);

    for handle in entity.bones.iter().filter_map(|b| b.body) {
        if let Some(body) = physics.bodies.get_mut(handle) {
            body.set_body_type(RigidBodyType::KinematicPositionBased, false);
            body.set_additional_mass(0.0, false);
            body.set_linvel(Vector3::zeros(), false);
            body.set_angvel(Vector3::zeros(), false);
        }
        physics.set_body_groups(handle, groups::kinematic());
    }

    if let Some(container) = containers.get_mut(entity.container) {
        container.kind = ObjectKind::Entity(entity.id);
    }
    log::debug!("ragdoll removed from entity {}", entity.id.0);
}
