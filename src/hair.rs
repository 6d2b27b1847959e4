// src/hair.rs
//! Physics-driven hair: a chain of rigid bodies hanging off one bone of a character.
//!
//! ## Lifetime
//! `Uninitialized → Built → Destroyed`. [`Hair::create`] validates every
//! precondition before it touches the physics world, so a failed call leaves
//! nothing registered. [`Hair::destroy`] releases joints first, then bodies.
//!
//! ## Chain layout
//! - element `i` is the `i`th mesh of the hair model
//! - joint 0 ties element 0 to the parent bone body, joint `i` ties element `i` to `i - 1`
//! - the tail (last element) has no child joint

use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use nalgebra::{Isometry3, Point3, Translation3, Vector3};
use rapier3d::prelude::*;
use thiserror::Error;

use crate::config::HairSetup;
use crate::container::{ContainerId, ContainerTable, EngineContainer, ObjectKind};
use crate::entity::{BaseMesh, Entity, SkeletalModel, Vertex};
use crate::geometry::{box_inertia, frame};
use crate::physics::{groups, JointSoftness, PhysicsWorld};

/// Velocity iterations requested by the joint that mounts the chain on the head.
pub const ROOT_SOLVER_ITERATIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HairState {
    Uninitialized,
    Built,
    Destroyed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HairError {
    #[error("hair is already built")]
    AlreadyBuilt,
    #[error("link body {link_body} out of range, parent has {bones} bones")]
    LinkBodyOutOfRange { link_body: u32, bones: usize },
    #[error("parent bone {0} has no rigid body")]
    NoBoneBody(u32),
    #[error("no hair model with id = {0}")]
    NoModel(u32),
    #[error("hair model {0} has no meshes")]
    EmptyModel(u32),
}

#[derive(Debug, Clone)]
pub struct HairElement {
    pub mesh: Arc<BaseMesh>,
    pub body: RigidBodyHandle,
    pub weight: f32,
    /// Cumulative resting offset from the root, as baked into the hair mesh.
    pub position: Vector3<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HairJoint {
    pub handle: ImpulseJointHandle,
    pub parent: RigidBodyHandle,
    pub child: RigidBodyHandle,
    pub cfm: f32,
    pub erp: f32,
    pub solver_iterations: Option<usize>,
}

/// The whole chain concatenated into one skinned mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct HairMesh {
    pub vertices: Vec<Vertex>,
    pub element_pages: Vec<Vec<u32>>,
    /// Per vertex: the two render matrices it blends between.
    pub matrix_indices: Vec<[u16; 2]>,
}

/// Per-element weights, root to tail: `root - i * (root - tail) / n`.
pub fn element_weights(root: f32, tail: f32, n: usize) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }
    let step = (root - tail) / n as f32;
    (0..n).map(|i| root - i as f32 * step).collect()
}

/// Joint frames on the previous body (`a`) and on the element (`b`).
fn joint_frames(index: usize, setup: &HairSetup, prev_mesh: Option<&BaseMesh>) -> (Isometry3<f32>, Isometry3<f32>) {
    match (index, prev_mesh) {
        (0, _) | (_, None) => (
            frame(Vector3::from(setup.head_offset), setup.root_angle),
            frame(Vector3::zeros(), [0.0, -FRAC_PI_2, 0.0]),
        ),
        (_, Some(prev)) => {
            let length = (prev.bb_max.y - prev.bb_min.y).abs() * setup.props.joint_overlap;
            (
                frame(Vector3::new(0.0, length, 0.0), [0.0, FRAC_PI_2, 0.0]),
                frame(Vector3::zeros(), [0.0, FRAC_PI_2, 0.0]),
            )
        }
    }
}

/// Angular limits `(lower, upper)` around X, Y, Z. Linear axes are always locked.
fn joint_limits(index: usize) -> (Vector3<f32>, Vector3<f32>) {
    if index == 0 {
        (
            Vector3::new(-FRAC_PI_2, 0.0, -FRAC_PI_2 * 0.4),
            Vector3::new(-FRAC_PI_2 * 0.3, 0.0, FRAC_PI_2 * 0.4),
        )
    } else {
        (
            Vector3::new(-FRAC_PI_2 * 0.5, 0.0, -FRAC_PI_2 * 0.5),
            Vector3::new(FRAC_PI_2 * 0.5, 0.0, FRAC_PI_2 * 0.5),
        )
    }
}

fn build_joint(frames: (Isometry3<f32>, Isometry3<f32>), limits: (Vector3<f32>, Vector3<f32>)) -> GenericJoint {
    let (lower, upper) = limits;
    GenericJointBuilder::new(JointAxesMask::LOCKED_SPHERICAL_AXES | JointAxesMask::ANG_Y)
        .local_frame1(frames.0)
        .local_frame2(frames.1)
        .limits(JointAxis::AngX, [lower.x, upper.x])
        .limits(JointAxis::AngZ, [lower.z, upper.z])
        .contacts_enabled(false)
        .build()
}

/// Concatenates the model's meshes, baking in cumulative offsets and matrix indices.
///
/// The parent of mesh `i` is taken to be mesh `i - 1`. That holds for hair models.
pub fn build_mesh(model: &SkeletalModel) -> (HairMesh, Vec<Vector3<f32>>) {
    let count = model.mesh_count();
    let pages = model
        .mesh_tree
        .iter()
        .map(|n| n.mesh.element_pages.len())
        .max()
        .unwrap_or(0);

    let mut mesh = HairMesh {
        vertices: Vec::new(),
        element_pages: vec![Vec::new(); pages],
        matrix_indices: Vec::new(),
    };
    let mut positions: Vec<Vector3<f32>> = Vec::with_capacity(count);

    for (i, node) in model.mesh_tree.iter().enumerate() {
        let start = mesh.vertices.len() as u32;
        for (page, elements) in node.mesh.element_pages.iter().enumerate() {
            mesh.element_pages[page].extend(elements.iter().map(|e| e + start));
        }

        let position = node.offset + positions.last().copied().unwrap_or_else(Vector3::zeros);
        positions.push(position);

        for original in &node.mesh.vertices {
            let i = i as u16;
            let indices = if original.position[1] <= 0.0 {
                [i, i + 1]
            } else {
                [i + 1, (i + 2).min(count as u16)]
            };
            mesh.matrix_indices.push(indices);

            let mut v = *original;
            for (axis, p) in v.position.iter_mut().enumerate() {
                *p += position[axis];
            }
            if v.normal[0] != 0.0 || v.normal[2] != 0.0 {
                v.normal[1] = 0.0;
                let n = Vector3::from(v.normal).normalize();
                v.normal = [n.x, n.y, n.z];
            }
            mesh.vertices.push(v);
        }
    }

    (mesh, positions)
}

// ============================================================================
// HAIR
// ============================================================================

#[derive(Debug)]
pub struct Hair {
    state: HairState,
    owner_body: usize,
    container: Option<ContainerId>,
    elements: Vec<HairElement>,
    joints: Vec<HairJoint>,
    /// Joint 0's frame on the parent bone.
    root_frame: Isometry3<f32>,
    mesh: Option<HairMesh>,
}

impl Default for Hair {
    fn default() -> Self {
        Self::new()
    }
}

impl Hair {
    pub fn new() -> Self {
        Self {
            state: HairState::Uninitialized,
            owner_body: 0,
            container: None,
            elements: Vec::new(),
            joints: Vec::new(),
            root_frame: Isometry3::identity(),
            mesh: None,
        }
    }

    #[inline]
    pub fn state(&self) -> HairState {
        self.state
    }

    #[inline]
    pub fn elements(&self) -> &[HairElement] {
        &self.elements
    }

    #[inline]
    pub fn joints(&self) -> &[HairJoint] {
        &self.joints
    }

    #[inline]
    pub fn root_index(&self) -> usize {
        0
    }

    #[inline]
    pub fn tail_index(&self) -> Option<usize> {
        self.elements.len().checked_sub(1)
    }

    #[inline]
    pub fn owner_body(&self) -> usize {
        self.owner_body
    }

    #[inline]
    pub fn container(&self) -> Option<ContainerId> {
        self.container
    }

    #[inline]
    pub fn mesh(&self) -> Option<&HairMesh> {
        self.mesh.as_ref()
    }

    /// Every body of the chain, root first.
    pub fn bodies(&self) -> impl Iterator<Item = RigidBodyHandle> + '_ {
        self.elements.iter().map(|e| e.body)
    }

    /// Builds the chain on `parent` and registers it in the world.
    ///
    /// `hair_index` is this hair's slot on the parent; it tags the body container.
    pub fn create(
        &mut self,
        setup: &HairSetup,
        parent: &Entity,
        model: Option<&SkeletalModel>,
        hair_index: usize,
        physics: &mut PhysicsWorld,
        containers: &mut ContainerTable,
    ) -> Result<(), HairError> {
        if self.state == HairState::Built {
            return Err(HairError::AlreadyBuilt);
        }

        let link = setup.link_body as usize;
        if link >= parent.bones.len() {
            return Err(HairError::LinkBodyOutOfRange { link_body: setup.link_body, bones: parent.bones.len() });
        }
        let bone_body = parent
            .bone_body(link)
            .filter(|b| physics.bodies.contains(*b))
            .ok_or(HairError::NoBoneBody(setup.link_body))?;
        let model = model.ok_or(HairError::NoModel(setup.model))?;
        if model.mesh_count() == 0 {
            return Err(HairError::EmptyModel(setup.model));
        }

        // Nothing below can fail: from here on the world is mutated.
        let start = physics
            .body_position(bone_body)
            .or_else(|| parent.bone_world(link))
            .unwrap_or_else(Isometry3::identity);
        let props = &setup.props;
        let weights = element_weights(props.root_weight, props.tail_weight, model.mesh_count());

        let container = containers.insert(EngineContainer {
            kind: ObjectKind::Hair { entity: parent.id, hair: hair_index },
            room: parent.room,
        });

        let (mesh, positions) = build_mesh(model);

        self.elements = model
            .mesh_tree
            .iter()
            .zip(weights)
            .zip(positions)
            .map(|((node, weight), position)| {
                let half = node.mesh.extents() * 0.5;
                let shape = SharedShape::convex_hull(&node.mesh.points())
                    .unwrap_or_else(|| SharedShape::cuboid(half.x.max(0.5), half.y.max(0.5), half.z.max(0.5)));
                let mass = weight.max(f32::EPSILON);
                let inertia = box_inertia(mass * props.hair_inertia, half);

                let body = RigidBodyBuilder::dynamic()
                    .position(start)
                    .linear_damping(props.hair_damping[0])
                    .angular_damping(props.hair_damping[1])
                    .can_sleep(false)
                    .additional_mass_properties(MassProperties::new(Point3::origin(), mass, inertia))
                    .build();
                let collider = ColliderBuilder::new(shape)
                    .density(0.0)
                    .friction(props.hair_friction)
                    .restitution(props.hair_bouncing)
                    .collision_groups(groups::hair())
                    .active_hooks(ActiveHooks::FILTER_CONTACT_PAIRS)
                    .build();

                let handle = physics.insert_body(body, [collider]);
                containers.bind(handle, container);
                HairElement { mesh: Arc::clone(&node.mesh), body: handle, weight, position }
            })
            .collect();

        let mut joints = Vec::with_capacity(self.elements.len());
        for i in 0..self.elements.len() {
            let prev_mesh = i.checked_sub(1).map(|p| self.elements[p].mesh.as_ref());
            let frames = joint_frames(i, setup, prev_mesh);
            if i == 0 {
                self.root_frame = frames.0;
            }
            let parent_body = if i == 0 { bone_body } else { self.elements[i - 1].body };
            let child_body = self.elements[i].body;

            let handle = physics.insert_joint(parent_body, child_body, build_joint(frames, joint_limits(i)));
            physics.request_joint_softness(JointSoftness::new(props.joint_cfm, props.joint_erp));
            let solver_iterations = (i == 0).then_some(ROOT_SOLVER_ITERATIONS);
            if let Some(iterations) = solver_iterations {
                physics.request_solver_iterations(iterations);
            }
            joints.push(HairJoint {
                handle,
                parent: parent_body,
                child: child_body,
                cfm: props.joint_cfm,
                erp: props.joint_erp,
                solver_iterations,
            });
        }
        self.joints = joints;

        self.owner_body = link;
        self.container = Some(container);
        self.mesh = Some(mesh);
        self.state = HairState::Built;

        log::debug!(
            "hair built on entity {} bone {}: {} elements",
            parent.id.0,
            link,
            self.elements.len()
        );
        Ok(())
    }

    /// Removes every joint, then every body, then the container. Unconditional.
    pub fn destroy(&mut self, physics: &mut PhysicsWorld, containers: &mut ContainerTable) {
        if self.state != HairState::Built {
            return;
        }

        for joint in self.joints.drain(..) {
            physics.remove_joint(joint.handle);
            physics.release_joint_softness(JointSoftness::new(joint.cfm, joint.erp));
            if let Some(iterations) = joint.solver_iterations {
                physics.release_solver_iterations(iterations);
            }
        }

        for element in self.elements.drain(..) {
            containers.unbind(element.body);
            physics.remove_body(element.body);
        }

        if let Some(container) = self.container.take() {
            containers.remove(container);
        }
        self.mesh = None;
        self.state = HairState::Destroyed;
    }

    /// Render matrices: the head attachment followed by one per element, matching
    /// the indices baked into [`HairMesh::matrix_indices`].
    pub fn render_matrices(&self, physics: &PhysicsWorld, parent_bone_world: &Isometry3<f32>) -> Vec<Isometry3<f32>> {
        let mut out = Vec::with_capacity(self.elements.len() + 1);
        out.push(parent_bone_world * self.root_frame);
        for element in &self.elements {
            let body = physics.body_position(element.body).unwrap_or_else(Isometry3::identity);
            out.push(body * Translation3::from(-element.position));
        }
        out
    }
}
