// src/physics.rs
//! The single rigid-body world every component registers into.
//!
//! `PhysicsWorld` owns the Rapier pipeline and all of its sets. It knows nothing
//! about rooms: room-aware filtering is passed in as a `PhysicsHooks` object on
//! each step, and the room re-resolution pass runs in [`crate::world`] after
//! the step returns.

use std::collections::BTreeMap;

use nalgebra::{Isometry3, Vector3};
use rapier3d::prelude::*;

// ---------------------------------------------------------------------------
// Collision Layers
// ---------------------------------------------------------------------------

/// Fixed membership/filter pairs. Never computed per pair.
pub mod groups {
    use rapier3d::prelude::{Group, InteractionGroups};

    /// Room geometry and static meshes.
    pub const STATIC: Group = Group::GROUP_1;
    /// Animated entity bone bodies.
    pub const KINEMATIC: Group = Group::GROUP_2;
    /// Hair elements.
    pub const CHARACTERS: Group = Group::GROUP_3;
    /// Free-moving bodies (physics-misc, ragdoll parts).
    pub const DYNAMICS: Group = Group::GROUP_4;

    #[inline]
    pub fn static_geometry() -> InteractionGroups {
        InteractionGroups::new(STATIC, Group::ALL)
    }

    #[inline]
    pub fn kinematic() -> InteractionGroups {
        InteractionGroups::new(KINEMATIC, Group::ALL)
    }

    /// Hair touches kinematic geometry only: never itself, never other characters.
    #[inline]
    pub fn hair() -> InteractionGroups {
        InteractionGroups::new(CHARACTERS, KINEMATIC)
    }

    #[inline]
    pub fn dynamic() -> InteractionGroups {
        InteractionGroups::new(DYNAMICS, Group::ALL)
    }

    /// Excluded from every pair.
    #[inline]
    pub fn disabled() -> InteractionGroups {
        InteractionGroups::none()
    }
}

// ---------------------------------------------------------------------------
// Physics World
// ---------------------------------------------------------------------------

pub struct PhysicsWorld {
    gravity: Vector3<f32>,
    pipeline: PhysicsPipeline,
    integration_params: IntegrationParameters,
    islands: IslandManager,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,

    // Velocity-iteration requests from joints that need a stiffer solve.
    base_iterations: usize,
    iteration_cap: usize,
    iteration_requests: BTreeMap<usize, usize>,

    // Joint softness requests, most recent last.
    base_softness: (f32, f32),
    softness_requests: Vec<JointSoftness>,
}

/// Constraint force mixing and error reduction for every impulse joint in the world.
///
/// Rapier regularizes joints globally, so the most recent live request wins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointSoftness {
    pub cfm: f32,
    pub erp: f32,
}

impl JointSoftness {
    pub fn new(cfm: f32, erp: f32) -> Self {
        Self { cfm, erp }
    }

    /// `(joint_erp, joint_damping_ratio)` giving this CFM coefficient at this ERP.
    ///
    /// An ERP of 1 is a rigid joint in rapier and leaves no room for CFM; the
    /// damping ratio then keeps `fallback`.
    fn solver_params(self, fallback: f32) -> (f32, f32) {
        let erp = self.erp.clamp(0.01, 1.0);
        let cfm = self.cfm.max(0.0);
        let x = 1.0 / erp - 1.0;
        if x <= 0.0 || cfm <= 0.0 {
            return (erp, fallback);
        }
        // rapier: cfm = x^2 / ((1 + x) * 4 * ratio^2)
        (erp, (x * x / ((1.0 + x) * 4.0 * cfm)).sqrt())
    }
}

impl PhysicsWorld {
    pub fn new(gravity: Vector3<f32>, iteration_cap: usize) -> Self {
        let integration_params = IntegrationParameters::default();
        let base_iterations = integration_params.max_velocity_iterations;
        let base_softness = (integration_params.joint_erp, integration_params.joint_damping_ratio);

        Self {
            gravity,
            pipeline: PhysicsPipeline::new(),
            integration_params,
            islands: IslandManager::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            base_iterations,
            iteration_cap: iteration_cap.max(base_iterations),
            iteration_requests: BTreeMap::new(),
            base_softness,
            softness_requests: Vec::new(),
        }
    }

    /// Runs broadphase, filtered narrowphase, solver and integration to completion.
    pub fn step(&mut self, dt: f32, hooks: &dyn PhysicsHooks) {
        self.integration_params.dt = dt;

        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            hooks,
            &(),
        );
    }

    // -------------------------------------------------------------------------
    // Global State
    // -------------------------------------------------------------------------

    #[inline]
    pub fn gravity(&self) -> Vector3<f32> {
        self.gravity
    }

    /// Applies uniformly to every dynamic body from the next integration step on.
    pub fn set_gravity(&mut self, gravity: Vector3<f32>) {
        self.gravity = gravity;
    }

    #[inline]
    pub fn dt(&self) -> f32 {
        self.integration_params.dt
    }

    #[inline]
    pub fn solver_iterations(&self) -> usize {
        self.integration_params.max_velocity_iterations
    }

    /// Raises the world's velocity iterations, up to the configured cap.
    pub fn request_solver_iterations(&mut self, iterations: usize) {
        *self.iteration_requests.entry(iterations).or_insert(0) += 1;
        self.refresh_iterations();
    }

    /// Drops one request for `iterations`. Releasing more than was requested is a no-op.
    pub fn release_solver_iterations(&mut self, iterations: usize) {
        if let Some(count) = self.iteration_requests.get_mut(&iterations) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.iteration_requests.remove(&iterations);
            }
        }
        self.refresh_iterations();
    }

    fn refresh_iterations(&mut self) {
        let requested = self
            .iteration_requests
            .keys()
            .next_back()
            .copied()
            .unwrap_or(self.base_iterations);
        self.integration_params.max_velocity_iterations =
            requested.clamp(self.base_iterations, self.iteration_cap);
    }

    #[inline]
    pub fn joint_erp(&self) -> f32 {
        self.integration_params.joint_erp
    }

    /// CFM coefficient the solver currently applies to every joint.
    #[inline]
    pub fn joint_cfm(&self) -> f32 {
        self.integration_params.joint_cfm_coeff()
    }

    pub fn request_joint_softness(&mut self, softness: JointSoftness) {
        self.softness_requests.push(softness);
        self.refresh_softness();
    }

    pub fn release_joint_softness(&mut self, softness: JointSoftness) {
        if let Some(i) = self.softness_requests.iter().rposition(|s| *s == softness) {
            self.softness_requests.remove(i);
        }
        self.refresh_softness();
    }

    fn refresh_softness(&mut self) {
        let (base_erp, base_damping) = self.base_softness;
        let (erp, damping) = match self.softness_requests.last() {
            Some(softness) => softness.solver_params(base_damping),
            None => (base_erp, base_damping),
        };
        self.integration_params.joint_erp = erp;
        self.integration_params.joint_damping_ratio = damping;
    }

    // -------------------------------------------------------------------------
    // Body Management
    // -------------------------------------------------------------------------

    pub fn insert_body(
        &mut self,
        body: RigidBody,
        colliders: impl IntoIterator<Item = Collider>,
    ) -> RigidBodyHandle {
        let handle = self.bodies.insert(body);
        for collider in colliders {
            self.colliders
                .insert_with_parent(collider, handle, &mut self.bodies);
        }
        handle
    }

    /// Removes the body and its colliders. Joints still attached are dropped by Rapier,
    /// so owners that track joints must remove them first.
    pub fn remove_body(&mut self, handle: RigidBodyHandle) -> Option<RigidBody> {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        )
    }

    pub fn insert_joint(
        &mut self,
        parent: RigidBodyHandle,
        child: RigidBodyHandle,
        joint: impl Into<GenericJoint>,
    ) -> ImpulseJointHandle {
        self.impulse_joints.insert(parent, child, joint, true)
    }

    pub fn remove_joint(&mut self, handle: ImpulseJointHandle) -> bool {
        self.impulse_joints.remove(handle, true).is_some()
    }

    /// Swaps the interaction groups of every collider on the body.
    pub fn set_body_groups(&mut self, handle: RigidBodyHandle, groups: InteractionGroups) {
        let Some(body) = self.bodies.get(handle) else { return };
        for collider in body.colliders() {
            if let Some(c) = self.colliders.get_mut(*collider) {
                c.set_collision_groups(groups);
            }
        }
    }

    pub fn body_groups(&self, handle: RigidBodyHandle) -> Option<InteractionGroups> {
        let body = self.bodies.get(handle)?;
        let first = body.colliders().first()?;
        self.colliders.get(*first).map(|c| c.collision_groups())
    }

    #[inline]
    pub fn body_position(&self, handle: RigidBodyHandle) -> Option<Isometry3<f32>> {
        self.bodies.get(handle).map(|b| *b.position())
    }

    #[inline]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    #[inline]
    pub fn joint_count(&self) -> usize {
        self.impulse_joints.len()
    }

    /// Empties the world: every joint, then every body.
    pub fn clear(&mut self) {
        let joints: Vec<_> = self.impulse_joints.iter().map(|(h, _)| h).collect();
        for joint in joints {
            self.impulse_joints.remove(joint, false);
        }

        let bodies: Vec<_> = self.bodies.iter().map(|(h, _)| h).collect();
        for body in bodies {
            self.remove_body(body);
        }

        self.iteration_requests.clear();
        self.refresh_iterations();
        self.softness_requests.clear();
        self.refresh_softness();
    }
}
