// src/config.rs
//! Engine configuration and the setup records supplied by the script/config loader.
//!
//! Both are plain JSON documents. Missing fields fall back to defaults; values that
//! would break the simulation are rejected at load time.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::Result;
use crate::geometry::DEFAULT_GRAVITY;

/// Game generation the level data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineVersion {
    Tr1,
    Tr2,
    Tr3,
    Tr4,
    Tr5,
}

impl EngineVersion {
    /// Newer than TR3: each flip group flips on its own. Older levels flip globally.
    #[inline]
    pub fn per_group_flips(self) -> bool {
        self > EngineVersion::Tr3
    }
}

impl Default for EngineVersion {
    fn default() -> Self {
        EngineVersion::Tr4
    }
}

/// Simulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gravity: [f32; 3],
    /// Fixed physics step, seconds.
    pub fixed_dt: f32,
    /// Upper bound on physics steps run for one rendered frame.
    pub max_substeps: u32,
    /// Upper bound on velocity solver iterations any joint may request.
    pub max_solver_iterations: usize,
    pub version: EngineVersion,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gravity: DEFAULT_GRAVITY,
            fixed_dt: 1.0 / 60.0,
            max_substeps: 5,
            max_solver_iterations: 8,
            version: EngineVersion::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text).context("parsing engine config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        crate::ensure!(
            self.fixed_dt.is_finite() && self.fixed_dt > 0.0,
            "fixed_dt must be positive, got {}",
            self.fixed_dt
        );
        crate::ensure!(self.max_substeps > 0, "max_substeps must be at least 1");
        crate::ensure!(
            self.max_solver_iterations > 0,
            "max_solver_iterations must be at least 1"
        );
        crate::ensure!(
            self.gravity.iter().all(|g| g.is_finite()),
            "gravity must be finite"
        );
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/*                               Hair Setup                                    */
/* -------------------------------------------------------------------------- */

/// Physical properties of a hair chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HairProps {
    pub root_weight: f32,
    pub tail_weight: f32,
    /// Multiplier applied to each element's weight when computing its inertia.
    pub hair_inertia: f32,
    pub hair_friction: f32,
    /// Restitution.
    pub hair_bouncing: f32,
    /// Scales the predecessor's length when placing a joint pivot.
    pub joint_overlap: f32,
    pub joint_cfm: f32,
    pub joint_erp: f32,
    /// Linear and angular damping.
    pub hair_damping: [f32; 2],
}

/// Named hair setup, keyed by index in the [`SetupLibrary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HairSetup {
    /// Skeletal model whose meshes become the hair elements.
    pub model: u32,
    /// Bone of the parent entity the chain hangs from.
    pub link_body: u32,
    pub props: HairProps,
    /// Pivot of the first joint in the link bone's frame.
    #[serde(rename = "offset")]
    pub head_offset: [f32; 3],
    pub root_angle: [f32; 3],
}

/* -------------------------------------------------------------------------- */
/*                              Ragdoll Setup                                  */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RagdollJointKind {
    Point,
    Hinge,
    Cone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagdollBodySetup {
    pub mass: f32,
    pub damping: [f32; 2],
    pub restitution: f32,
    pub friction: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagdollJointSetup {
    /// Bone whose body is the joint's second body; the first is that bone's parent.
    pub body_index: u16,
    pub joint_type: RagdollJointKind,
    pub body1_offset: [f32; 3],
    pub body2_offset: [f32; 3],
    pub body1_angle: [f32; 3],
    pub body2_angle: [f32; 3],
    /// Hinge: `[low, high, _]`. Cone: `[swing1, swing2, twist]`.
    pub joint_limit: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagdollSetup {
    pub joint_cfm: f32,
    pub joint_erp: f32,
    /// One entry per bone of the entity.
    pub body_setup: Vec<RagdollBodySetup>,
    pub joint_setup: Vec<RagdollJointSetup>,
}

/* -------------------------------------------------------------------------- */
/*                              Setup Library                                  */
/* -------------------------------------------------------------------------- */

/// Indexed setup records, as handed over by the configuration loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupLibrary {
    pub hair: BTreeMap<u32, HairSetup>,
    pub ragdoll: BTreeMap<u32, RagdollSetup>,
}

impl SetupLibrary {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("parsing setup library")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading setup library {}", path.display()))?;
        Self::from_json_str(&text)
    }

    #[inline]
    pub fn hair(&self, index: u32) -> Option<&HairSetup> {
        self.hair.get(&index)
    }

    #[inline]
    pub fn ragdoll(&self, index: u32) -> Option<&RagdollSetup> {
        self.ragdoll.get(&index)
    }
}
