// src/entity.rs
//! Skeletal models and the entities that instance them.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use nalgebra::{Isometry3, Point3, Vector3};
use rapier3d::prelude::RigidBodyHandle;

use crate::container::ContainerId;
use crate::hair::Hair;
use crate::ragdoll::Ragdoll;
use crate::room::{RoomId, SectorRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub u32);

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub fn at(position: [f32; 3]) -> Self {
        Self { position, normal: [0.0, 0.0, 1.0], color: [1.0; 4], tex_coord: [0.0; 2] }
    }
}

/// Mesh geometry as loaded: vertices plus one element list per texture page.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseMesh {
    pub vertices: Vec<Vertex>,
    pub element_pages: Vec<Vec<u32>>,
    pub bb_min: Point3<f32>,
    pub bb_max: Point3<f32>,
}

impl BaseMesh {
    pub fn new(vertices: Vec<Vertex>, element_pages: Vec<Vec<u32>>) -> Self {
        let mut bb_min = Point3::origin();
        let mut bb_max = Point3::origin();
        if let Some(first) = vertices.first() {
            bb_min = Point3::from(first.position);
            bb_max = bb_min;
        }
        for v in &vertices {
            let p = Point3::from(v.position);
            bb_min = bb_min.inf(&p);
            bb_max = bb_max.sup(&p);
        }
        Self { vertices, element_pages, bb_min, bb_max }
    }

    /// Axis-aligned box mesh with all 12 triangles on page 0.
    pub fn cuboid(min: [f32; 3], max: [f32; 3]) -> Self {
        let vertices = (0..8)
            .map(|i| {
                Vertex::at([
                    if i & 1 == 0 { min[0] } else { max[0] },
                    if i & 2 == 0 { min[1] } else { max[1] },
                    if i & 4 == 0 { min[2] } else { max[2] },
                ])
            })
            .collect();
        let faces = vec![
            0, 2, 1, 1, 2, 3, 4, 5, 6, 5, 7, 6, 0, 1, 4, 1, 5, 4,
            2, 6, 3, 3, 6, 7, 0, 4, 2, 2, 4, 6, 1, 3, 5, 3, 7, 5,
        ];
        Self::new(vertices, vec![faces])
    }

    #[inline]
    pub fn extents(&self) -> Vector3<f32> {
        self.bb_max - self.bb_min
    }

    pub fn points(&self) -> Vec<Point3<f32>> {
        self.vertices.iter().map(|v| Point3::from(v.position)).collect()
    }
}

/// One node of a model's mesh tree.
#[derive(Debug, Clone)]
pub struct MeshTreeNode {
    pub mesh: Arc<BaseMesh>,
    /// Resting offset from the parent node.
    pub offset: Vector3<f32>,
    pub parent: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SkeletalModel {
    pub id: ModelId,
    pub mesh_tree: Vec<MeshTreeNode>,
}

impl SkeletalModel {
    #[inline]
    pub fn mesh_count(&self) -> usize {
        self.mesh_tree.len()
    }
}

#[derive(Debug, Clone)]
pub struct Bone {
    /// Pose relative to the entity transform.
    pub local: Isometry3<f32>,
    pub parent: Option<usize>,
    /// Kinematic body while animated, dynamic while ragdolled.
    pub body: Option<RigidBodyHandle>,
}

pub struct Entity {
    pub id: EntityId,
    pub model: ModelId,
    pub transform: Isometry3<f32>,
    pub bones: Vec<Bone>,
    pub container: ContainerId,
    pub is_character: bool,
    pub room: Option<RoomId>,
    pub current_sector: Option<SectorRef>,
    pub last_sector: Option<SectorRef>,
    pub move_type: u16,
    pub dir_flag: u16,
    pub hairs: Vec<Hair>,
    pub ragdoll: Option<Ragdoll>,
}

impl Entity {
    pub fn new(id: EntityId, model: ModelId, transform: Isometry3<f32>, bones: Vec<Bone>, container: ContainerId) -> Self {
        Self {
            id,
            model,
            transform,
            bones,
            container,
            is_character: false,
            room: None,
            current_sector: None,
            last_sector: None,
            move_type: 0,
            dir_flag: 0,
            hairs: Vec::new(),
            ragdoll: None,
        }
    }

    #[inline]
    pub fn position(&self) -> Point3<f32> {
        Point3::from(self.transform.translation.vector)
    }

    pub fn bone_world(&self, bone: usize) -> Option<Isometry3<f32>> {
        self.bones.get(bone).map(|b| self.transform * b.local)
    }

    #[inline]
    pub fn bone_body(&self, bone: usize) -> Option<RigidBodyHandle> {
        self.bones.get(bone).and_then(|b| b.body)
    }

    #[inline]
    pub fn is_ragdolled(&self) -> bool {
        self.ragdoll.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_bounds_cover_all_vertices() {
        let mesh = BaseMesh::new(
            vec![Vertex::at([1.0, -2.0, 0.0]), Vertex::at([-1.0, 3.0, 5.0])],
            vec![],
        );
        assert_eq!(mesh.bb_min, Point3::new(-1.0, -2.0, 0.0));
        assert_eq!(mesh.bb_max, Point3::new(1.0, 3.0, 5.0));
        assert_eq!(mesh.extents(), Vector3::new(2.0, 5.0, 5.0));
    }

    #[test]
    fn cuboid_mesh_has_eight_corners() {
        let mesh = BaseMesh::cuboid([-1.0, 0.0, -1.0], [1.0, 4.0, 1.0]);
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.element_pages[0].len(), 36);
        assert_eq!(mesh.bb_max.y, 4.0);
        assert_eq!(bytemuck::cast_slice::<Vertex, u8>(&mesh.vertices).len(), 8 * 48);
    }
}
