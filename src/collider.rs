//! Collider component storage: materials and local-to-world transforms.

use glam::{Mat4, Vec3};

use crate::material::Material;

/// Index of a collider in a [`ColliderSet`].
pub type ColliderIndex = usize;

/// Parallel component arrays for all colliders.
///
/// Shapes themselves are irrelevant to contact resolution; only the surface
/// material and the local-to-world transform (used to bring cached local
/// contact points into world space) are stored here.
#[derive(Debug, Clone, Default)]
pub struct ColliderSet {
    materials: Vec<Material>,
    local_to_world: Vec<Mat4>,
}

impl ColliderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collider(&mut self, material: Material, local_to_world: Mat4) -> ColliderIndex {
        let index = self.materials.len();
        self.materials.push(material);
        self.local_to_world.push(local_to_world);
        index
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn material(&self, collider: ColliderIndex) -> &Material {
        &self.materials[collider]
    }

    pub fn local_to_world(&self, collider: ColliderIndex) -> &Mat4 {
        &self.local_to_world[collider]
    }

    /// Update a collider's transform (once per step, before solving).
    pub fn set_local_to_world(&mut self, collider: ColliderIndex, transform: Mat4) {
        self.local_to_world[collider] = transform;
    }

    /// Transform a point from the collider's local space to world space.
    pub fn world_point(&self, collider: ColliderIndex, local_point: Vec3) -> Vec3 {
        self.local_to_world[collider].transform_point3(local_point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_point_applies_transform() {
        let mut colliders = ColliderSet::new();
        let collider = colliders.add_collider(
            Material::default(),
            Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0)),
        );

        let world = colliders.world_point(collider, Vec3::new(1.0, 0.0, 0.0));
        assert!((world - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-6);
    }
}
