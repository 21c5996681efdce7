//! Cross-frame persistent contact records.
//!
//! Manifolds and points are created and re-geometried by collision detection
//! each step. The solver consumes them, then writes its converged impulses
//! and friction basis back so the next step can warm start. They are never
//! destroyed by the solver.

use glam::Vec3;

use crate::body::BodyIndex;
use crate::collider::ColliderIndex;

/// A single contact point between two colliders.
#[derive(Debug, Clone, Copy)]
pub struct ContactPoint {
    /// Contact point in the local space of the first collider.
    pub local_point1: Vec3,
    /// Contact point in the local space of the second collider.
    pub local_point2: Vec3,
    /// Contact normal in world space, pointing from the first body toward
    /// the second.
    pub normal: Vec3,
    /// Penetration depth.
    pub penetration_depth: f32,
    /// Whether this point already existed last step (eligible for warm
    /// starting). Set by the solver once the point has been consumed.
    pub is_resting_contact: bool,
    /// Accumulated normal impulse from the previous step.
    pub penetration_impulse: f32,
}

impl ContactPoint {
    /// Create a fresh contact point with no cross-frame history.
    pub fn new(
        local_point1: Vec3,
        local_point2: Vec3,
        normal: Vec3,
        penetration_depth: f32,
    ) -> Self {
        Self {
            local_point1,
            local_point2,
            normal,
            penetration_depth,
            is_resting_contact: false,
            penetration_impulse: 0.0,
        }
    }
}

/// A contact patch between two bodies, owning a contiguous range of points.
#[derive(Debug, Clone, Copy)]
pub struct ContactManifold {
    pub body1: BodyIndex,
    pub body2: BodyIndex,
    pub collider1: ColliderIndex,
    pub collider2: ColliderIndex,
    /// Offset of this manifold's first point in the global point array.
    pub points_index: usize,
    /// Number of contact points (points are contiguous per manifold).
    pub num_points: usize,
    /// Accumulated friction impulse along the first tangent.
    pub friction_impulse1: f32,
    /// Accumulated friction impulse along the second tangent.
    pub friction_impulse2: f32,
    /// Accumulated twist friction impulse about the normal.
    pub friction_twist_impulse: f32,
    /// Accumulated rolling resistance impulse.
    pub rolling_resistance_impulse: Vec3,
    /// Friction basis from the previous step (first tangent).
    pub friction_vector1: Vec3,
    /// Friction basis from the previous step (second tangent).
    pub friction_vector2: Vec3,
}

impl ContactManifold {
    /// Create a fresh manifold with no cross-frame history.
    pub fn new(
        body1: BodyIndex,
        body2: BodyIndex,
        collider1: ColliderIndex,
        collider2: ColliderIndex,
        points_index: usize,
        num_points: usize,
    ) -> Self {
        Self {
            body1,
            body2,
            collider1,
            collider2,
            points_index,
            num_points,
            friction_impulse1: 0.0,
            friction_impulse2: 0.0,
            friction_twist_impulse: 0.0,
            rolling_resistance_impulse: Vec3::ZERO,
            friction_vector1: Vec3::ZERO,
            friction_vector2: Vec3::ZERO,
        }
    }
}
