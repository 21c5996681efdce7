//! Rigid body component storage consumed by the contact solver.
//!
//! Bodies are stored as parallel component arrays indexed by [`BodyIndex`].
//! Mass properties (inverse mass, inverse world-space inertia tensor, center
//! of mass) are precomputed by the caller; this crate never derives them.
//!
//! Three velocity variants are kept per body:
//!
//! - **current** - the velocities produced by force integration, read when
//!   building constraints (restitution bias, friction basis),
//! - **constrained** - the velocities mutated by the solver and later consumed
//!   by the position integrator,
//! - **split** - pseudo-velocities used only for split-impulse position
//!   correction, never fed back into the simulated motion.

use glam::{Mat3, Vec3};
use thiserror::Error;

/// Index of a rigid body in a [`RigidBodySet`].
pub type BodyIndex = usize;

/// Rigid body classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    /// Affected by forces and collisions.
    Dynamic,
    /// Immovable.
    Static,
    /// Position controlled by user, but affects dynamic bodies.
    Kinematic,
}

/// Error constructing a storage set from caller-supplied component arrays.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("component array `{name}` has length {found}, expected {expected}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Parallel component arrays for all rigid bodies.
#[derive(Debug, Clone, Default)]
pub struct RigidBodySet {
    pub body_types: Vec<BodyType>,
    pub inverse_masses: Vec<f32>,
    /// Inverse inertia tensors in world space.
    pub inverse_inertia_tensors: Vec<Mat3>,
    pub centers_of_mass: Vec<Vec3>,
    pub linear_velocities: Vec<Vec3>,
    pub angular_velocities: Vec<Vec3>,
    pub constrained_linear_velocities: Vec<Vec3>,
    pub constrained_angular_velocities: Vec<Vec3>,
    pub split_linear_velocities: Vec<Vec3>,
    pub split_angular_velocities: Vec<Vec3>,
    /// Per-axis linear velocity lock factors (1.0 = free, 0.0 = locked).
    pub linear_lock_factors: Vec<Vec3>,
    /// Per-axis angular velocity lock factors (1.0 = free, 0.0 = locked).
    pub angular_lock_factors: Vec<Vec3>,
}

impl RigidBodySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from already-computed component arrays.
    ///
    /// All arrays must have the same length. Constrained velocities start
    /// equal to the current velocities, split velocities start at zero, and
    /// all axes start unlocked.
    pub fn from_components(
        body_types: Vec<BodyType>,
        inverse_masses: Vec<f32>,
        inverse_inertia_tensors: Vec<Mat3>,
        centers_of_mass: Vec<Vec3>,
        linear_velocities: Vec<Vec3>,
        angular_velocities: Vec<Vec3>,
    ) -> Result<Self, StorageError> {
        let expected = body_types.len();
        let check = |name: &'static str, found: usize| {
            if found == expected {
                Ok(())
            } else {
                Err(StorageError::LengthMismatch {
                    name,
                    expected,
                    found,
                })
            }
        };
        check("inverse_masses", inverse_masses.len())?;
        check("inverse_inertia_tensors", inverse_inertia_tensors.len())?;
        check("centers_of_mass", centers_of_mass.len())?;
        check("linear_velocities", linear_velocities.len())?;
        check("angular_velocities", angular_velocities.len())?;

        Ok(Self {
            body_types,
            inverse_masses,
            inverse_inertia_tensors,
            centers_of_mass,
            constrained_linear_velocities: linear_velocities.clone(),
            constrained_angular_velocities: angular_velocities.clone(),
            linear_velocities,
            angular_velocities,
            split_linear_velocities: vec![Vec3::ZERO; expected],
            split_angular_velocities: vec![Vec3::ZERO; expected],
            linear_lock_factors: vec![Vec3::ONE; expected],
            angular_lock_factors: vec![Vec3::ONE; expected],
        })
    }

    /// Add a body at rest and return its index.
    pub fn add_body(
        &mut self,
        body_type: BodyType,
        inverse_mass: f32,
        inverse_inertia_tensor: Mat3,
        center_of_mass: Vec3,
    ) -> BodyIndex {
        let index = self.body_types.len();
        self.body_types.push(body_type);
        self.inverse_masses.push(inverse_mass);
        self.inverse_inertia_tensors.push(inverse_inertia_tensor);
        self.centers_of_mass.push(center_of_mass);
        self.linear_velocities.push(Vec3::ZERO);
        self.angular_velocities.push(Vec3::ZERO);
        self.constrained_linear_velocities.push(Vec3::ZERO);
        self.constrained_angular_velocities.push(Vec3::ZERO);
        self.split_linear_velocities.push(Vec3::ZERO);
        self.split_angular_velocities.push(Vec3::ZERO);
        self.linear_lock_factors.push(Vec3::ONE);
        self.angular_lock_factors.push(Vec3::ONE);
        index
    }

    pub fn len(&self) -> usize {
        self.body_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body_types.is_empty()
    }

    /// Copy the current velocities into the constrained velocity arrays.
    ///
    /// Called by the outer loop after force integration, before the solver
    /// runs. Tests and simple drivers can use it to seed a step.
    pub fn sync_constrained_velocities(&mut self) {
        self.constrained_linear_velocities
            .copy_from_slice(&self.linear_velocities);
        self.constrained_angular_velocities
            .copy_from_slice(&self.angular_velocities);
    }

    /// Apply the per-axis velocity lock factors to one body.
    ///
    /// Masks both the constrained and the current velocity arrays. This runs
    /// after every impulse application so locked axes never accumulate
    /// velocity.
    pub fn apply_velocity_masks(&mut self, body: BodyIndex) {
        let linear = self.linear_lock_factors[body];
        let angular = self.angular_lock_factors[body];
        self.constrained_linear_velocities[body] *= linear;
        self.constrained_angular_velocities[body] *= angular;
        self.linear_velocities[body] *= linear;
        self.angular_velocities[body] *= angular;
    }
}
