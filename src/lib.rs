//! Sequential-impulse contact constraint solver for rigid body simulation.
//!
//! Given the touching body pairs found by collision detection, this crate
//! computes the impulses that make the bodies' velocities consistent with
//! non-penetration, Coulomb friction, twist friction, rolling resistance, and
//! restitution, with warm starting across steps and optional split-impulse
//! position correction.
//!
//! # Architecture
//!
//! One step runs through four stages:
//!
//! 1. **Build** - external manifolds/points plus body state become
//!    frame-scoped constraint records, grouped by island
//!    ([`ContactSolver::init`])
//! 2. **Warm start** - the previous step's accumulated impulses are
//!    re-applied, friction re-projected into the fresh basis (inside `init`)
//! 3. **Iterate** - the caller sweeps all constraints a fixed number of times
//!    ([`ContactSolver::solve_velocity_constraints`])
//! 4. **Publish** - converged impulses are written back into the persistent
//!    records for the next step ([`ContactSolver::store_impulses`])
//!
//! Collision detection, island construction, and position integration are
//! external collaborators: bodies, colliders, manifolds, points, and islands
//! are consumed as already-computed data ([`RigidBodySet`], [`ColliderSet`],
//! [`ContactManifold`], [`ContactPoint`], [`Island`]).

pub mod body;
pub mod collider;
pub mod contact;
pub mod island;
pub mod material;
pub mod solver;

pub use body::{BodyIndex, BodyType, RigidBodySet, StorageError};
pub use collider::{ColliderIndex, ColliderSet};
pub use contact::{ContactManifold, ContactPoint};
pub use island::Island;
pub use material::{
    mix_friction_coefficients, mix_restitution_factors, mix_rolling_resistance, Material,
};
pub use solver::{solve_contacts, ContactSolver, SolverConfig, BETA, BETA_SPLIT_IMPULSE, SLOP};
