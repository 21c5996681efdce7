//! Sequential impulse contact constraint solver.
//!
//! Each step the solver consumes the persistent manifolds/points produced by
//! collision detection and turns them into frame-scoped constraint records,
//! warm starts them with the previous step's impulses, is swept a fixed
//! number of times by the caller (projected Gauss-Seidel), and finally writes
//! the converged impulses back into the persistent records.
//!
//! Friction is solved once per manifold at the averaged contact position
//! rather than once per point: a 2D friction problem per contact patch is
//! well conditioned and non-redundant, at the cost of some accuracy on large
//! patches.

use glam::{Mat3, Vec3};
use tracing::trace;

use crate::body::{BodyIndex, BodyType, RigidBodySet};
use crate::collider::ColliderSet;
use crate::contact::{ContactManifold, ContactPoint};
use crate::island::Island;
use crate::material::{
    mix_friction_coefficients, mix_restitution_factors, mix_rolling_resistance,
};

/// Baumgarte stabilization parameter.
pub const BETA: f32 = 0.2;
/// Baumgarte parameter used when split-impulse position correction is active.
///
/// Currently equal to [`BETA`]; the two are independent tunables.
pub const BETA_SPLIT_IMPULSE: f32 = 0.2;
/// Allowed penetration before the stabilization bias kicks in.
pub const SLOP: f32 = 0.01;

/// Process-level solver tunables.
#[derive(Debug, Clone, Copy)]
pub struct SolverConfig {
    /// Correct positions through split pseudo-velocities instead of folding
    /// the depth bias into the real velocities.
    pub split_impulse_active: bool,
    /// Closing speed below which no restitution bias is applied. Suppresses
    /// restitution jitter on resting contacts.
    pub restitution_velocity_threshold: f32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            split_impulse_active: true,
            restitution_velocity_threshold: 0.5,
        }
    }
}

/// Frame-scoped per-point constraint state.
#[derive(Debug, Clone)]
struct PointSolver {
    /// Lever arm from body 1's center of mass to the world contact point.
    r1: Vec3,
    /// Lever arm from body 2's center of mass to the world contact point.
    r2: Vec3,
    normal: Vec3,
    penetration_depth: f32,
    /// I1^-1 * (r1 x n), the angular response of body 1 to a unit normal impulse.
    i1_times_r1_cross_n: Vec3,
    /// I2^-1 * (r2 x n), the angular response of body 2 to a unit normal impulse.
    i2_times_r2_cross_n: Vec3,
    inverse_penetration_mass: f32,
    restitution_bias: f32,
    penetration_impulse: f32,
    penetration_split_impulse: f32,
    is_resting_contact: bool,
    /// Index of the external point this record was built from.
    external_point: usize,
}

/// Frame-scoped per-manifold constraint state.
#[derive(Debug, Clone)]
struct ManifoldSolver {
    body1: BodyIndex,
    body2: BodyIndex,
    inverse_mass1: f32,
    inverse_mass2: f32,
    inverse_inertia1: Mat3,
    inverse_inertia2: Mat3,
    friction_coefficient: f32,
    rolling_resistance_factor: f32,
    /// Normalized sum of the point normals.
    normal: Vec3,
    /// Lever arm from body 1 to the averaged friction anchor.
    r1_friction: Vec3,
    /// Lever arm from body 2 to the averaged friction anchor.
    r2_friction: Vec3,
    r1_cross_t1: Vec3,
    r1_cross_t2: Vec3,
    r2_cross_t1: Vec3,
    r2_cross_t2: Vec3,
    inverse_friction1_mass: f32,
    inverse_friction2_mass: f32,
    inverse_twist_friction_mass: f32,
    /// Inverse of I1^-1 + I2^-1, or zero when singular/disabled.
    inverse_rolling_resistance: Mat3,
    friction_vector1: Vec3,
    friction_vector2: Vec3,
    old_friction_vector1: Vec3,
    old_friction_vector2: Vec3,
    friction1_impulse: f32,
    friction2_impulse: f32,
    friction_twist_impulse: f32,
    rolling_resistance_impulse: Vec3,
    /// Range of this manifold's points in the solver's point array.
    points_index: usize,
    num_points: usize,
    /// Index of the external manifold this record was built from.
    external_manifold: usize,
}

/// The contact constraint solver.
///
/// Owns only frame-scoped state: the internal records are rebuilt by
/// [`init`](ContactSolver::init) each step and released by
/// [`reset`](ContactSolver::reset) at step end. Nothing here survives across
/// steps; cross-frame memory lives in the external manifold/point records.
#[derive(Debug, Default)]
pub struct ContactSolver {
    config: SolverConfig,
    time_step: f32,
    manifolds: Vec<ManifoldSolver>,
    points: Vec<PointSolver>,
}

impl ContactSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            time_step: 0.0,
            manifolds: Vec::new(),
            points: Vec::new(),
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Build the frame-scoped constraints and warm start them.
    ///
    /// Returns immediately (with cleared state) when there is nothing to
    /// solve. Consuming a point also flags its external record as resting for
    /// the next step. Split pseudo-velocities of every touched body are
    /// zeroed here.
    pub fn init(
        &mut self,
        bodies: &mut RigidBodySet,
        colliders: &ColliderSet,
        islands: &[Island],
        manifolds: &[ContactManifold],
        points: &mut [ContactPoint],
        time_step: f32,
    ) {
        debug_assert!(time_step > 0.0);
        self.time_step = time_step;
        self.manifolds.clear();
        self.points.clear();

        if manifolds.is_empty() || points.is_empty() {
            trace!("no contacts to solve this step");
            return;
        }

        trace!(
            num_manifolds = manifolds.len(),
            num_points = points.len(),
            "building contact constraints"
        );

        self.manifolds.reserve_exact(manifolds.len());
        self.points.reserve_exact(points.len());

        for island in islands {
            if island.num_manifolds > 0 {
                self.init_island(bodies, colliders, manifolds, points, island);
            }
        }

        debug_assert_eq!(self.manifolds.len(), manifolds.len());
        debug_assert_eq!(self.points.len(), points.len());

        self.warm_start(bodies);
    }

    fn init_island(
        &mut self,
        bodies: &mut RigidBodySet,
        colliders: &ColliderSet,
        manifolds: &[ContactManifold],
        points: &mut [ContactPoint],
        island: &Island,
    ) {
        let range = island.first_manifold..island.first_manifold + island.num_manifolds;
        for (manifold_index, manifold) in manifolds[range.clone()].iter().enumerate() {
            debug_assert!(manifold.num_points > 0);

            let body1 = manifold.body1;
            let body2 = manifold.body2;
            let x1 = bodies.centers_of_mass[body1];
            let x2 = bodies.centers_of_mass[body2];
            let inverse_mass1 = bodies.inverse_masses[body1];
            let inverse_mass2 = bodies.inverse_masses[body2];
            let inverse_inertia1 = bodies.inverse_inertia_tensors[body1];
            let inverse_inertia2 = bodies.inverse_inertia_tensors[body2];

            // Position correction pseudo-velocities start from zero each step.
            bodies.split_linear_velocities[body1] = Vec3::ZERO;
            bodies.split_angular_velocities[body1] = Vec3::ZERO;
            bodies.split_linear_velocities[body2] = Vec3::ZERO;
            bodies.split_angular_velocities[body2] = Vec3::ZERO;

            let material1 = colliders.material(manifold.collider1);
            let material2 = colliders.material(manifold.collider2);
            let friction_coefficient = mix_friction_coefficients(material1, material2);
            let restitution_factor = mix_restitution_factors(material1, material2);
            let rolling_resistance_factor = mix_rolling_resistance(material1, material2);

            // Restitution is measured against the velocities at the start of
            // the contact, before any constraint runs this step.
            let v1 = bodies.linear_velocities[body1];
            let w1 = bodies.angular_velocities[body1];
            let v2 = bodies.linear_velocities[body2];
            let w2 = bodies.angular_velocities[body2];

            let points_index = self.points.len();
            let mut summed_normal = Vec3::ZERO;
            let mut friction_point1 = Vec3::ZERO;
            let mut friction_point2 = Vec3::ZERO;

            let point_range = manifold.points_index..manifold.points_index + manifold.num_points;
            for (point_offset, external_point) in points[point_range].iter_mut().enumerate() {
                let p1 = colliders.world_point(manifold.collider1, external_point.local_point1);
                let p2 = colliders.world_point(manifold.collider2, external_point.local_point2);
                let normal = external_point.normal;
                let r1 = p1 - x1;
                let r2 = p2 - x2;

                let is_resting_contact = external_point.is_resting_contact;
                external_point.is_resting_contact = true;

                friction_point1 += p1;
                friction_point2 += p2;

                let delta_v = v2 + w2.cross(r2) - v1 - w1.cross(r1);

                let i1_times_r1_cross_n = inverse_inertia1 * r1.cross(normal);
                let i2_times_r2_cross_n = inverse_inertia2 * r2.cross(normal);

                let mass_penetration = inverse_mass1
                    + inverse_mass2
                    + i1_times_r1_cross_n.cross(r1).dot(normal)
                    + i2_times_r2_cross_n.cross(r2).dot(normal);
                let inverse_penetration_mass = if mass_penetration > 0.0 {
                    1.0 / mass_penetration
                } else {
                    0.0
                };

                // Resting contacts (closing slower than the threshold) get no
                // restitution bias.
                let delta_v_dot_n = delta_v.dot(normal);
                let restitution_bias = if delta_v_dot_n < -self.config.restitution_velocity_threshold
                {
                    restitution_factor * delta_v_dot_n
                } else {
                    0.0
                };

                summed_normal += normal;

                self.points.push(PointSolver {
                    r1,
                    r2,
                    normal,
                    penetration_depth: external_point.penetration_depth,
                    i1_times_r1_cross_n,
                    i2_times_r2_cross_n,
                    inverse_penetration_mass,
                    restitution_bias,
                    penetration_impulse: external_point.penetration_impulse,
                    penetration_split_impulse: 0.0,
                    is_resting_contact,
                    external_point: manifold.points_index + point_offset,
                });
            }

            let num_points = manifold.num_points as f32;
            friction_point1 /= num_points;
            friction_point2 /= num_points;
            let r1_friction = friction_point1 - x1;
            let r2_friction = friction_point2 - x2;

            debug_assert!(summed_normal.length_squared() > 0.0);
            let normal = summed_normal.normalize();

            // Rolling resistance solves a 3x3 system; a singular combined
            // inertia (two static-like bodies) collapses to no impulse.
            let is_dynamic_pair = bodies.body_types[body1] == BodyType::Dynamic
                || bodies.body_types[body2] == BodyType::Dynamic;
            let mut inverse_rolling_resistance = Mat3::ZERO;
            if rolling_resistance_factor > 0.0 && is_dynamic_pair {
                let rolling_mass = inverse_inertia1 + inverse_inertia2;
                if rolling_mass.determinant().abs() > f32::EPSILON {
                    inverse_rolling_resistance = rolling_mass.inverse();
                }
            }

            let delta_v_friction_point =
                v2 + w2.cross(r2_friction) - v1 - w1.cross(r1_friction);
            let (friction_vector1, friction_vector2) =
                friction_basis(normal, delta_v_friction_point);

            let r1_cross_t1 = r1_friction.cross(friction_vector1);
            let r1_cross_t2 = r1_friction.cross(friction_vector2);
            let r2_cross_t1 = r2_friction.cross(friction_vector1);
            let r2_cross_t2 = r2_friction.cross(friction_vector2);

            let friction1_mass = inverse_mass1
                + inverse_mass2
                + (inverse_inertia1 * r1_cross_t1)
                    .cross(r1_friction)
                    .dot(friction_vector1)
                + (inverse_inertia2 * r2_cross_t1)
                    .cross(r2_friction)
                    .dot(friction_vector1);
            let friction2_mass = inverse_mass1
                + inverse_mass2
                + (inverse_inertia1 * r1_cross_t2)
                    .cross(r1_friction)
                    .dot(friction_vector2)
                + (inverse_inertia2 * r2_cross_t2)
                    .cross(r2_friction)
                    .dot(friction_vector2);
            let twist_friction_mass =
                normal.dot(inverse_inertia1 * normal) + normal.dot(inverse_inertia2 * normal);

            self.manifolds.push(ManifoldSolver {
                body1,
                body2,
                inverse_mass1,
                inverse_mass2,
                inverse_inertia1,
                inverse_inertia2,
                friction_coefficient,
                rolling_resistance_factor,
                normal,
                r1_friction,
                r2_friction,
                r1_cross_t1,
                r1_cross_t2,
                r2_cross_t1,
                r2_cross_t2,
                inverse_friction1_mass: inverse_or_zero(friction1_mass),
                inverse_friction2_mass: inverse_or_zero(friction2_mass),
                inverse_twist_friction_mass: inverse_or_zero(twist_friction_mass),
                inverse_rolling_resistance,
                friction_vector1,
                friction_vector2,
                old_friction_vector1: manifold.friction_vector1,
                old_friction_vector2: manifold.friction_vector2,
                friction1_impulse: manifold.friction_impulse1,
                friction2_impulse: manifold.friction_impulse2,
                friction_twist_impulse: manifold.friction_twist_impulse,
                rolling_resistance_impulse: manifold.rolling_resistance_impulse,
                points_index,
                num_points: manifold.num_points,
                external_manifold: island.first_manifold + manifold_index,
            });
        }
    }

    /// Re-apply the previous step's accumulated impulses.
    ///
    /// Penetration warm starting is gated per point on the resting flag;
    /// friction/twist/rolling warm starting is gated per manifold on having
    /// at least one resting point, with the carried tangential impulses
    /// re-projected from the previous friction basis into the new one.
    fn warm_start(&mut self, bodies: &mut RigidBodySet) {
        for mi in 0..self.manifolds.len() {
            let (body1, body2, inverse_mass1, inverse_mass2, start, count) = {
                let m = &self.manifolds[mi];
                (
                    m.body1,
                    m.body2,
                    m.inverse_mass1,
                    m.inverse_mass2,
                    m.points_index,
                    m.num_points,
                )
            };

            let mut any_resting_point = false;

            for point in &mut self.points[start..start + count] {
                if point.is_resting_contact {
                    any_resting_point = true;

                    let impulse = point.normal * point.penetration_impulse;
                    bodies.constrained_linear_velocities[body1] -= inverse_mass1 * impulse;
                    bodies.constrained_angular_velocities[body1] -=
                        point.i1_times_r1_cross_n * point.penetration_impulse;
                    bodies.constrained_linear_velocities[body2] += inverse_mass2 * impulse;
                    bodies.constrained_angular_velocities[body2] +=
                        point.i2_times_r2_cross_n * point.penetration_impulse;
                } else {
                    // A new contact point never inherits a stale impulse.
                    point.penetration_impulse = 0.0;
                }
            }

            let m = &mut self.manifolds[mi];

            if any_resting_point {
                // The carried tangential impulses were expressed in the
                // previous basis; project them into the new one.
                let old_impulse = m.friction1_impulse * m.old_friction_vector1
                    + m.friction2_impulse * m.old_friction_vector2;
                m.friction1_impulse = old_impulse.dot(m.friction_vector1);
                m.friction2_impulse = old_impulse.dot(m.friction_vector2);

                // First tangent.
                let linear_impulse = m.friction_vector1 * m.friction1_impulse;
                bodies.constrained_linear_velocities[body1] -= m.inverse_mass1 * linear_impulse;
                bodies.constrained_angular_velocities[body1] +=
                    m.inverse_inertia1 * (-m.r1_cross_t1 * m.friction1_impulse);
                bodies.constrained_linear_velocities[body2] += m.inverse_mass2 * linear_impulse;
                bodies.constrained_angular_velocities[body2] +=
                    m.inverse_inertia2 * (m.r2_cross_t1 * m.friction1_impulse);

                // Second tangent.
                let linear_impulse = m.friction_vector2 * m.friction2_impulse;
                bodies.constrained_linear_velocities[body1] -= m.inverse_mass1 * linear_impulse;
                bodies.constrained_angular_velocities[body1] +=
                    m.inverse_inertia1 * (-m.r1_cross_t2 * m.friction2_impulse);
                bodies.constrained_linear_velocities[body2] += m.inverse_mass2 * linear_impulse;
                bodies.constrained_angular_velocities[body2] +=
                    m.inverse_inertia2 * (m.r2_cross_t2 * m.friction2_impulse);

                // Twist.
                let angular_impulse = m.normal * m.friction_twist_impulse;
                bodies.constrained_angular_velocities[body1] -=
                    m.inverse_inertia1 * angular_impulse;
                bodies.constrained_angular_velocities[body2] +=
                    m.inverse_inertia2 * angular_impulse;

                // Rolling resistance.
                bodies.constrained_angular_velocities[body1] -=
                    m.inverse_inertia1 * m.rolling_resistance_impulse;
                bodies.constrained_angular_velocities[body2] +=
                    m.inverse_inertia2 * m.rolling_resistance_impulse;
            } else {
                // A brand-new manifold never inherits tangential state, even
                // if individual points claim to be resting: friction memory
                // is patch-level, penetration memory is point-level.
                m.friction1_impulse = 0.0;
                m.friction2_impulse = 0.0;
                m.friction_twist_impulse = 0.0;
                m.rolling_resistance_impulse = Vec3::ZERO;
            }
        }
    }

    /// Perform one sequential sweep over all constraints.
    ///
    /// The caller invokes this a fixed number of times per step. Within a
    /// sweep, each manifold's friction limit uses the sum of its points'
    /// normal impulses as updated by this same sweep (the standard lagged
    /// coupling of sequential impulse solvers).
    pub fn solve_velocity_constraints(&mut self, bodies: &mut RigidBodySet) {
        let beta = if self.config.split_impulse_active {
            BETA_SPLIT_IMPULSE
        } else {
            BETA
        };

        for mi in 0..self.manifolds.len() {
            let (body1, body2, inverse_mass1, inverse_mass2, start, count) = {
                let m = &self.manifolds[mi];
                (
                    m.body1,
                    m.body2,
                    m.inverse_mass1,
                    m.inverse_mass2,
                    m.points_index,
                    m.num_points,
                )
            };

            let mut sum_penetration_impulse = 0.0;

            // --- Non-penetration, one constraint per point --- //
            for point in &mut self.points[start..start + count] {
                let v1 = bodies.constrained_linear_velocities[body1];
                let w1 = bodies.constrained_angular_velocities[body1];
                let v2 = bodies.constrained_linear_velocities[body2];
                let w2 = bodies.constrained_angular_velocities[body2];

                let jv = (v2 + w2.cross(point.r2) - v1 - w1.cross(point.r1)).dot(point.normal);

                let bias_penetration_depth = if point.penetration_depth > SLOP {
                    -(beta / self.time_step) * (point.penetration_depth - SLOP).max(0.0)
                } else {
                    0.0
                };

                // With split impulses active the depth bias is deferred to
                // the pseudo-velocity pass below.
                let mut delta_lambda = if self.config.split_impulse_active {
                    -(jv + point.restitution_bias) * point.inverse_penetration_mass
                } else {
                    -(jv + bias_penetration_depth + point.restitution_bias)
                        * point.inverse_penetration_mass
                };
                let lambda_old = point.penetration_impulse;
                // Bodies may only push apart, never pull together.
                point.penetration_impulse = (lambda_old + delta_lambda).max(0.0);
                delta_lambda = point.penetration_impulse - lambda_old;

                let linear_impulse = point.normal * delta_lambda;
                bodies.constrained_linear_velocities[body1] -= inverse_mass1 * linear_impulse;
                bodies.constrained_angular_velocities[body1] -=
                    point.i1_times_r1_cross_n * delta_lambda;
                bodies.constrained_linear_velocities[body2] += inverse_mass2 * linear_impulse;
                bodies.constrained_angular_velocities[body2] +=
                    point.i2_times_r2_cross_n * delta_lambda;
                bodies.apply_velocity_masks(body1);
                bodies.apply_velocity_masks(body2);

                sum_penetration_impulse += point.penetration_impulse;

                if self.config.split_impulse_active {
                    // Position correction against separate pseudo-velocities
                    // so depth correction adds no energy to the real motion.
                    let v1 = bodies.split_linear_velocities[body1];
                    let w1 = bodies.split_angular_velocities[body1];
                    let v2 = bodies.split_linear_velocities[body2];
                    let w2 = bodies.split_angular_velocities[body2];
                    let jv_split =
                        (v2 + w2.cross(point.r2) - v1 - w1.cross(point.r1)).dot(point.normal);

                    let mut delta_lambda_split = -(jv_split + bias_penetration_depth)
                        * point.inverse_penetration_mass;
                    let lambda_old = point.penetration_split_impulse;
                    point.penetration_split_impulse = (lambda_old + delta_lambda_split).max(0.0);
                    delta_lambda_split = point.penetration_split_impulse - lambda_old;

                    let linear_impulse = point.normal * delta_lambda_split;
                    bodies.split_linear_velocities[body1] -= inverse_mass1 * linear_impulse;
                    bodies.split_angular_velocities[body1] -=
                        point.i1_times_r1_cross_n * delta_lambda_split;
                    bodies.split_linear_velocities[body2] += inverse_mass2 * linear_impulse;
                    bodies.split_angular_velocities[body2] +=
                        point.i2_times_r2_cross_n * delta_lambda_split;
                }
            }

            let m = &mut self.manifolds[mi];
            let friction_limit = m.friction_coefficient * sum_penetration_impulse;

            // --- First tangent friction at the manifold anchor --- //
            let v1 = bodies.constrained_linear_velocities[body1];
            let w1 = bodies.constrained_angular_velocities[body1];
            let v2 = bodies.constrained_linear_velocities[body2];
            let w2 = bodies.constrained_angular_velocities[body2];
            let jv = (v2 + w2.cross(m.r2_friction) - v1 - w1.cross(m.r1_friction))
                .dot(m.friction_vector1);

            let mut delta_lambda = -jv * m.inverse_friction1_mass;
            let lambda_old = m.friction1_impulse;
            m.friction1_impulse =
                (lambda_old + delta_lambda).clamp(-friction_limit, friction_limit);
            delta_lambda = m.friction1_impulse - lambda_old;

            let linear_impulse = m.friction_vector1 * delta_lambda;
            bodies.constrained_linear_velocities[body1] -= inverse_mass1 * linear_impulse;
            bodies.constrained_angular_velocities[body1] +=
                m.inverse_inertia1 * (-m.r1_cross_t1 * delta_lambda);
            bodies.constrained_linear_velocities[body2] += inverse_mass2 * linear_impulse;
            bodies.constrained_angular_velocities[body2] +=
                m.inverse_inertia2 * (m.r2_cross_t1 * delta_lambda);

            // --- Second tangent friction at the manifold anchor --- //
            let v1 = bodies.constrained_linear_velocities[body1];
            let w1 = bodies.constrained_angular_velocities[body1];
            let v2 = bodies.constrained_linear_velocities[body2];
            let w2 = bodies.constrained_angular_velocities[body2];
            let jv = (v2 + w2.cross(m.r2_friction) - v1 - w1.cross(m.r1_friction))
                .dot(m.friction_vector2);

            let mut delta_lambda = -jv * m.inverse_friction2_mass;
            let lambda_old = m.friction2_impulse;
            m.friction2_impulse =
                (lambda_old + delta_lambda).clamp(-friction_limit, friction_limit);
            delta_lambda = m.friction2_impulse - lambda_old;

            let linear_impulse = m.friction_vector2 * delta_lambda;
            bodies.constrained_linear_velocities[body1] -= inverse_mass1 * linear_impulse;
            bodies.constrained_angular_velocities[body1] +=
                m.inverse_inertia1 * (-m.r1_cross_t2 * delta_lambda);
            bodies.constrained_linear_velocities[body2] += inverse_mass2 * linear_impulse;
            bodies.constrained_angular_velocities[body2] +=
                m.inverse_inertia2 * (m.r2_cross_t2 * delta_lambda);

            // --- Twist friction about the manifold normal --- //
            let w1 = bodies.constrained_angular_velocities[body1];
            let w2 = bodies.constrained_angular_velocities[body2];
            let jv = (w2 - w1).dot(m.normal);

            let mut delta_lambda = -jv * m.inverse_twist_friction_mass;
            let lambda_old = m.friction_twist_impulse;
            m.friction_twist_impulse =
                (lambda_old + delta_lambda).clamp(-friction_limit, friction_limit);
            delta_lambda = m.friction_twist_impulse - lambda_old;

            let angular_impulse = m.normal * delta_lambda;
            bodies.constrained_angular_velocities[body1] -= m.inverse_inertia1 * angular_impulse;
            bodies.constrained_angular_velocities[body2] += m.inverse_inertia2 * angular_impulse;

            // --- Rolling resistance --- //
            if m.rolling_resistance_factor > 0.0 {
                let w1 = bodies.constrained_angular_velocities[body1];
                let w2 = bodies.constrained_angular_velocities[body2];
                let jv_rolling = w2 - w1;

                let delta_lambda_rolling = m.inverse_rolling_resistance * -jv_rolling;
                let rolling_limit = m.rolling_resistance_factor * sum_penetration_impulse;
                let lambda_old = m.rolling_resistance_impulse;
                m.rolling_resistance_impulse =
                    clamp_to_ball(lambda_old + delta_lambda_rolling, rolling_limit);
                let delta_lambda_rolling = m.rolling_resistance_impulse - lambda_old;

                bodies.constrained_angular_velocities[body1] -=
                    m.inverse_inertia1 * delta_lambda_rolling;
                bodies.constrained_angular_velocities[body2] +=
                    m.inverse_inertia2 * delta_lambda_rolling;
            }
        }
    }

    /// Publish the converged impulses and friction basis to the persistent
    /// records for next step's warm start.
    ///
    /// Must run exactly once per step, after the last sweep and before
    /// [`reset`](ContactSolver::reset).
    pub fn store_impulses(&self, manifolds: &mut [ContactManifold], points: &mut [ContactPoint]) {
        for point in &self.points {
            points[point.external_point].penetration_impulse = point.penetration_impulse;
        }

        for m in &self.manifolds {
            let external = &mut manifolds[m.external_manifold];
            external.friction_impulse1 = m.friction1_impulse;
            external.friction_impulse2 = m.friction2_impulse;
            external.friction_twist_impulse = m.friction_twist_impulse;
            external.rolling_resistance_impulse = m.rolling_resistance_impulse;
            external.friction_vector1 = m.friction_vector1;
            external.friction_vector2 = m.friction_vector2;
        }
    }

    /// Release the frame-scoped constraint records.
    pub fn reset(&mut self) {
        self.manifolds.clear();
        self.points.clear();
    }
}

/// Run a full contact solve: build, warm start, `iterations` sweeps, publish.
///
/// Convenience driver for callers that do not interleave other constraint
/// types between sweeps. The constrained velocity arrays of `bodies` are left
/// ready for the position integrator.
#[allow(clippy::too_many_arguments)]
pub fn solve_contacts(
    bodies: &mut RigidBodySet,
    colliders: &ColliderSet,
    islands: &[Island],
    manifolds: &mut [ContactManifold],
    points: &mut [ContactPoint],
    time_step: f32,
    iterations: u32,
    config: SolverConfig,
) {
    let mut solver = ContactSolver::new(config);
    solver.init(bodies, colliders, islands, manifolds, points, time_step);
    for _ in 0..iterations {
        solver.solve_velocity_constraints(bodies);
    }
    solver.store_impulses(manifolds, points);
    solver.reset();
}

/// Derive the two tangents spanning the friction plane.
///
/// The first tangent follows the tangential relative velocity when it is
/// non-degenerate, otherwise any unit vector orthogonal to the normal. The
/// pair satisfies `t1 x t2 = normal`.
fn friction_basis(normal: Vec3, delta_velocity: Vec3) -> (Vec3, Vec3) {
    let tangent_velocity = delta_velocity - delta_velocity.dot(normal) * normal;
    let tangent_speed = tangent_velocity.length();

    let tangent1 = if tangent_speed > f32::EPSILON {
        tangent_velocity / tangent_speed
    } else {
        normal.any_orthonormal_vector()
    };
    let tangent2 = normal.cross(tangent1).normalize();
    (tangent1, tangent2)
}

fn inverse_or_zero(mass: f32) -> f32 {
    if mass > 0.0 {
        1.0 / mass
    } else {
        0.0
    }
}

/// Scale a vector down to the given radius if it is longer.
fn clamp_to_ball(vector: Vec3, radius: f32) -> Vec3 {
    let length_squared = vector.length_squared();
    if length_squared > radius * radius {
        vector * (radius / length_squared.sqrt())
    } else {
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use glam::Mat4;

    const DT: f32 = 0.01;

    fn combined_config() -> SolverConfig {
        SolverConfig {
            split_impulse_active: false,
            ..Default::default()
        }
    }

    fn material(friction: f32, bounciness: f32, rolling: f32) -> Material {
        Material {
            friction_coefficient: friction,
            bounciness,
            rolling_resistance: rolling,
        }
    }

    type Scene = (
        RigidBodySet,
        ColliderSet,
        Vec<ContactManifold>,
        Vec<ContactPoint>,
        Vec<Island>,
    );

    /// Static ground (body 0) and a dynamic unit-mass sphere (body 1)
    /// centered at (0, 0.5, 0), touching at the origin with normal +Y.
    fn sphere_on_ground(mat: Material, depth: f32) -> Scene {
        let mut bodies = RigidBodySet::new();
        let ground = bodies.add_body(BodyType::Static, 0.0, Mat3::ZERO, Vec3::ZERO);
        let sphere = bodies.add_body(
            BodyType::Dynamic,
            1.0,
            Mat3::IDENTITY,
            Vec3::new(0.0, 0.5, 0.0),
        );

        let mut colliders = ColliderSet::new();
        let c1 = colliders.add_collider(mat, Mat4::IDENTITY);
        let c2 = colliders.add_collider(mat, Mat4::IDENTITY);

        let manifolds = vec![ContactManifold::new(ground, sphere, c1, c2, 0, 1)];
        let points = vec![ContactPoint::new(Vec3::ZERO, Vec3::ZERO, Vec3::Y, depth)];
        let islands = vec![Island::new(0, 1)];
        (bodies, colliders, manifolds, points, islands)
    }

    /// Two dynamic unit-mass spheres on the x axis, touching at the origin
    /// with normal +X, closing head-on at the given speed.
    fn head_on_pair(mat: Material, closing_speed: f32) -> Scene {
        let mut bodies = RigidBodySet::new();
        let left = bodies.add_body(
            BodyType::Dynamic,
            1.0,
            Mat3::IDENTITY,
            Vec3::new(-0.5, 0.0, 0.0),
        );
        let right = bodies.add_body(
            BodyType::Dynamic,
            1.0,
            Mat3::IDENTITY,
            Vec3::new(0.5, 0.0, 0.0),
        );
        bodies.linear_velocities[left] = Vec3::new(0.5 * closing_speed, 0.0, 0.0);
        bodies.linear_velocities[right] = Vec3::new(-0.5 * closing_speed, 0.0, 0.0);
        bodies.sync_constrained_velocities();

        let mut colliders = ColliderSet::new();
        let c1 = colliders.add_collider(mat, Mat4::IDENTITY);
        let c2 = colliders.add_collider(mat, Mat4::IDENTITY);

        let manifolds = vec![ContactManifold::new(left, right, c1, c2, 0, 1)];
        let points = vec![ContactPoint::new(Vec3::ZERO, Vec3::ZERO, Vec3::X, 0.0)];
        let islands = vec![Island::new(0, 1)];
        (bodies, colliders, manifolds, points, islands)
    }

    #[test]
    fn test_resting_contact_produces_separating_velocity() {
        let (mut bodies, colliders, manifolds, mut points, islands) =
            sphere_on_ground(material(0.0, 0.0, 0.0), 0.02);
        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);
        solver.solve_velocity_constraints(&mut bodies);

        // bias = -(0.2 / 0.01) * (0.02 - 0.01) = -0.2 with unit effective mass.
        assert!(solver.points[0].penetration_impulse > 0.0);
        let v = bodies.constrained_linear_velocities[1];
        assert!((v.y - 0.2).abs() < 1e-5, "expected ~0.2, got {}", v.y);
    }

    #[test]
    fn test_separating_contact_accumulates_no_impulse() {
        let (mut bodies, colliders, manifolds, mut points, islands) =
            sphere_on_ground(material(0.0, 0.0, 0.0), 0.005);
        bodies.linear_velocities[1] = Vec3::new(0.0, 1.0, 0.0);
        bodies.sync_constrained_velocities();

        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);
        for _ in 0..4 {
            solver.solve_velocity_constraints(&mut bodies);
        }

        assert_eq!(solver.points[0].penetration_impulse, 0.0);
        assert!((bodies.constrained_linear_velocities[1].y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_head_on_restitution() {
        let (mut bodies, colliders, manifolds, mut points, islands) =
            head_on_pair(material(0.0, 0.5, 0.0), 10.0);
        let config = SolverConfig {
            split_impulse_active: false,
            restitution_velocity_threshold: 1.0,
        };
        let mut solver = ContactSolver::new(config);
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);

        // bias = 0.5 * (-10)
        assert!((solver.points[0].restitution_bias + 5.0).abs() < 1e-5);

        for _ in 0..10 {
            solver.solve_velocity_constraints(&mut bodies);
        }

        let separating = bodies.constrained_linear_velocities[1].x
            - bodies.constrained_linear_velocities[0].x;
        assert!(
            (separating - 5.0).abs() < 1e-4,
            "expected ~5, got {separating}"
        );
        assert!(solver.points[0].penetration_impulse >= 0.0);
    }

    #[test]
    fn test_momentum_conserved_per_sweep() {
        let (mut bodies, colliders, manifolds, mut points, islands) =
            head_on_pair(material(0.8, 0.3, 0.0), 10.0);
        // Add a tangential component so friction impulses fire too.
        bodies.linear_velocities[0] += Vec3::new(0.0, 1.0, 0.0);
        bodies.sync_constrained_velocities();

        let momentum_before =
            bodies.constrained_linear_velocities[0] + bodies.constrained_linear_velocities[1];

        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);
        for _ in 0..5 {
            solver.solve_velocity_constraints(&mut bodies);
        }

        let momentum_after =
            bodies.constrained_linear_velocities[0] + bodies.constrained_linear_velocities[1];
        assert!(
            (momentum_after - momentum_before).length() < 1e-4,
            "momentum drifted: {momentum_before} -> {momentum_after}"
        );
    }

    #[test]
    fn test_friction_basis_orthonormal() {
        let (mut bodies, colliders, manifolds, mut points, islands) =
            sphere_on_ground(material(0.5, 0.0, 0.0), 0.02);
        bodies.linear_velocities[1] = Vec3::new(2.0, 0.0, 0.3);
        bodies.sync_constrained_velocities();

        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);

        let m = &solver.manifolds[0];
        assert!((m.friction_vector1.length() - 1.0).abs() < 1e-5);
        assert!((m.friction_vector2.length() - 1.0).abs() < 1e-5);
        assert!(m.friction_vector1.dot(m.friction_vector2).abs() < 1e-5);
        let cross = m.friction_vector1.cross(m.friction_vector2);
        assert!((cross - m.normal).length() < 1e-5);
    }

    #[test]
    fn test_friction_basis_fallback_when_no_sliding() {
        let (mut bodies, colliders, manifolds, mut points, islands) =
            sphere_on_ground(material(0.5, 0.0, 0.0), 0.02);
        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);

        let m = &solver.manifolds[0];
        assert!((m.friction_vector1.length() - 1.0).abs() < 1e-5);
        assert!(m.friction_vector1.dot(m.normal).abs() < 1e-5);
        assert!((m.friction_vector1.cross(m.friction_vector2) - m.normal).length() < 1e-5);
    }

    #[test]
    fn test_friction_cone_containment() {
        let (mut bodies, colliders, manifolds, mut points, islands) =
            sphere_on_ground(material(0.5, 0.0, 0.0), 0.02);
        bodies.linear_velocities[1] = Vec3::new(2.0, 0.0, 0.0);
        bodies.sync_constrained_velocities();

        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);
        for _ in 0..10 {
            solver.solve_velocity_constraints(&mut bodies);
        }

        let m = &solver.manifolds[0];
        let limit = m.friction_coefficient * solver.points[0].penetration_impulse;
        assert!(m.friction1_impulse.abs() <= limit + 1e-5);
        assert!(m.friction2_impulse.abs() <= limit + 1e-5);
        assert!(m.friction_twist_impulse.abs() <= limit + 1e-5);
        // Sliding this fast saturates the cone.
        assert!((m.friction1_impulse.abs() - limit).abs() < 1e-5);
    }

    #[test]
    fn test_rolling_impulse_containment() {
        let (mut bodies, colliders, manifolds, mut points, islands) =
            sphere_on_ground(material(0.5, 0.0, 0.4), 0.02);
        bodies.angular_velocities[1] = Vec3::new(5.0, 0.0, 0.0);
        bodies.sync_constrained_velocities();

        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);
        for _ in 0..10 {
            solver.solve_velocity_constraints(&mut bodies);
        }

        let m = &solver.manifolds[0];
        let limit = m.rolling_resistance_factor * solver.points[0].penetration_impulse;
        assert!(m.rolling_resistance_impulse.length() <= limit + 1e-4);
        // Spinning this fast saturates the ball.
        assert!((m.rolling_resistance_impulse.length() - limit).abs() < 1e-4);
    }

    #[test]
    fn test_warm_start_with_zero_impulses_is_noop() {
        let (mut bodies, colliders, manifolds, mut points, islands) =
            sphere_on_ground(material(0.5, 0.0, 0.2), 0.02);
        points[0].is_resting_contact = true;

        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);

        for body in 0..bodies.len() {
            assert_eq!(bodies.constrained_linear_velocities[body], Vec3::ZERO);
            assert_eq!(bodies.constrained_angular_velocities[body], Vec3::ZERO);
        }
    }

    #[test]
    fn test_friction_reprojection_preserves_impulses_for_same_basis() {
        let (mut bodies, colliders, mut manifolds, mut points, islands) =
            sphere_on_ground(material(0.5, 0.0, 0.0), 0.02);

        // First step discovers the friction basis and publishes it.
        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);
        solver.store_impulses(&mut manifolds, &mut points);
        solver.reset();

        // Pretend the previous step converged to these friction impulses.
        manifolds[0].friction_impulse1 = 0.3;
        manifolds[0].friction_impulse2 = -0.2;

        // Identical geometry and velocities: the new basis equals the old
        // one, so reprojection must return the impulses unchanged.
        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);
        assert!((solver.manifolds[0].friction1_impulse - 0.3).abs() < 1e-6);
        assert!((solver.manifolds[0].friction2_impulse + 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_new_manifold_resets_friction_state() {
        let (mut bodies, colliders, mut manifolds, mut points, islands) =
            sphere_on_ground(material(0.5, 0.0, 0.2), 0.02);
        // Stale cross-frame state with no resting point to justify it.
        manifolds[0].friction_impulse1 = 0.5;
        manifolds[0].friction_twist_impulse = 0.25;
        manifolds[0].rolling_resistance_impulse = Vec3::new(0.1, 0.0, 0.0);
        points[0].penetration_impulse = 0.7;

        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);

        assert_eq!(solver.points[0].penetration_impulse, 0.0);
        assert_eq!(solver.manifolds[0].friction1_impulse, 0.0);
        assert_eq!(solver.manifolds[0].friction_twist_impulse, 0.0);
        assert_eq!(solver.manifolds[0].rolling_resistance_impulse, Vec3::ZERO);
        assert_eq!(bodies.constrained_linear_velocities[1], Vec3::ZERO);
        assert_eq!(bodies.constrained_angular_velocities[1], Vec3::ZERO);
        // The point is now flagged for next step's warm start.
        assert!(points[0].is_resting_contact);
    }

    #[test]
    fn test_split_impulse_corrects_position_without_real_velocity() {
        let (mut bodies, colliders, manifolds, mut points, islands) =
            sphere_on_ground(material(0.0, 0.0, 0.0), 0.03);
        let mut solver = ContactSolver::new(SolverConfig::default());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);
        solver.solve_velocity_constraints(&mut bodies);

        // Depth bias goes entirely to the pseudo velocities.
        assert!(solver.points[0].penetration_split_impulse > 0.0);
        assert!((bodies.split_linear_velocities[1].y - 0.4).abs() < 1e-5);
        assert_eq!(bodies.constrained_linear_velocities[1], Vec3::ZERO);
    }

    #[test]
    fn test_locked_axes_block_velocity_updates() {
        let (mut bodies, colliders, manifolds, mut points, islands) =
            sphere_on_ground(material(0.0, 0.0, 0.0), 0.02);
        bodies.linear_lock_factors[1] = Vec3::new(1.0, 0.0, 1.0);

        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);
        solver.solve_velocity_constraints(&mut bodies);

        assert!(solver.points[0].penetration_impulse > 0.0);
        assert_eq!(bodies.constrained_linear_velocities[1].y, 0.0);
    }

    #[test]
    fn test_no_contacts_returns_immediately() {
        let mut bodies = RigidBodySet::new();
        let body = bodies.add_body(BodyType::Dynamic, 1.0, Mat3::IDENTITY, Vec3::ZERO);
        bodies.linear_velocities[body] = Vec3::new(1.0, 2.0, 3.0);
        bodies.sync_constrained_velocities();
        let colliders = ColliderSet::new();

        let mut solver = ContactSolver::new(SolverConfig::default());
        solver.init(&mut bodies, &colliders, &[], &[], &mut [], DT);
        solver.solve_velocity_constraints(&mut bodies);
        solver.store_impulses(&mut [], &mut []);
        solver.reset();

        assert!(solver.manifolds.is_empty());
        assert_eq!(
            bodies.constrained_linear_velocities[body],
            Vec3::new(1.0, 2.0, 3.0)
        );
    }

    #[test]
    fn test_warm_start_reaches_steady_state_without_iteration() {
        let (mut bodies, colliders, mut manifolds, mut points, islands) =
            sphere_on_ground(material(0.0, 0.0, 0.0), 0.02);
        bodies.linear_velocities[1] = Vec3::new(0.0, -1.0, 0.0);
        bodies.sync_constrained_velocities();

        // Cold step: converge and publish.
        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);
        for _ in 0..10 {
            solver.solve_velocity_constraints(&mut bodies);
        }
        let steady = solver.points[0].penetration_impulse;
        assert!(steady > 0.0);
        solver.store_impulses(&mut manifolds, &mut points);
        solver.reset();

        // Next step: identical geometry and incoming velocity.
        bodies.linear_velocities[1] = Vec3::new(0.0, -1.0, 0.0);
        bodies.sync_constrained_velocities();

        let mut solver = ContactSolver::new(combined_config());
        solver.init(&mut bodies, &colliders, &islands, &manifolds, &mut points, DT);
        // The warm start alone already applied the steady impulse...
        assert!((solver.points[0].penetration_impulse - steady).abs() < 1e-6);
        // ...so a sweep is a no-op and the residual never increases.
        solver.solve_velocity_constraints(&mut bodies);
        assert!((solver.points[0].penetration_impulse - steady).abs() < 1e-5);
        assert!((bodies.constrained_linear_velocities[1].y - 0.2).abs() < 1e-5);
    }

    #[test]
    fn test_solve_contacts_driver_publishes_results() {
        let (mut bodies, colliders, mut manifolds, mut points, islands) =
            sphere_on_ground(material(0.5, 0.0, 0.0), 0.02);

        solve_contacts(
            &mut bodies,
            &colliders,
            &islands,
            &mut manifolds,
            &mut points,
            DT,
            8,
            combined_config(),
        );

        assert!(points[0].penetration_impulse > 0.0);
        assert!(points[0].is_resting_contact);
        assert!((manifolds[0].friction_vector1.length() - 1.0).abs() < 1e-5);
        assert!((bodies.constrained_linear_velocities[1].y - 0.2).abs() < 1e-5);
    }
}
