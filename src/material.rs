//! Surface materials and per-pair coefficient mixing.

/// Surface properties of a collider used for contact response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Coulomb friction coefficient (0.0 = frictionless).
    pub friction_coefficient: f32,
    /// Coefficient of restitution (0.0 - 1.0).
    pub bounciness: f32,
    /// Rolling resistance factor (0.0 = disabled).
    pub rolling_resistance: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            friction_coefficient: 0.3,
            bounciness: 0.5,
            rolling_resistance: 0.0,
        }
    }
}

/// Mix the friction coefficients of two touching colliders.
///
/// Uses the geometric mean, so a single frictionless surface yields a
/// frictionless pair.
pub fn mix_friction_coefficients(material1: &Material, material2: &Material) -> f32 {
    (material1.friction_coefficient * material2.friction_coefficient).sqrt()
}

/// Mix the restitution factors of two touching colliders.
///
/// The bouncier surface wins.
pub fn mix_restitution_factors(material1: &Material, material2: &Material) -> f32 {
    material1.bounciness.max(material2.bounciness)
}

/// Mix the rolling resistance factors of two touching colliders.
pub fn mix_rolling_resistance(material1: &Material, material2: &Material) -> f32 {
    0.5 * (material1.rolling_resistance + material2.rolling_resistance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_friction_geometric_mean() {
        let m1 = Material {
            friction_coefficient: 0.4,
            ..Default::default()
        };
        let m2 = Material {
            friction_coefficient: 0.9,
            ..Default::default()
        };
        let mixed = mix_friction_coefficients(&m1, &m2);
        assert!((mixed - (0.4f32 * 0.9).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_mix_friction_frictionless_surface_wins() {
        let slippery = Material {
            friction_coefficient: 0.0,
            ..Default::default()
        };
        let rough = Material {
            friction_coefficient: 1.0,
            ..Default::default()
        };
        assert_eq!(mix_friction_coefficients(&slippery, &rough), 0.0);
    }

    #[test]
    fn test_mix_restitution_takes_max() {
        let dull = Material {
            bounciness: 0.1,
            ..Default::default()
        };
        let bouncy = Material {
            bounciness: 0.8,
            ..Default::default()
        };
        assert_eq!(mix_restitution_factors(&dull, &bouncy), 0.8);
        assert_eq!(mix_restitution_factors(&bouncy, &dull), 0.8);
    }

    #[test]
    fn test_mix_rolling_resistance_average() {
        let m1 = Material {
            rolling_resistance: 0.2,
            ..Default::default()
        };
        let m2 = Material {
            rolling_resistance: 0.4,
            ..Default::default()
        };
        assert!((mix_rolling_resistance(&m1, &m2) - 0.3).abs() < 1e-6);
    }
}
