//! Configuration for the odometry estimator.

use serde::{Deserialize, Serialize};

/// Tunable parameters of [`crate::LaserOdometry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdometryConfig {
    /// Maximum admissible surface incidence angle in degrees; steeper
    /// surfaces are rejected as nearly parallel to the ray.
    pub max_surface_angle_deg: f32,

    /// Angular resolution of the laser in degrees.
    pub laser_angle_deg: f32,

    /// Maximum refinement iterations per scan.
    pub max_iterations: u32,

    /// Damping applied to the rotational part of each accepted step.
    pub rotation_damping: f32,

    /// Convergence threshold on the rotation step in degrees.
    pub convergence_rot_deg: f32,

    /// Convergence threshold on the translation step (×100 m).
    pub convergence_trans: f32,

    /// Minimum correspondences required before the motion is updated.
    pub min_correspondences: usize,

    /// Robust-weight cutoff below which a correspondence is discarded.
    pub robust_cutoff: f32,

    /// Maximum squared distance for a nearest-neighbor feature match (m²).
    pub edge_match_max_sq_dist: f32,

    /// Scale on the residual vector of the linearized system.
    pub residual_scale: f32,

    /// Empirical calibration factor for sensor mount orientation, applied to
    /// the Y rotation and Z translation during pose accumulation.
    pub mount_calibration: f32,

    /// Also build point-to-plane correspondences from surface features.
    /// Off by default: edge lines alone match the established behavior.
    pub use_surface_features: bool,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            max_surface_angle_deg: 20.0,
            laser_angle_deg: 0.25,
            max_iterations: 50,
            rotation_damping: 0.1,
            convergence_rot_deg: 0.02,
            convergence_trans: 0.02,
            min_correspondences: 10,
            robust_cutoff: 0.4,
            edge_match_max_sq_dist: 1.0,
            residual_scale: 0.015,
            mount_calibration: 1.0,
            use_surface_features: false,
        }
    }
}

impl OdometryConfig {
    /// Squared law-of-sines ratio used by the parallel-ray rejection:
    /// `sin²(laser angle) / sin²(max surface angle)`.
    pub fn distance_relation(&self) -> f32 {
        let sin_laser = crate::core::math::deg2rad(self.laser_angle_deg).sin();
        let sin_surface = crate::core::math::deg2rad(self.max_surface_angle_deg).sin();
        (sin_laser * sin_laser) / (sin_surface * sin_surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_distance_relation() {
        // sin²(0.25°) / sin²(20°)
        let relation = OdometryConfig::default().distance_relation();
        assert_relative_eq!(relation, 1.627e-4, epsilon = 1e-6);
    }
}
