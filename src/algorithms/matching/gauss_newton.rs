//! Damped Gauss-Newton refinement of the 6-DoF inter-sweep motion.
//!
//! One step assembles the normal equations of the linearized point-to-line
//! (and optionally point-to-plane) residuals and solves them by QR with
//! column pivoting. The rotational derivatives are the closed forms of the
//! intrinsic Z-X-Y Euler parameterization composed with each correspondence's
//! weighted gradient; every quantity is evaluated at the motion scaled by the
//! per-call sweep fraction.

use nalgebra::{Matrix6, Vector6};

use crate::algorithms::matching::correspondence::Correspondence;
use crate::core::math::rad2deg;
use crate::core::types::Transform6;
use crate::error::{OdometryError, Result};

/// Per-axis bound on one rotation step in radians; larger solutions are
/// rejected as divergent.
const ROTATION_STEP_BOUND: f32 = 0.005;
/// Per-axis bound on one translation step in meters.
const TRANSLATION_STEP_BOUND: f32 = 0.01;
/// Gradient norm below which a rank-deficient system counts as stationary.
const STATIONARY_GRADIENT: f32 = 1e-9;

/// Solver parameters, lifted from the estimator configuration.
#[derive(Debug, Clone, Copy)]
pub struct StepConfig {
    /// Fewer correspondences than this and the step refuses to update.
    pub min_correspondences: usize,
    /// Damping applied to the rotational part of an accepted step.
    pub rotation_damping: f32,
    /// Scale on the residual vector.
    pub residual_scale: f32,
    /// Convergence threshold on the rotation step in degrees.
    pub convergence_rot_deg: f32,
    /// Convergence threshold on the translation step (×100 m).
    pub convergence_trans: f32,
}

/// What one refinement step did to the motion estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step applied and small enough that iteration can stop.
    Converged,
    /// Step applied; keep iterating.
    Updated,
    /// Too few correspondences; state untouched.
    InsufficientCorrespondences,
    /// Solution exceeded the per-axis bounds; state untouched.
    OutOfBounds,
    /// Normal equations were rank-deficient away from a stationary point;
    /// state untouched.
    Degenerate,
}

impl StepOutcome {
    /// Whether repeating the step with unchanged state could do anything.
    #[inline]
    pub fn made_progress(&self) -> bool {
        matches!(self, StepOutcome::Converged | StepOutcome::Updated)
    }
}

/// Refine `transform` in place from the given correspondences.
///
/// `sweep_fraction` is the fraction of the previous sweep's duration elapsed
/// since the last scan; `relative_sweep_time` how far the current scan sits
/// into the current sweep relative to the previous sweep's duration.
pub fn refine_step(
    correspondences: &[Correspondence],
    transform: &mut Transform6,
    sweep_fraction: f32,
    relative_sweep_time: f32,
    config: &StepConfig,
) -> Result<StepOutcome> {
    if correspondences.len() < config.min_correspondences {
        return Ok(StepOutcome::InsufficientCorrespondences);
    }

    let s = sweep_fraction;
    let (srx, crx) = (s * transform.rx).sin_cos();
    let (sry, cry) = (s * transform.ry).sin_cos();
    let (srz, crz) = (s * transform.rz).sin_cos();
    let tx = s * transform.tx;
    let ty = s * transform.ty;
    let tz = s * transform.tz;

    let mut ata = Matrix6::<f32>::zeros();
    let mut atb = Vector6::<f32>::zeros();

    for corr in correspondences {
        let p = corr.point;
        let c = corr.coeff;

        let arx = (-s * crx * sry * srz * p.x + s * crx * crz * sry * p.y + s * srx * sry * p.z
            + s * tx * crx * sry * srz
            - s * ty * crx * crz * sry
            - s * tz * srx * sry)
            * c.x
            + (s * srx * srz * p.x - s * crz * srx * p.y + s * crx * p.z + s * ty * crz * srx
                - s * tz * crx
                - s * tx * srx * srz)
                * c.y
            + (s * crx * cry * srz * p.x - s * crx * cry * crz * p.y - s * cry * srx * p.z
                + s * tz * cry * srx
                + s * ty * crx * cry * crz
                - s * tx * crx * cry * srz)
                * c.z;

        let ary = ((-s * crz * sry - s * cry * srx * srz) * p.x
            + (s * cry * crz * srx - s * sry * srz) * p.y
            - s * crx * cry * p.z
            + tx * (s * crz * sry + s * cry * srx * srz)
            + ty * (s * sry * srz - s * cry * crz * srx)
            + s * tz * crx * cry)
            * c.x
            + ((s * cry * crz - s * srx * sry * srz) * p.x
                + (s * cry * srz + s * crz * srx * sry) * p.y
                - s * crx * sry * p.z
                + s * tz * crx * sry
                - ty * (s * cry * srz + s * crz * srx * sry)
                - tx * (s * cry * crz - s * srx * sry * srz))
                * c.z;

        let arz = ((-s * cry * srz - s * crz * srx * sry) * p.x
            + (s * cry * crz - s * srx * sry * srz) * p.y
            + tx * (s * cry * srz + s * crz * srx * sry)
            - ty * (s * cry * crz - s * srx * sry * srz))
            * c.x
            + (-s * crx * crz * p.x - s * crx * srz * p.y
                + s * ty * crx * srz
                + s * tx * crx * crz)
                * c.y
            + ((s * cry * crz * srx - s * sry * srz) * p.x
                + (s * crz * sry + s * cry * srx * srz) * p.y
                + tx * (s * sry * srz - s * cry * crz * srx)
                - ty * (s * crz * sry + s * cry * srx * srz))
                * c.z;

        let atx = -s * (cry * crz - srx * sry * srz) * c.x + s * crx * srz * c.y
            - s * (crz * sry + cry * srx * srz) * c.z;

        let aty = -s * (cry * srz + crz * srx * sry) * c.x
            - s * crx * crz * c.y
            - s * (sry * srz - cry * crz * srx) * c.z;

        let atz = s * crx * sry * c.x - s * srx * c.y - s * crx * cry * c.z;

        let row = Vector6::new(arx, ary, arz, atx, aty, atz);
        let b = -config.residual_scale * relative_sweep_time * c.d;

        ata += row * row.transpose();
        atb += row * b;
    }

    if !ata.iter().all(|v| v.is_finite()) || !atb.iter().all(|v| v.is_finite()) {
        return Err(OdometryError::NonFiniteTransform {
            context: "normal equations",
        });
    }

    let x = match ata.col_piv_qr().solve(&atb) {
        Some(x) => x,
        None => {
            if atb.norm() < STATIONARY_GRADIENT {
                // All residuals vanish: the estimate already matches the
                // previous sweep.
                return Ok(StepOutcome::Converged);
            }
            log::warn!(
                "rank-deficient normal equations from {} correspondences",
                correspondences.len()
            );
            return Ok(StepOutcome::Degenerate);
        }
    };
    if !x.iter().all(|v| v.is_finite()) {
        return Err(OdometryError::NonFiniteTransform {
            context: "motion update",
        });
    }

    let rotation_ok = x[0].abs() < ROTATION_STEP_BOUND
        && x[1].abs() < ROTATION_STEP_BOUND
        && x[2].abs() < ROTATION_STEP_BOUND;
    let translation_ok = x[3].abs() < TRANSLATION_STEP_BOUND
        && x[4].abs() < TRANSLATION_STEP_BOUND
        && x[5].abs() < TRANSLATION_STEP_BOUND;
    if !rotation_ok || !translation_ok {
        log::warn!(
            "motion update out of bounds (rot {:.4} {:.4} {:.4}, trans {:.4} {:.4} {:.4})",
            x[0],
            x[1],
            x[2],
            x[3],
            x[4],
            x[5]
        );
        return Ok(StepOutcome::OutOfBounds);
    }

    transform.rx += config.rotation_damping * x[0];
    transform.ry += config.rotation_damping * x[1];
    transform.rz += config.rotation_damping * x[2];
    transform.tx += x[3];
    transform.ty += x[4];
    transform.tz += x[5];

    let delta_r = (rad2deg(x[0]).powi(2) + rad2deg(x[1]).powi(2) + rad2deg(x[2]).powi(2)).sqrt();
    let delta_t =
        ((x[3] * 100.0).powi(2) + (x[4] * 100.0).powi(2) + (x[5] * 100.0).powi(2)).sqrt();

    if delta_r < config.convergence_rot_deg && delta_t < config.convergence_trans {
        Ok(StepOutcome::Converged)
    } else {
        Ok(StepOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::matching::correspondence::Coefficient;
    use crate::core::types::Point3D;
    use approx::assert_relative_eq;

    fn step_config() -> StepConfig {
        StepConfig {
            min_correspondences: 10,
            rotation_damping: 0.1,
            residual_scale: 0.015,
            convergence_rot_deg: 0.02,
            convergence_trans: 0.02,
        }
    }

    fn corr(p: [f32; 3], c: [f32; 3], d: f32) -> Correspondence {
        Correspondence {
            point: Point3D::new(p[0], p[1], p[2]),
            coeff: Coefficient {
                x: c[0],
                y: c[1],
                z: c[2],
                d,
            },
        }
    }

    /// Twelve correspondences with axis-aligned gradients and lever arms in
    /// balanced ± pairs: rotations cancel exactly and the translation
    /// solution can be computed by hand.
    fn balanced_set(d_x: f32) -> Vec<Correspondence> {
        vec![
            corr([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], d_x),
            corr([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], d_x),
            corr([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], d_x),
            corr([0.0, 0.0, -1.0], [1.0, 0.0, 0.0], d_x),
            corr([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], 0.0),
            corr([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], 0.0),
            corr([0.0, 0.0, 1.0], [0.0, 1.0, 0.0], 0.0),
            corr([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], 0.0),
            corr([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], 0.0),
            corr([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], 0.0),
            corr([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], 0.0),
            corr([0.0, -1.0, 0.0], [0.0, 0.0, 1.0], 0.0),
        ]
    }

    #[test]
    fn test_too_few_correspondences() {
        let corrs = vec![corr([1.0, 0.0, 0.0], [1.0, 0.0, 0.0], 0.1); 9];
        let mut transform = Transform6::zero();
        let outcome =
            refine_step(&corrs, &mut transform, 1.0, 1.0, &step_config()).unwrap();
        assert_eq!(outcome, StepOutcome::InsufficientCorrespondences);
        assert_eq!(transform, Transform6::zero());
    }

    #[test]
    fn test_zero_residuals_converge_without_update() {
        // Degenerate correspondences (points exactly on their lines) carry
        // zero gradients: the system is singular but already stationary.
        let corrs = vec![corr([1.0, 2.0, 3.0], [0.0, 0.0, 0.0], 0.0); 12];
        let mut transform = Transform6::zero();
        let outcome =
            refine_step(&corrs, &mut transform, 1.0, 1.0, &step_config()).unwrap();
        assert_eq!(outcome, StepOutcome::Converged);
        assert_eq!(transform, Transform6::zero());
    }

    #[test]
    fn test_translation_step_solution() {
        // At zero motion the translation rows are -s * gradient, so the
        // least-squares step is residual_scale * d / 1 along x.
        let corrs = balanced_set(0.2);
        let mut transform = Transform6::zero();
        let outcome =
            refine_step(&corrs, &mut transform, 1.0, 1.0, &step_config()).unwrap();
        assert_eq!(outcome, StepOutcome::Updated);
        assert_relative_eq!(transform.tx, 0.015 * 0.2, epsilon = 1e-6);
        assert_relative_eq!(transform.ty, 0.0, epsilon = 1e-6);
        assert_relative_eq!(transform.tz, 0.0, epsilon = 1e-6);
        assert_relative_eq!(transform.rx, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_relative_sweep_time_scales_the_step() {
        let corrs = balanced_set(0.2);
        let mut transform = Transform6::zero();
        refine_step(&corrs, &mut transform, 1.0, 0.5, &step_config()).unwrap();
        assert_relative_eq!(transform.tx, 0.5 * 0.015 * 0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_out_of_bounds_step_is_rejected() {
        // Huge residuals ask for a > 1 cm jump in one step.
        let corrs = balanced_set(1.0);
        let mut transform = Transform6::zero();
        let outcome =
            refine_step(&corrs, &mut transform, 1.0, 1.0, &step_config()).unwrap();
        assert_eq!(outcome, StepOutcome::OutOfBounds);
        assert_eq!(transform, Transform6::zero());
    }

    #[test]
    fn test_tiny_step_reports_convergence() {
        let corrs = balanced_set(1e-4);
        let mut transform = Transform6::zero();
        let outcome =
            refine_step(&corrs, &mut transform, 1.0, 1.0, &step_config()).unwrap();
        assert_eq!(outcome, StepOutcome::Converged);
        assert!(transform.tx > 0.0);
    }

    #[test]
    fn test_non_finite_coefficient_is_an_error() {
        let mut corrs = balanced_set(0.2);
        corrs[0].coeff.x = f32::NAN;
        let mut transform = Transform6::zero();
        assert!(refine_step(&corrs, &mut transform, 1.0, 1.0, &step_config()).is_err());
    }
}
