//! Incremental scan-to-sweep odometry.
//!
//! Feeding order drives everything: `add_scan` for every scan of the
//! current sweep, `finish_sweep` when the rotation completes. Each scan is
//! feature-extracted into the per-sweep buffers; once a prior sweep exists,
//! the in-sweep motion is predicted forward under a constant-velocity
//! assumption and refined against the previous sweep's features. At the
//! sweep boundary the refined motion is folded into the global pose and the
//! buffers rotate.

use crate::algorithms::compensation::SweepWarp;
use crate::algorithms::features::FeatureExtractor;
use crate::algorithms::matching::{
    find_edge_correspondences_into, find_surface_correspondences_into, refine_step, Correspondence,
    FeatureIndex, StepConfig, StepOutcome,
};
use crate::core::types::{PointCloud3D, Transform6};
use crate::engine::config::OdometryConfig;
use crate::error::{OdometryError, Result};

/// Sentinel for "no sweep boundary seen yet".
const UNSET_TIME: f64 = -1.0;

/// Outcome of one `calculate_pose` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveReport {
    /// The refinement converged within the iteration budget.
    pub converged: bool,
    /// Refinement iterations executed.
    pub iterations: u32,
    /// Correspondences found in the last executed iteration.
    pub correspondences: usize,
}

impl SolveReport {
    /// Report for a call that had nothing to do.
    fn skipped() -> Self {
        Self::default()
    }
}

/// Feature-based 3D LiDAR odometry estimator.
///
/// Owns all feature buffers, spatial indices and motion state. Input scans
/// are borrowed read-only; the points retained as features are copied.
/// Strictly single-threaded: callers sequence `add_scan` and `finish_sweep`.
#[derive(Debug, Clone)]
pub struct LaserOdometry {
    config: OdometryConfig,
    extractor: FeatureExtractor,

    /// Length of the first scan; brackets the temporal-neighbor search.
    scan_size: Option<usize>,
    /// Absolute time of the first scan in seconds.
    initial_time: f64,
    current_scan_time: f64,
    last_scan_time: f64,
    current_sweep_start: f64,
    last_sweep_start: f64,
    /// Position of the current scan within the current sweep, in units of
    /// the previous sweep's duration.
    relative_sweep_time: f64,

    edge_points: PointCloud3D,
    surface_points: PointCloud3D,
    extra_points: PointCloud3D,
    last_edge_points: PointCloud3D,
    last_surface_points: PointCloud3D,
    last_sweep: PointCloud3D,

    edge_index: FeatureIndex,
    surface_index: FeatureIndex,

    /// In-sweep incremental motion, sweep start to sweep end.
    transform: Transform6,
    /// Previous sweep's finalized motion; constant-velocity predictor.
    transform_rec: Transform6,
    /// Accumulated global pose from the origin.
    transform_sum: Transform6,

    /// Correspondence scratch reused across iterations.
    correspondences: Vec<Correspondence>,
}

impl LaserOdometry {
    /// Create an estimator with the given configuration.
    pub fn new(config: OdometryConfig) -> Self {
        let extractor = FeatureExtractor::new(config.distance_relation());
        Self {
            config,
            extractor,
            scan_size: None,
            initial_time: UNSET_TIME,
            current_scan_time: 0.0,
            last_scan_time: 0.0,
            current_sweep_start: UNSET_TIME,
            last_sweep_start: UNSET_TIME,
            relative_sweep_time: 0.0,
            edge_points: PointCloud3D::new(),
            surface_points: PointCloud3D::new(),
            extra_points: PointCloud3D::new(),
            last_edge_points: PointCloud3D::new(),
            last_surface_points: PointCloud3D::new(),
            last_sweep: PointCloud3D::new(),
            edge_index: FeatureIndex::default(),
            surface_index: FeatureIndex::default(),
            transform: Transform6::zero(),
            transform_rec: Transform6::zero(),
            transform_sum: Transform6::zero(),
            correspondences: Vec::new(),
        }
    }

    /// Ingest the next scan of the current sweep.
    ///
    /// Extracts features, then — once a prior sweep exists — predicts the
    /// in-sweep motion forward and refines it against the previous sweep.
    /// Returns `None` while no prior sweep is available. A non-finite error
    /// halts the motion update but keeps the extracted features, so the next
    /// scan can proceed.
    pub fn add_scan(&mut self, scan: &PointCloud3D) -> Result<Option<SolveReport>> {
        if self.scan_size.is_none() {
            self.scan_size = Some(scan.len());
            self.initial_time = scan.header.stamp_seconds();
        }
        self.edge_points.header = scan.header.clone();
        self.surface_points.header = scan.header.clone();
        self.extra_points.header = scan.header.clone();

        self.last_scan_time = self.current_scan_time;
        self.current_scan_time = scan.header.stamp_seconds() - self.initial_time;

        self.relative_sweep_time = if self.current_sweep_start > self.last_sweep_start
            && self.last_sweep_start > 0.0
        {
            (self.current_scan_time - self.current_sweep_start)
                / (self.current_sweep_start - self.last_sweep_start)
        } else {
            0.0
        };

        self.extractor.extract(
            scan,
            self.current_scan_time,
            &mut self.edge_points,
            &mut self.surface_points,
            &mut self.extra_points,
        );

        if self.last_sweep_start <= 0.0 {
            return Ok(None);
        }

        let s = ((self.current_scan_time - self.last_scan_time)
            / (self.current_sweep_start - self.last_sweep_start)) as f32;
        if !s.is_finite() {
            return Err(OdometryError::NonFiniteTiming {
                scan_time: self.current_scan_time,
                sweep_start: self.current_sweep_start,
            });
        }
        self.transform.add_scaled(&self.transform_rec, s);

        self.calculate_pose().map(Some)
    }

    /// Refine the in-sweep motion against the previous sweep's features.
    ///
    /// Iterates correspondence search and damped Gauss-Newton steps until
    /// convergence, the iteration budget, or a step that cannot make
    /// progress. Returns silently with a skipped report when no prior sweep
    /// features exist.
    pub fn calculate_pose(&mut self) -> Result<SolveReport> {
        if self.last_edge_points.is_empty() {
            return Ok(SolveReport::skipped());
        }
        let scan_size = self.scan_size.unwrap_or(0);

        let s = ((self.current_scan_time - self.last_scan_time)
            / (self.current_sweep_start - self.last_sweep_start)) as f32;
        if !s.is_finite() {
            return Err(OdometryError::NonFiniteTiming {
                scan_time: self.current_scan_time,
                sweep_start: self.current_sweep_start,
            });
        }

        let step_config = StepConfig {
            min_correspondences: self.config.min_correspondences,
            rotation_damping: self.config.rotation_damping,
            residual_scale: self.config.residual_scale,
            convergence_rot_deg: self.config.convergence_rot_deg,
            convergence_trans: self.config.convergence_trans,
        };

        let mut report = SolveReport::skipped();
        for _ in 0..self.config.max_iterations {
            report.iterations += 1;

            let mut corrs = std::mem::take(&mut self.correspondences);
            let warp = SweepWarp {
                transform: &self.transform,
                sweep_start: self.current_sweep_start,
                scan_time: self.current_scan_time,
            };
            let mut searched = find_edge_correspondences_into(
                &self.edge_points,
                &self.last_edge_points,
                &self.edge_index,
                &warp,
                scan_size,
                self.config.edge_match_max_sq_dist,
                self.config.robust_cutoff,
                &mut corrs,
            );
            if searched.is_ok() && self.config.use_surface_features {
                searched = find_surface_correspondences_into(
                    &self.surface_points,
                    &self.last_surface_points,
                    &self.surface_index,
                    &warp,
                    scan_size,
                    self.config.edge_match_max_sq_dist,
                    self.config.robust_cutoff,
                    &mut corrs,
                );
            }
            report.correspondences = corrs.len();
            if let Err(e) = searched {
                self.correspondences = corrs;
                return Err(e);
            }

            let outcome = refine_step(
                &corrs,
                &mut self.transform,
                s,
                self.relative_sweep_time as f32,
                &step_config,
            );
            self.correspondences = corrs;

            match outcome? {
                StepOutcome::Converged => {
                    report.converged = true;
                    log::info!(
                        "motion refinement converged after {} iterations ({} correspondences)",
                        report.iterations,
                        report.correspondences
                    );
                    break;
                }
                // Nothing changed; repeating the iteration cannot help.
                outcome if !outcome.made_progress() => break,
                _ => {}
            }
        }
        log::debug!(
            "pose update: converged={} iterations={} correspondences={}",
            report.converged,
            report.iterations,
            report.correspondences
        );
        Ok(report)
    }

    /// Close the current sweep at the given absolute time in seconds.
    ///
    /// Folds the sweep's incremental motion into the global pose, promotes
    /// the per-sweep buffers to "previous sweep", rebuilds both spatial
    /// indices and resets the motion estimate for the next sweep.
    pub fn finish_sweep(&mut self, timestamp: f64) -> Result<()> {
        self.accumulate_pose()?;

        self.last_sweep.clear();
        self.last_sweep.header = self.edge_points.header.clone();
        self.last_sweep.extend_from(&self.edge_points);
        self.last_sweep.extend_from(&self.surface_points);
        self.last_sweep.extend_from(&self.extra_points);

        // Double-buffer promotion: the stale "last" buffers become the next
        // sweep's (cleared) working buffers.
        std::mem::swap(&mut self.edge_points, &mut self.last_edge_points);
        self.edge_points.clear();
        std::mem::swap(&mut self.surface_points, &mut self.last_surface_points);
        self.surface_points.clear();
        self.extra_points.clear();

        self.edge_index = FeatureIndex::build(&self.last_edge_points);
        self.surface_index = FeatureIndex::build(&self.last_surface_points);

        self.last_sweep_start = self.current_sweep_start;
        self.current_sweep_start = timestamp - self.initial_time;

        self.transform_rec = self.transform;
        self.transform = Transform6::zero();
        Ok(())
    }

    /// Fold the finished sweep's incremental motion into the global pose.
    fn accumulate_pose(&mut self) -> Result<()> {
        if !self.transform.is_finite() || !self.transform_sum.is_finite() {
            return Err(OdometryError::NonFiniteTransform {
                context: "pose accumulation",
            });
        }
        let mc = self.config.mount_calibration;

        let (scx, ccx) = self.transform_sum.rx.sin_cos();
        let (scy, ccy) = self.transform_sum.ry.sin_cos();
        let (scz, ccz) = self.transform_sum.rz.sin_cos();
        let (slx, clx) = (-self.transform.rx).sin_cos();
        let (sly, cly) = (-self.transform.ry * mc).sin_cos();
        let (slz, clz) = (-self.transform.rz).sin_cos();

        let srx = clx * ccx * sly * scz - ccx * ccz * slx - clx * cly * scx;
        let rx = -srx.asin();

        let srycrx = slx * (ccy * scz - ccz * scx * scy)
            + clx * sly * (ccy * ccz + scx * scy * scz)
            + clx * cly * ccx * scy;
        let crycrx = clx * cly * ccx * ccy
            - clx * sly * (ccz * scy - ccy * scx * scz)
            - slx * (scy * scz + ccy * ccz * scx);
        let ry = (srycrx / rx.cos()).atan2(crycrx / rx.cos());

        let srzcrx = scx * (clz * sly - cly * slx * slz)
            + ccx * scz * (cly * clz + slx * sly * slz)
            + clx * ccx * ccz * slz;
        let crzcrx = clx * clz * ccx * ccz
            - ccx * scz * (cly * slz - clz * slx * sly)
            - scx * (sly * slz + cly * clz * slx);
        let rz = (srzcrx / rx.cos()).atan2(crzcrx / rx.cos());

        let (srz_n, crz_n) = rz.sin_cos();
        let x1 = crz_n * self.transform.tx - srz_n * self.transform.ty;
        let y1 = srz_n * self.transform.tx + crz_n * self.transform.ty;
        let z1 = self.transform.tz * mc;

        let (srx_n, crx_n) = rx.sin_cos();
        let x2 = x1;
        let y2 = crx_n * y1 - srx_n * z1;
        let z2 = srx_n * y1 + crx_n * z1;

        let (sry_n, cry_n) = ry.sin_cos();
        let updated = Transform6::new(
            rx,
            ry,
            rz,
            self.transform_sum.tx - (cry_n * x2 + sry_n * z2),
            self.transform_sum.ty - y2,
            self.transform_sum.tz - (-sry_n * x2 + cry_n * z2),
        );
        if !updated.is_finite() {
            return Err(OdometryError::NonFiniteTransform {
                context: "pose accumulation",
            });
        }
        self.transform_sum = updated;
        Ok(())
    }

    /// Current in-sweep incremental motion estimate.
    pub fn transform(&self) -> &Transform6 {
        &self.transform
    }

    /// Accumulated global pose from the origin.
    pub fn global_pose(&self) -> &Transform6 {
        &self.transform_sum
    }

    /// All features of the last completed sweep, edges first, then surfaces
    /// and extras.
    pub fn last_sweep(&self) -> &PointCloud3D {
        &self.last_sweep
    }

    /// Edge features extracted so far in the current sweep.
    pub fn edge_points(&self) -> &PointCloud3D {
        &self.edge_points
    }

    /// Surface features extracted so far in the current sweep.
    pub fn surface_points(&self) -> &PointCloud3D {
        &self.surface_points
    }

    /// Secondary-strength features extracted so far in the current sweep.
    pub fn extra_points(&self) -> &PointCloud3D {
        &self.extra_points
    }

    /// Edge features of the last completed sweep.
    pub fn last_edge_points(&self) -> &PointCloud3D {
        &self.last_edge_points
    }

    /// Surface features of the last completed sweep.
    pub fn last_surface_points(&self) -> &PointCloud3D {
        &self.last_surface_points
    }

    /// Estimator configuration.
    pub fn config(&self) -> &OdometryConfig {
        &self.config
    }
}

impl Default for LaserOdometry {
    fn default() -> Self {
        Self::new(OdometryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Point3D, ScanHeader};
    use approx::assert_relative_eq;

    /// Staircase wall scan: plateaus become surfaces, height jumps edges.
    fn staircase_scan(stamp_us: u64) -> PointCloud3D {
        let mut scan = PointCloud3D::with_capacity(400);
        scan.header = ScanHeader::new(stamp_us, "laser");
        for i in 0..400 {
            let x = 2.0 + 0.01 * i as f32;
            let z = if (i / 20) % 2 == 0 { 0.0 } else { 0.2 };
            scan.push(Point3D::new(x, 2.0, z));
        }
        scan
    }

    #[test]
    fn test_first_scan_initializes_without_motion() {
        let mut odom = LaserOdometry::default();
        let report = odom.add_scan(&staircase_scan(10_000_000)).unwrap();
        assert!(report.is_none());
        assert_eq!(odom.scan_size, Some(400));
        assert_eq!(odom.current_scan_time, 0.0);
        assert!(!odom.edge_points().is_empty());
        assert!(!odom.surface_points().is_empty());
    }

    #[test]
    fn test_finish_sweep_promotes_and_clears_buffers() {
        let mut odom = LaserOdometry::default();
        odom.add_scan(&staircase_scan(10_000_000)).unwrap();

        let edges = odom.edge_points().clone();
        let surfaces = odom.surface_points().clone();
        let extras_len = odom.extra_points().len();

        odom.finish_sweep(10.05).unwrap();

        assert!(odom.edge_points().is_empty());
        assert!(odom.surface_points().is_empty());
        assert!(odom.extra_points().is_empty());
        assert_eq!(odom.last_edge_points().points, edges.points);
        assert_eq!(odom.last_surface_points().points, surfaces.points);
        assert_eq!(
            odom.last_sweep().len(),
            edges.len() + surfaces.len() + extras_len
        );
        assert_eq!(odom.edge_index.len(), edges.len());
    }

    #[test]
    fn test_finish_sweep_rotates_motion_state() {
        let mut odom = LaserOdometry::default();
        odom.add_scan(&staircase_scan(10_000_000)).unwrap();
        odom.transform = Transform6::new(0.0, 0.0, 0.0, 0.5, 0.0, 0.0);

        odom.finish_sweep(10.05).unwrap();

        assert_eq!(*odom.transform(), Transform6::zero());
        assert_eq!(odom.transform_rec.tx, 0.5);
        assert_relative_eq!(odom.current_sweep_start, 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_motion_leaves_global_pose_unchanged() {
        let mut odom = LaserOdometry::default();
        odom.initial_time = 10.0;
        odom.transform_sum = Transform6::new(0.1, -0.2, 0.3, 1.0, 2.0, 3.0);
        let before = odom.transform_sum;

        odom.finish_sweep(10.05).unwrap();

        let after = *odom.global_pose();
        assert_relative_eq!(after.rx, before.rx, epsilon = 1e-6);
        assert_relative_eq!(after.ry, before.ry, epsilon = 1e-6);
        assert_relative_eq!(after.rz, before.rz, epsilon = 1e-6);
        assert_relative_eq!(after.tx, before.tx, epsilon = 1e-5);
        assert_relative_eq!(after.ty, before.ty, epsilon = 1e-5);
        assert_relative_eq!(after.tz, before.tz, epsilon = 1e-5);
    }

    #[test]
    fn test_pure_translation_accumulates_negated() {
        let mut odom = LaserOdometry::default();
        odom.initial_time = 10.0;

        odom.transform = Transform6::new(0.0, 0.0, 0.0, 1.0, 0.0, 0.0);
        odom.finish_sweep(10.05).unwrap();
        odom.transform = Transform6::new(0.0, 0.0, 0.0, 1.0, 0.0, 0.0);
        odom.finish_sweep(10.10).unwrap();

        assert_relative_eq!(odom.global_pose().tx, -2.0, epsilon = 1e-5);
        assert_relative_eq!(odom.global_pose().ty, 0.0, epsilon = 1e-6);
        assert_relative_eq!(odom.global_pose().tz, 0.0, epsilon = 1e-6);
        assert_relative_eq!(odom.global_pose().rotation_norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_calculate_pose_without_prior_sweep_is_silent() {
        let mut odom = LaserOdometry::default();
        let report = odom.calculate_pose().unwrap();
        assert_eq!(report, SolveReport::default());
    }

    #[test]
    fn test_nan_feature_trips_guard_without_moving() {
        let mut odom = LaserOdometry::default();

        // Previous sweep: two scan lines of edge features.
        for k in 0..8 {
            odom.last_edge_points
                .push(Point3D::with_time(0.0, 0.2 * k as f32, 0.0, 0.085));
        }
        for k in 0..8 {
            odom.last_edge_points
                .push(Point3D::with_time(0.0, 0.2 * k as f32, 0.05, 0.095));
        }
        odom.edge_index = FeatureIndex::build(&odom.last_edge_points);
        odom.scan_size = Some(16);
        odom.initial_time = 10.0;
        odom.last_sweep_start = 0.05;
        odom.current_sweep_start = 0.10;
        odom.last_scan_time = 0.095;
        odom.current_scan_time = 0.135;

        odom.transform = Transform6::new(0.0, 0.0, 0.0, 0.01, 0.0, 0.0);
        let before = odom.transform;
        odom.edge_points
            .push(Point3D::with_time(f32::NAN, 0.0, 0.0, 0.135));

        let err = odom.calculate_pose().unwrap_err();
        assert!(matches!(err, OdometryError::NonFinitePoint { .. }));
        assert_eq!(*odom.transform(), before);
    }

    #[test]
    fn test_second_sweep_still_runs_no_optimization() {
        // The predictor needs two sweep boundaries before it can scale the
        // previous motion; until then add_scan only gathers features.
        let mut odom = LaserOdometry::default();
        odom.add_scan(&staircase_scan(10_000_000)).unwrap();
        odom.finish_sweep(10.05).unwrap();
        let report = odom.add_scan(&staircase_scan(10_085_000)).unwrap();
        assert!(report.is_none());
    }
}
