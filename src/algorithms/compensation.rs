//! Motion compensation within a sweep.
//!
//! A rotating scanner keeps moving while a sweep is acquired, so every point
//! is observed from a slightly different pose. Warping each point back to the
//! sweep-start instant removes that skew before registration against the
//! previous sweep.

use crate::core::types::{Point3D, Transform6};
use crate::error::{OdometryError, Result};

/// Fraction of the current sweep elapsed when `point_time` was sampled.
///
/// 0 at the sweep start, 1 at the most recent scan.
#[inline]
pub fn sweep_fraction(point_time: f64, sweep_start: f64, scan_time: f64) -> Result<f32> {
    let span = scan_time - sweep_start;
    let s = ((point_time - sweep_start) / span) as f32;
    if !s.is_finite() {
        return Err(OdometryError::NonFiniteTiming {
            scan_time,
            sweep_start,
        });
    }
    Ok(s)
}

/// The warp parameters of one `calculate_pose` call: the in-sweep motion
/// estimate plus the timing needed to place each point within the sweep.
#[derive(Debug, Clone, Copy)]
pub struct SweepWarp<'a> {
    /// Current in-sweep motion estimate
    pub transform: &'a Transform6,
    /// Sweep start in seconds relative to the first scan
    pub sweep_start: f64,
    /// Current scan time in seconds relative to the first scan
    pub scan_time: f64,
}

impl SweepWarp<'_> {
    /// Warp `point` to the sweep-start frame.
    pub fn shift(&self, point: &Point3D) -> Result<Point3D> {
        let s = sweep_fraction(point.time, self.sweep_start, self.scan_time)?;
        shift_to_start(point, self.transform, s)
    }
}

/// Warp a point to the coordinates the sensor would have observed at the
/// sweep-start instant, given the in-sweep motion estimate and the point's
/// sweep fraction `s`.
///
/// The motion scaled by `s` is inverted in Z-X-Y order: the scaled
/// translation is subtracted, then the point is un-rotated around Z, X and Y
/// in turn. The acquisition time is preserved.
pub fn shift_to_start(point: &Point3D, transform: &Transform6, s: f32) -> Result<Point3D> {
    if !point.is_finite() {
        return Err(OdometryError::NonFinitePoint {
            x: point.x,
            y: point.y,
            z: point.z,
        });
    }
    if !transform.is_finite() || !s.is_finite() {
        return Err(OdometryError::NonFiniteTransform {
            context: "motion compensation",
        });
    }

    let rx = s * transform.rx;
    let ry = s * transform.ry;
    let rz = s * transform.rz;
    let tx = s * transform.tx;
    let ty = s * transform.ty;
    let tz = s * transform.tz;

    let (srz, crz) = rz.sin_cos();
    let x1 = crz * (point.x - tx) + srz * (point.y - ty);
    let y1 = -srz * (point.x - tx) + crz * (point.y - ty);
    let z1 = point.z - tz;

    let (srx, crx) = rx.sin_cos();
    let x2 = x1;
    let y2 = crx * y1 + srx * z1;
    let z2 = -srx * y1 + crx * z1;

    let (sry, cry) = ry.sin_cos();
    let out = Point3D::with_time(
        cry * x2 - sry * z2,
        y2,
        sry * x2 + cry * z2,
        point.time,
    );

    if !out.is_finite() {
        return Err(OdometryError::NonFiniteTransform {
            context: "motion compensation output",
        });
    }
    Ok(out)
}
