//! 6-DoF rigid motion as a rotation/translation 6-vector.

use serde::{Deserialize, Serialize};

/// A rigid motion parameterized as three intrinsic Z-X-Y Euler angles and a
/// translation.
///
/// Rotations are radians, translations meters. The estimator uses this for
/// three distinct quantities: the in-sweep incremental motion, the previous
/// sweep's finalized motion (constant-velocity predictor), and the
/// accumulated global pose.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform6 {
    /// Rotation around X in radians
    pub rx: f32,
    /// Rotation around Y in radians
    pub ry: f32,
    /// Rotation around Z in radians
    pub rz: f32,
    /// Translation along X in meters
    pub tx: f32,
    /// Translation along Y in meters
    pub ty: f32,
    /// Translation along Z in meters
    pub tz: f32,
}

impl Transform6 {
    /// The zero motion.
    #[inline]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Create from explicit components.
    #[inline]
    pub fn new(rx: f32, ry: f32, rz: f32, tx: f32, ty: f32, tz: f32) -> Self {
        Self {
            rx,
            ry,
            rz,
            tx,
            ty,
            tz,
        }
    }

    /// Add `scale * other` component-wise.
    ///
    /// Used for the constant-velocity forward prediction at each scan.
    #[inline]
    pub fn add_scaled(&mut self, other: &Transform6, scale: f32) {
        self.rx += scale * other.rx;
        self.ry += scale * other.ry;
        self.rz += scale * other.rz;
        self.tx += scale * other.tx;
        self.ty += scale * other.ty;
        self.tz += scale * other.tz;
    }

    /// Euclidean norm of the rotation components in radians.
    #[inline]
    pub fn rotation_norm(&self) -> f32 {
        (self.rx * self.rx + self.ry * self.ry + self.rz * self.rz).sqrt()
    }

    /// Euclidean norm of the translation components in meters.
    #[inline]
    pub fn translation_norm(&self) -> f32 {
        (self.tx * self.tx + self.ty * self.ty + self.tz * self.tz).sqrt()
    }

    /// All six components are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.rx.is_finite()
            && self.ry.is_finite()
            && self.rz.is_finite()
            && self.tx.is_finite()
            && self.ty.is_finite()
            && self.tz.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero() {
        let t = Transform6::zero();
        assert_eq!(t.rotation_norm(), 0.0);
        assert_eq!(t.translation_norm(), 0.0);
    }

    #[test]
    fn test_add_scaled() {
        let mut t = Transform6::new(0.1, 0.0, 0.0, 1.0, 0.0, 0.0);
        let rec = Transform6::new(0.2, 0.0, 0.2, 2.0, 0.0, -2.0);
        t.add_scaled(&rec, 0.5);
        assert_relative_eq!(t.rx, 0.2);
        assert_relative_eq!(t.rz, 0.1);
        assert_relative_eq!(t.tx, 2.0);
        assert_relative_eq!(t.tz, -1.0);
    }

    #[test]
    fn test_norms() {
        let t = Transform6::new(0.0, 3.0, 4.0, 0.0, 6.0, 8.0);
        assert_relative_eq!(t.rotation_norm(), 5.0);
        assert_relative_eq!(t.translation_norm(), 10.0);
    }

    #[test]
    fn test_is_finite() {
        assert!(Transform6::zero().is_finite());
        let mut t = Transform6::zero();
        t.ty = f32::NAN;
        assert!(!t.is_finite());
    }
}
