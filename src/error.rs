//! Error types for the odometry estimator.

use thiserror::Error;

/// Errors surfaced by the odometry estimator.
///
/// Only non-finite data is a hard error: a NaN or infinity anywhere in the
/// motion pipeline would silently corrupt every later pose, so the current
/// update is halted instead. Thin correspondence sets and rejected solver
/// steps are reported through [`crate::SolveReport`], not through this type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OdometryError {
    #[error("non-finite point (x={x}, y={y}, z={z})")]
    NonFinitePoint { x: f32, y: f32, z: f32 },

    #[error("non-finite motion state in {context}")]
    NonFiniteTransform { context: &'static str },

    #[error("non-finite sweep timing (scan={scan_time}, sweep start={sweep_start})")]
    NonFiniteTiming { scan_time: f64, sweep_start: f64 },
}

pub type Result<T> = std::result::Result<T, OdometryError>;
