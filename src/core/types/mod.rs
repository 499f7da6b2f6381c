//! Core data types for the odometry estimator.
//!
//! - [`Point3D`]: 3D point in meters with its acquisition time
//! - [`Transform6`]: 6-DoF rigid motion (rx, ry, rz, tx, ty, tz)
//! - [`ScanHeader`], [`PointCloud3D`]: ordered scan data with origin metadata

mod cloud;
mod point;
mod pose;

pub use cloud::{PointCloud3D, ScanHeader};
pub use point::Point3D;
pub use pose::Transform6;
