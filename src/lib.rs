//! Feature-based 3D LiDAR odometry.
//!
//! Estimates the 6-DoF motion of a rotating laser scanner by registering
//! each incoming scan against the feature set of the previous full sweep.
//! Edge and surface features are extracted per scan, motion-compensated to
//! the sweep start, matched against the previous sweep through k-d tree
//! lookups with temporal filtering, and the inter-sweep motion is refined
//! with a damped Gauss-Newton iteration.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Sweep lifecycle
//! │         (LaserOdometry, OdometryConfig)             │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  algorithms/                        │  ← Core algorithms
//! │      (features, compensation, matching)             │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                 (types, math)                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use gati_odometry::{LaserOdometry, Point3D, PointCloud3D, ScanHeader};
//!
//! let mut odom = LaserOdometry::default();
//!
//! let mut scan = PointCloud3D::new();
//! scan.header = ScanHeader::new(10_000_000, "laser");
//! for i in 0..400 {
//!     scan.push(Point3D::new(2.0 + 0.01 * i as f32, 2.0, 0.0));
//! }
//!
//! odom.add_scan(&scan).unwrap();
//! odom.finish_sweep(10.05).unwrap();
//! println!("pose: {:?}", odom.global_pose());
//! ```

pub mod core;

pub mod algorithms;

pub mod engine;

mod error;

// Core types
pub use crate::core::math;
pub use crate::core::types::{Point3D, PointCloud3D, ScanHeader, Transform6};

// Algorithms
pub use algorithms::compensation::{shift_to_start, sweep_fraction};
pub use algorithms::features::FeatureExtractor;
pub use algorithms::matching::{Coefficient, Correspondence, FeatureIndex, StepOutcome};

// Engine
pub use engine::{LaserOdometry, OdometryConfig, SolveReport};

// Errors
pub use error::{OdometryError, Result};
