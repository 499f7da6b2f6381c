//! Ordered point clouds and their headers.

use serde::{Deserialize, Serialize};

use super::point::Point3D;

/// Origin metadata of a scan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanHeader {
    /// Acquisition timestamp in integer microseconds
    pub stamp_us: u64,
    /// Opaque frame identifier assigned by the producer
    pub frame_id: String,
}

impl ScanHeader {
    /// Create a new header.
    pub fn new(stamp_us: u64, frame_id: impl Into<String>) -> Self {
        Self {
            stamp_us,
            frame_id: frame_id.into(),
        }
    }

    /// Timestamp in seconds.
    #[inline]
    pub fn stamp_seconds(&self) -> f64 {
        self.stamp_us as f64 / 1_000_000.0
    }
}

/// An ordered sequence of 3D points with an origin header.
///
/// Order is significant: for scans coming straight from the sensor, the
/// index along the sequence is the sampling order along the laser's
/// trajectory, and thus a proxy for acquisition time and for scan-line
/// adjacency.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointCloud3D {
    /// Origin metadata
    pub header: ScanHeader,
    /// Points in sampling order
    pub points: Vec<Point3D>,
}

impl PointCloud3D {
    /// Create an empty cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cloud with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            header: ScanHeader::default(),
            points: Vec::with_capacity(capacity),
        }
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the cloud holds no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append a point.
    #[inline]
    pub fn push(&mut self, point: Point3D) {
        self.points.push(point);
    }

    /// Append all points of another cloud.
    pub fn extend_from(&mut self, other: &PointCloud3D) {
        self.points.extend_from_slice(&other.points);
    }

    /// Drop all points, keeping the allocation.
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Iterate over the points.
    pub fn iter(&self) -> impl Iterator<Item = &Point3D> {
        self.points.iter()
    }
}
