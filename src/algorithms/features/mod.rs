//! Feature extraction from one ordered scan.
//!
//! Classifies points of a scan line into edge features (high local
//! curvature), surface features (low local curvature) and secondary-strength
//! extras, while rejecting points on occlusion boundaries and on surfaces
//! nearly parallel to the laser ray. The scan is processed in four equal
//! sections so features spread across the whole line instead of clustering
//! where the scene happens to be busiest.

use crate::core::types::{Point3D, PointCloud3D};

/// Curvature window half-width: five neighbors on each side.
const CURVATURE_HALF_WINDOW: usize = 5;
/// Number of equal sections the scan is split into for selection.
const SECTION_COUNT: usize = 4;
/// Squared step between consecutive points that marks a depth discontinuity.
const OCCLUSION_STEP_SQ: f32 = 0.05;
/// Perpendicular-offset ratio below which a discontinuity is an occlusion
/// boundary rather than a genuine object edge.
const OCCLUSION_RAY_RATIO: f32 = 0.1;
/// Curvature threshold separating edge candidates from surface candidates.
const CURVATURE_SPLIT: f32 = 0.1;
/// Strong edges kept per section.
const EDGES_PER_SECTION: usize = 2;
/// Edge-walk picks kept per section in total (edges + extras).
const EDGE_WALK_PER_SECTION: usize = 20;
/// Strong surfaces kept per section.
const SURFACES_PER_SECTION: usize = 4;
/// Squared radius around a selected feature inside which neighbors are
/// suppressed.
const SUPPRESSION_RADIUS_SQ: f32 = 0.2;

/// Stateful extractor; owns the per-scan rejection flags and curvature
/// scratch so repeated calls do not reallocate.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    /// Squared law-of-sines ratio for the parallel-ray rejection.
    distance_relation: f32,
    /// Per-point rejection flags, resized per scan.
    filter: Vec<bool>,
    /// Per-section (curvature, index) pairs, sorted ascending by curvature.
    curvature: [Vec<(f32, usize)>; SECTION_COUNT],
}

impl FeatureExtractor {
    /// Create an extractor.
    ///
    /// `distance_relation` is `sin²(laser angle) / sin²(max surface angle)`,
    /// derived from the law of sines: a step to the next sample larger than
    /// `distance_relation × depth` means the surface is inclined more than
    /// the admissible maximum against the ray.
    pub fn new(distance_relation: f32) -> Self {
        Self {
            distance_relation,
            filter: Vec::new(),
            curvature: Default::default(),
        }
    }

    /// Classify the points of `scan` into the three feature buffers.
    ///
    /// Selected points are copied with their `time` field set to
    /// `scan_time`. Scans too short for the curvature window yield no
    /// features. Does not touch any motion state.
    pub fn extract(
        &mut self,
        scan: &PointCloud3D,
        scan_time: f64,
        edges: &mut PointCloud3D,
        surfaces: &mut PointCloud3D,
        extras: &mut PointCloud3D,
    ) {
        let n = scan.len();
        if n < 2 * CURVATURE_HALF_WINDOW + 2 {
            return;
        }

        self.filter.clear();
        self.filter.resize(n, false);
        self.reject_unreliable(scan);
        self.score_curvature(scan);
        self.select(scan, scan_time, edges, surfaces, extras);
    }

    /// Flag occlusion boundaries and near-parallel surfaces.
    fn reject_unreliable(&mut self, scan: &PointCloud3D) {
        let points = &scan.points;
        let n = points.len();

        for i in CURVATURE_HALF_WINDOW..n - 6 {
            let curr = &points[i];
            let next = &points[i + 1];
            let step_sq = curr.distance_squared(next);
            let depth1 = curr.depth();

            if step_sq > OCCLUSION_STEP_SQ {
                // A large jump hides an occlusion boundary when the two rays
                // nearly coincide: scale the farther point back to the nearer
                // radius and measure the perpendicular remainder.
                let depth2 = next.depth();
                if depth1 > depth2 {
                    let scale = depth2 / depth1;
                    let dx = next.x - curr.x * scale;
                    let dy = next.y - curr.y * scale;
                    let dz = next.z - curr.z * scale;
                    if (dx * dx + dy * dy + dz * dz).sqrt() / depth2 < OCCLUSION_RAY_RATIO {
                        for flag in &mut self.filter[i - 5..=i] {
                            *flag = true;
                        }
                    }
                } else {
                    let scale = depth1 / depth2;
                    let dx = next.x * scale - curr.x;
                    let dy = next.y * scale - curr.y;
                    let dz = next.z * scale - curr.z;
                    if (dx * dx + dy * dy + dz * dz).sqrt() / depth1 < OCCLUSION_RAY_RATIO {
                        for flag in &mut self.filter[i + 1..=i + 6] {
                            *flag = true;
                        }
                    }
                }
            }

            let step_back_sq = curr.distance_squared(&points[i - 1]);
            if step_sq > self.distance_relation * depth1
                && step_back_sq > self.distance_relation * depth1
            {
                self.filter[i] = true;
            }
        }
    }

    /// Compute the curvature score for every sample of each section.
    ///
    /// The score is the squared magnitude of the sum of the ten
    /// neighbor-offset vectors around the point.
    fn score_curvature(&mut self, scan: &PointCloud3D) {
        let points = &scan.points;
        let section_size = (points.len() - 2 * CURVATURE_HALF_WINDOW) / SECTION_COUNT;

        let mut i = CURVATURE_HALF_WINDOW;
        for section in self.curvature.iter_mut() {
            section.clear();
            for _ in 0..section_size {
                let center = &points[i];
                let mut dx = -10.0 * center.x;
                let mut dy = -10.0 * center.y;
                let mut dz = -10.0 * center.z;
                for k in i - CURVATURE_HALF_WINDOW..=i + CURVATURE_HALF_WINDOW {
                    if k == i {
                        continue;
                    }
                    dx += points[k].x;
                    dy += points[k].y;
                    dz += points[k].z;
                }
                section.push((dx * dx + dy * dy + dz * dz, i));
                i += 1;
            }
            section.sort_by(|a, b| a.0.total_cmp(&b.0));
        }
    }

    /// Walk each section's sorted scores and route points into the feature
    /// buffers, suppressing the neighborhood of every pick.
    fn select(
        &mut self,
        scan: &PointCloud3D,
        scan_time: f64,
        edges: &mut PointCloud3D,
        surfaces: &mut PointCloud3D,
        extras: &mut PointCloud3D,
    ) {
        for section in 0..SECTION_COUNT {
            // Sharpest first: up to 2 edges, then extras, 20 picks total.
            let mut picked = 0;
            for rank in (0..self.curvature[section].len()).rev() {
                let (c, idx) = self.curvature[section][rank];
                if self.filter[idx] || c <= CURVATURE_SPLIT {
                    continue;
                }
                picked += 1;
                let feature = stamped(&scan.points[idx], scan_time);
                if picked <= EDGES_PER_SECTION {
                    edges.push(feature);
                } else if picked <= EDGE_WALK_PER_SECTION {
                    extras.push(feature);
                } else {
                    break;
                }
                self.suppress_neighborhood(scan, idx);
            }

            // Flattest first: up to 4 surfaces, the rest become extras.
            let mut picked = 0;
            for rank in 0..self.curvature[section].len() {
                let (c, idx) = self.curvature[section][rank];
                if self.filter[idx] || c >= CURVATURE_SPLIT {
                    continue;
                }
                picked += 1;
                let feature = stamped(&scan.points[idx], scan_time);
                if picked <= SURFACES_PER_SECTION {
                    surfaces.push(feature);
                } else {
                    extras.push(feature);
                }
                self.suppress_neighborhood(scan, idx);
            }
        }
    }

    /// Flag the neighbors of a selected feature so the section does not
    /// yield clusters of near-identical picks.
    fn suppress_neighborhood(&mut self, scan: &PointCloud3D, idx: usize) {
        let center = &scan.points[idx];
        for k in idx - CURVATURE_HALF_WINDOW..=idx + CURVATURE_HALF_WINDOW {
            if scan.points[k].distance_squared(center) <= SUPPRESSION_RADIUS_SQ {
                self.filter[k] = true;
            }
        }
    }

    /// Number of curvature samples scored per section for the given scan,
    /// exposed for diagnostics.
    pub fn section_sample_count(scan_len: usize) -> usize {
        if scan_len < 2 * CURVATURE_HALF_WINDOW + 2 {
            0
        } else {
            (scan_len - 2 * CURVATURE_HALF_WINDOW) / SECTION_COUNT
        }
    }
}

#[inline]
fn stamped(point: &Point3D, scan_time: f64) -> Point3D {
    Point3D::with_time(point.x, point.y, point.z, scan_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DISTANCE_RELATION: f32 = 1.627e-4; // 0.25° laser, 20° max surface

    /// Wall at y = 2 m whose height alternates between 0 and `step` every
    /// `period` samples: plateaus score as surfaces, the jumps as edges.
    fn staircase_scan(n: usize, step: f32, period: usize) -> PointCloud3D {
        let mut cloud = PointCloud3D::with_capacity(n);
        for i in 0..n {
            let x = 2.0 + 0.01 * i as f32;
            let z = if (i / period) % 2 == 0 { 0.0 } else { step };
            cloud.push(Point3D::new(x, 2.0, z));
        }
        cloud
    }

    /// Points stacked along nearly the same ray with alternating depth, so
    /// every jump passes the occlusion-boundary test.
    fn occluded_scan(n: usize) -> PointCloud3D {
        let mut cloud = PointCloud3D::with_capacity(n);
        for i in 0..n {
            let angle = 0.0001 * i as f32;
            let depth = if i % 2 == 0 { 2.0 } else { 2.3 };
            cloud.push(Point3D::new(
                depth * angle.cos(),
                depth * angle.sin(),
                0.0,
            ));
        }
        cloud
    }

    fn extract_all(scan: &PointCloud3D) -> (PointCloud3D, PointCloud3D, PointCloud3D) {
        let mut extractor = FeatureExtractor::new(TEST_DISTANCE_RELATION);
        let mut edges = PointCloud3D::new();
        let mut surfaces = PointCloud3D::new();
        let mut extras = PointCloud3D::new();
        extractor.extract(scan, 0.25, &mut edges, &mut surfaces, &mut extras);
        (edges, surfaces, extras)
    }

    #[test]
    fn test_section_sample_count() {
        // A 400-point scan scores (400 - 10) / 4 = 97 samples per section.
        assert_eq!(FeatureExtractor::section_sample_count(400), 97);
        assert_eq!(FeatureExtractor::section_sample_count(11), 0);
    }

    #[test]
    fn test_curvature_buffers_hold_one_section_each() {
        let scan = staircase_scan(400, 0.2, 20);
        let mut extractor = FeatureExtractor::new(TEST_DISTANCE_RELATION);
        let mut edges = PointCloud3D::new();
        let mut surfaces = PointCloud3D::new();
        let mut extras = PointCloud3D::new();
        extractor.extract(&scan, 0.0, &mut edges, &mut surfaces, &mut extras);
        for section in &extractor.curvature {
            assert_eq!(section.len(), 97);
        }
    }

    #[test]
    fn test_staircase_yields_edges_and_surfaces() {
        let scan = staircase_scan(400, 0.2, 20);
        let (edges, surfaces, extras) = extract_all(&scan);

        // Two strong edges per section at the height jumps.
        assert_eq!(edges.len(), 2 * SECTION_COUNT);
        // Flat plateaus yield the full surface budget.
        assert_eq!(surfaces.len(), 4 * SECTION_COUNT);
        assert!(!extras.is_empty());
    }

    #[test]
    fn test_feature_budget_respected() {
        let scan = staircase_scan(400, 0.2, 12);
        let (edges, surfaces, _extras) = extract_all(&scan);
        assert!(edges.len() <= EDGES_PER_SECTION * SECTION_COUNT);
        assert!(surfaces.len() <= SURFACES_PER_SECTION * SECTION_COUNT);
    }

    #[test]
    fn test_selected_points_carry_scan_time() {
        let scan = staircase_scan(400, 0.2, 20);
        let (edges, surfaces, extras) = extract_all(&scan);
        for p in edges.iter().chain(surfaces.iter()).chain(extras.iter()) {
            assert_eq!(p.time, 0.25);
        }
    }

    #[test]
    fn test_occlusion_boundaries_reject_everything() {
        // Every consecutive pair jumps more than the discontinuity threshold
        // and the rays nearly coincide, so rejection blankets the scan and
        // no feature of any class survives.
        let scan = occluded_scan(400);
        let (edges, surfaces, extras) = extract_all(&scan);
        assert!(edges.is_empty());
        assert!(surfaces.is_empty());
        assert!(extras.is_empty());
    }

    #[test]
    fn test_short_scan_yields_nothing() {
        let scan = staircase_scan(11, 0.2, 4);
        let (edges, surfaces, extras) = extract_all(&scan);
        assert!(edges.is_empty());
        assert!(surfaces.is_empty());
        assert!(extras.is_empty());
    }

    #[test]
    fn test_flat_wall_yields_no_edges() {
        let scan = staircase_scan(400, 0.0, 20);
        let (edges, _surfaces, _extras) = extract_all(&scan);
        assert!(edges.is_empty());
    }
}
