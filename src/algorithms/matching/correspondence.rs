//! Correspondence search against the previous sweep's features.
//!
//! Each current edge point is matched to a line through two edge points of
//! the previous sweep that sit on adjacent scan lines; each current surface
//! point to a plane through three surface points. Temporal adjacency is
//! decided from the per-point acquisition times: features of one scan share
//! a timestamp, features of neighboring scan lines differ by one scan
//! period.

use crate::algorithms::compensation::SweepWarp;
use crate::algorithms::matching::kdtree::FeatureIndex;
use crate::core::types::{Point3D, PointCloud3D};
use crate::error::Result;

/// Minimum time separation that places two features on different scan lines.
const MIN_ADJACENT_DT: f64 = 0.005;
/// Maximum time separation for a scan line to still count as adjacent.
const MAX_ADJACENT_DT: f64 = 0.07;

/// Weighted residual gradient of one correspondence.
///
/// `(x, y, z)` is the robust weight times the gradient of the residual with
/// respect to the warped point, `d` the weight times the residual itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficient {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub d: f32,
}

/// A current-sweep feature paired with a geometric entity of the previous
/// sweep.
///
/// `point` keeps the original (un-warped) coordinates: the solver evaluates
/// its Jacobian at the raw observation.
#[derive(Debug, Clone, Copy)]
pub struct Correspondence {
    pub point: Point3D,
    pub coeff: Coefficient,
}

/// Robust weight for a residual of magnitude `d`; large residuals are
/// down-weighted and beyond ~0.12 m the weight goes negative, which the
/// cutoff then rejects.
#[inline]
fn robust_weight(d: f32) -> f32 {
    2.0 * (1.0 - 8.0 * d.abs())
}

/// The index bracket around `j` worth scanning for a temporal neighbor:
/// two scan lines in either direction.
#[inline]
fn search_bracket(j: usize, scan_size: usize, len: usize) -> (usize, usize) {
    (j.saturating_sub(2 * scan_size), (j + 2 * scan_size).min(len))
}

/// Match every current edge point against an edge line of the previous
/// sweep, appending the survivors to `output` (which is cleared first).
///
/// A point is dropped when its nearest previous-sweep edge is farther than
/// `max_sq_dist`, when no companion on an adjacent scan line qualifies, or
/// when the robust weight of its line distance falls below `cutoff`.
#[allow(clippy::too_many_arguments)]
pub fn find_edge_correspondences_into(
    edges: &PointCloud3D,
    last_edges: &PointCloud3D,
    index: &FeatureIndex,
    warp: &SweepWarp<'_>,
    scan_size: usize,
    max_sq_dist: f32,
    cutoff: f32,
    output: &mut Vec<Correspondence>,
) -> Result<()> {
    output.clear();

    for point in edges.iter() {
        let shifted = warp.shift(point)?;

        let Some((j, nearest_sq)) = index.nearest_one(&shifted) else {
            continue;
        };
        if nearest_sq > max_sq_dist {
            continue;
        }
        let time_j = last_edges.points[j].time;

        // Companion on an adjacent scan line, nearest to the warped point.
        let (begin, end) = search_bracket(j, scan_size, last_edges.len());
        let mut best_l: Option<usize> = None;
        let mut best_sq = max_sq_dist;
        for l in begin..end {
            let dt = (last_edges.points[l].time - time_j).abs();
            if dt <= MIN_ADJACENT_DT || dt >= MAX_ADJACENT_DT {
                continue;
            }
            let sq = last_edges.points[l].distance_squared(&shifted);
            if sq < best_sq {
                best_sq = sq;
                best_l = Some(l);
            }
        }
        let Some(l) = best_l else {
            continue;
        };

        if let Some(coeff) = line_coefficient(&shifted, &last_edges.points[j], &last_edges.points[l])
        {
            let w = robust_weight(coeff.d);
            if w > cutoff {
                output.push(Correspondence {
                    point: *point,
                    coeff: Coefficient {
                        x: w * coeff.x,
                        y: w * coeff.y,
                        z: w * coeff.z,
                        d: w * coeff.d,
                    },
                });
            }
        }
    }
    Ok(())
}

/// Match every current surface point against a plane through three surface
/// points of the previous sweep: the nearest neighbor, its closest companion
/// on the same scan line and its closest companion on an adjacent one.
#[allow(clippy::too_many_arguments)]
pub fn find_surface_correspondences_into(
    surfaces: &PointCloud3D,
    last_surfaces: &PointCloud3D,
    index: &FeatureIndex,
    warp: &SweepWarp<'_>,
    scan_size: usize,
    max_sq_dist: f32,
    cutoff: f32,
    output: &mut Vec<Correspondence>,
) -> Result<()> {
    for point in surfaces.iter() {
        let shifted = warp.shift(point)?;

        let Some((j, nearest_sq)) = index.nearest_one(&shifted) else {
            continue;
        };
        if nearest_sq > max_sq_dist {
            continue;
        }
        let time_j = last_surfaces.points[j].time;

        let (begin, end) = search_bracket(j, scan_size, last_surfaces.len());
        let mut same: Option<usize> = None;
        let mut same_sq = max_sq_dist;
        let mut adjacent: Option<usize> = None;
        let mut adjacent_sq = max_sq_dist;
        for l in begin..end {
            if l == j {
                continue;
            }
            let dt = (last_surfaces.points[l].time - time_j).abs();
            if dt >= MAX_ADJACENT_DT {
                continue;
            }
            let sq = last_surfaces.points[l].distance_squared(&shifted);
            if dt <= MIN_ADJACENT_DT {
                if sq < same_sq {
                    same_sq = sq;
                    same = Some(l);
                }
            } else if sq < adjacent_sq {
                adjacent_sq = sq;
                adjacent = Some(l);
            }
        }
        let (Some(l), Some(m)) = (same, adjacent) else {
            continue;
        };

        if let Some(coeff) = plane_coefficient(
            &shifted,
            &last_surfaces.points[j],
            &last_surfaces.points[l],
            &last_surfaces.points[m],
        ) {
            let w = robust_weight(coeff.d);
            if w > cutoff {
                output.push(Correspondence {
                    point: *point,
                    coeff: Coefficient {
                        x: w * coeff.x,
                        y: w * coeff.y,
                        z: w * coeff.z,
                        d: w * coeff.d,
                    },
                });
            }
        }
    }
    Ok(())
}

/// Distance of `p` to the line through `j` and `l` and its gradient with
/// respect to `p`.
///
/// Returns `None` when `j` and `l` coincide. A point lying exactly on the
/// line has an undefined gradient; it is reported with a zero gradient and
/// zero distance so the correspondence still counts toward the solver's
/// minimum without perturbing the system.
fn line_coefficient(p: &Point3D, j: &Point3D, l: &Point3D) -> Option<Coefficient> {
    let (x0, y0, z0) = (p.x, p.y, p.z);
    let (x1, y1, z1) = (j.x, j.y, j.z);
    let (x2, y2, z2) = (l.x, l.y, l.z);

    // Cross product of (p - j) and (p - l), component by component.
    let cxy = (x0 - x1) * (y0 - y2) - (x0 - x2) * (y0 - y1);
    let cxz = (x0 - x1) * (z0 - z2) - (x0 - x2) * (z0 - z1);
    let cyz = (y0 - y1) * (z0 - z2) - (y0 - y2) * (z0 - z1);

    let area = (cxy * cxy + cxz * cxz + cyz * cyz).sqrt();
    let base = ((x1 - x2) * (x1 - x2) + (y1 - y2) * (y1 - y2) + (z1 - z2) * (z1 - z2)).sqrt();
    if base < 1e-6 {
        return None;
    }
    if area < 1e-9 {
        return Some(Coefficient {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            d: 0.0,
        });
    }

    let la = ((y1 - y2) * cxy + (z1 - z2) * cxz) / area / base;
    let lb = -((x1 - x2) * cxy - (z1 - z2) * cyz) / area / base;
    let lc = -((x1 - x2) * cxz + (y1 - y2) * cyz) / area / base;
    let d = area / base;

    Some(Coefficient {
        x: la,
        y: lb,
        z: lc,
        d,
    })
}

/// Signed distance of `p` to the plane through `j`, `l`, `m` and its
/// gradient (the unit normal).
///
/// Returns `None` when the three points are collinear.
fn plane_coefficient(p: &Point3D, j: &Point3D, l: &Point3D, m: &Point3D) -> Option<Coefficient> {
    let (ax, ay, az) = (l.x - j.x, l.y - j.y, l.z - j.z);
    let (bx, by, bz) = (m.x - j.x, m.y - j.y, m.z - j.z);

    let nx = ay * bz - az * by;
    let ny = az * bx - ax * bz;
    let nz = ax * by - ay * bx;
    let norm = (nx * nx + ny * ny + nz * nz).sqrt();
    if norm < 1e-9 {
        return None;
    }

    let (nx, ny, nz) = (nx / norm, ny / norm, nz / norm);
    let pd = -(nx * j.x + ny * j.y + nz * j.z);
    let d = nx * p.x + ny * p.y + nz * p.z + pd;

    Some(Coefficient {
        x: nx,
        y: ny,
        z: nz,
        d,
    })
}
