//! Nearest-neighbor index over a feature cloud.

use kiddo::{KdTree, SquaredEuclidean};

use crate::core::types::{Point3D, PointCloud3D};

/// K-d tree over the points of a feature cloud.
///
/// The tree stores indices into the cloud it was built from; the estimator
/// keeps that cloud alive for as long as the index is queried. Rebuilding at
/// a sweep boundary simply replaces the whole index.
pub struct FeatureIndex {
    tree: KdTree<f32, 3>,
    len: usize,
}

impl Clone for FeatureIndex {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
            len: self.len,
        }
    }
}

impl std::fmt::Debug for FeatureIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureIndex").field("len", &self.len).finish()
    }
}

impl Default for FeatureIndex {
    fn default() -> Self {
        Self {
            tree: KdTree::new(),
            len: 0,
        }
    }
}

impl FeatureIndex {
    /// Build an index over all points of `cloud`.
    pub fn build(cloud: &PointCloud3D) -> Self {
        let mut tree: KdTree<f32, 3> = KdTree::new();
        for (i, p) in cloud.iter().enumerate() {
            tree.add(&[p.x, p.y, p.z], i as u64);
        }
        Self {
            tree,
            len: cloud.len(),
        }
    }

    /// Number of indexed points.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the index holds no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index and squared distance of the nearest indexed point.
    ///
    /// Returns `None` on an empty index.
    pub fn nearest_one(&self, query: &Point3D) -> Option<(usize, f32)> {
        if self.is_empty() {
            return None;
        }
        let nearest = self
            .tree
            .nearest_one::<SquaredEuclidean>(&[query.x, query.y, query.z]);
        Some((nearest.item as usize, nearest.distance))
    }

    /// The `k` nearest indexed points as parallel index and squared-distance
    /// lists, closest first.
    pub fn knn(&self, query: &Point3D, k: usize) -> (Vec<usize>, Vec<f32>) {
        let neighbors = self
            .tree
            .nearest_n::<SquaredEuclidean>(&[query.x, query.y, query.z], k);
        let mut indices = Vec::with_capacity(neighbors.len());
        let mut distances = Vec::with_capacity(neighbors.len());
        for n in neighbors {
            indices.push(n.item as usize);
            distances.push(n.distance);
        }
        (indices, distances)
    }
}
