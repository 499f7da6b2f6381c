//! Scan-to-sweep registration: correspondence search and motion refinement.

mod correspondence;
mod gauss_newton;
mod kdtree;

pub use correspondence::{
    find_edge_correspondences_into, find_surface_correspondences_into, Coefficient, Correspondence,
};
pub use gauss_newton::{refine_step, StepConfig, StepOutcome};
pub use kdtree::FeatureIndex;
