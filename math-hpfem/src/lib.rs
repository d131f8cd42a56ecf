//! hp-adaptivity engine for 2D finite element solvers
//!
//! Given a coarse solution and a reference solution (one uniform isotropic
//! refinement with orders raised by one) for every component, this crate
//!
//! - estimates the error each element contributes, in the energy norm of
//!   user-supplied bilinear forms, on shared or independent meshes
//! - ranks elements and, for each flagged one, chooses the refinement
//!   (order increase, isotropic or anisotropic split, or both) with the best
//!   error reduction per added degree of freedom
//!
//! # Features
//!
//! - **Meshes**: triangles and quadrilaterals in a refinement forest with
//!   hanging-node bookkeeping, regularization and coarsening
//! - **Bases**: H1-orthonormal hierarchical Legendre bases, cached per order
//! - **Parallelism**: per-element work on rayon (feature `parallel`)
//!
//! # Example
//!
//! ```ignore
//! use math_audio_hpfem::adapt::{AdaptationDriver, AdaptivityConfig, FormRegistry, SolutionPair};
//! use math_audio_hpfem::space::{Discretization, SpaceKind};
//!
//! let mut disc = Discretization::single_mesh(mesh::l_shape_quads(2), 1, SpaceKind::H1, 2);
//! let mut driver = AdaptationDriver::new(AdaptivityConfig::default())?;
//! let forms = FormRegistry::with_defaults(&disc);
//!
//! loop {
//!     let (coarse, fine) = host.solve(&disc, &disc.reference(1)?);
//!     let report = driver.adapt_step(&mut disc, &[SolutionPair::new(&coarse, &fine)], &forms)?;
//!     if report.converged() {
//!         break;
//!     }
//! }
//! ```

pub mod adapt;
pub mod basis;
pub mod error;
pub mod mesh;
pub mod quadrature;
pub mod solution;
pub mod space;

pub use adapt::{
    AdaptType, AdaptationDriver, AdaptivityConfig, ConvergedReason, ErrorEstimate, ErrorEvaluator,
    FormRegistry, RefinementCandidate, RefinementStrategy, SolutionPair, StepReport,
};
pub use basis::OrthonormalBasisCache;
pub use error::{AdaptError, Result};
pub use mesh::{ElementType, Mesh, SplitKind};
pub use solution::{ExactSolution, FunctionValue, MeshFunction, ProjectedSolution};
pub use space::{Discretization, Space, SpaceKind};

/// Library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
