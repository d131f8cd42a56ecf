//! Polynomial bases on the reference elements
//!
//! Legendre polynomials and the H1-orthonormal hierarchical bases used to
//! project reference solutions onto refinement candidates.

pub mod legendre;
mod ortho;

pub use legendre::{legendre, legendre_and_derivative};
pub use ortho::*;
