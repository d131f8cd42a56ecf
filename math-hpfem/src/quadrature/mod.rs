//! Numerical quadrature rules for finite element integration
//!
//! Gauss-Legendre rules of arbitrary order on the reference quadrilateral and
//! collapsed rules on the reference triangle.

mod gauss;
mod rules;

pub use gauss::*;
pub use rules::*;
