//! Mesh types, refinement and generators for 2D hp-FEM
//!
//! This module provides the refinement-forest mesh the adaptivity engine
//! mutates, its reference maps, and generators for common domains.

mod generators;
mod refinement;
mod refmap;
mod types;

pub use generators::*;
pub use refinement::*;
pub use refmap::*;
pub use types::*;
