//! hp-adaptivity: error estimation, element ranking and refinement selection
//!
//! The typical loop, driven by the host that solves the PDE:
//!
//! 1. solve on the coarse [`Discretization`](crate::space::Discretization)
//!    and on its reference (`Discretization::reference`)
//! 2. hand both solutions to [`AdaptationDriver::adapt_step`]
//! 3. repeat until the report says the run converged

mod candidates;
mod config;
mod driver;
mod estimator;
mod forms;
mod ranking;
mod selector;

pub use candidates::*;
pub use config::*;
pub use driver::*;
pub use estimator::*;
pub use forms::*;
pub use ranking::*;
pub use selector::*;
