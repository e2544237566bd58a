//! # ridge-grid
//!
//! Regular N-dimensional grids over collective-variable space.
//!
//! The bias accumulates hill energies and gradients on two grids sharing
//! one shape: a [`ScalarGrid`] of energies and a [`GradientGrid`] holding
//! one gradient component per CV per bin. Both are thin specializations of
//! the generic [`Grid`], which owns the bin arithmetic (discretization,
//! periodic wrap, row-major iteration, boundary distances, remapping on
//! boundary growth). Serialization lives in [`io`]: the state-block format
//! embedded in restart files and the multicolumn format used for PMF and
//! histogram files.

pub mod gradient;
pub mod grid;
pub mod io;
pub mod scalar;

pub use gradient::GradientGrid;
pub use grid::{Grid, GridAxis};
pub use scalar::ScalarGrid;
