//! Gradient grid: one energy gradient per CV per bin.
//!
//! Gradients are stored, not forces; the bias applies the sign flip when
//! handing forces back to the engine.

use ridge_core::{Colvar, Result, RidgeError};

use crate::grid::Grid;

#[derive(Debug, Clone, PartialEq)]
pub struct GradientGrid {
    pub grid: Grid<f64>,
}

impl GradientGrid {
    pub fn new(colvars: &[Colvar]) -> Result<Self> {
        Ok(GradientGrid {
            grid: Grid::from_colvars(colvars, colvars.len(), false, 0.0)?,
        })
    }

    pub fn from_grid(grid: Grid<f64>) -> Result<Self> {
        if grid.mult() != grid.dims() {
            return Err(RidgeError::bug(
                "gradient grid requires one component per dimension",
            ));
        }
        Ok(GradientGrid { grid })
    }

    /// Accumulates a force sample at a bin. The grid stores gradients, so
    /// the components are subtracted.
    pub fn acc_force(&mut self, ix: &[i64], forces: &[f64]) {
        let slot = self.grid.components_mut(ix);
        for (s, f) in slot.iter_mut().zip(forces) {
            *s -= f;
        }
    }

    /// The stored gradient at a bin.
    pub fn gradient(&self, ix: &[i64]) -> &[f64] {
        self.grid.components(ix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_forces_accumulate_as_gradients() {
        let cvs = [
            Colvar::scalar("x", 0.1, 0.0, 1.0),
            Colvar::scalar("y", 0.1, 0.0, 1.0),
        ];
        let mut g = GradientGrid::new(&cvs).unwrap();
        g.acc_force(&[2, 3], &[1.0, -0.5]);
        g.acc_force(&[2, 3], &[0.5, 0.5]);
        let grad = g.gradient(&[2, 3]);
        assert_relative_eq!(grad[0], -1.5);
        assert_relative_eq!(grad[1], 0.0);
        assert_eq!(g.gradient(&[0, 0]), &[0.0, 0.0]);
    }

    #[test]
    fn test_mult_matches_dimensions() {
        let cvs = [
            Colvar::scalar("x", 0.1, 0.0, 1.0),
            Colvar::scalar("y", 0.1, 0.0, 1.0),
            Colvar::scalar("z", 0.1, 0.0, 1.0),
        ];
        let g = GradientGrid::new(&cvs).unwrap();
        assert_eq!(g.grid.mult(), 3);
    }
}
