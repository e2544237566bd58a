//! Scalar grid: one energy (or probability) value per bin.

use ridge_core::{Colvar, Result, RidgeError};

use crate::grid::Grid;

/// Grid of one scalar per bin, with the reductions needed by the bias
/// (extrema, integral, entropy) and the conditioning operations used on
/// target distributions.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarGrid {
    pub grid: Grid<f64>,
}

impl ScalarGrid {
    pub fn new(colvars: &[Colvar], margin: bool) -> Result<Self> {
        Ok(ScalarGrid {
            grid: Grid::from_colvars(colvars, 1, margin, 0.0)?,
        })
    }

    pub fn from_grid(grid: Grid<f64>) -> Result<Self> {
        if grid.mult() != 1 {
            return Err(RidgeError::bug("scalar grid requires multiplicity 1"));
        }
        Ok(ScalarGrid { grid })
    }

    /// An empty grid with the same shape as `self`.
    pub fn zeros_like(&self) -> ScalarGrid {
        let mut copy = self.clone();
        copy.grid.reset();
        copy
    }

    pub fn maximum_value(&self) -> f64 {
        self.grid
            .raw_data()
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn minimum_value(&self) -> f64 {
        self.grid
            .raw_data()
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }

    /// Minimum strictly positive value; 0.0 when no entry is positive.
    pub fn minimum_pos_value(&self) -> f64 {
        let min = self
            .grid
            .raw_data()
            .iter()
            .copied()
            .filter(|&v| v > 0.0)
            .fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            min
        } else {
            0.0
        }
    }

    /// `∏ widths · Σ data`.
    pub fn integral(&self) -> f64 {
        self.bin_volume() * self.grid.raw_data().iter().sum::<f64>()
    }

    /// Differential entropy `∏ widths · Σ -p·ln(p)` over positive entries.
    pub fn entropy(&self) -> f64 {
        let sum: f64 = self
            .grid
            .raw_data()
            .iter()
            .filter(|&&v| v > 0.0)
            .map(|&v| -v * v.ln())
            .sum();
        self.bin_volume() * sum
    }

    fn bin_volume(&self) -> f64 {
        self.grid.axes().iter().map(|ax| ax.width).product()
    }

    /// Replaces entries below `threshold` with `threshold`.
    pub fn remove_small_values(&mut self, threshold: f64) {
        for v in self.grid.raw_data_mut() {
            if *v < threshold {
                *v = threshold;
            }
        }
    }

    pub fn multiply_constant(&mut self, factor: f64) {
        for v in self.grid.raw_data_mut() {
            *v *= factor;
        }
    }

    pub fn add_constant(&mut self, delta: f64) {
        for v in self.grid.raw_data_mut() {
            *v += delta;
        }
    }

    /// Adds another grid of the same shape bin by bin.
    pub fn add_grid(&mut self, other: &ScalarGrid) -> Result<()> {
        if !self.grid.same_shape(&other.grid) {
            return Err(RidgeError::bug(
                "add_grid between grids of different shapes",
            ));
        }
        for (a, b) in self
            .grid
            .raw_data_mut()
            .iter_mut()
            .zip(other.grid.raw_data())
        {
            *a += b;
        }
        Ok(())
    }

    /// Projects the non-zero entries onto the probability simplex
    /// (Wang & Carreira-Perpiñán 2003): sort descending, find the largest
    /// `ρ` with `p[ρ-1] + (1 - Σ_{i<ρ} p[i])/ρ > 0`, shift every entry by
    /// `λ = (1 - Σ_{i<ρ} p[i])/ρ` and clamp at zero.
    pub fn simplexproj(&mut self) {
        let nonzero: Vec<usize> = self
            .grid
            .raw_data()
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0.0)
            .map(|(i, _)| i)
            .collect();
        if nonzero.is_empty() {
            return;
        }

        let mut sorted: Vec<f64> = nonzero
            .iter()
            .map(|&i| self.grid.raw_data()[i])
            .collect();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let mut sum = 0.0;
        let mut rho = 0;
        for (i, &p) in sorted.iter().enumerate() {
            sum += p;
            if p + (1.0 - sum) / (i + 1) as f64 > 0.0 {
                rho = i + 1;
            }
        }
        let head: f64 = sorted[..rho].iter().sum();
        let lambda = (1.0 - head) / rho as f64;

        let data = self.grid.raw_data_mut();
        for &i in &nonzero {
            data[i] = (data[i] + lambda).max(0.0);
        }
    }
}
