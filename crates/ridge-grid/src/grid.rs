//! Regular N-dimensional grid over CV space.
//!
//! Storage is a flat row-major array with the last dimension fastest; each
//! bin holds `mult` consecutive values (1 for scalar grids, one per CV for
//! gradient grids). Bin indices are signed so that out-of-range positions
//! along non-periodic axes can be represented; periodic axes wrap modulo
//! their bin count.
//!
//! Conventions:
//! - `bin_of` discretizes by `floor((v - lower)/width)`;
//! - `bin_to_value` returns bin centers, `lower + (ix + 0.5)·width`;
//! - `widths[i] == (upper - lower)/bins[i]` exactly (widths are recomputed
//!   after rounding the requested spacing to a whole bin count).

use ridge_core::{Colvar, Result, RidgeError};

/// Shape of one grid dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAxis {
    pub lower: f64,
    pub upper: f64,
    pub width: f64,
    pub bins: usize,
    pub periodic: bool,
}

impl GridAxis {
    /// Builds the axis for one CV. With `margin`, non-periodic axes get an
    /// extra bin on each end so boundary bins are never half-covered.
    pub fn from_colvar(cv: &Colvar, margin: bool) -> Result<Self> {
        if cv.width <= 0.0 {
            return Err(RidgeError::input(format!(
                "colvar \"{}\" has a non-positive width",
                cv.name
            )));
        }
        if cv.upper_boundary <= cv.lower_boundary {
            return Err(RidgeError::input(format!(
                "colvar \"{}\" has an empty boundary interval",
                cv.name
            )));
        }
        let mut lower = cv.lower_boundary;
        let mut upper = cv.upper_boundary;
        let mut bins = ((upper - lower) / cv.width).round().max(1.0) as usize;
        if margin && !cv.periodic {
            lower -= cv.width;
            upper += cv.width;
            bins += 2;
        }
        // snap the spacing so that bins exactly tile the interval
        let width = (upper - lower) / bins as f64;
        Ok(GridAxis {
            lower,
            upper,
            width,
            bins,
            periodic: cv.periodic,
        })
    }

    /// Extends the axis by whole bins below and above.
    pub fn extended(&self, extra_below: usize, extra_above: usize) -> GridAxis {
        GridAxis {
            lower: self.lower - extra_below as f64 * self.width,
            upper: self.upper + extra_above as f64 * self.width,
            width: self.width,
            bins: self.bins + extra_below + extra_above,
            periodic: self.periodic,
        }
    }
}

/// Regular N-D array of `mult` values per bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    axes: Vec<GridAxis>,
    mult: usize,
    strides: Vec<usize>,
    data: Vec<T>,
}

impl<T: Copy> Grid<T> {
    pub fn new(axes: Vec<GridAxis>, mult: usize, fill: T) -> Result<Self> {
        if axes.is_empty() {
            return Err(RidgeError::input("cannot build a grid over zero colvars"));
        }
        if mult == 0 {
            return Err(RidgeError::bug("grid multiplicity must be at least 1"));
        }
        let mut strides = vec![0usize; axes.len()];
        let mut stride = mult;
        for (i, axis) in axes.iter().enumerate().rev() {
            strides[i] = stride;
            stride *= axis.bins;
        }
        let data = vec![fill; stride];
        Ok(Grid {
            axes,
            mult,
            strides,
            data,
        })
    }

    pub fn from_colvars(colvars: &[Colvar], mult: usize, margin: bool, fill: T) -> Result<Self> {
        let axes = colvars
            .iter()
            .map(|cv| GridAxis::from_colvar(cv, margin))
            .collect::<Result<Vec<_>>>()?;
        Grid::new(axes, mult, fill)
    }

    pub fn dims(&self) -> usize {
        self.axes.len()
    }

    pub fn mult(&self) -> usize {
        self.mult
    }

    pub fn axes(&self) -> &[GridAxis] {
        &self.axes
    }

    /// Number of bins (not counting multiplicity).
    pub fn num_points(&self) -> usize {
        self.data.len() / self.mult
    }

    pub fn raw_data(&self) -> &[T] {
        &self.data
    }

    pub fn raw_data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn same_shape<U>(&self, other: &Grid<U>) -> bool {
        self.axes == other.axes
    }

    /// Discretizes one value along one axis. Periodic axes wrap; for
    /// non-periodic axes an out-of-range value yields an out-of-range index.
    pub fn value_to_bin(&self, axis: usize, v: f64) -> i64 {
        let ax = &self.axes[axis];
        let ix = ((v - ax.lower) / ax.width).floor() as i64;
        if ax.periodic {
            ix.rem_euclid(ax.bins as i64)
        } else {
            ix
        }
    }

    /// Per-dimension discretization of a CV-space point.
    pub fn bin_of(&self, values: &[f64]) -> Vec<i64> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| self.value_to_bin(i, v))
            .collect()
    }

    pub fn index_ok(&self, ix: &[i64]) -> bool {
        ix.len() == self.axes.len()
            && ix
                .iter()
                .zip(&self.axes)
                .all(|(&i, ax)| i >= 0 && (i as usize) < ax.bins)
    }

    /// Center-of-bin value along axis `i`.
    pub fn bin_to_value(&self, ix_i: i64, i: usize) -> f64 {
        let ax = &self.axes[i];
        ax.lower + (ix_i as f64 + 0.5) * ax.width
    }

    pub fn new_index(&self) -> Vec<i64> {
        vec![0; self.axes.len()]
    }

    /// Row-major successor with the last dimension fastest. The end of the
    /// grid is signalled by an index for which `index_ok` is false.
    pub fn incr(&self, ix: &mut [i64]) {
        for i in (0..self.axes.len()).rev() {
            ix[i] += 1;
            if (ix[i] as usize) < self.axes[i].bins {
                return;
            }
            ix[i] = 0;
        }
        ix[0] = self.axes[0].bins as i64;
    }

    fn address(&self, ix: &[i64]) -> usize {
        ix.iter()
            .zip(&self.strides)
            .map(|(&i, &s)| i as usize * s)
            .sum()
    }

    /// First stored value at a bin (the only one for scalar grids).
    pub fn value(&self, ix: &[i64]) -> T {
        self.data[self.address(ix)]
    }

    pub fn set_value(&mut self, ix: &[i64], v: T) {
        let a = self.address(ix);
        self.data[a] = v;
    }

    /// All `mult` values stored at a bin.
    pub fn components(&self, ix: &[i64]) -> &[T] {
        let a = self.address(ix);
        &self.data[a..a + self.mult]
    }

    pub fn components_mut(&mut self, ix: &[i64]) -> &mut [T] {
        let a = self.address(ix);
        let m = self.mult;
        &mut self.data[a..a + m]
    }

    /// Minimum distance, in bins, of a CV-space point from the closest
    /// non-periodic boundary. With `signed`, positions outside the grid
    /// yield negative distances. Fully periodic grids have no boundary and
    /// return a large sentinel.
    pub fn bin_distance_from_boundaries(&self, values: &[f64], signed: bool) -> f64 {
        let mut minimum: f64 = 1.0e16;
        for (v, ax) in values.iter().zip(&self.axes) {
            if ax.periodic {
                continue;
            }
            let mut dl = (v - ax.lower).abs() / ax.width;
            let mut du = (ax.upper - v).abs() / ax.width;
            if signed {
                if *v < ax.lower {
                    dl = -dl;
                }
                if *v > ax.upper {
                    du = -du;
                }
            }
            minimum = minimum.min(dl).min(du);
        }
        minimum
    }

    /// Copies the overlapping region of `src` into `self`, matching bins by
    /// their center values. Used when boundaries grow: widths agree and the
    /// offset is a whole number of bins, so the copy is lossless.
    pub fn map_grid(&mut self, src: &Grid<T>) {
        debug_assert_eq!(self.mult, src.mult, "map_grid between unequal multiplicities");
        let n = self.axes.len();
        let mut centers = vec![0.0; n];
        let mut ix = self.new_index();
        while self.index_ok(&ix) {
            for i in 0..n {
                centers[i] = self.bin_to_value(ix[i], i);
            }
            let src_ix = src.bin_of(&centers);
            if src.index_ok(&src_ix) {
                let from = src.address(&src_ix);
                let to = self.address(&ix);
                let m = self.mult;
                self.data[to..to + m].copy_from_slice(&src.data[from..from + m]);
            }
            self.incr(&mut ix);
        }
    }
}

impl Grid<f64> {
    /// Adds `delta` to the (first) value at a bin.
    pub fn acc_value(&mut self, ix: &[i64], delta: f64) {
        let a = self.address(ix);
        self.data[a] += delta;
    }

    pub fn reset(&mut self) {
        self.data.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn axis(lower: f64, upper: f64, bins: usize) -> GridAxis {
        GridAxis {
            lower,
            upper,
            width: (upper - lower) / bins as f64,
            bins,
            periodic: false,
        }
    }

    #[test]
    fn test_axis_from_colvar_rounds_bins() {
        let cv = Colvar::scalar("d", 0.1, 0.0, 1.0);
        let ax = GridAxis::from_colvar(&cv, false).unwrap();
        assert_eq!(ax.bins, 10);
        assert_relative_eq!(ax.width, 0.1, epsilon = 1e-14);

        let with_margin = GridAxis::from_colvar(&cv, true).unwrap();
        assert_eq!(with_margin.bins, 12);
        assert_relative_eq!(with_margin.lower, -0.1, epsilon = 1e-14);
    }

    #[test]
    fn test_bin_of_and_centers() {
        let g = Grid::new(vec![axis(0.0, 1.0, 10)], 1, 0.0f64).unwrap();
        assert_eq!(g.bin_of(&[0.05]), vec![0]);
        assert_eq!(g.bin_of(&[0.95]), vec![9]);
        assert_eq!(g.bin_of(&[-0.3]), vec![-3]);
        assert_eq!(g.bin_of(&[1.2]), vec![12]);
        assert!(!g.index_ok(&[-3]));
        assert!(!g.index_ok(&[12]));
        assert_relative_eq!(g.bin_to_value(3, 0), 0.35, epsilon = 1e-14);
    }

    #[test]
    fn test_periodic_wrap() {
        let mut ax = axis(-180.0, 180.0, 36);
        ax.periodic = true;
        let g = Grid::new(vec![ax], 1, 0.0f64).unwrap();
        assert_eq!(g.bin_of(&[185.0]), g.bin_of(&[-175.0]));
        assert_eq!(g.bin_of(&[-190.0]), g.bin_of(&[170.0]));
    }

    #[test]
    fn test_incr_visits_all_points_row_major() {
        let g = Grid::new(vec![axis(0.0, 1.0, 2), axis(0.0, 1.0, 3)], 1, 0.0f64).unwrap();
        let mut ix = g.new_index();
        let mut seen = Vec::new();
        while g.index_ok(&ix) {
            seen.push(ix.clone());
            g.incr(&mut ix);
        }
        assert_eq!(seen.len(), 6);
        // last dimension runs fastest
        assert_eq!(seen[0], vec![0, 0]);
        assert_eq!(seen[1], vec![0, 1]);
        assert_eq!(seen[3], vec![1, 0]);
    }

    #[test]
    fn test_accumulate_and_read_back() {
        let mut g = Grid::new(vec![axis(0.0, 1.0, 4), axis(0.0, 1.0, 4)], 1, 0.0f64).unwrap();
        g.acc_value(&[1, 2], 0.5);
        g.acc_value(&[1, 2], 0.25);
        assert_relative_eq!(g.value(&[1, 2]), 0.75, epsilon = 1e-14);
        assert_relative_eq!(g.value(&[2, 1]), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_bin_distance_from_boundaries() {
        let g = Grid::new(vec![axis(0.0, 1.0, 10)], 1, 0.0f64).unwrap();
        assert_relative_eq!(
            g.bin_distance_from_boundaries(&[0.2], true),
            2.0,
            epsilon = 1e-12
        );
        // outside the lower edge, signed distance is negative
        assert_relative_eq!(
            g.bin_distance_from_boundaries(&[-0.1], true),
            -1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_map_grid_preserves_values_on_expansion() {
        let mut old = Grid::new(vec![axis(0.0, 1.0, 10)], 1, 0.0f64).unwrap();
        for i in 0..10 {
            old.set_value(&[i], i as f64);
        }
        let bigger = old.axes()[0].extended(0, 4);
        let mut new = Grid::new(vec![bigger], 1, 0.0f64).unwrap();
        new.map_grid(&old);
        for i in 0..10 {
            assert_relative_eq!(new.value(&[i]), i as f64, epsilon = 1e-14);
        }
        for i in 10..14 {
            assert_relative_eq!(new.value(&[i]), 0.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_map_grid_multicomponent() {
        let mut old = Grid::new(vec![axis(0.0, 1.0, 5)], 2, 0.0f64).unwrap();
        old.components_mut(&[3]).copy_from_slice(&[1.5, -2.5]);
        let mut new = Grid::new(vec![old.axes()[0].extended(2, 0)], 2, 0.0f64).unwrap();
        new.map_grid(&old);
        assert_eq!(new.components(&[5]), &[1.5, -2.5]);
    }
}
