//! One replica's accumulated bias: the hill list and the grids it projects
//! into.
//!
//! The ensemble is the unit shared between the local bias and each peer
//! shadow in a multiple-walker run. It tracks three things:
//!
//! - the ordered hill list, with `new_hills_begin` marking the first hill
//!   not yet projected to the grids;
//! - the off-grid list: copies of hills whose centers lie within
//!   `3·⌊hill_width⌋ + 1` bins of a grid boundary, kept for analytic
//!   evaluation when the CVs leave the grid (they survive the bulk clear
//!   after projection);
//! - the optional energy/gradient grid pair.
//!
//! Energy and force lookups take the grid fast path when the current bin is
//! in range, fall back to the off-grid list otherwise, and in both cases
//! add the analytic contribution of the unprojected tail.

use ridge_core::{Colvar, ColvarKind, ColvarValue, Result, RidgeError};
use ridge_grid::{GradientGrid, ScalarGrid};

use crate::hill::{hills_energy, hills_force, Hill};
use crate::state::{StateSink, StateSource};

/// Number of bins a hill center must keep from a grid boundary to be fully
/// represented by the grids.
pub fn min_grid_buffer(hill_width: f64) -> f64 {
    3.0 * hill_width.floor() + 1.0
}

/// Extracts the scalar payload of each value; `None` if any CV is not
/// scalar-valued (grids only cover scalar CVs).
pub(crate) fn scalar_values(values: &[ColvarValue]) -> Option<Vec<f64>> {
    values.iter().map(ColvarValue::as_scalar).collect()
}

/// Options controlling how state data is read back.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub use_grids: bool,
    pub rebin_grids: bool,
    /// Current configuration value of `keepHills`
    pub keep_hills: bool,
    /// Whether the state being read contains the full hill list
    pub restart_keep_hills: bool,
    pub hill_width: f64,
    /// When set, every hill record must carry this replica id
    pub expected_replica: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HillEnsemble {
    hills: Vec<Hill>,
    new_hills_begin: usize,
    off_grid: Vec<Hill>,
    pub energy_grid: Option<ScalarGrid>,
    pub gradient_grid: Option<GradientGrid>,
}

impl HillEnsemble {
    pub fn new(colvars: &[Colvar], use_grids: bool) -> Result<Self> {
        let (energy_grid, gradient_grid) = if use_grids {
            (
                Some(ScalarGrid::new(colvars, false)?),
                Some(GradientGrid::new(colvars)?),
            )
        } else {
            (None, None)
        };
        Ok(HillEnsemble {
            hills: Vec::new(),
            new_hills_begin: 0,
            off_grid: Vec::new(),
            energy_grid,
            gradient_grid,
        })
    }

    pub fn has_grids(&self) -> bool {
        self.energy_grid.is_some()
    }

    pub fn hills(&self) -> &[Hill] {
        &self.hills
    }

    pub fn off_grid_hills(&self) -> &[Hill] {
        &self.off_grid
    }

    /// Hills deposited or imported since the last projection.
    pub fn new_hills(&self) -> &[Hill] {
        &self.hills[self.new_hills_begin..]
    }

    /// Appends a hill, tracking off-grid membership.
    pub fn add_hill(&mut self, hill: Hill, hill_width: f64) {
        if let Some(grid) = &self.energy_grid {
            if let Some(scalars) = scalar_values(&hill.centers) {
                let min_dist = grid.grid.bin_distance_from_boundaries(&scalars, true);
                if min_dist < min_grid_buffer(hill_width) {
                    self.off_grid.push(hill.clone());
                }
            }
        }
        self.hills.push(hill);
    }

    /// Removes one hill by position, dropping its off-grid copy as well.
    pub fn delete_hill(&mut self, index: usize) -> Hill {
        let hill = self.hills.remove(index);
        if let Some(pos) = self.off_grid.iter().position(|h| *h == hill) {
            self.off_grid.remove(pos);
        }
        if index < self.new_hills_begin {
            self.new_hills_begin -= 1;
        }
        hill
    }

    /// Rebuilds the off-grid list from scratch. Called after a restart or
    /// whenever the grids change shape.
    pub fn recount_off_grid(&mut self, hill_width: f64) {
        self.off_grid.clear();
        let grid = match &self.energy_grid {
            Some(g) => g,
            None => return,
        };
        for hill in &self.hills {
            if let Some(scalars) = scalar_values(&hill.centers) {
                let min_dist = grid.grid.bin_distance_from_boundaries(&scalars, true);
                if min_dist < min_grid_buffer(hill_width) {
                    self.off_grid.push(hill.clone());
                }
            }
        }
    }

    /// Projects the unprojected hills onto the grids, bin by bin, then
    /// clears the hill list unless `keep_hills`. Progress is logged so that
    /// at most ~10⁶ bin-hill operations pass between reports.
    pub fn project_hills(
        &mut self,
        colvars: &[Colvar],
        keep_hills: bool,
        print_progress: bool,
    ) -> Result<()> {
        let HillEnsemble {
            hills,
            new_hills_begin,
            energy_grid,
            gradient_grid,
            ..
        } = self;
        let energy = energy_grid
            .as_mut()
            .ok_or_else(|| RidgeError::bug("project_hills called without grids"))?;
        let gradient = gradient_grid
            .as_mut()
            .ok_or_else(|| RidgeError::bug("project_hills called without a gradient grid"))?;

        let pending = &hills[*new_hills_begin..];
        if !pending.is_empty() {
            let n = colvars.len();
            let total = energy.grid.num_points();
            let print_freq = if pending.len() >= 1_000_000 {
                1
            } else {
                1_000_000 / (pending.len() + 1)
            };
            let mut values = vec![ColvarValue::Scalar(0.0); n];
            let mut forces = vec![0.0; n];
            let mut ix = energy.grid.new_index();
            let mut count = 0usize;
            while energy.grid.index_ok(&ix) {
                for i in 0..n {
                    values[i] = ColvarValue::Scalar(energy.grid.bin_to_value(ix[i], i));
                }
                energy
                    .grid
                    .acc_value(&ix, hills_energy(pending, colvars, &values));
                for (i, f) in forces.iter_mut().enumerate() {
                    let mut acc = ColvarValue::Scalar(0.0);
                    hills_force(i, pending, colvars, &values, &mut acc);
                    *f = acc.as_scalar().unwrap_or(0.0);
                }
                gradient.acc_force(&ix, &forces);

                count += 1;
                if print_progress && count % print_freq == 0 {
                    log::info!(
                        "projecting hills: {:6.2}% done",
                        100.0 * count as f64 / total as f64
                    );
                }
                energy.grid.incr(&mut ix);
            }
            if print_progress {
                log::info!("projecting hills: 100.00% done");
            }
        }

        *new_hills_begin = hills.len();
        if !keep_hills {
            hills.clear();
            *new_hills_begin = 0;
        }
        Ok(())
    }

    /// Bias energy at `values`: grid lookup when in range, analytic
    /// off-grid sum otherwise, plus the unprojected tail.
    pub fn energy_at(&self, colvars: &[Colvar], values: &[ColvarValue]) -> f64 {
        let mut energy = 0.0;
        if let Some(grid) = &self.energy_grid {
            let on_grid = scalar_values(values).and_then(|s| {
                let bin = grid.grid.bin_of(&s);
                grid.grid.index_ok(&bin).then(|| grid.grid.value(&bin))
            });
            match on_grid {
                Some(v) => energy += v,
                None => energy += hills_energy(&self.off_grid, colvars, values),
            }
        }
        energy + hills_energy(self.new_hills(), colvars, values)
    }

    /// Accumulates the bias forces at `values` into `forces` (one entry
    /// per CV, matching variants).
    pub fn forces_at(
        &self,
        colvars: &[Colvar],
        values: &[ColvarValue],
        forces: &mut [ColvarValue],
    ) {
        if let Some(gradient) = &self.gradient_grid {
            let bin = scalar_values(values).map(|s| gradient.grid.bin_of(&s));
            match bin.filter(|b| gradient.grid.index_ok(b)) {
                Some(bin) => {
                    // gradients are stored; forces carry the opposite sign
                    for (i, g) in gradient.gradient(&bin).iter().enumerate() {
                        forces[i].add_scaled(&ColvarValue::Scalar(-g), 1.0);
                    }
                }
                None => {
                    for (i, force) in forces.iter_mut().enumerate() {
                        hills_force(i, &self.off_grid, colvars, values, force);
                    }
                }
            }
        }
        for (i, force) in forces.iter_mut().enumerate() {
            hills_force(i, self.new_hills(), colvars, values, force);
        }
    }

    /// Writes grids and hills to a state sink. Pending hills are projected
    /// first, so the stored grids are complete.
    pub fn write_state_data<S: StateSink>(
        &mut self,
        sink: &mut S,
        colvars: &[Colvar],
        keep_hills: bool,
    ) -> Result<()> {
        if self.has_grids() {
            self.project_hills(colvars, keep_hills, false)?;
            sink.put_key("hills_energy")?;
            sink.put_grid(&self.energy_grid.as_ref().unwrap().grid)?;
            sink.put_key("hills_energy_gradients")?;
            sink.put_grid(&self.gradient_grid.as_ref().unwrap().grid)?;
        }
        let to_write: &[Hill] = if !self.has_grids() || keep_hills {
            &self.hills
        } else {
            &self.off_grid
        };
        for hill in to_write {
            sink.put_hill(hill)?;
        }
        Ok(())
    }

    /// Reads grids and hills from a state source, replacing this ensemble's
    /// content. Returns the number of hill records accepted.
    ///
    /// Grid precedence follows the restart rules: with `rebinGrids` and a
    /// retained hill list the grids are recomputed from the hills;
    /// otherwise the stored grids are mapped into freshly allocated grids
    /// sized by the current configuration.
    pub fn read_state_data<S: StateSource>(
        &mut self,
        source: &mut S,
        colvars: &[Colvar],
        opts: &ReadOptions,
    ) -> Result<usize> {
        let kinds: Vec<ColvarKind> = colvars.iter().map(|cv| cv.kind).collect();
        let old_len = self.hills.len();

        let mut stored_grids = None;
        if opts.use_grids {
            match source.get_grid("hills_energy", 1) {
                Ok(energy) => {
                    let gradient = source.get_grid("hills_energy_gradients", colvars.len())?;
                    stored_grids = Some((energy, gradient));
                }
                Err(e) => {
                    if !opts.rebin_grids {
                        return Err(RidgeError::input(format!(
                            "could not read grid data from the state ({}); if useGrids was \
                             off when the state was written, enable rebinGrids to \
                             regenerate the grids",
                            e
                        )));
                    }
                }
            }
        }

        let mut accepted = 0usize;
        while let Some(hill) = source.get_hill(&kinds) {
            if let Some(expected) = &opts.expected_replica {
                if hill.replica != *expected {
                    return Err(RidgeError::input(format!(
                        "read a hill created by replica \"{}\" for replica \"{}\"; \
                         did you swap output files?",
                        hill.replica, expected
                    )));
                }
            }
            self.hills.push(hill);
            accepted += 1;
        }
        log::info!("successfully read {} explicit hills from the state", accepted);

        // prune hills that pre-existed those just read
        if old_len > 0 {
            self.hills.drain(0..old_len);
        }
        // with grids the restored hills are already projected; without,
        // they are the live tail
        self.new_hills_begin = if opts.use_grids { self.hills.len() } else { 0 };

        if opts.use_grids {
            if opts.rebin_grids && opts.restart_keep_hills && !self.hills.is_empty() {
                log::info!(
                    "rebinning the energy and force grids from {} hills",
                    self.hills.len()
                );
                self.energy_grid = Some(ScalarGrid::new(colvars, false)?);
                self.gradient_grid = Some(GradientGrid::new(colvars)?);
                self.new_hills_begin = 0;
                self.project_hills(colvars, opts.keep_hills, true)?;
            } else if let Some((energy, gradient)) = stored_grids {
                let mut fresh_e = ScalarGrid::new(colvars, false)?;
                let mut fresh_g = GradientGrid::new(colvars)?;
                fresh_e.grid.map_grid(&energy);
                fresh_g.grid.map_grid(&gradient);
                self.energy_grid = Some(fresh_e);
                self.gradient_grid = Some(fresh_g);
            } else {
                self.energy_grid = Some(ScalarGrid::new(colvars, false)?);
                self.gradient_grid = Some(GradientGrid::new(colvars)?);
            }
        }

        self.recount_off_grid(opts.hill_width);
        if !self.off_grid.is_empty() {
            log::info!(
                "{} hills are near the grid boundaries and will be computed analytically",
                self.off_grid.len()
            );
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ridge_core::TokenCursor;

    use crate::state::TextSink;

    fn colvars_1d() -> Vec<Colvar> {
        vec![Colvar::scalar("d", 0.1, -2.0, 2.0)]
    }

    fn hill_at(x: f64, weight: f64) -> Hill {
        Hill::new(0, weight, vec![ColvarValue::Scalar(x)], vec![0.2])
    }

    #[test]
    fn test_projection_matches_analytic_sum() {
        let colvars = colvars_1d();
        let mut ens = HillEnsemble::new(&colvars, true).unwrap();
        ens.add_hill(hill_at(0.0, 1.0), 1.0);
        ens.add_hill(hill_at(0.5, 0.7), 1.0);
        let reference = ens.hills().to_vec();

        ens.project_hills(&colvars, false, false).unwrap();
        assert!(ens.hills().is_empty());

        // grid values agree with the analytic sum at every bin center
        let grid = &ens.energy_grid.as_ref().unwrap().grid;
        let mut ix = grid.new_index();
        while grid.index_ok(&ix) {
            let x = [ColvarValue::Scalar(grid.bin_to_value(ix[0], 0))];
            assert_relative_eq!(
                grid.value(&ix),
                hills_energy(&reference, &colvars, &x),
                epsilon = 1e-12
            );
            grid.incr(&mut ix);
        }
    }

    #[test]
    fn test_energy_uses_grid_after_projection() {
        let colvars = colvars_1d();
        let mut ens = HillEnsemble::new(&colvars, true).unwrap();
        ens.add_hill(hill_at(0.0, 1.0), 1.0);

        let x = [ColvarValue::Scalar(0.03)];
        let before = ens.energy_at(&colvars, &x);
        ens.project_hills(&colvars, false, false).unwrap();
        let after = ens.energy_at(&colvars, &x);
        // the grid holds the bin-center value; x sits within half a bin
        assert_relative_eq!(before, after, epsilon = 0.03);
    }

    #[test]
    fn test_off_grid_hills_survive_projection() {
        let colvars = colvars_1d();
        let mut ens = HillEnsemble::new(&colvars, true).unwrap();
        // center within the boundary buffer of the upper edge
        ens.add_hill(hill_at(1.95, 1.0), 1.0);
        assert_eq!(ens.off_grid_hills().len(), 1);

        ens.project_hills(&colvars, false, false).unwrap();
        assert!(ens.hills().is_empty());
        assert_eq!(ens.off_grid_hills().len(), 1);

        // off the grid, energy comes from the off-grid list
        let x = [ColvarValue::Scalar(2.1)];
        let expected = hills_energy(ens.off_grid_hills(), &colvars, &x);
        assert_relative_eq!(ens.energy_at(&colvars, &x), expected, epsilon = 1e-12);
        assert!(expected > 0.0);
    }

    #[test]
    fn test_interior_hill_is_not_off_grid() {
        let colvars = colvars_1d();
        let mut ens = HillEnsemble::new(&colvars, true).unwrap();
        ens.add_hill(hill_at(0.0, 1.0), 1.0);
        assert!(ens.off_grid_hills().is_empty());
    }

    #[test]
    fn test_keep_hills_retains_list() {
        let colvars = colvars_1d();
        let mut ens = HillEnsemble::new(&colvars, true).unwrap();
        ens.add_hill(hill_at(0.0, 1.0), 1.0);
        ens.project_hills(&colvars, true, false).unwrap();
        assert_eq!(ens.hills().len(), 1);
        assert!(ens.new_hills().is_empty());

        // projected hills are not double counted
        let x = [ColvarValue::Scalar(0.05)];
        let e = ens.energy_at(&colvars, &x);
        assert!(e < 1.01 * hills_energy(ens.hills(), &colvars, &x));
    }

    #[test]
    fn test_delete_hill_updates_off_grid() {
        let colvars = colvars_1d();
        let mut ens = HillEnsemble::new(&colvars, true).unwrap();
        ens.add_hill(hill_at(1.95, 1.0), 1.0);
        ens.add_hill(hill_at(0.0, 1.0), 1.0);
        assert_eq!(ens.off_grid_hills().len(), 1);
        ens.delete_hill(0);
        assert!(ens.off_grid_hills().is_empty());
        assert_eq!(ens.hills().len(), 1);
    }

    #[test]
    fn test_forces_match_gradient_grid_and_tail() {
        let colvars = colvars_1d();
        let mut ens = HillEnsemble::new(&colvars, true).unwrap();
        ens.add_hill(hill_at(0.0, 1.0), 1.0);
        ens.project_hills(&colvars, false, false).unwrap();
        // a second hill still pending
        ens.add_hill(hill_at(0.4, 0.5), 1.0);

        let grid = &ens.gradient_grid.as_ref().unwrap().grid;
        let x_val = grid.bin_to_value(grid.bin_of(&[0.2])[0], 0);
        let x = [ColvarValue::Scalar(x_val)];
        let mut forces = vec![ColvarValue::Scalar(0.0)];
        ens.forces_at(&colvars, &x, &mut forces);

        let mut expected = ColvarValue::Scalar(0.0);
        hills_force(0, &[hill_at(0.0, 1.0)], &colvars, &x, &mut expected);
        hills_force(0, &[hill_at(0.4, 0.5)], &colvars, &x, &mut expected);
        assert_relative_eq!(
            forces[0].as_scalar().unwrap(),
            expected.as_scalar().unwrap(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_state_round_trip_with_kept_hills() {
        let colvars = colvars_1d();
        let mut ens = HillEnsemble::new(&colvars, true).unwrap();
        ens.add_hill(hill_at(0.0, 1.0), 1.0);
        ens.add_hill(hill_at(0.8, 0.3), 1.0);

        let mut buf = Vec::new();
        let mut sink = TextSink(&mut buf);
        ens.write_state_data(&mut sink, &colvars, true).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut fresh = HillEnsemble::new(&colvars, true).unwrap();
        let opts = ReadOptions {
            use_grids: true,
            keep_hills: true,
            restart_keep_hills: true,
            hill_width: 1.0,
            ..Default::default()
        };
        let mut cur = TokenCursor::new(&text);
        let read = fresh.read_state_data(&mut cur, &colvars, &opts).unwrap();
        assert_eq!(read, 2);

        for x in [-1.3, -0.2, 0.0, 0.45, 1.9] {
            let v = [ColvarValue::Scalar(x)];
            assert_relative_eq!(
                fresh.energy_at(&colvars, &v),
                ens.energy_at(&colvars, &v),
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn test_restart_prunes_preexisting_hills() {
        let colvars = colvars_1d();
        let mut ens = HillEnsemble::new(&colvars, true).unwrap();
        ens.add_hill(hill_at(0.0, 1.0), 1.0);

        let mut donor = HillEnsemble::new(&colvars, true).unwrap();
        donor.add_hill(hill_at(0.5, 2.0), 1.0);
        let mut buf = Vec::new();
        let mut sink = TextSink(&mut buf);
        donor.write_state_data(&mut sink, &colvars, true).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let opts = ReadOptions {
            use_grids: true,
            keep_hills: true,
            restart_keep_hills: true,
            hill_width: 1.0,
            ..Default::default()
        };
        let mut cur = TokenCursor::new(&text);
        ens.read_state_data(&mut cur, &colvars, &opts).unwrap();
        assert_eq!(ens.hills().len(), 1);
        assert_relative_eq!(
            ens.hills()[0].centers[0].as_scalar().unwrap(),
            0.5,
            epsilon = 1e-12
        );
    }
}
