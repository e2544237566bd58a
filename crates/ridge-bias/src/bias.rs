//! The metadynamics bias orchestrator.
//!
//! `MetaBias` drives one walker: every `newHillFrequency` steps it deposits
//! a Gaussian at the current CV position (scaled by the well-tempered
//! and/or ensemble-biased factors, mirrored at reflection limits), projects
//! accumulated hills to the grids every `gridsUpdateFrequency` steps,
//! exchanges hills with peer walkers every `replicaUpdateFrequency` steps,
//! and hands energy and forces back to the hosting engine each step.
//!
//! # Scaling factors
//!
//! Well-tempered metadynamics damps the deposition weight by
//! `exp(-E(x)/kT_bias)` with `kT_bias = biasTemperature·k_B`, so the bias
//! converges to `-(1 + T/ΔT)⁻¹`-scaled free energy instead of growing
//! forever. Ensemble-biased metadynamics divides the weight by a target
//! distribution, optionally blending in linearly over
//! `ebMetaEquilSteps` steps.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};

use ridge_core::{Colvar, ColvarKind, ColvarValue, EngineContext, MemoryStream, Result,
    RidgeError, TokenCursor};
use ridge_grid::ScalarGrid;

use crate::ensemble::{min_grid_buffer, scalar_values, HillEnsemble, ReadOptions};
use crate::hill::{hills_energy, Hill};
use crate::limits::{IntervalLimits, ReflectionLimits};
use crate::params::MetaParams;
use crate::replica::ReplicaCoordinator;
use crate::state::{StateHeader, TextSink, KEEP_HILLS_STATE_VERSION, STATE_VERSION};

pub struct MetaBias {
    name: String,
    params: MetaParams,
    colvars: Vec<Colvar>,
    sigmas: Vec<f64>,
    /// Dimensionless hill width in bins; 0 when sigmas were given directly
    hill_width: f64,
    grids_freq: u64,
    expand_grids: bool,
    ensemble: HillEnsemble,
    target_dist: Option<ScalarGrid>,
    reflection: ReflectionLimits,
    interval: IntervalLimits,
    coordinator: Option<ReplicaCoordinator>,
    bias_energy: f64,
    colvar_forces: Vec<ColvarValue>,
    traj_buffer: String,
    output_prefix: String,
    boltzmann: f64,
    target_temperature: f64,
    restart_keep_hills: bool,
    has_data: bool,
    current_step: u64,
}

impl MetaBias {
    /// Validates the configuration and allocates the bias. In
    /// multiple-walker mode this also registers the walker on the file
    /// system and publishes an initial (empty) state file.
    pub fn new(
        name: impl Into<String>,
        params: MetaParams,
        colvars: Vec<Colvar>,
        context: &dyn EngineContext,
    ) -> Result<Self> {
        let name = name.into();
        let mut params = params;
        if colvars.is_empty() {
            return Err(RidgeError::input("metadynamics requires at least one colvar"));
        }
        if params.hill_weight <= 0.0 {
            return Err(RidgeError::input(
                "hillWeight must be provided, and a positive number",
            ));
        }
        let sigmas = params.resolve_sigmas(&colvars)?;
        let hill_width = params.hill_width;

        if params.use_grids {
            for (cv, &sigma) in colvars.iter().zip(&sigmas) {
                if cv.kind != ColvarKind::Scalar {
                    return Err(RidgeError::input(format!(
                        "grids require scalar-valued variables, but \"{}\" is not",
                        cv.name
                    )));
                }
                if 2.0 * sigma < cv.width {
                    log::warn!(
                        "bias \"{}\": gaussianSigmas is too narrow for the grid spacing \
                         along \"{}\"",
                        name,
                        cv.name
                    );
                }
            }
        } else {
            params.write_free_energy_file = false;
        }
        let grids_freq = params.grids_freq();
        let expand_grids = params.use_grids && colvars.iter().any(|cv| cv.expand_boundaries);
        for cv in colvars.iter().filter(|cv| cv.expand_boundaries) {
            log::info!(
                "bias \"{}\": will expand grids when colvar \"{}\" approaches its boundaries",
                name,
                cv.name
            );
        }

        if params.well_tempered && params.bias_temperature <= 0.0 {
            return Err(RidgeError::input(
                "biasTemperature must be set to a positive value",
            ));
        }
        if params.well_tempered {
            log::info!(
                "bias \"{}\": well-tempered metadynamics, bias temperature {}",
                name,
                params.bias_temperature
            );
        }

        if params.multiple_replicas {
            if params.replica_id.is_empty() {
                match context.replica_index() {
                    Some(index) => {
                        params.replica_id = index.to_string();
                        log::info!(
                            "bias \"{}\": replicaID {} obtained from the communicator",
                            name,
                            params.replica_id
                        );
                    }
                    None => {
                        return Err(RidgeError::input(
                            "using more than one replica, but replicaID could not be obtained",
                        ))
                    }
                }
            }
            if params.replicas_registry.is_empty() {
                return Err(RidgeError::input(
                    "the name of the replicasRegistry file must be provided",
                ));
            }
            if params.replica_update_frequency == 0 {
                return Err(RidgeError::input("replicaUpdateFrequency must be positive"));
            }
            if expand_grids {
                return Err(RidgeError::input(
                    "expandBoundaries is not supported with multiple replicas; allocate \
                     wide enough boundaries for each colvar ahead of time",
                ));
            }
            if params.keep_hills {
                return Err(RidgeError::input(
                    "multipleReplicas and keepHills are not supported together",
                ));
            }
        }

        let target_dist = Self::init_ebmeta(&name, &params, &colvars, expand_grids)?;
        let reflection =
            ReflectionLimits::from_params(&params, &colvars, &sigmas, params.use_grids)?;
        let interval = IntervalLimits::from_params(&params, &colvars, &reflection)?;

        let ensemble = HillEnsemble::new(&colvars, params.use_grids)?;
        let n = colvars.len();
        let colvar_forces = colvars
            .iter()
            .map(|cv| ColvarValue::zero(cv.kind))
            .collect();

        let mut bias = MetaBias {
            name,
            params,
            colvars,
            sigmas,
            hill_width,
            grids_freq,
            expand_grids,
            ensemble,
            target_dist,
            reflection,
            interval,
            coordinator: None,
            bias_energy: 0.0,
            colvar_forces,
            traj_buffer: String::new(),
            output_prefix: context.output_prefix().to_string(),
            boltzmann: context.boltzmann(),
            target_temperature: context.target_temperature(),
            restart_keep_hills: false,
            has_data: false,
            current_step: 0,
        };
        debug_assert_eq!(bias.colvar_forces.len(), n);
        bias.setup_output()?;
        Ok(bias)
    }

    fn init_ebmeta(
        name: &str,
        params: &MetaParams,
        colvars: &[Colvar],
        expand_grids: bool,
    ) -> Result<Option<ScalarGrid>> {
        if !params.eb_meta {
            return Ok(None);
        }
        if expand_grids {
            return Err(RidgeError::input(
                "expandBoundaries is not supported with ebMeta; allocate wide enough \
                 boundaries ahead of time and set targetDistFile accordingly",
            ));
        }
        if params.target_dist_file.is_empty() {
            return Err(RidgeError::input("ebMeta requires targetDistFile"));
        }
        let mut target = ScalarGrid::new(colvars, false)?;
        let file = File::open(&params.target_dist_file)
            .map_err(|e| RidgeError::file(params.target_dist_file.clone(), e))?;
        target.read_multicol(BufReader::new(file), "ebMeta target histogram")?;

        let min_val = target.minimum_value();
        let max_val = target.maximum_value();
        if min_val < 0.0 {
            return Err(RidgeError::input(
                "the target distribution of ebMeta has negative values",
            ));
        }
        let threshold = params.target_dist_min_val;
        if threshold > 0.0 && threshold < 1.0 {
            target.remove_small_values(max_val * threshold);
        } else if threshold == 0.0 {
            log::info!(
                "bias \"{}\": targetDistMinVal is zero, clamping at the minimum positive value",
                name
            );
            let min_pos = target.minimum_pos_value();
            if min_pos <= 0.0 {
                return Err(RidgeError::input(
                    "the target distribution of ebMeta has no positive values",
                ));
            }
            if min_val == 0.0 {
                log::warn!(
                    "bias \"{}\": the target distribution has zeros; converting them to the \
                     minimum positive value",
                    name
                );
                target.remove_small_values(min_pos);
            }
        } else {
            return Err(RidgeError::input(
                "targetDistMinVal must be a value between 0 and 1",
            ));
        }

        // normalize, then multiply by the effective volume exp(S) so a flat
        // target reproduces plain metadynamics
        target.multiply_constant(1.0 / target.integral());
        let volume = target.entropy().exp();
        target.multiply_constant(volume);
        Ok(Some(target))
    }

    /// Registers this walker's files (multiple-walker mode only).
    fn setup_output(&mut self) -> Result<()> {
        if !self.params.multiple_replicas || self.coordinator.is_some() {
            return Ok(());
        }
        let coordinator = ReplicaCoordinator::setup(
            &self.name,
            &self.params.replica_id,
            std::path::Path::new(&self.params.replicas_registry),
            &self.output_prefix,
            self.params.replica_update_frequency,
            self.params.new_hill_frequency,
            self.params.use_grids,
        )?;
        self.coordinator = Some(coordinator);
        // publish a state file right away so peers always find one
        let text = self.state_to_string()?;
        self.coordinator
            .as_ref()
            .unwrap()
            .write_local_state(&text)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn replica_id(&self) -> &str {
        &self.params.replica_id
    }

    pub fn bias_energy(&self) -> f64 {
        self.bias_energy
    }

    pub fn colvar_forces(&self) -> &[ColvarValue] {
        &self.colvar_forces
    }

    /// True once at least one hill has been deposited or restored.
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    pub fn ensemble(&self) -> &HillEnsemble {
        &self.ensemble
    }

    /// The multiple-walker coordinator, if this bias runs as one walker.
    pub fn coordinator(&self) -> Option<&ReplicaCoordinator> {
        self.coordinator.as_ref()
    }

    /// One step of the update cycle: grid expansion, deposition,
    /// projection, replica exchange, then energy and forces at `values`.
    pub fn update(&mut self, step: u64, values: &[ColvarValue]) -> Result<()> {
        if values.len() != self.colvars.len() {
            return Err(RidgeError::bug(format!(
                "update called with {} values for {} colvars",
                values.len(),
                self.colvars.len()
            )));
        }
        self.current_step = step;
        self.update_grid_params(values)?;
        self.update_bias(step, values)?;
        self.update_grid_data(step)?;

        if self.coordinator.is_some() && step % self.params.replica_update_frequency.max(1) == 0 {
            self.replica_share()?;
        }

        self.calc_energy(values);
        self.calc_forces(values);
        Ok(())
    }

    /// Grows the grids when the current position comes within the buffer
    /// zone of a soft boundary, remapping the accumulated data.
    fn update_grid_params(&mut self, values: &[ColvarValue]) -> Result<()> {
        if !self.expand_grids {
            return Ok(());
        }
        let scalars = match scalar_values(values) {
            Some(s) => s,
            None => return Ok(()),
        };
        let energy = self
            .ensemble
            .energy_grid
            .as_ref()
            .ok_or_else(|| RidgeError::bug("expand_grids set without grids"))?;
        let min_buffer = min_grid_buffer(self.hill_width) as i64;
        let mut curr_bin = energy.grid.bin_of(&scalars);
        let mut new_axes = energy.grid.axes().to_vec();
        let mut changed = false;

        for i in 0..self.colvars.len() {
            if !self.colvars[i].expand_boundaries {
                continue;
            }
            let mut bins = new_axes[i].bins as i64;
            let mut extra_lo = 0i64;
            let mut extra_hi = 0i64;
            if !self.colvars[i].hard_lower_boundary && curr_bin[i] < min_buffer {
                extra_lo = min_buffer - curr_bin[i];
                bins += extra_lo;
                curr_bin[i] += extra_lo;
            }
            if !self.colvars[i].hard_upper_boundary && curr_bin[i] > bins - min_buffer - 1 {
                extra_hi = curr_bin[i] - (bins - 1) + min_buffer;
            }
            if extra_lo > 0 || extra_hi > 0 {
                new_axes[i] = new_axes[i].extended(extra_lo as usize, extra_hi as usize);
                changed = true;
                log::info!(
                    "bias \"{}\": new boundaries for colvar \"{}\": [{}, {}]",
                    self.name,
                    self.colvars[i].name,
                    new_axes[i].lower,
                    new_axes[i].upper
                );
            }
        }

        if changed {
            let mut new_energy =
                ScalarGrid::from_grid(ridge_grid::Grid::new(new_axes.clone(), 1, 0.0)?)?;
            let mut new_gradient = ridge_grid::GradientGrid::from_grid(ridge_grid::Grid::new(
                new_axes,
                self.colvars.len(),
                0.0,
            )?)?;
            new_energy
                .grid
                .map_grid(&self.ensemble.energy_grid.as_ref().unwrap().grid);
            new_gradient
                .grid
                .map_grid(&self.ensemble.gradient_grid.as_ref().unwrap().grid);
            self.ensemble.energy_grid = Some(new_energy);
            self.ensemble.gradient_grid = Some(new_gradient);
        }
        Ok(())
    }

    /// Deposits the hill(s) due at this step, if any.
    fn update_bias(&mut self, step: u64, values: &[ColvarValue]) -> Result<()> {
        if self.params.new_hill_frequency == 0 || step % self.params.new_hill_frequency != 0 {
            return Ok(());
        }

        let mut scale = 1.0;
        if let Some(target) = &self.target_dist {
            if let Some(scalars) = scalar_values(values) {
                let bin = target.grid.bin_of(&scalars);
                if target.grid.index_ok(&bin) {
                    scale /= target.grid.value(&bin);
                }
            }
            let equil = self.params.eb_meta_equil_steps;
            if equil > 0 && step <= equil {
                let lambda = (equil - step) as f64 / equil as f64;
                scale = lambda + (1.0 - lambda) * scale;
            }
        }

        if self.params.well_tempered {
            let energy_here = self.local_energy_at(values);
            let kt_bias = self.params.bias_temperature * self.boltzmann;
            scale *= (-energy_here / kt_bias).exp();
        }

        // no primary hills beyond a reflection wall: only mirrored hills
        // may live there
        if !self.reflection.within_limits(values) {
            return Ok(());
        }

        let weight = self.params.hill_weight * scale;
        let mirrors = self.reflection.placements(values, &self.sigmas);
        self.deposit(Hill::new(step, weight, values.to_vec(), self.sigmas.clone()))?;
        for centers in mirrors {
            self.deposit(Hill::new(step, weight, centers, self.sigmas.clone()))?;
        }
        Ok(())
    }

    fn deposit(&mut self, mut hill: Hill) -> Result<()> {
        if let Some(coordinator) = &self.coordinator {
            hill.replica = coordinator.replica_id.clone();
            coordinator.append_hill(&hill)?;
        }
        if self.params.write_hills_trajectory {
            self.traj_buffer.push_str(&hill.output_traj());
        }
        self.ensemble.add_hill(hill, self.hill_width);
        self.has_data = true;
        Ok(())
    }

    /// Projects recent hills onto the grids, for this walker and every
    /// peer shadow.
    fn update_grid_data(&mut self, step: u64) -> Result<()> {
        if !self.params.use_grids || step % self.grids_freq != 0 {
            return Ok(());
        }
        self.ensemble
            .project_hills(&self.colvars, self.params.keep_hills, false)?;
        if let Some(coordinator) = &mut self.coordinator {
            for peer in &mut coordinator.peers {
                peer.ensemble.project_hills(&self.colvars, false, false)?;
            }
        }
        Ok(())
    }

    fn replica_share(&mut self) -> Result<()> {
        // serialize first: writing the state projects pending hills
        let text = self.state_to_string()?;
        let coordinator = self
            .coordinator
            .as_mut()
            .ok_or_else(|| RidgeError::bug("replica_share without a coordinator"))?;
        if let Err(e) = coordinator.write_local_state(&text) {
            log::warn!(
                "bias \"{}\": could not write the local state file ({}); will retry",
                self.name,
                e
            );
        }
        coordinator.share(&self.colvars, self.hill_width);
        Ok(())
    }

    /// This walker's own bias energy at `values` (no peer contributions).
    fn local_energy_at(&self, values: &[ColvarValue]) -> f64 {
        if self.params.use_grids {
            self.ensemble.energy_at(&self.colvars, values)
        } else {
            hills_energy(self.ensemble.new_hills(), &self.colvars, values)
        }
    }

    /// Total bias energy at `values`, including peer shadows.
    pub fn energy_at(&self, values: &[ColvarValue]) -> f64 {
        let mut energy = self.ensemble.energy_at(&self.colvars, values);
        if let Some(coordinator) = &self.coordinator {
            for peer in &coordinator.peers {
                energy += peer.ensemble.energy_at(&self.colvars, values);
            }
        }
        energy
    }

    fn calc_energy(&mut self, values: &[ColvarValue]) {
        self.bias_energy = self.energy_at(values);
    }

    fn calc_forces(&mut self, values: &[ColvarValue]) {
        for (force, cv) in self.colvar_forces.iter_mut().zip(&self.colvars) {
            *force = ColvarValue::zero(cv.kind);
        }
        self.ensemble
            .forces_at(&self.colvars, values, &mut self.colvar_forces);
        if let Some(coordinator) = &self.coordinator {
            for peer in &coordinator.peers {
                peer.ensemble
                    .forces_at(&self.colvars, values, &mut self.colvar_forces);
            }
        }
        self.interval.clip(values, &mut self.colvar_forces);
    }

    fn state_header(&self) -> StateHeader {
        StateHeader {
            name: self.name.clone(),
            step: self.current_step,
            version: STATE_VERSION,
            keep_hills: self.params.keep_hills,
            replica_id: self.params.replica_id.clone(),
        }
    }

    /// Writes the formatted state block. Pending hills are projected as a
    /// side effect, so the stored grids are complete.
    pub fn write_state<W: Write>(&mut self, w: &mut W) -> Result<()> {
        writeln!(w, "metadynamics {{")?;
        self.state_header().write_text(w)?;
        let mut sink = TextSink(&mut *w);
        self.ensemble
            .write_state_data(&mut sink, &self.colvars, self.params.keep_hills)?;
        writeln!(w, "}}")?;
        Ok(())
    }

    pub fn state_to_string(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_state(&mut buf)?;
        String::from_utf8(buf).map_err(|_| RidgeError::bug("state serialization is not UTF-8"))
    }

    /// Binary mirror of [`MetaBias::write_state`].
    pub fn write_state_binary(&mut self, os: &mut MemoryStream) -> Result<()> {
        os.write_object(&"metadynamics".to_string());
        self.state_header().write_binary(os);
        self.ensemble
            .write_state_data(os, &self.colvars, self.params.keep_hills)?;
        if os.good() {
            Ok(())
        } else {
            Err(RidgeError::input("binary state stream exceeded its capacity"))
        }
    }

    /// Restores the bias from a formatted state block.
    pub fn read_state(&mut self, text: &str) -> Result<()> {
        let mut cur = TokenCursor::new(text);
        if !cur.expect("metadynamics") || !cur.expect("{") {
            return Err(RidgeError::input(
                "restart stream does not hold a metadynamics block",
            ));
        }
        let header = StateHeader::read_text(&mut cur)?;
        self.apply_state_header(&header)?;
        let opts = self.read_options();
        self.ensemble
            .read_state_data(&mut cur, &self.colvars, &opts)?;
        if !cur.expect("}") {
            return Err(RidgeError::input("unterminated metadynamics block"));
        }
        self.has_data = true;
        Ok(())
    }

    /// Binary mirror of [`MetaBias::read_state`].
    pub fn read_state_binary(&mut self, is: &mut MemoryStream) -> Result<()> {
        match is.read_object::<String>() {
            Some(key) if key == "metadynamics" => {}
            _ => {
                return Err(RidgeError::input(
                    "restart stream does not hold a metadynamics block",
                ))
            }
        }
        let header = StateHeader::read_binary(is)?;
        self.apply_state_header(&header)?;
        let opts = self.read_options();
        self.ensemble.read_state_data(is, &self.colvars, &opts)?;
        self.has_data = true;
        Ok(())
    }

    fn apply_state_header(&mut self, header: &StateHeader) -> Result<()> {
        if !header.name.is_empty() && header.name != self.name {
            return Err(RidgeError::input(format!(
                "the restart state belongs to bias \"{}\", not \"{}\"",
                header.name, self.name
            )));
        }
        if self.params.multiple_replicas
            && !header.replica_id.is_empty()
            && header.replica_id != self.params.replica_id
        {
            return Err(RidgeError::input(format!(
                "the state block has a different replicaID ({} instead of {})",
                header.replica_id, self.params.replica_id
            )));
        }
        self.current_step = header.step;

        let mut restart_keep_hills = header.keep_hills;
        if !restart_keep_hills && header.version < KEEP_HILLS_STATE_VERSION {
            if self.params.keep_hills {
                log::warn!(
                    "bias \"{}\": could not ensure that keepHills was enabled when this \
                     state was written; assuming it was, but please verify",
                    self.name
                );
                restart_keep_hills = true;
            }
        } else if restart_keep_hills {
            log::info!("bias \"{}\": this state contains explicit hills", self.name);
        }
        self.restart_keep_hills = restart_keep_hills;
        Ok(())
    }

    fn read_options(&self) -> ReadOptions {
        ReadOptions {
            use_grids: self.params.use_grids,
            rebin_grids: self.params.rebin_grids,
            keep_hills: self.params.keep_hills,
            restart_keep_hills: self.restart_keep_hills,
            hill_width: self.hill_width,
            expected_replica: self
                .params
                .multiple_replicas
                .then(|| self.params.replica_id.clone()),
        }
    }

    /// Writes the PMF file(s) and flushes the hills trajectory buffer.
    pub fn write_output_files(&mut self, step: u64) -> Result<()> {
        if self.params.write_free_energy_file {
            self.write_pmf(step)?;
        }
        if self.params.write_hills_trajectory && !self.traj_buffer.is_empty() {
            let path = self.traj_file_name();
            let mut file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .map_err(|e| RidgeError::file(path.clone(), e))?;
            file.write_all(self.traj_buffer.as_bytes())
                .map_err(|e| RidgeError::file(path, e))?;
            self.traj_buffer.clear();
        }
        Ok(())
    }

    /// Dumps the free-energy estimate: the accumulated bias energy shifted
    /// to max = 0, negated, and rescaled by `(T_bias + T)/T_bias` when
    /// well-tempered. In multiple-walker mode the combined PMF sums every
    /// walker's grid; the own-walker PMF goes to a `.partial` file when
    /// requested.
    pub fn write_pmf(&mut self, step: u64) -> Result<()> {
        let energy = match &self.ensemble.energy_grid {
            Some(g) => g,
            None => return Ok(()),
        };
        let multi = self.coordinator.is_some();

        if !multi || self.params.write_partial_free_energy_file {
            let mut pmf = energy.zeros_like();
            pmf.add_grid(energy)?;
            self.finish_pmf(&mut pmf);
            self.dump_pmf(&pmf, &self.pmf_file_name(multi, step))?;
        }

        if multi {
            let mut pmf = energy.zeros_like();
            pmf.add_grid(energy)?;
            if let Some(coordinator) = &self.coordinator {
                for peer in &coordinator.peers {
                    if let Some(peer_energy) = &peer.ensemble.energy_grid {
                        pmf.add_grid(peer_energy)?;
                    }
                }
            }
            self.finish_pmf(&mut pmf);
            self.dump_pmf(&pmf, &self.pmf_file_name(false, step))?;
        }
        Ok(())
    }

    fn finish_pmf(&self, pmf: &mut ScalarGrid) {
        if let Some(target) = &self.target_dist {
            let kt = self.target_temperature * self.boltzmann;
            for (p, t) in pmf
                .grid
                .raw_data_mut()
                .iter_mut()
                .zip(target.grid.raw_data())
            {
                *p = if *t > 0.0 { *p + kt * t.ln() } else { 0.0 };
            }
        }
        let max = pmf.maximum_value();
        pmf.add_constant(-max);
        pmf.multiply_constant(-1.0);
        if self.params.well_tempered {
            let scale = (self.params.bias_temperature + self.target_temperature)
                / self.params.bias_temperature;
            pmf.multiply_constant(scale);
        }
    }

    fn dump_pmf(&self, pmf: &ScalarGrid, path: &str) -> Result<()> {
        let file = File::create(path).map_err(|e| RidgeError::file(path.to_string(), e))?;
        let mut writer = BufWriter::new(file);
        pmf.write_multicol(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    fn pmf_file_name(&self, partial: bool, step: u64) -> String {
        format!(
            "{}.{}{}{}.pmf",
            self.output_prefix,
            self.name,
            if partial { ".partial" } else { "" },
            if self.params.keep_free_energy_files {
                format!(".{}", step)
            } else {
                String::new()
            }
        )
    }

    fn traj_file_name(&self) -> String {
        let replica = if self.params.multiple_replicas {
            format!(".{}", self.params.replica_id)
        } else {
            String::new()
        };
        format!(
            "{}.colvars.{}{}.hills.traj",
            self.output_prefix, self.name, replica
        )
    }
}
