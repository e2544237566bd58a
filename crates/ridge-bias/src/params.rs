//! Bias configuration.
//!
//! Key spellings match the configuration grammar of the hosting engine
//! (`hillWeight`, `newHillFrequency`, …). Every key is optional in the
//! serialized form; `hillWeight` and one of `hillWidth`/`gaussianSigmas`
//! are validated as required when the bias is constructed.

use serde::{Deserialize, Serialize};

use ridge_core::{Colvar, Result, RidgeError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetaParams {
    /// Weight of each deposited hill; must be positive
    pub hill_weight: f64,
    /// Steps between depositions
    pub new_hill_frequency: u64,
    /// Gaussian width in grid-bin units; sigma is `width·hillWidth/2`
    pub hill_width: f64,
    /// Explicit per-CV sigmas; mutually exclusive with `hillWidth`
    pub gaussian_sigmas: Vec<f64>,
    pub use_grids: bool,
    /// Steps between grid projections; 0 means `newHillFrequency`
    pub grids_update_frequency: u64,
    /// Recompute the grids from the hill list on restart
    pub rebin_grids: bool,
    pub write_free_energy_file: bool,
    pub keep_hills: bool,
    /// Emit step-stamped PMF files instead of overwriting one
    pub keep_free_energy_files: bool,
    pub write_hills_trajectory: bool,

    pub well_tempered: bool,
    pub bias_temperature: f64,

    pub eb_meta: bool,
    pub target_dist_file: String,
    pub target_dist_min_val: f64,
    pub eb_meta_equil_steps: u64,

    pub use_hills_reflection: bool,
    pub reflection_type: String,
    pub reflection_range: f64,
    #[serde(rename = "reflectionLowLimitNCVs")]
    pub reflection_low_limit_ncvs: Option<usize>,
    #[serde(rename = "reflectionUpLimitNCVs")]
    pub reflection_up_limit_ncvs: Option<usize>,
    #[serde(rename = "reflectionLowLimitUseCVs")]
    pub reflection_low_limit_use_cvs: Vec<usize>,
    #[serde(rename = "reflectionUpLimitUseCVs")]
    pub reflection_up_limit_use_cvs: Vec<usize>,
    pub reflection_low_limit: Vec<f64>,
    pub reflection_up_limit: Vec<f64>,

    pub use_hills_interval: bool,
    #[serde(rename = "intervalLowLimitNCVs")]
    pub interval_low_limit_ncvs: Option<usize>,
    #[serde(rename = "intervalUpLimitNCVs")]
    pub interval_up_limit_ncvs: Option<usize>,
    #[serde(rename = "intervalLowLimitUseCVs")]
    pub interval_low_limit_use_cvs: Vec<usize>,
    #[serde(rename = "intervalUpLimitUseCVs")]
    pub interval_up_limit_use_cvs: Vec<usize>,
    pub interval_low_limit: Vec<f64>,
    pub interval_up_limit: Vec<f64>,

    pub multiple_replicas: bool,
    #[serde(rename = "replicaID")]
    pub replica_id: String,
    pub replicas_registry: String,
    pub replica_update_frequency: u64,
    pub write_partial_free_energy_file: bool,
}

impl Default for MetaParams {
    fn default() -> Self {
        MetaParams {
            hill_weight: 0.0,
            new_hill_frequency: 1000,
            hill_width: 0.0,
            gaussian_sigmas: Vec::new(),
            use_grids: true,
            grids_update_frequency: 0,
            rebin_grids: false,
            write_free_energy_file: true,
            keep_hills: false,
            keep_free_energy_files: false,
            write_hills_trajectory: false,
            well_tempered: false,
            bias_temperature: -1.0,
            eb_meta: false,
            target_dist_file: String::new(),
            target_dist_min_val: 1.0 / 1_000_000.0,
            eb_meta_equil_steps: 0,
            use_hills_reflection: false,
            reflection_type: "monoDimensional".to_string(),
            reflection_range: 6.0,
            reflection_low_limit_ncvs: None,
            reflection_up_limit_ncvs: None,
            reflection_low_limit_use_cvs: Vec::new(),
            reflection_up_limit_use_cvs: Vec::new(),
            reflection_low_limit: Vec::new(),
            reflection_up_limit: Vec::new(),
            use_hills_interval: false,
            interval_low_limit_ncvs: None,
            interval_up_limit_ncvs: None,
            interval_low_limit_use_cvs: Vec::new(),
            interval_up_limit_use_cvs: Vec::new(),
            interval_low_limit: Vec::new(),
            interval_up_limit: Vec::new(),
            multiple_replicas: false,
            replica_id: String::new(),
            replicas_registry: String::new(),
            replica_update_frequency: 0,
            write_partial_free_energy_file: false,
        }
    }
}

impl MetaParams {
    /// Resolves the Gaussian sigmas, enforcing the `hillWidth` /
    /// `gaussianSigmas` exclusivity.
    pub fn resolve_sigmas(&self, colvars: &[Colvar]) -> Result<Vec<f64>> {
        if !self.gaussian_sigmas.is_empty() && self.hill_width > 0.0 {
            return Err(RidgeError::input(
                "hillWidth and gaussianSigmas are mutually exclusive",
            ));
        }
        if self.hill_width > 0.0 {
            log::info!("half-widths of the Gaussian hills (sigmas):");
            let sigmas: Vec<f64> = colvars
                .iter()
                .map(|cv| cv.width * self.hill_width / 2.0)
                .collect();
            for (cv, sigma) in colvars.iter().zip(&sigmas) {
                log::info!("  {}: {}", cv.name, sigma);
            }
            return Ok(sigmas);
        }
        if self.gaussian_sigmas.len() == colvars.len()
            && self.gaussian_sigmas.iter().all(|&s| s > 0.0)
        {
            return Ok(self.gaussian_sigmas.clone());
        }
        Err(RidgeError::input(
            "positive values are required for either hillWidth or gaussianSigmas",
        ))
    }

    /// The effective projection frequency.
    pub fn grids_freq(&self) -> u64 {
        if self.grids_update_frequency > 0 {
            self.grids_update_frequency
        } else {
            self.new_hill_frequency
        }
    }
}
