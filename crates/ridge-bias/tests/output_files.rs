//! PMF and hills-trajectory output.

use std::io::BufReader;

use approx::assert_relative_eq;
use ridge_bias::{MetaBias, MetaParams};
use ridge_core::{Colvar, ColvarValue, EngineContext};
use ridge_grid::ScalarGrid;

struct FileContext {
    prefix: String,
}

impl EngineContext for FileContext {
    fn boltzmann(&self) -> f64 {
        1.0
    }
    fn target_temperature(&self) -> f64 {
        300.0
    }
    fn timestep(&self) -> f64 {
        1.0
    }
    fn replica_index(&self) -> Option<usize> {
        None
    }
    fn output_prefix(&self) -> &str {
        &self.prefix
    }
}

fn colvars() -> Vec<Colvar> {
    vec![Colvar::scalar("d", 0.1, -2.0, 2.0)]
}

#[test]
fn pmf_file_holds_negated_shifted_energy() {
    let dir = tempfile::tempdir().unwrap();
    let context = FileContext {
        prefix: dir.path().join("out").display().to_string(),
    };
    let params = MetaParams {
        hill_weight: 1.0,
        new_hill_frequency: 10,
        gaussian_sigmas: vec![0.2],
        well_tempered: true,
        bias_temperature: 100.0,
        ..Default::default()
    };
    let mut bias = MetaBias::new("meta", params, colvars(), &context).unwrap();
    bias.update(10, &[ColvarValue::Scalar(0.5)]).unwrap();
    bias.write_output_files(10).unwrap();

    let pmf_path = dir.path().join("out.meta.pmf");
    let mut pmf = ScalarGrid::new(&colvars(), false).unwrap();
    let file = std::fs::File::open(&pmf_path).unwrap();
    pmf.read_multicol(BufReader::new(file), "pmf").unwrap();

    // the PMF minimum (zero) sits where the bias is highest
    assert_relative_eq!(pmf.minimum_value(), 0.0, epsilon = 1e-12);
    let deposit_bin = pmf.grid.bin_of(&[0.5]);
    assert_relative_eq!(pmf.grid.value(&deposit_bin), 0.0, epsilon = 1e-9);

    // far away, the PMF equals the bias maximum (the hill evaluated half
    // a bin from its center) times the well-tempered factor
    // (T_bias + T)/T_bias
    let scale = (100.0 + 300.0) / 100.0;
    let peak = (-0.5 * (0.05f64 / 0.2).powi(2)).exp();
    let far_bin = pmf.grid.bin_of(&[-1.5]);
    assert_relative_eq!(pmf.grid.value(&far_bin), scale * peak, epsilon = 1e-6);
}

#[test]
fn step_stamped_pmf_files() {
    let dir = tempfile::tempdir().unwrap();
    let context = FileContext {
        prefix: dir.path().join("out").display().to_string(),
    };
    let params = MetaParams {
        hill_weight: 1.0,
        new_hill_frequency: 10,
        gaussian_sigmas: vec![0.2],
        keep_free_energy_files: true,
        ..Default::default()
    };
    let mut bias = MetaBias::new("meta", params, colvars(), &context).unwrap();
    bias.update(10, &[ColvarValue::Scalar(0.0)]).unwrap();
    bias.write_output_files(10).unwrap();
    bias.update(20, &[ColvarValue::Scalar(0.3)]).unwrap();
    bias.write_output_files(20).unwrap();

    assert!(dir.path().join("out.meta.10.pmf").exists());
    assert!(dir.path().join("out.meta.20.pmf").exists());
}

#[test]
fn hills_trajectory_buffer_is_flushed() {
    let dir = tempfile::tempdir().unwrap();
    let context = FileContext {
        prefix: dir.path().join("out").display().to_string(),
    };
    let params = MetaParams {
        hill_weight: 1.0,
        new_hill_frequency: 10,
        gaussian_sigmas: vec![0.2],
        write_hills_trajectory: true,
        ..Default::default()
    };
    let mut bias = MetaBias::new("meta", params, colvars(), &context).unwrap();
    bias.update(10, &[ColvarValue::Scalar(0.1)]).unwrap();
    bias.update(20, &[ColvarValue::Scalar(-0.2)]).unwrap();
    bias.write_output_files(20).unwrap();

    let traj_path = dir.path().join("out.colvars.meta.hills.traj");
    let traj = std::fs::read_to_string(&traj_path).unwrap();
    let lines: Vec<&str> = traj.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].trim_start().starts_with("10"));
    assert!(lines[1].trim_start().starts_with("20"));

    // flushing twice must not duplicate records
    bias.write_output_files(20).unwrap();
    let again = std::fs::read_to_string(&traj_path).unwrap();
    assert_eq!(again.lines().count(), 2);
}
