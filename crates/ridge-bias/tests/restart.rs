//! Restart behavior: rebinning the grids from a retained hill list.

use approx::assert_relative_eq;
use ridge_bias::{hills_energy, MetaBias, MetaParams};
use ridge_core::{Colvar, ColvarValue, EngineContext};

struct RestartContext;

impl EngineContext for RestartContext {
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
        "out"
    }
}

fn params() -> MetaParams {
    MetaParams {
        hill_weight: 1.0,
        new_hill_frequency: 10,
        gaussian_sigmas: vec![0.2],
        keep_hills: true,
        ..Default::default()
    }
}

#[test]
fn rebin_onto_wider_grid_from_kept_hills() {
    let narrow = vec![Colvar::scalar("d", 0.1, -2.0, 2.0)];
    let mut bias = MetaBias::new("meta", params(), narrow.clone(), &RestartContext).unwrap();
    bias.update(10, &[ColvarValue::Scalar(0.0)]).unwrap();
    bias.update(20, &[ColvarValue::Scalar(0.5)]).unwrap();
    let text = bias.state_to_string().unwrap();
    let hills = bias.ensemble().hills().to_vec();
    assert_eq!(hills.len(), 2);

    // restart onto wider boundaries, regenerating the grids from the hills
    let wide = vec![Colvar::scalar("d", 0.1, -3.0, 3.0)];
    let restart_params = MetaParams {
        rebin_grids: true,
        ..params()
    };
    let mut fresh = MetaBias::new("meta", restart_params, wide.clone(), &RestartContext).unwrap();
    fresh.read_state(&text).unwrap();

    // the rebinned grid reproduces the analytic hill sum, including in the
    // region the old grid never covered
    for x in [-2.55, -1.05, 0.05, 0.45, 2.45] {
        let v = [ColvarValue::Scalar(x)];
        assert_relative_eq!(
            fresh.energy_at(&v),
            hills_energy(&hills, &wide, &v),
            epsilon = 1e-10
        );
    }
}

#[test]
fn stored_grids_are_mapped_without_rebin() {
    let colvars = vec![Colvar::scalar("d", 0.1, -2.0, 2.0)];
    let mut bias = MetaBias::new("meta", params(), colvars.clone(), &RestartContext).unwrap();
    bias.update(10, &[ColvarValue::Scalar(-0.4)]).unwrap();
    let text = bias.state_to_string().unwrap();

    let mut fresh = MetaBias::new("meta", params(), colvars, &RestartContext).unwrap();
    fresh.read_state(&text).unwrap();
    for x in [-0.45, -0.05, 0.35] {
        let v = [ColvarValue::Scalar(x)];
        assert_relative_eq!(fresh.energy_at(&v), bias.energy_at(&v), epsilon = 1e-12);
    }
}
