//! Grid projection against analytic summation at random probe points.

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ridge_bias::{hills_energy, hills_force, Hill, HillEnsemble};
use ridge_core::{Colvar, ColvarValue};

fn colvars_2d() -> Vec<Colvar> {
    vec![
        Colvar::scalar("x", 0.1, -2.0, 2.0),
        Colvar::scalar("y", 0.1, -2.0, 2.0),
    ]
}

#[test]
fn projected_grids_match_analytic_sums_at_random_bins() {
    let colvars = colvars_2d();
    let mut rng = StdRng::seed_from_u64(271828);

    let mut ensemble = HillEnsemble::new(&colvars, true).unwrap();
    let mut deposited = Vec::new();
    for it in 0..25 {
        let hill = Hill::new(
            it,
            rng.gen_range(0.1..1.0),
            vec![
                ColvarValue::Scalar(rng.gen_range(-1.2..1.2)),
                ColvarValue::Scalar(rng.gen_range(-1.2..1.2)),
            ],
            vec![0.2, 0.25],
        );
        deposited.push(hill.clone());
        ensemble.add_hill(hill, 1.0);
    }
    ensemble.project_hills(&colvars, false, false).unwrap();
    assert!(ensemble.hills().is_empty());

    let energy = ensemble.energy_grid.as_ref().unwrap();
    let gradient = ensemble.gradient_grid.as_ref().unwrap();
    for _ in 0..50 {
        // probe at a random bin center, where grid and analytic agree
        // exactly
        let ix = [rng.gen_range(0..40) as i64, rng.gen_range(0..40) as i64];
        let probe = [
            ColvarValue::Scalar(energy.grid.bin_to_value(ix[0], 0)),
            ColvarValue::Scalar(energy.grid.bin_to_value(ix[1], 1)),
        ];
        assert_relative_eq!(
            energy.grid.value(&ix),
            hills_energy(&deposited, &colvars, &probe),
            epsilon = 1e-10,
            max_relative = 1e-10
        );
        for dim in 0..2 {
            let mut force = ColvarValue::Scalar(0.0);
            hills_force(dim, &deposited, &colvars, &probe, &mut force);
            // the grid stores gradients, the analytic series yields forces
            assert_relative_eq!(
                gradient.gradient(&ix)[dim],
                -force.as_scalar().unwrap(),
                epsilon = 1e-10,
                max_relative = 1e-10
            );
        }
    }
}
