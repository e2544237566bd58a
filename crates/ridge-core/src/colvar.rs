//! Collective-variable descriptors and the engine-context seam.
//!
//! The bias never evaluates CVs itself; it receives current values from the
//! MD bridge each step and only needs the static geometry of each CV: bin
//! spacing, boundaries, periodicity and the distance metric. `Colvar` holds
//! exactly that. Periodic scalar CVs wrap their distance to the nearest
//! image, so a hill deposited near one edge of a periodic domain is felt
//! across the seam.

use serde::{Deserialize, Serialize};

use crate::value::{ColvarKind, ColvarValue};

/// Static description of one collective variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Colvar {
    pub name: String,
    pub kind: ColvarKind,
    /// Grid bin spacing along this CV
    pub width: f64,
    pub lower_boundary: f64,
    pub upper_boundary: f64,
    pub periodic: bool,
    /// Grow the grids when the trajectory approaches a boundary
    pub expand_boundaries: bool,
    /// A hard boundary is never moved by grid expansion
    pub hard_lower_boundary: bool,
    pub hard_upper_boundary: bool,
}

impl Colvar {
    /// A scalar CV with the given spacing and boundaries; the common case.
    pub fn scalar(name: impl Into<String>, width: f64, lower: f64, upper: f64) -> Self {
        Colvar {
            name: name.into(),
            kind: ColvarKind::Scalar,
            width,
            lower_boundary: lower,
            upper_boundary: upper,
            periodic: false,
            expand_boundaries: false,
            hard_lower_boundary: false,
            hard_upper_boundary: false,
        }
    }

    pub fn periodic(mut self) -> Self {
        self.periodic = true;
        self
    }

    pub fn expandable(mut self) -> Self {
        self.expand_boundaries = true;
        self
    }

    pub fn period(&self) -> f64 {
        self.upper_boundary - self.lower_boundary
    }

    /// Squared distance between two values of this CV.
    pub fn dist2(&self, a: &ColvarValue, b: &ColvarValue) -> f64 {
        if self.periodic && self.kind == ColvarKind::Scalar {
            let d = self.wrap_diff(a, b);
            d * d
        } else {
            a.dist2(b)
        }
    }

    /// Gradient of [`Colvar::dist2`] with respect to `a`.
    pub fn dist2_lgrad(&self, a: &ColvarValue, b: &ColvarValue) -> ColvarValue {
        if self.periodic && self.kind == ColvarKind::Scalar {
            ColvarValue::Scalar(2.0 * self.wrap_diff(a, b))
        } else {
            a.dist2_lgrad(b)
        }
    }

    fn wrap_diff(&self, a: &ColvarValue, b: &ColvarValue) -> f64 {
        let (a, b) = match (a.as_scalar(), b.as_scalar()) {
            (Some(a), Some(b)) => (a, b),
            _ => return 0.0,
        };
        let period = self.period();
        let mut d = a - b;
        d -= period * (d / period).round();
        d
    }
}

/// Bridge to the MD engine hosting the bias.
///
/// The engine supplies physical constants and identity; file output is
/// performed by the bias itself through `std::fs`.
pub trait EngineContext {
    /// Boltzmann constant in the engine's unit system.
    fn boltzmann(&self) -> f64;
    /// Thermostat target temperature.
    fn target_temperature(&self) -> f64;
    /// Integration timestep.
    fn timestep(&self) -> f64;
    /// Replica index when running under a multi-replica communicator.
    fn replica_index(&self) -> Option<usize>;
    /// Prefix for all output files.
    fn output_prefix(&self) -> &str;
}
