//! Collective-variable values.
//!
//! A CV evaluates to one of seven variants: a plain scalar, a 3-vector, a
//! unit 3-vector (or its tangent-space derivative), a unit quaternion (or
//! its derivative), or a free-length 1-D vector. Hills store one value per
//! CV as a Gaussian center, and force accumulation dispatches on the
//! variant, so the variants share a uniform scale/accumulate interface.
//!
//! Distance conventions follow standard CV metrics:
//! - scalar and vector variants use the squared Euclidean distance;
//! - quaternions use the double-cover distance `min(|a-b|², |a+b|²)`, so a
//!   rotation and its antipode compare equal.
//!
//! For every variant, `dist2_lgrad(a, b) = ∂ dist2(a, b) / ∂a`.

use nalgebra::{DVector, Quaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::parse::TokenCursor;

/// The runtime type of a CV value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColvarKind {
    Scalar,
    Vec3,
    Unit3,
    Unit3Deriv,
    Quaternion,
    QuaternionDeriv,
    /// Free-length vector with a fixed number of components
    Vector(usize),
}

impl ColvarKind {
    /// Number of scalar components serialized for this kind.
    pub fn num_components(&self) -> usize {
        match self {
            ColvarKind::Scalar => 1,
            ColvarKind::Vec3 | ColvarKind::Unit3 | ColvarKind::Unit3Deriv => 3,
            ColvarKind::Quaternion | ColvarKind::QuaternionDeriv => 4,
            ColvarKind::Vector(n) => *n,
        }
    }
}

/// One CV value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColvarValue {
    Scalar(f64),
    Vec3(Vector3<f64>),
    Unit3(Vector3<f64>),
    Unit3Deriv(Vector3<f64>),
    Quat(Quaternion<f64>),
    QuatDeriv(Quaternion<f64>),
    Vector(DVector<f64>),
}

impl ColvarValue {
    pub fn kind(&self) -> ColvarKind {
        match self {
            ColvarValue::Scalar(_) => ColvarKind::Scalar,
            ColvarValue::Vec3(_) => ColvarKind::Vec3,
            ColvarValue::Unit3(_) => ColvarKind::Unit3,
            ColvarValue::Unit3Deriv(_) => ColvarKind::Unit3Deriv,
            ColvarValue::Quat(_) => ColvarKind::Quaternion,
            ColvarValue::QuatDeriv(_) => ColvarKind::QuaternionDeriv,
            ColvarValue::Vector(v) => ColvarKind::Vector(v.len()),
        }
    }

    /// The additive identity of the given kind.
    pub fn zero(kind: ColvarKind) -> Self {
        match kind {
            ColvarKind::Scalar => ColvarValue::Scalar(0.0),
            ColvarKind::Vec3 => ColvarValue::Vec3(Vector3::zeros()),
            ColvarKind::Unit3 => ColvarValue::Unit3(Vector3::zeros()),
            ColvarKind::Unit3Deriv => ColvarValue::Unit3Deriv(Vector3::zeros()),
            ColvarKind::Quaternion => ColvarValue::Quat(Quaternion::new(0.0, 0.0, 0.0, 0.0)),
            ColvarKind::QuaternionDeriv => {
                ColvarValue::QuatDeriv(Quaternion::new(0.0, 0.0, 0.0, 0.0))
            }
            ColvarKind::Vector(n) => ColvarValue::Vector(DVector::zeros(n)),
        }
    }

    /// Sets every component to one. Used by the reflection planner to build
    /// the unit element when mirroring a center about a limit.
    pub fn set_to_one(&mut self) {
        match self {
            ColvarValue::Scalar(v) => *v = 1.0,
            ColvarValue::Vec3(v) | ColvarValue::Unit3(v) | ColvarValue::Unit3Deriv(v) => {
                v.fill(1.0)
            }
            ColvarValue::Quat(q) | ColvarValue::QuatDeriv(q) => {
                *q = Quaternion::new(1.0, 1.0, 1.0, 1.0)
            }
            ColvarValue::Vector(v) => v.fill(1.0),
        }
    }

    /// Extracts the scalar payload, if this is a scalar value.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ColvarValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns `self * factor`, preserving the variant.
    pub fn scaled(&self, factor: f64) -> Self {
        match self {
            ColvarValue::Scalar(v) => ColvarValue::Scalar(v * factor),
            ColvarValue::Vec3(v) => ColvarValue::Vec3(v * factor),
            ColvarValue::Unit3(v) => ColvarValue::Unit3(v * factor),
            ColvarValue::Unit3Deriv(v) => ColvarValue::Unit3Deriv(v * factor),
            ColvarValue::Quat(q) => ColvarValue::Quat(q * factor),
            ColvarValue::QuatDeriv(q) => ColvarValue::QuatDeriv(q * factor),
            ColvarValue::Vector(v) => ColvarValue::Vector(v * factor),
        }
    }

    /// `self += other * factor`. Both operands must share a variant.
    pub fn add_scaled(&mut self, other: &ColvarValue, factor: f64) {
        match (self, other) {
            (ColvarValue::Scalar(a), ColvarValue::Scalar(b)) => *a += b * factor,
            (ColvarValue::Vec3(a), ColvarValue::Vec3(b))
            | (ColvarValue::Unit3(a), ColvarValue::Unit3(b))
            | (ColvarValue::Unit3Deriv(a), ColvarValue::Unit3Deriv(b)) => *a += b * factor,
            (ColvarValue::Quat(a), ColvarValue::Quat(b))
            | (ColvarValue::QuatDeriv(a), ColvarValue::QuatDeriv(b)) => {
                *a += *b * factor;
            }
            (ColvarValue::Vector(a), ColvarValue::Vector(b)) => *a += b * factor,
            (a, b) => debug_assert!(
                false,
                "variant mismatch in add_scaled: {:?} vs {:?}",
                a.kind(),
                b.kind()
            ),
        }
    }

    /// Squared distance between two values of the same variant.
    pub fn dist2(&self, other: &ColvarValue) -> f64 {
        match (self, other) {
            (ColvarValue::Scalar(a), ColvarValue::Scalar(b)) => (a - b) * (a - b),
            (ColvarValue::Vec3(a), ColvarValue::Vec3(b))
            | (ColvarValue::Unit3(a), ColvarValue::Unit3(b))
            | (ColvarValue::Unit3Deriv(a), ColvarValue::Unit3Deriv(b)) => (a - b).norm_squared(),
            (ColvarValue::Quat(a), ColvarValue::Quat(b))
            | (ColvarValue::QuatDeriv(a), ColvarValue::QuatDeriv(b)) => {
                let dm = (a - b).norm_squared();
                let dp = (a + b).norm_squared();
                dm.min(dp)
            }
            (ColvarValue::Vector(a), ColvarValue::Vector(b)) => (a - b).norm_squared(),
            (a, b) => {
                debug_assert!(
                    false,
                    "variant mismatch in dist2: {:?} vs {:?}",
                    a.kind(),
                    b.kind()
                );
                0.0
            }
        }
    }

    /// Gradient of [`ColvarValue::dist2`] with respect to the first argument.
    pub fn dist2_lgrad(&self, other: &ColvarValue) -> ColvarValue {
        match (self, other) {
            (ColvarValue::Scalar(a), ColvarValue::Scalar(b)) => {
                ColvarValue::Scalar(2.0 * (a - b))
            }
            (ColvarValue::Vec3(a), ColvarValue::Vec3(b)) => ColvarValue::Vec3(2.0 * (a - b)),
            (ColvarValue::Unit3(a), ColvarValue::Unit3(b)) => ColvarValue::Unit3(2.0 * (a - b)),
            (ColvarValue::Unit3Deriv(a), ColvarValue::Unit3Deriv(b)) => {
                ColvarValue::Unit3Deriv(2.0 * (a - b))
            }
            (ColvarValue::Quat(a), ColvarValue::Quat(b)) => {
                // gradient follows the branch chosen by the double-cover metric
                if (a - b).norm_squared() <= (a + b).norm_squared() {
                    ColvarValue::Quat((a - b) * 2.0)
                } else {
                    ColvarValue::Quat((a + b) * 2.0)
                }
            }
            (ColvarValue::QuatDeriv(a), ColvarValue::QuatDeriv(b)) => {
                if (a - b).norm_squared() <= (a + b).norm_squared() {
                    ColvarValue::QuatDeriv((a - b) * 2.0)
                } else {
                    ColvarValue::QuatDeriv((a + b) * 2.0)
                }
            }
            (ColvarValue::Vector(a), ColvarValue::Vector(b)) => {
                ColvarValue::Vector(2.0 * (a - b))
            }
            (a, b) => {
                debug_assert!(
                    false,
                    "variant mismatch in dist2_lgrad: {:?} vs {:?}",
                    a.kind(),
                    b.kind()
                );
                ColvarValue::zero(a.kind())
            }
        }
    }

    /// Component iterator in serialization order.
    pub fn components(&self) -> Vec<f64> {
        match self {
            ColvarValue::Scalar(v) => vec![*v],
            ColvarValue::Vec3(v) | ColvarValue::Unit3(v) | ColvarValue::Unit3Deriv(v) => {
                vec![v.x, v.y, v.z]
            }
            ColvarValue::Quat(q) | ColvarValue::QuatDeriv(q) => vec![q.w, q.i, q.j, q.k],
            ColvarValue::Vector(v) => v.iter().copied().collect(),
        }
    }

    /// Rebuilds a value of `kind` from its serialized components.
    pub fn from_components(kind: ColvarKind, c: &[f64]) -> Option<Self> {
        if c.len() != kind.num_components() {
            return None;
        }
        Some(match kind {
            ColvarKind::Scalar => ColvarValue::Scalar(c[0]),
            ColvarKind::Vec3 => ColvarValue::Vec3(Vector3::new(c[0], c[1], c[2])),
            ColvarKind::Unit3 => ColvarValue::Unit3(Vector3::new(c[0], c[1], c[2])),
            ColvarKind::Unit3Deriv => ColvarValue::Unit3Deriv(Vector3::new(c[0], c[1], c[2])),
            ColvarKind::Quaternion => ColvarValue::Quat(Quaternion::new(c[0], c[1], c[2], c[3])),
            ColvarKind::QuaternionDeriv => {
                ColvarValue::QuatDeriv(Quaternion::new(c[0], c[1], c[2], c[3]))
            }
            ColvarKind::Vector(_) => ColvarValue::Vector(DVector::from_column_slice(c)),
        })
    }

    /// Writes the value as space-separated scientific-notation components.
    pub fn write_text(&self, out: &mut String) {
        for c in self.components() {
            out.push_str(&format!(" {:.14e}", c));
        }
    }

    /// Parses a value of `kind` from the cursor; rewinds on failure.
    pub fn parse(kind: ColvarKind, cur: &mut TokenCursor) -> Option<Self> {
        let comps = cur.parse_n::<f64>(kind.num_components())?;
        ColvarValue::from_components(kind, &comps)
    }
}
