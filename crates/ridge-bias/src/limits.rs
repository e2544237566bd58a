//! Reflection and interval limits.
//!
//! Reflection keeps the bias flat against a wall: whenever a hill is
//! deposited close to a configured limit, mirror hills are added on the far
//! side so the Gaussian tails cancel at the wall. Interval limits clip the
//! bias force to zero outside a window; when reflection is active and no
//! interval is configured, the reflection limits double as interval limits.
//!
//! Both features apply to scalar CVs only.

use ridge_core::{Colvar, ColvarKind, ColvarValue, Result, RidgeError};

use crate::params::MetaParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionKind {
    None,
    /// Mirror each limited dimension independently
    Mono,
    /// Mirror every subset of limited dimensions (faces, edges, vertices)
    Multi,
}

/// Per-CV reflection limits.
#[derive(Debug, Clone)]
pub struct ReflectionLimits {
    pub kind: ReflectionKind,
    pub range: f64,
    pub lower: Vec<Option<f64>>,
    pub upper: Vec<Option<f64>>,
}

/// Resolves `NCVs`/`UseCVs`/limit-list keys into one limit per CV.
fn resolve_limit_table(
    colvars: &[Colvar],
    ncvs: Option<usize>,
    use_cvs: &[usize],
    limits: &[f64],
    what: &str,
) -> Result<Vec<Option<f64>>> {
    let n = colvars.len();
    let count = ncvs.unwrap_or(n);
    let indices: Vec<usize> = if use_cvs.is_empty() {
        (0..count).collect()
    } else {
        use_cvs.to_vec()
    };
    if indices.len() != count {
        return Err(RidgeError::input(format!(
            "{}: {} CV indices supplied where {} were declared",
            what,
            indices.len(),
            count
        )));
    }
    if limits.len() != count {
        return Err(RidgeError::input(format!(
            "{} limits not provided (expected {})",
            what, count
        )));
    }
    let mut table = vec![None; n];
    for (&cv, &limit) in indices.iter().zip(limits) {
        if cv >= n {
            return Err(RidgeError::input(format!(
                "{}: CV index {} is out of range",
                what, cv
            )));
        }
        if colvars[cv].kind != ColvarKind::Scalar {
            return Err(RidgeError::input(format!(
                "{} can only be used with scalar variables",
                what
            )));
        }
        table[cv] = Some(limit);
    }
    Ok(table)
}

impl ReflectionLimits {
    pub fn none(n: usize) -> Self {
        ReflectionLimits {
            kind: ReflectionKind::None,
            range: 0.0,
            lower: vec![None; n],
            upper: vec![None; n],
        }
    }

    /// Builds and validates the reflection configuration. With grids on,
    /// each boundary must leave room for the mirrored tails:
    /// `lower_boundary ≤ limit - range·σ` (upper symmetric).
    pub fn from_params(
        params: &MetaParams,
        colvars: &[Colvar],
        sigmas: &[f64],
        use_grids: bool,
    ) -> Result<Self> {
        if !params.use_hills_reflection {
            return Ok(Self::none(colvars.len()));
        }
        let kind = match params.reflection_type.to_lowercase().as_str() {
            "monodimensional" => ReflectionKind::Mono,
            "multidimensional" => ReflectionKind::Multi,
            other => {
                return Err(RidgeError::input(format!(
                    "unknown reflectionType \"{}\"",
                    other
                )))
            }
        };
        let lower = resolve_limit_table(
            colvars,
            params.reflection_low_limit_ncvs,
            &params.reflection_low_limit_use_cvs,
            &params.reflection_low_limit,
            "lower reflection",
        )?;
        let upper = resolve_limit_table(
            colvars,
            params.reflection_up_limit_ncvs,
            &params.reflection_up_limit_use_cvs,
            &params.reflection_up_limit,
            "upper reflection",
        )?;
        let range = params.reflection_range;

        if use_grids {
            for (i, cv) in colvars.iter().enumerate() {
                if let Some(limit) = lower[i] {
                    let reach = limit - range * sigmas[i];
                    if reach < cv.lower_boundary {
                        return Err(RidgeError::input(format!(
                            "with grids, the lower boundary of colvar \"{}\" must be \
                             at most {} to hold the reflected hills",
                            cv.name, reach
                        )));
                    }
                }
                if let Some(limit) = upper[i] {
                    let reach = limit + range * sigmas[i];
                    if reach > cv.upper_boundary {
                        return Err(RidgeError::input(format!(
                            "with grids, the upper boundary of colvar \"{}\" must be \
                             at least {} to hold the reflected hills",
                            cv.name, reach
                        )));
                    }
                }
            }
        }

        for (i, cv) in colvars.iter().enumerate() {
            if let Some(l) = lower[i] {
                log::info!(
                    "reflection lower limit {} configured for colvar \"{}\"",
                    l,
                    cv.name
                );
            }
            if let Some(u) = upper[i] {
                log::info!(
                    "reflection upper limit {} configured for colvar \"{}\"",
                    u,
                    cv.name
                );
            }
        }

        Ok(ReflectionLimits {
            kind,
            range,
            lower,
            upper,
        })
    }

    pub fn active(&self) -> bool {
        self.kind != ReflectionKind::None
            && (self.lower.iter().any(Option::is_some) || self.upper.iter().any(Option::is_some))
    }

    /// False when the current position lies beyond any configured limit;
    /// no primary hill is deposited there, since only reflected hills may
    /// exist past a wall.
    pub fn within_limits(&self, values: &[ColvarValue]) -> bool {
        for (i, value) in values.iter().enumerate() {
            let v = match value.as_scalar() {
                Some(v) => v,
                None => continue,
            };
            if let Some(limit) = self.lower[i] {
                if v < limit {
                    return false;
                }
            }
            if let Some(limit) = self.upper[i] {
                if v > limit {
                    return false;
                }
            }
        }
        true
    }

    /// Enumerates the mirror placements for a deposition at `values`.
    /// Each placement is a full center vector with one or more dimensions
    /// mirrored as `c' = 2L - c`.
    pub fn placements(
        &self,
        values: &[ColvarValue],
        sigmas: &[f64],
    ) -> Vec<Vec<ColvarValue>> {
        match self.kind {
            ReflectionKind::None => Vec::new(),
            ReflectionKind::Mono => self.mono_placements(values, sigmas),
            ReflectionKind::Multi => self.multi_placements(values, sigmas),
        }
    }

    fn in_range(&self, v: f64, limit: f64, sigma: f64) -> bool {
        (limit - v).abs() < self.range * sigma
    }

    fn mono_placements(&self, values: &[ColvarValue], sigmas: &[f64]) -> Vec<Vec<ColvarValue>> {
        let mut out = Vec::new();
        for (limits, _side) in [(&self.lower, 0), (&self.upper, 1)] {
            for (d, limit) in limits.iter().enumerate() {
                let limit = match limit {
                    Some(l) => *l,
                    None => continue,
                };
                let v = match values[d].as_scalar() {
                    Some(v) => v,
                    None => continue,
                };
                if self.in_range(v, limit, sigmas[d]) {
                    let mut mirrored = values.to_vec();
                    mirrored[d] = ColvarValue::Scalar(2.0 * limit - v);
                    out.push(mirrored);
                }
            }
        }
        out
    }

    /// Every non-empty subset of the limited dimensions, crossed with every
    /// low/high choice per member. A member whose chosen limit is absent or
    /// out of range vetoes the whole combination; in particular no
    /// un-mirrored central hill is ever emitted.
    fn multi_placements(&self, values: &[ColvarValue], sigmas: &[f64]) -> Vec<Vec<ColvarValue>> {
        let limited: Vec<usize> = (0..values.len())
            .filter(|&d| self.lower[d].is_some() || self.upper[d].is_some())
            .collect();
        let mut out = Vec::new();
        for mask in 1u64..(1u64 << limited.len()) {
            let members: Vec<usize> = limited
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, &d)| d)
                .collect();
            for sides in 0u64..(1u64 << members.len()) {
                let mut mirrored = values.to_vec();
                let mut emit = true;
                for (k, &d) in members.iter().enumerate() {
                    let limit = if sides & (1 << k) == 0 {
                        self.lower[d]
                    } else {
                        self.upper[d]
                    };
                    let (limit, v) = match (limit, values[d].as_scalar()) {
                        (Some(l), Some(v)) => (l, v),
                        _ => {
                            emit = false;
                            break;
                        }
                    };
                    if !self.in_range(v, limit, sigmas[d]) {
                        emit = false;
                        break;
                    }
                    mirrored[d] = ColvarValue::Scalar(2.0 * limit - v);
                }
                if emit {
                    out.push(mirrored);
                }
            }
        }
        out
    }
}

/// Per-CV interval limits; the bias force along a CV is zeroed outside.
#[derive(Debug, Clone)]
pub struct IntervalLimits {
    pub lower: Vec<Option<f64>>,
    pub upper: Vec<Option<f64>>,
}

impl IntervalLimits {
    pub fn none(n: usize) -> Self {
        IntervalLimits {
            lower: vec![None; n],
            upper: vec![None; n],
        }
    }

    pub fn from_params(
        params: &MetaParams,
        colvars: &[Colvar],
        reflection: &ReflectionLimits,
    ) -> Result<Self> {
        if params.use_hills_interval {
            let lower = resolve_limit_table(
                colvars,
                params.interval_low_limit_ncvs,
                &params.interval_low_limit_use_cvs,
                &params.interval_low_limit,
                "lower interval",
            )?;
            let upper = resolve_limit_table(
                colvars,
                params.interval_up_limit_ncvs,
                &params.interval_up_limit_use_cvs,
                &params.interval_up_limit,
                "upper interval",
            )?;
            return Ok(IntervalLimits { lower, upper });
        }
        if reflection.active() {
            log::info!("reflection active: reflection limits also bound the hill forces");
            return Ok(IntervalLimits {
                lower: reflection.lower.clone(),
                upper: reflection.upper.clone(),
            });
        }
        Ok(Self::none(colvars.len()))
    }

    /// Zeroes the force along each CV whose value lies outside its window.
    pub fn clip(&self, values: &[ColvarValue], forces: &mut [ColvarValue]) {
        for (i, value) in values.iter().enumerate() {
            let v = match value.as_scalar() {
                Some(v) => v,
                None => continue,
            };
            let below = self.lower[i].map_or(false, |l| v < l);
            let above = self.upper[i].map_or(false, |u| v > u);
            if below || above {
                forces[i] = ColvarValue::zero(forces[i].kind());
            }
        }
    }
}
