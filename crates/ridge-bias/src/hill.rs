//! Gaussian hills.
//!
//! A hill is one Gaussian deposited in CV space:
//!
//! ```text
//! E(x) = W · exp(-½ Σᵢ dist2(xᵢ, cᵢ) / σᵢ²)
//! ```
//!
//! Hills are immutable once created. The exponent is cut off at 23
//! (≈ -2·ln 10⁻⁶ / 2): beyond that the Gaussian contributes less than one
//! part in 10⁶ of its weight and is treated as zero.
//!
//! The text record format is shared by hills files and state files. For
//! backward compatibility the serialized `widths` are `2σ`, halved again on
//! read.

use std::fmt::Write as _;
use std::io::Write;

use ridge_core::{Colvar, ColvarKind, ColvarValue, MemoryStream, Result, TokenCursor};

/// Exponent beyond which a hill evaluates to zero.
pub const HILL_EXPONENT_CUTOFF: f64 = 23.0;

/// One deposited Gaussian.
#[derive(Debug, Clone, PartialEq)]
pub struct Hill {
    /// Step number at deposition time
    pub it: u64,
    /// Prefactor, including any well-tempered/ensemble-biased scaling
    pub weight: f64,
    /// Gaussian center, one value per CV
    pub centers: Vec<ColvarValue>,
    /// Gaussian half-widths, one per CV
    pub sigmas: Vec<f64>,
    /// Id of the replica that deposited this hill; empty outside
    /// multiple-walker runs
    pub replica: String,
}

impl Hill {
    pub fn new(it: u64, weight: f64, centers: Vec<ColvarValue>, sigmas: Vec<f64>) -> Self {
        debug_assert_eq!(centers.len(), sigmas.len());
        Hill {
            it,
            weight,
            centers,
            sigmas,
            replica: String::new(),
        }
    }

    pub fn with_replica(mut self, replica: impl Into<String>) -> Self {
        self.replica = replica.into();
        self
    }

    /// The Gaussian factor at `x`, in [0, 1].
    pub fn value_at(&self, colvars: &[Colvar], x: &[ColvarValue]) -> f64 {
        let mut sq_dev = 0.0;
        for i in 0..self.centers.len() {
            let sigma = self.sigmas[i];
            sq_dev += colvars[i].dist2(&x[i], &self.centers[i]) / (sigma * sigma);
        }
        if sq_dev > HILL_EXPONENT_CUTOFF {
            0.0
        } else {
            (-0.5 * sq_dev).exp()
        }
    }

    /// Fixed-width trajectory line: step, centers, sigmas, weight.
    pub fn output_traj(&self) -> String {
        let mut line = String::new();
        let _ = write!(line, "{:12} ", self.it);
        line.push(' ');
        for c in &self.centers {
            c.write_text(&mut line);
        }
        line.push_str("  ");
        for s in &self.sigmas {
            let _ = write!(line, " {:.14e}", s);
        }
        let _ = writeln!(line, "   {:.14e}", self.weight);
        line
    }

    /// Writes the `hill { … }` text record.
    pub fn write_text<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "hill {{")?;
        writeln!(w, "  step {}", self.it)?;
        writeln!(w, "  weight {:.14e}", self.weight)?;
        let mut centers = String::new();
        for c in &self.centers {
            c.write_text(&mut centers);
        }
        writeln!(w, "  centers{}", centers)?;
        let mut widths = String::new();
        for s in &self.sigmas {
            let _ = write!(widths, " {:.14e}", 2.0 * s);
        }
        writeln!(w, "  widths{}", widths)?;
        if !self.replica.is_empty() {
            writeln!(w, "  replicaID {}", self.replica)?;
        }
        writeln!(w, "}}")?;
        Ok(())
    }

    /// Parses one `hill { … }` record; rewinds and returns `None` when the
    /// cursor does not hold one.
    pub fn read_text(cur: &mut TokenCursor, kinds: &[ColvarKind]) -> Option<Hill> {
        let start = cur.pos();
        let hill = Self::read_text_inner(cur, kinds);
        if hill.is_none() {
            cur.seek(start);
        }
        hill
    }

    fn read_text_inner(cur: &mut TokenCursor, kinds: &[ColvarKind]) -> Option<Hill> {
        if !cur.expect("hill") || !cur.expect("{") {
            return None;
        }
        if !cur.expect("step") {
            return None;
        }
        let it: u64 = cur.parse_next()?;
        if !cur.expect("weight") {
            return None;
        }
        let weight: f64 = cur.parse_next()?;
        if !cur.expect("centers") {
            return None;
        }
        let mut centers = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            centers.push(ColvarValue::parse(kind, cur)?);
        }
        if !cur.expect("widths") {
            return None;
        }
        let widths: Vec<f64> = cur.parse_n(kinds.len())?;
        let sigmas = widths.iter().map(|w| w / 2.0).collect();
        let mut hill = Hill::new(it, weight, centers, sigmas);
        if cur.expect("replicaID") {
            hill.replica = cur.next_token()?.to_string();
        }
        if !cur.expect("}") {
            return None;
        }
        Some(hill)
    }

    /// Binary mirror of [`Hill::write_text`]; field keys are kept so the
    /// stream stays self-describing.
    pub fn write_binary(&self, os: &mut MemoryStream) {
        os.write_object(&"hill".to_string());
        os.write_object(&"step".to_string());
        os.write_object(&self.it);
        os.write_object(&"weight".to_string());
        os.write_object(&self.weight);
        os.write_object(&"centers".to_string());
        for c in &self.centers {
            os.write_object(&c.components());
        }
        os.write_object(&"widths".to_string());
        os.write_object(&self.sigmas.iter().map(|s| 2.0 * s).collect::<Vec<_>>());
        os.write_object(&"replicaID".to_string());
        os.write_object(&self.replica.clone());
    }

    /// Binary mirror of [`Hill::read_text`].
    pub fn read_binary(is: &mut MemoryStream, kinds: &[ColvarKind]) -> Option<Hill> {
        match is.read_object::<String>() {
            Some(key) if key == "hill" => {}
            _ => return None,
        }
        let expect_key = |is: &mut MemoryStream, key: &str| -> Option<()> {
            (is.read_object::<String>()? == key).then_some(())
        };
        expect_key(is, "step")?;
        let it = is.read_object::<u64>()?;
        expect_key(is, "weight")?;
        let weight = is.read_object::<f64>()?;
        expect_key(is, "centers")?;
        let mut centers = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let comps = is.read_object::<Vec<f64>>()?;
            centers.push(ColvarValue::from_components(kind, &comps)?);
        }
        expect_key(is, "widths")?;
        let widths = is.read_object::<Vec<f64>>()?;
        if widths.len() != kinds.len() {
            return None;
        }
        let sigmas = widths.iter().map(|w| w / 2.0).collect();
        expect_key(is, "replicaID")?;
        let replica = is.read_object::<String>()?;
        let mut hill = Hill::new(it, weight, centers, sigmas);
        hill.replica = replica;
        Some(hill)
    }
}

/// Total energy of a hill series at `x`.
pub fn hills_energy(hills: &[Hill], colvars: &[Colvar], x: &[ColvarValue]) -> f64 {
    hills
        .iter()
        .map(|h| h.weight * h.value_at(colvars, x))
        .sum()
}

/// Accumulates into `force` the bias force that a hill series exerts along
/// CV `i` at `x`:
///
/// ```text
/// Fᵢ += W · value · (½/σᵢ²) · dist2_lgrad(xᵢ, cᵢ)
/// ```
pub fn hills_force(
    i: usize,
    hills: &[Hill],
    colvars: &[Colvar],
    x: &[ColvarValue],
    force: &mut ColvarValue,
) {
    for h in hills {
        let value = h.value_at(colvars, x);
        if value == 0.0 {
            continue;
        }
        let sigma = h.sigmas[i];
        let lgrad = colvars[i].dist2_lgrad(&x[i], &h.centers[i]);
        force.add_scaled(&lgrad, h.weight * value * 0.5 / (sigma * sigma));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scalar_cv() -> Vec<Colvar> {
        vec![Colvar::scalar("d", 0.1, -2.0, 2.0)]
    }

    fn unit_hill() -> Hill {
        Hill::new(100, 1.0, vec![ColvarValue::Scalar(0.0)], vec![0.2])
    }

    #[test]
    fn test_single_hill_energy() {
        // one sigma away from the center: exp(-1/2)
        let colvars = scalar_cv();
        let h = unit_hill();
        let x = [ColvarValue::Scalar(0.2)];
        assert_relative_eq!(
            h.weight * h.value_at(&colvars, &x),
            (-0.5f64).exp(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_single_hill_force() {
        let colvars = scalar_cv();
        let hills = vec![unit_hill()];
        let x = [ColvarValue::Scalar(0.2)];
        let mut force = ColvarValue::Scalar(0.0);
        hills_force(0, &hills, &colvars, &x, &mut force);
        // 1.0 · exp(-1/2) · (2·0.2) / (2·0.2²)
        let expected = (-0.5f64).exp() * (2.0 * 0.2) / (2.0 * 0.2 * 0.2);
        assert_relative_eq!(force.as_scalar().unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_exponent_cutoff() {
        let colvars = scalar_cv();
        let h = unit_hill();
        // 0.2·sqrt(2·23) sits just past the cutoff
        let x = [ColvarValue::Scalar(0.2 * (2.0f64 * 23.1).sqrt())];
        assert_eq!(h.value_at(&colvars, &x), 0.0);
    }

    #[test]
    fn test_force_is_negative_energy_gradient() {
        let colvars = scalar_cv();
        let hills = vec![Hill::new(
            7,
            0.8,
            vec![ColvarValue::Scalar(0.3)],
            vec![0.15],
        )];
        let x0 = 0.5;
        let h = 1e-6;
        let e = |x: f64| hills_energy(&hills, &colvars, &[ColvarValue::Scalar(x)]);
        let num_force = -(e(x0 + h) - e(x0 - h)) / (2.0 * h);
        let mut force = ColvarValue::Scalar(0.0);
        hills_force(0, &hills, &colvars, &[ColvarValue::Scalar(x0)], &mut force);
        assert_relative_eq!(force.as_scalar().unwrap(), num_force, epsilon = 1e-6);
    }

    #[test]
    fn test_text_round_trip_halves_widths() {
        let hill = Hill::new(
            42,
            0.3,
            vec![ColvarValue::Scalar(1.25), ColvarValue::Scalar(-0.75)],
            vec![0.2, 0.4],
        )
        .with_replica("w1");
        let mut buf = Vec::new();
        hill.write_text(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("widths"));

        let kinds = [ColvarKind::Scalar, ColvarKind::Scalar];
        let mut cur = TokenCursor::new(&text);
        let back = Hill::read_text(&mut cur, &kinds).unwrap();
        assert_eq!(back.it, 42);
        assert_eq!(back.replica, "w1");
        assert_relative_eq!(back.sigmas[0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(back.sigmas[1], 0.4, epsilon = 1e-12);
        assert_relative_eq!(
            back.centers[1].as_scalar().unwrap(),
            -0.75,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_read_text_rewinds_on_foreign_content() {
        let mut cur = TokenCursor::new("grid_parameters { n_colvars 1 }");
        let pos = cur.pos();
        assert!(Hill::read_text(&mut cur, &[ColvarKind::Scalar]).is_none());
        assert_eq!(cur.pos(), pos);
    }

    #[test]
    fn test_binary_round_trip() {
        let hill = Hill::new(9, 1.5, vec![ColvarValue::Scalar(0.5)], vec![0.1]);
        let mut ms = MemoryStream::new();
        hill.write_binary(&mut ms);
        let mut is = MemoryStream::from_bytes(ms.into_bytes());
        let back = Hill::read_binary(&mut is, &[ColvarKind::Scalar]).unwrap();
        assert_eq!(back, hill);
    }

    #[test]
    fn test_sequential_records_from_one_stream() {
        let kinds = [ColvarKind::Scalar];
        let mut buf = Vec::new();
        for i in 0..3 {
            Hill::new(i, 1.0, vec![ColvarValue::Scalar(i as f64)], vec![0.1])
                .write_text(&mut buf)
                .unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        let mut cur = TokenCursor::new(&text);
        let mut count = 0;
        while let Some(h) = Hill::read_text(&mut cur, &kinds) {
            assert_eq!(h.it, count);
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
