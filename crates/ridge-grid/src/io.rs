//! Grid serialization.
//!
//! Two formats exist, matching the two consumers:
//!
//! - the **state-block** format embedded in restart files and peer state
//!   files: a `grid_parameters { … }` header describing every dimension,
//!   followed by the raw data in row-major order. Written as whitespace
//!   tokens in text streams and as packed values in binary streams;
//! - the **multicolumn** format used for PMF output and target
//!   histograms: `#`-prefixed header lines (dimension count, then
//!   `lower width bins periodic` per axis) and one row per bin holding the
//!   bin-center CV values followed by the stored value.

use std::io::{BufRead, Write};

use ridge_core::{MemoryStream, Result, RidgeError, TokenCursor};

use crate::grid::{Grid, GridAxis};
use crate::scalar::ScalarGrid;

impl Grid<f64> {
    /// Writes the `grid_parameters` block and the data in row-major order.
    pub fn write_block<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "grid_parameters {{")?;
        writeln!(w, "  n_colvars {}", self.dims())?;
        write_axis_line(w, "lower_boundaries", self.axes(), |ax| {
            format!("{:.14e}", ax.lower)
        })?;
        write_axis_line(w, "upper_boundaries", self.axes(), |ax| {
            format!("{:.14e}", ax.upper)
        })?;
        write_axis_line(w, "widths", self.axes(), |ax| format!("{:.14e}", ax.width))?;
        write_axis_line(w, "sizes", self.axes(), |ax| ax.bins.to_string())?;
        write_axis_line(w, "periodic", self.axes(), |ax| {
            (ax.periodic as u8).to_string()
        })?;
        writeln!(w, "}}")?;
        for (i, v) in self.raw_data().iter().enumerate() {
            if i > 0 && i % 8 == 0 {
                writeln!(w)?;
            }
            write!(w, " {:.14e}", v)?;
        }
        writeln!(w)?;
        Ok(())
    }

    /// Parses a grid of the given multiplicity from the cursor. On failure
    /// the cursor is rewound to where it started.
    pub fn read_block(cur: &mut TokenCursor, mult: usize) -> Result<Grid<f64>> {
        let start = cur.pos();
        match Self::read_block_inner(cur, mult) {
            Ok(grid) => Ok(grid),
            Err(e) => {
                cur.seek(start);
                Err(e)
            }
        }
    }

    fn read_block_inner(cur: &mut TokenCursor, mult: usize) -> Result<Grid<f64>> {
        let bad = |what: &str| RidgeError::input(format!("malformed grid block: {}", what));
        if !cur.expect("grid_parameters") || !cur.expect("{") {
            return Err(bad("missing grid_parameters header"));
        }
        if !cur.expect("n_colvars") {
            return Err(bad("missing n_colvars"));
        }
        let n: usize = cur.parse_next().ok_or_else(|| bad("n_colvars value"))?;
        if n == 0 || n > 64 {
            return Err(bad("unreasonable dimension count"));
        }
        let lower = expect_values::<f64>(cur, "lower_boundaries", n)?;
        let upper = expect_values::<f64>(cur, "upper_boundaries", n)?;
        let widths = expect_values::<f64>(cur, "widths", n)?;
        let sizes = expect_values::<usize>(cur, "sizes", n)?;
        let periodic = expect_values::<u8>(cur, "periodic", n)?;
        if !cur.expect("}") {
            return Err(bad("unterminated grid_parameters"));
        }

        let axes: Vec<GridAxis> = (0..n)
            .map(|i| GridAxis {
                lower: lower[i],
                upper: upper[i],
                width: widths[i],
                bins: sizes[i],
                periodic: periodic[i] != 0,
            })
            .collect();
        let mut grid = Grid::new(axes, mult, 0.0)?;
        let count = grid.raw_data().len();
        let data = cur
            .parse_n::<f64>(count)
            .ok_or_else(|| bad("truncated data section"))?;
        grid.raw_data_mut().copy_from_slice(&data);
        Ok(grid)
    }

    /// Binary mirror of [`Grid::write_block`].
    pub fn write_block_binary(&self, os: &mut MemoryStream) {
        os.write_object(&(self.dims() as u64));
        for ax in self.axes() {
            os.write_object(&ax.lower);
            os.write_object(&ax.upper);
            os.write_object(&ax.width);
            os.write_object(&(ax.bins as u64));
            os.write_object(&ax.periodic);
        }
        os.write_object(&(self.mult() as u64));
        os.write_object(&self.raw_data().to_vec());
    }

    /// Binary mirror of [`Grid::read_block`].
    pub fn read_block_binary(is: &mut MemoryStream, mult: usize) -> Result<Grid<f64>> {
        let bad = || RidgeError::input("malformed binary grid block");
        let n = is.read_object::<u64>().ok_or_else(bad)? as usize;
        if n == 0 || n > 64 {
            return Err(bad());
        }
        let mut axes = Vec::with_capacity(n);
        for _ in 0..n {
            let lower = is.read_object::<f64>().ok_or_else(bad)?;
            let upper = is.read_object::<f64>().ok_or_else(bad)?;
            let width = is.read_object::<f64>().ok_or_else(bad)?;
            let bins = is.read_object::<u64>().ok_or_else(bad)? as usize;
            let periodic = is.read_object::<bool>().ok_or_else(bad)?;
            axes.push(GridAxis {
                lower,
                upper,
                width,
                bins,
                periodic,
            });
        }
        let stored_mult = is.read_object::<u64>().ok_or_else(bad)? as usize;
        if stored_mult != mult {
            return Err(RidgeError::input(format!(
                "binary grid block has multiplicity {} where {} was expected",
                stored_mult, mult
            )));
        }
        let data = is.read_object::<Vec<f64>>().ok_or_else(bad)?;
        let mut grid = Grid::new(axes, mult, 0.0)?;
        if data.len() != grid.raw_data().len() {
            return Err(bad());
        }
        grid.raw_data_mut().copy_from_slice(&data);
        Ok(grid)
    }
}

fn write_axis_line<W: Write>(
    w: &mut W,
    key: &str,
    axes: &[GridAxis],
    f: impl Fn(&GridAxis) -> String,
) -> Result<()> {
    write!(w, "  {}", key)?;
    for ax in axes {
        write!(w, " {}", f(ax))?;
    }
    writeln!(w)?;
    Ok(())
}

fn expect_values<T: std::str::FromStr>(
    cur: &mut TokenCursor,
    key: &str,
    n: usize,
) -> Result<Vec<T>> {
    if !cur.expect(key) {
        return Err(RidgeError::input(format!(
            "malformed grid block: missing {}",
            key
        )));
    }
    cur.parse_n::<T>(n)
        .ok_or_else(|| RidgeError::input(format!("malformed grid block: bad {} values", key)))
}

impl ScalarGrid {
    /// Writes the multicolumn representation: bin centers then the value,
    /// one row per bin, with a blank line between outer-index blocks.
    pub fn write_multicol<W: Write>(&self, w: &mut W) -> Result<()> {
        let n = self.grid.dims();
        writeln!(w, "# {}", n)?;
        for ax in self.grid.axes() {
            writeln!(
                w,
                "# {:.14e} {:.14e} {} {}",
                ax.lower,
                ax.width,
                ax.bins,
                ax.periodic as u8
            )?;
        }
        let mut ix = self.grid.new_index();
        let mut first = true;
        while self.grid.index_ok(&ix) {
            if !first && n > 1 && ix[n - 1] == 0 {
                writeln!(w)?;
            }
            first = false;
            for (i, &b) in ix.iter().enumerate() {
                write!(w, " {:.9e}", self.grid.bin_to_value(b, i))?;
            }
            writeln!(w, " {:.9e}", self.grid.value(&ix))?;
            self.grid.incr(&mut ix);
        }
        Ok(())
    }

    /// Reads a multicolumn file into this grid. The file's axes must match
    /// the grid's; rows are assigned by their bin-center coordinates, so
    /// row order and blank lines are irrelevant.
    pub fn read_multicol<R: BufRead>(&mut self, reader: R, description: &str) -> Result<()> {
        let bad = |what: String| {
            RidgeError::input(format!("error reading {}: {}", description, what))
        };
        let n = self.grid.dims();
        let mut header: Vec<Vec<f64>> = Vec::new();
        let mut rows = 0usize;

        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix('#') {
                let fields: Vec<f64> = rest
                    .split_whitespace()
                    .map(|t| t.parse::<f64>())
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|_| bad(format!("bad header line \"{}\"", trimmed)))?;
                header.push(fields);
                continue;
            }

            if header.len() != n + 1 {
                return Err(bad(format!(
                    "expected {} header lines, found {}",
                    n + 1,
                    header.len()
                )));
            }
            if rows == 0 {
                self.check_multicol_header(&header, &bad)?;
            }

            let fields: Vec<f64> = trimmed
                .split_whitespace()
                .map(|t| t.parse::<f64>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|_| bad(format!("bad data line \"{}\"", trimmed)))?;
            if fields.len() != n + 1 {
                return Err(bad(format!(
                    "data row has {} columns where {} were expected",
                    fields.len(),
                    n + 1
                )));
            }
            let ix = self.grid.bin_of(&fields[..n]);
            if !self.grid.index_ok(&ix) {
                return Err(bad("data row falls outside the grid".to_string()));
            }
            self.grid.set_value(&ix, fields[n]);
            rows += 1;
        }

        if rows != self.grid.num_points() {
            return Err(bad(format!(
                "{} data rows for {} grid points",
                rows,
                self.grid.num_points()
            )));
        }
        Ok(())
    }

    fn check_multicol_header(
        &self,
        header: &[Vec<f64>],
        bad: &impl Fn(String) -> RidgeError,
    ) -> Result<()> {
        if header[0].len() != 1 || header[0][0] as usize != self.grid.dims() {
            return Err(bad("dimension count mismatch".to_string()));
        }
        for (i, ax) in self.grid.axes().iter().enumerate() {
            let h = &header[i + 1];
            if h.len() != 4 {
                return Err(bad(format!("axis {} header has {} fields", i, h.len())));
            }
            let close = |a: f64, b: f64| (a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs()));
            if !close(h[0], ax.lower) || !close(h[1], ax.width) || h[2] as usize != ax.bins {
                return Err(bad(format!("axis {} does not match the configured grid", i)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ridge_core::Colvar;
    use std::io::BufReader;

    fn sample_grid() -> ScalarGrid {
        let cvs = [
            Colvar::scalar("x", 0.25, 0.0, 1.0),
            Colvar::scalar("y", 0.5, 0.0, 1.0),
        ];
        let mut g = ScalarGrid::new(&cvs, false).unwrap();
        for (i, v) in g.grid.raw_data_mut().iter_mut().enumerate() {
            *v = (i as f64).sin();
        }
        g
    }

    #[test]
    fn test_state_block_round_trip() {
        let g = sample_grid();
        let mut text = Vec::new();
        g.grid.write_block(&mut text).unwrap();
        let text = String::from_utf8(text).unwrap();

        let mut cur = TokenCursor::new(&text);
        let back = Grid::read_block(&mut cur, 1).unwrap();
        assert!(back.same_shape(&g.grid));
        for (a, b) in g.grid.raw_data().iter().zip(back.raw_data()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_read_block_rewinds_on_failure() {
        let mut cur = TokenCursor::new("hill { step 5 }");
        let pos = cur.pos();
        assert!(Grid::read_block(&mut cur, 1).is_err());
        assert_eq!(cur.pos(), pos);
        assert!(cur.expect("hill"));
    }

    #[test]
    fn test_binary_block_round_trip_is_bit_exact() {
        let g = sample_grid();
        let mut ms = MemoryStream::new();
        g.grid.write_block_binary(&mut ms);
        assert!(ms.good());

        let mut is = MemoryStream::from_bytes(ms.into_bytes());
        let back = Grid::read_block_binary(&mut is, 1).unwrap();
        assert_eq!(back.raw_data(), g.grid.raw_data());
    }

    #[test]
    fn test_binary_block_multiplicity_check() {
        let g = sample_grid();
        let mut ms = MemoryStream::new();
        g.grid.write_block_binary(&mut ms);
        let mut is = MemoryStream::from_bytes(ms.into_bytes());
        assert!(Grid::read_block_binary(&mut is, 2).is_err());
    }

    #[test]
    fn test_multicol_round_trip() {
        let g = sample_grid();
        let mut text = Vec::new();
        g.write_multicol(&mut text).unwrap();

        let mut back = g.zeros_like();
        back.read_multicol(BufReader::new(text.as_slice()), "test grid")
            .unwrap();
        for (a, b) in g.grid.raw_data().iter().zip(back.grid.raw_data()) {
            assert_relative_eq!(a, b, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_multicol_rejects_mismatched_axes() {
        let g = sample_grid();
        let mut text = Vec::new();
        g.write_multicol(&mut text).unwrap();

        let other = [
            Colvar::scalar("x", 0.25, 0.0, 2.0),
            Colvar::scalar("y", 0.5, 0.0, 1.0),
        ];
        let mut target = ScalarGrid::new(&other, false).unwrap();
        assert!(target
            .read_multicol(BufReader::new(text.as_slice()), "mismatched grid")
            .is_err());
    }
}
