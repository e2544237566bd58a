//! State-stream plumbing shared by the text and binary formats.
//!
//! A bias state is a `metadynamics { … }` block: a `configuration { … }`
//! header, then (with grids enabled) the `hills_energy` and
//! `hills_energy_gradients` grid dumps, then a run of `hill { … }` records.
//! The binary snapshot carries the same keys and payloads through a
//! [`MemoryStream`]. [`StateSink`] and [`StateSource`] abstract the two
//! encodings so the ensemble logic is written once.

use std::io::Write;

use ridge_core::{ColvarKind, MemoryStream, Result, RidgeError, TokenCursor};
use ridge_grid::Grid;

use crate::hill::Hill;

/// First state-file version whose `keepHills` key is authoritative.
pub const KEEP_HILLS_STATE_VERSION: u64 = 20210604;

/// Version written by this code.
pub const STATE_VERSION: u64 = 20240321;

/// Output side of a state stream.
pub trait StateSink {
    fn put_key(&mut self, key: &str) -> Result<()>;
    fn put_grid(&mut self, grid: &Grid<f64>) -> Result<()>;
    fn put_hill(&mut self, hill: &Hill) -> Result<()>;
}

/// Adapter writing the formatted text encoding to any [`Write`] stream.
pub struct TextSink<W: Write>(pub W);

impl<W: Write> StateSink for TextSink<W> {
    fn put_key(&mut self, key: &str) -> Result<()> {
        writeln!(self.0, "{}", key)?;
        Ok(())
    }

    fn put_grid(&mut self, grid: &Grid<f64>) -> Result<()> {
        grid.write_block(&mut self.0)
    }

    fn put_hill(&mut self, hill: &Hill) -> Result<()> {
        hill.write_text(&mut self.0)
    }
}

impl StateSink for MemoryStream {
    fn put_key(&mut self, key: &str) -> Result<()> {
        self.write_object(&key.to_string());
        Ok(())
    }

    fn put_grid(&mut self, grid: &Grid<f64>) -> Result<()> {
        grid.write_block_binary(self);
        if self.good() {
            Ok(())
        } else {
            Err(RidgeError::input("binary state stream exceeded its capacity"))
        }
    }

    fn put_hill(&mut self, hill: &Hill) -> Result<()> {
        hill.write_binary(self);
        if self.good() {
            Ok(())
        } else {
            Err(RidgeError::input("binary state stream exceeded its capacity"))
        }
    }
}

/// Input side of a state stream.
pub trait StateSource {
    /// Reads `key` followed by a grid block of the given multiplicity.
    fn get_grid(&mut self, key: &str, mult: usize) -> Result<Grid<f64>>;
    /// Reads the next hill record, or `None` at the end of the run.
    fn get_hill(&mut self, kinds: &[ColvarKind]) -> Option<Hill>;
}

impl StateSource for TokenCursor<'_> {
    fn get_grid(&mut self, key: &str, mult: usize) -> Result<Grid<f64>> {
        let start = self.pos();
        if !self.expect(key) {
            return Err(RidgeError::input(format!(
                "expected grid data under key \"{}\"",
                key
            )));
        }
        match Grid::read_block(self, mult) {
            Ok(grid) => Ok(grid),
            Err(e) => {
                self.seek(start);
                Err(e)
            }
        }
    }

    fn get_hill(&mut self, kinds: &[ColvarKind]) -> Option<Hill> {
        Hill::read_text(self, kinds)
    }
}

impl StateSource for MemoryStream {
    fn get_grid(&mut self, key: &str, mult: usize) -> Result<Grid<f64>> {
        match self.read_object::<String>() {
            Some(k) if k == key => {}
            _ => {
                return Err(RidgeError::input(format!(
                    "expected grid data under key \"{}\"",
                    key
                )))
            }
        }
        Grid::read_block_binary(self, mult)
    }

    fn get_hill(&mut self, kinds: &[ColvarKind]) -> Option<Hill> {
        Hill::read_binary(self, kinds)
    }
}

/// Parsed `configuration { … }` header of a state block.
#[derive(Debug, Clone, Default)]
pub struct StateHeader {
    pub name: String,
    pub step: u64,
    pub version: u64,
    pub keep_hills: bool,
    pub replica_id: String,
}

impl StateHeader {
    pub fn write_text<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "configuration {{")?;
        writeln!(w, "  name {}", self.name)?;
        writeln!(w, "  step {}", self.step)?;
        writeln!(w, "  version {}", self.version)?;
        if self.keep_hills {
            writeln!(w, "  keepHills on")?;
        }
        if !self.replica_id.is_empty() {
            writeln!(w, "  replicaID {}", self.replica_id)?;
        }
        writeln!(w, "}}")?;
        Ok(())
    }

    pub fn write_binary(&self, os: &mut MemoryStream) {
        os.write_object(&"configuration".to_string());
        os.write_object(&self.name.clone());
        os.write_object(&self.step);
        os.write_object(&self.version);
        os.write_object(&self.keep_hills);
        os.write_object(&self.replica_id.clone());
    }

    /// Parses the text header; unknown keys are skipped with their value.
    pub fn read_text(cur: &mut TokenCursor) -> Result<StateHeader> {
        let bad = |what: &str| RidgeError::input(format!("malformed state header: {}", what));
        if !cur.expect("configuration") || !cur.expect("{") {
            return Err(bad("missing configuration block"));
        }
        let mut header = StateHeader::default();
        loop {
            let key = cur.next_token().ok_or_else(|| bad("unterminated block"))?;
            match key {
                "}" => break,
                "name" => {
                    header.name = cur
                        .next_token()
                        .ok_or_else(|| bad("missing name"))?
                        .to_string()
                }
                "step" => {
                    header.step = cur.parse_next().ok_or_else(|| bad("bad step"))?;
                }
                "version" => {
                    header.version = cur.parse_next().ok_or_else(|| bad("bad version"))?;
                }
                "keepHills" => {
                    let v = cur.next_token().ok_or_else(|| bad("missing keepHills"))?;
                    header.keep_hills = matches!(v, "on" | "yes" | "true" | "1");
                }
                "replicaID" => {
                    header.replica_id = cur
                        .next_token()
                        .ok_or_else(|| bad("missing replicaID"))?
                        .to_string()
                }
                _ => {
                    // tolerate unknown single-value keys from newer versions
                    cur.next_token();
                }
            }
        }
        Ok(header)
    }

    pub fn read_binary(is: &mut MemoryStream) -> Result<StateHeader> {
        let bad = || RidgeError::input("malformed binary state header");
        match is.read_object::<String>() {
            Some(k) if k == "configuration" => {}
            _ => return Err(bad()),
        }
        Ok(StateHeader {
            name: is.read_object().ok_or_else(bad)?,
            step: is.read_object().ok_or_else(bad)?,
            version: is.read_object().ok_or_else(bad)?,
            keep_hills: is.read_object().ok_or_else(bad)?,
            replica_id: is.read_object().ok_or_else(bad)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_text_round_trip() {
        let header = StateHeader {
            name: "meta1".into(),
            step: 5000,
            version: STATE_VERSION,
            keep_hills: true,
            replica_id: "w0".into(),
        };
        let mut buf = Vec::new();
        header.write_text(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut cur = TokenCursor::new(&text);
        let back = StateHeader::read_text(&mut cur).unwrap();
        assert_eq!(back.name, "meta1");
        assert_eq!(back.step, 5000);
        assert!(back.keep_hills);
        assert_eq!(back.replica_id, "w0");
    }

    #[test]
    fn test_header_skips_unknown_keys() {
        let text = "configuration {\n name b\n step 10\n futureKey 3.5\n}\n";
        let mut cur = TokenCursor::new(text);
        let header = StateHeader::read_text(&mut cur).unwrap();
        assert_eq!(header.step, 10);
        assert_eq!(header.version, 0);
    }

    #[test]
    fn test_header_binary_round_trip() {
        let header = StateHeader {
            name: "meta1".into(),
            step: 123,
            version: STATE_VERSION,
            keep_hills: false,
            replica_id: String::new(),
        };
        let mut ms = MemoryStream::new();
        header.write_binary(&mut ms);
        let mut is = MemoryStream::from_bytes(ms.into_bytes());
        let back = StateHeader::read_binary(&mut is).unwrap();
        assert_eq!(back.step, 123);
        assert_eq!(back.name, "meta1");
    }
}
