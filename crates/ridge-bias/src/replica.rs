//! Multiple-walker coordination over the file system.
//!
//! Each walker owns three files: a state file, an append-only hills file,
//! and a two-line list file pointing at the other two. A shared registry
//! file maps replica ids to list files. No locks are taken: every walker
//! writes only its own files, rewrites its state atomically
//! (`.tmp`-then-rename), and remembers the byte offset up to which it has
//! consumed each peer's hills file. A torn read simply retries on the next
//! cycle.
//!
//! Peers are materialized as shadows: a [`HillEnsemble`] fed from the
//! peer's files, contributing to the local energy and forces but never
//! writing anything.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use ridge_core::{Colvar, ColvarKind, Result, RidgeError, TokenCursor};

use crate::ensemble::{HillEnsemble, ReadOptions};
use crate::hill::Hill;
use crate::state::StateHeader;

/// One peer walker, discovered through the registry.
#[derive(Debug)]
pub struct ReplicaShadow {
    pub id: String,
    pub list_file: PathBuf,
    pub state_file: PathBuf,
    pub hills_file: PathBuf,
    /// Byte offset of the first unread hill in the peer's hills file
    pub hills_file_pos: usize,
    pub state_in_sync: bool,
    /// Consecutive cycles without fresh data from this peer
    pub update_status: u32,
    pub state_file_step: u64,
    pub has_data: bool,
    pub ensemble: HillEnsemble,
}

impl ReplicaShadow {
    fn new(id: String, list_file: PathBuf, colvars: &[Colvar], use_grids: bool) -> Result<Self> {
        Ok(ReplicaShadow {
            id,
            list_file,
            state_file: PathBuf::new(),
            hills_file: PathBuf::new(),
            hills_file_pos: 0,
            state_in_sync: false,
            update_status: 1,
            state_file_step: 0,
            has_data: false,
            ensemble: HillEnsemble::new(colvars, use_grids)?,
        })
    }

    /// Loads the peer's full state into the shadow ensemble.
    fn read_state(
        &mut self,
        text: &str,
        bias_name: &str,
        colvars: &[Colvar],
        use_grids: bool,
        hill_width: f64,
    ) -> Result<()> {
        let mut cur = TokenCursor::new(text);
        if !cur.expect("metadynamics") || !cur.expect("{") {
            return Err(RidgeError::input(format!(
                "state of replica \"{}\" does not start with a metadynamics block",
                self.id
            )));
        }
        let header = StateHeader::read_text(&mut cur)?;
        if !header.name.is_empty() && header.name != bias_name {
            return Err(RidgeError::input(format!(
                "state of replica \"{}\" belongs to bias \"{}\", not \"{}\"",
                self.id, header.name, bias_name
            )));
        }
        if !header.replica_id.is_empty() && header.replica_id != self.id {
            return Err(RidgeError::input(format!(
                "state file for replica \"{}\" carries replicaID \"{}\"",
                self.id, header.replica_id
            )));
        }
        let opts = ReadOptions {
            use_grids,
            rebin_grids: false,
            keep_hills: false,
            restart_keep_hills: header.keep_hills,
            hill_width,
            expected_replica: Some(self.id.clone()),
        };
        self.ensemble.read_state_data(&mut cur, colvars, &opts)?;
        self.state_file_step = header.step;
        self.has_data = true;
        Ok(())
    }

    /// Imports hills appended to the peer's hills file since the last
    /// cycle. Any failure resets the cursor to the start of the file and
    /// schedules a state re-read, per the no-abort retry policy.
    fn read_new_hills(&mut self, colvars: &[Colvar], hill_width: f64, bias_name: &str) {
        let kinds: Vec<ColvarKind> = colvars.iter().map(|cv| cv.kind).collect();
        let text = match std::fs::read_to_string(&self.hills_file) {
            Ok(text) => text,
            Err(e) => {
                log::warn!(
                    "bias \"{}\": failed to read hills of replica \"{}\" ({}); will retry",
                    bias_name,
                    self.id,
                    e
                );
                self.update_status += 1;
                return;
            }
        };
        if self.hills_file_pos > text.len() {
            // the file shrank under us, so it was rewritten from scratch
            log::warn!(
                "bias \"{}\": hills file of replica \"{}\" was overwritten; rereading",
                bias_name,
                self.id
            );
            self.hills_file_pos = 0;
            self.state_in_sync = false;
            self.update_status += 1;
            return;
        }

        let mut cur = TokenCursor::at(&text, self.hills_file_pos);
        while let Some(hill) = Hill::read_text(&mut cur, &kinds) {
            if hill.replica != self.id {
                log::warn!(
                    "bias \"{}\": hills file of replica \"{}\" contains a hill from \"{}\"; \
                     did you swap output files?",
                    bias_name,
                    self.id,
                    hill.replica
                );
                break;
            }
            if hill.it <= self.state_file_step {
                continue;
            }
            log::debug!(
                "bias \"{}\": received a hill from replica \"{}\" at step {}",
                bias_name,
                self.id,
                hill.it
            );
            self.ensemble.add_hill(hill, hill_width);
        }
        self.hills_file_pos = cur.pos();

        // unconsumed bytes beyond a trailing newline mean a torn record
        if text.len() > self.hills_file_pos + 1 {
            self.update_status += 1;
        } else {
            self.update_status = 0;
        }
    }
}

/// Registry parsing, peer discovery and file exchange for one walker.
#[derive(Debug)]
pub struct ReplicaCoordinator {
    bias_name: String,
    pub replica_id: String,
    registry_file: PathBuf,
    pub list_file: PathBuf,
    pub state_file: PathBuf,
    pub hills_file: PathBuf,
    replica_update_freq: u64,
    new_hill_freq: u64,
    use_grids: bool,
    pub peers: Vec<ReplicaShadow>,
}

impl ReplicaCoordinator {
    /// Registers this walker: builds its file paths under the working
    /// directory, truncates the hills buffer file, writes the list file and
    /// appends to the registry unless already present.
    pub fn setup(
        bias_name: &str,
        replica_id: &str,
        registry_file: &Path,
        output_prefix: &str,
        replica_update_freq: u64,
        new_hill_freq: u64,
        use_grids: bool,
    ) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let mut list_file = cwd.join(format!("{}.{}.files.txt", bias_name, replica_id));
        let hills_file = cwd.join(format!(
            "{}.colvars.{}.{}.hills",
            output_prefix, bias_name, replica_id
        ));
        let state_file = cwd.join(format!(
            "{}.colvars.{}.{}.state",
            output_prefix, bias_name, replica_id
        ));

        // reuse the recorded list file if this replica is already registered
        let mut registered = false;
        if let Ok(registry) = std::fs::read_to_string(registry_file) {
            for (id, path) in parse_registry(&registry) {
                if id == replica_id {
                    list_file = PathBuf::from(path);
                    registered = true;
                    break;
                }
            }
        }

        // the hills file doubles as a buffer: start it fresh
        File::create(&hills_file)
            .map_err(|e| RidgeError::file(hills_file.display().to_string(), e))?;

        let list_body = format!(
            "stateFile {}\nhillsFile {}\n",
            state_file.display(),
            hills_file.display()
        );
        std::fs::write(&list_file, list_body)
            .map_err(|e| RidgeError::file(list_file.display().to_string(), e))?;

        if !registered {
            let mut registry = OpenOptions::new()
                .append(true)
                .create(true)
                .open(registry_file)
                .map_err(|e| RidgeError::file(registry_file.display().to_string(), e))?;
            writeln!(registry, "{} {}", replica_id, list_file.display())
                .map_err(|e| RidgeError::file(registry_file.display().to_string(), e))?;
        }

        Ok(ReplicaCoordinator {
            bias_name: bias_name.to_string(),
            replica_id: replica_id.to_string(),
            registry_file: registry_file.to_path_buf(),
            list_file,
            state_file,
            hills_file,
            replica_update_freq,
            new_hill_freq: new_hill_freq.max(1),
            use_grids,
            peers: Vec::new(),
        })
    }

    /// Appends one hill record to this walker's hills file.
    pub fn append_hill(&self, hill: &Hill) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.hills_file)
            .map_err(|e| RidgeError::file(self.hills_file.display().to_string(), e))?;
        hill.write_text(&mut file)
    }

    /// Atomically replaces this walker's state file.
    pub fn write_local_state(&self, state_text: &str) -> Result<()> {
        let tmp = self.state_file.with_extension("state.tmp");
        std::fs::write(&tmp, state_text)
            .map_err(|e| RidgeError::file(tmp.display().to_string(), e))?;
        std::fs::rename(&tmp, &self.state_file)
            .map_err(|e| RidgeError::file(self.state_file.display().to_string(), e))?;
        Ok(())
    }

    /// One synchronization cycle: reread the registry, then import state
    /// and fresh hills from every peer. File trouble is logged and retried
    /// on the next cycle, never propagated.
    pub fn share(&mut self, colvars: &[Colvar], hill_width: f64) {
        self.update_registry(colvars);
        self.read_peer_files(colvars, hill_width);
    }

    fn update_registry(&mut self, colvars: &[Colvar]) {
        let registry = match std::fs::read_to_string(&self.registry_file) {
            Ok(text) => text,
            Err(e) => {
                log::warn!(
                    "bias \"{}\": failed to read the replicas registry \"{}\" ({}); will retry",
                    self.bias_name,
                    self.registry_file.display(),
                    e
                );
                return;
            }
        };

        for (id, path) in parse_registry(&registry) {
            if id == self.replica_id {
                continue;
            }
            if self.peers.iter().any(|p| p.id == id) {
                continue;
            }
            log::info!("bias \"{}\": accessing replica \"{}\"", self.bias_name, id);
            match ReplicaShadow::new(id.to_string(), PathBuf::from(path), colvars, self.use_grids)
            {
                Ok(shadow) => self.peers.push(shadow),
                Err(e) => log::warn!(
                    "bias \"{}\": could not allocate shadow for replica \"{}\": {}",
                    self.bias_name,
                    id,
                    e
                ),
            }
        }

        // reread every peer's list file; a new state file resets the sync
        for peer in &mut self.peers {
            let listed = std::fs::read_to_string(&peer.list_file)
                .ok()
                .and_then(|text| parse_list_file(&text));
            match listed {
                Some((state, hills)) => {
                    if PathBuf::from(&state) != peer.state_file {
                        log::info!(
                            "bias \"{}\": replica \"{}\" supplied a new state file \"{}\"",
                            self.bias_name,
                            peer.id,
                            state
                        );
                        peer.state_in_sync = false;
                        peer.state_file = PathBuf::from(state);
                        peer.hills_file = PathBuf::from(hills);
                    }
                }
                None => {
                    log::warn!(
                        "bias \"{}\": failed to read the list file of replica \"{}\"; \
                         will try again in {} steps",
                        self.bias_name,
                        peer.id,
                        self.replica_update_freq
                    );
                    peer.update_status += 1;
                }
            }
        }
    }

    fn read_peer_files(&mut self, colvars: &[Colvar], hill_width: f64) {
        let stale_cycles = 3 * (self.replica_update_freq / self.new_hill_freq + 1) as u32;
        for peer in &mut self.peers {
            if !peer.has_data || !peer.state_in_sync {
                if peer.state_file.as_os_str().is_empty() {
                    log::info!(
                        "bias \"{}\": the state file of replica \"{}\" is still undefined",
                        self.bias_name,
                        peer.id
                    );
                    peer.update_status += 1;
                } else {
                    match std::fs::read_to_string(&peer.state_file).map_err(RidgeError::from) {
                        Ok(text) => match peer.read_state(
                            &text,
                            &self.bias_name,
                            colvars,
                            self.use_grids,
                            hill_width,
                        ) {
                            Ok(()) => {
                                log::info!(
                                    "bias \"{}\": read the state of replica \"{}\"",
                                    self.bias_name,
                                    peer.id
                                );
                                peer.state_in_sync = true;
                                peer.update_status = 0;
                            }
                            Err(e) => {
                                log::warn!(
                                    "bias \"{}\": failed to parse the state of replica \"{}\" \
                                     ({}); will retry in {} steps",
                                    self.bias_name,
                                    peer.id,
                                    e,
                                    self.replica_update_freq
                                );
                                peer.state_in_sync = false;
                                peer.update_status += 1;
                            }
                        },
                        Err(e) => {
                            log::warn!(
                                "bias \"{}\": failed to read the state of replica \"{}\" ({}); \
                                 will retry in {} steps",
                                self.bias_name,
                                peer.id,
                                e,
                                self.replica_update_freq
                            );
                            peer.state_in_sync = false;
                            peer.update_status += 1;
                        }
                    }
                }
            }

            if !peer.state_in_sync {
                // a new state file implies a new hills file
                peer.hills_file_pos = 0;
            }

            if !peer.hills_file.as_os_str().is_empty() {
                peer.read_new_hills(colvars, hill_width, &self.bias_name);
            }

            if peer.update_status > stale_cycles {
                log::warn!(
                    "bias \"{}\": no new information from replica \"{}\" for more than {} \
                     steps; make sure it is still running",
                    self.bias_name,
                    peer.id,
                    peer.update_status as u64 * self.replica_update_freq
                );
            }
        }
    }
}

/// Parses `<id> <list_file>` registry lines; `#` starts a comment.
fn parse_registry(text: &str) -> Vec<(&str, &str)> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("");
        let mut fields = line.split_whitespace();
        if let (Some(id), Some(path)) = (fields.next(), fields.next()) {
            out.push((id, path));
        }
    }
    out
}

/// Parses the two-line `stateFile`/`hillsFile` list format.
fn parse_list_file(text: &str) -> Option<(String, String)> {
    let mut cur = TokenCursor::new(text);
    if !cur.expect("stateFile") {
        return None;
    }
    let state = cur.next_token()?.to_string();
    if !cur.expect("hillsFile") {
        return None;
    }
    let hills = cur.next_token()?.to_string();
    Some((state, hills))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registry_skips_comments() {
        let text = "# registry of walkers\nw0 /tmp/a.files.txt\nw1 /tmp/b.files.txt # active\n\n";
        let entries = parse_registry(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("w0", "/tmp/a.files.txt"));
        assert_eq!(entries[1], ("w1", "/tmp/b.files.txt"));
    }

    #[test]
    fn test_parse_list_file() {
        let text = "stateFile /tmp/out.colvars.meta.w0.state\nhillsFile /tmp/out.colvars.meta.w0.hills\n";
        let (state, hills) = parse_list_file(text).unwrap();
        assert!(state.ends_with(".state"));
        assert!(hills.ends_with(".hills"));
    }

    #[test]
    fn test_parse_list_file_rejects_garbage() {
        assert!(parse_list_file("statefile x hillsFile y").is_none());
        assert!(parse_list_file("stateFile x").is_none());
    }
}
