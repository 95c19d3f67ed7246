//! Per-path staleness bookkeeping.
//!
//! The stamp table remembers, for every tracked path, what was on disk when
//! the path was last imported successfully. Deciding whether a path needs a
//! reimport never mutates the table; a stamp is recorded only after the
//! import went through, so a failed import is retried at the next scan.

use std::{collections::BTreeSet, time::SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use hashbrown::HashMap;

use crate::{id::Guid, sha256::Sha256Hash};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to read state file '{path}': {error}")]
    ReadError {
        error: std::io::Error,
        path: Utf8PathBuf,
    },

    #[error("Failed to write state file '{path}': {error}")]
    WriteError {
        error: std::io::Error,
        path: Utf8PathBuf,
    },

    #[error("Failed to deserialize state file '{path}': {error}")]
    DeserializeError {
        error: toml::de::Error,
        path: Utf8PathBuf,
    },

    #[error("Failed to serialize state file '{path}': {error}")]
    SerializeError {
        error: toml::ser::Error,
        path: Utf8PathBuf,
    },
}

/// What was on disk when a path was last imported.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Stamp {
    pub guid: Guid,

    #[serde(default)]
    pub importer_version: u32,

    #[serde(default)]
    pub meta_seen: bool,

    #[serde(default)]
    pub folder: bool,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content_hash: Option<Sha256Hash>,

    pub modified: SystemTime,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StateFile {
    schema: i64,
    #[serde(default)]
    stamps: HashMap<Utf8PathBuf, Stamp>,
}

const STATE_SCHEMA: i64 = 1;

/// Persistent table of per-path stamps.
#[derive(Default)]
pub struct StampTable {
    stamps: HashMap<Utf8PathBuf, Stamp>,
}

impl StampTable {
    pub fn new() -> Self {
        StampTable::default()
    }

    pub fn get(&self, path: &Utf8Path) -> Option<&Stamp> {
        self.stamps.get(path)
    }

    pub fn record(&mut self, path: Utf8PathBuf, stamp: Stamp) {
        self.stamps.insert(path, stamp);
    }

    pub fn remove(&mut self, path: &Utf8Path) -> Option<Stamp> {
        self.stamps.remove(path)
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Utf8Path, &Stamp)> + '_ {
        self.stamps.iter().map(|(path, stamp)| (&**path, stamp))
    }

    /// Snapshot of every tracked path, taken before a scan.
    /// Paths absent from the scan are removal candidates:
    /// `removed = previous - current`.
    pub fn paths(&self) -> BTreeSet<Utf8PathBuf> {
        self.stamps.keys().cloned().collect()
    }

    /// Decides whether a path must be reimported. Read-only.
    ///
    /// True when the path was never imported, its modification time moved,
    /// the owning importer's version changed, its sidecar disappeared, or the
    /// caller forces the reimport.
    pub fn needs_update(
        &self,
        path: &Utf8Path,
        modified: SystemTime,
        importer_version: u32,
        meta_present: bool,
        force: bool,
    ) -> bool {
        if force {
            return true;
        }

        let Some(stamp) = self.stamps.get(path) else {
            return true;
        };

        if !meta_present {
            tracing::debug!("Sidecar of '{path}' is gone, reimporting");
            return true;
        }

        if stamp.importer_version != importer_version {
            tracing::debug!(
                "Importer of '{path}' moved from version {} to {}, reimporting",
                stamp.importer_version,
                importer_version,
            );
            return true;
        }

        if modified != stamp.modified {
            if modified < stamp.modified {
                tracing::warn!(
                    "Source file '{path}' is older than when it was imported. Could be clock change. Reimport just in case"
                );
            }
            return true;
        }

        false
    }

    pub fn load(path: &Utf8Path) -> Result<Self, StateError> {
        let data = match std::fs::read_to_string(path.as_std_path()) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StampTable::new());
            }
            Err(error) => {
                return Err(StateError::ReadError {
                    error,
                    path: path.to_owned(),
                })
            }
            Ok(data) => data,
        };

        let state: StateFile =
            toml::from_str(&data).map_err(|error| StateError::DeserializeError {
                error,
                path: path.to_owned(),
            })?;

        Ok(StampTable {
            stamps: state.stamps,
        })
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            if let Err(error) = std::fs::create_dir_all(parent.as_std_path()) {
                return Err(StateError::WriteError {
                    error,
                    path: path.to_owned(),
                });
            }
        }

        let state = StateFile {
            schema: STATE_SCHEMA,
            stamps: self.stamps.clone(),
        };

        let data = toml::to_string_pretty(&state).map_err(|error| StateError::SerializeError {
            error,
            path: path.to_owned(),
        })?;
        std::fs::write(path.as_std_path(), data.as_bytes()).map_err(|error| {
            StateError::WriteError {
                error,
                path: path.to_owned(),
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn stamp(modified: SystemTime, importer_version: u32) -> Stamp {
        Stamp {
            guid: Guid::new(7).unwrap(),
            modified,
            content_hash: None,
            importer_version,
            meta_seen: true,
            folder: false,
        }
    }

    #[test]
    fn test_unseen_path_is_stale() {
        let table = StampTable::new();
        assert!(table.needs_update(
            Utf8Path::new("a.txt"),
            SystemTime::UNIX_EPOCH,
            1,
            true,
            false
        ));
    }

    #[test]
    fn test_unchanged_path_is_fresh() {
        let now = SystemTime::now();
        let mut table = StampTable::new();
        table.record("a.txt".into(), stamp(now, 1));

        assert!(!table.needs_update(Utf8Path::new("a.txt"), now, 1, true, false));
    }

    #[test]
    fn test_mtime_change_is_stale_both_ways() {
        let now = SystemTime::now();
        let mut table = StampTable::new();
        table.record("a.txt".into(), stamp(now, 1));

        let later = now + Duration::from_secs(5);
        let earlier = now - Duration::from_secs(5);
        assert!(table.needs_update(Utf8Path::new("a.txt"), later, 1, true, false));
        assert!(table.needs_update(Utf8Path::new("a.txt"), earlier, 1, true, false));
    }

    #[test]
    fn test_version_bump_is_stale() {
        let now = SystemTime::now();
        let mut table = StampTable::new();
        table.record("a.txt".into(), stamp(now, 1));

        assert!(table.needs_update(Utf8Path::new("a.txt"), now, 2, true, false));
    }

    #[test]
    fn test_missing_sidecar_is_stale() {
        let now = SystemTime::now();
        let mut table = StampTable::new();
        table.record("a.txt".into(), stamp(now, 1));

        assert!(table.needs_update(Utf8Path::new("a.txt"), now, 1, false, false));
    }

    #[test]
    fn test_force_overrides_everything() {
        let now = SystemTime::now();
        let mut table = StampTable::new();
        table.record("a.txt".into(), stamp(now, 1));

        assert!(table.needs_update(Utf8Path::new("a.txt"), now, 1, true, true));
    }

    #[test]
    fn test_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state_path =
            Utf8PathBuf::from_path_buf(dir.path().join("state.toml")).unwrap();

        let mut table = StampTable::new();
        table.record("a.txt".into(), stamp(SystemTime::now(), 3));
        table.record("b/c.txt".into(), stamp(SystemTime::now(), 1));
        table.save(&state_path).unwrap();

        let loaded = StampTable::load(&state_path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.get(Utf8Path::new("a.txt")).unwrap().importer_version,
            3
        );
    }
}
