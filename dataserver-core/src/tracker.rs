//! Persistent record of files changed since the last diff.
//!
//! Lives in the instance work directory as two small JSON files:
//! `tracker.json` with the pending changed/deleted paths and
//! `checkpoint.json` with the last diff and dump checkpoints.

use dataserver_types::UniqueId;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

const TRACKER_FILE: &str = "tracker.json";
const CHECKPOINT_FILE: &str = "checkpoint.json";

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize tracker state: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PendingChanges {
    /// path -> unique id of the change that marked it
    #[serde(default)]
    changed: BTreeMap<String, UniqueId>,

    #[serde(default)]
    deleted: BTreeMap<String, UniqueId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoints {
    /// Store checkpoint covered by the last consumed diff
    #[serde(default)]
    pub diff: Option<UniqueId>,

    /// Store checkpoint of the last successful dump
    #[serde(default)]
    pub dump: Option<UniqueId>,
}

#[derive(Debug)]
pub struct Tracker {
    dir: PathBuf,
    pending: PendingChanges,
    checkpoints: Checkpoints,
}

impl Tracker {
    /// Load tracker state from `dir`, creating it if needed.
    ///
    /// Unreadable or corrupt files are logged and treated as empty, which
    /// makes the next diff a full one.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| TrackerError::Io {
            path: dir.clone(),
            source,
        })?;

        let pending = read_json(&dir.join(TRACKER_FILE));
        let checkpoints = read_json(&dir.join(CHECKPOINT_FILE));
        tracing::debug!("Opened tracker in {:?}", dir);

        Ok(Self {
            dir,
            pending,
            checkpoints,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Mark `path` and the files including it as changed
    pub fn record_write<I>(&mut self, path: &str, id: &UniqueId, ancestors: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.pending.deleted.remove(path);
        self.mark_changed(path.to_string(), id);
        for ancestor in ancestors {
            self.mark_changed(ancestor, id);
        }
    }

    /// Mark `path` as deleted and the files including it as changed
    pub fn record_delete<I>(&mut self, path: &str, id: &UniqueId, ancestors: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.pending.changed.remove(path);
        self.pending.deleted.insert(path.to_string(), id.clone());
        for ancestor in ancestors {
            if ancestor != path {
                self.mark_changed(ancestor, id);
            }
        }
    }

    fn mark_changed(&mut self, path: String, id: &UniqueId) {
        if self.pending.deleted.contains_key(&path) {
            return;
        }
        let entry = self.pending.changed.entry(path).or_insert_with(|| id.clone());
        if *entry < *id {
            *entry = id.clone();
        }
    }

    pub fn changed(&self) -> BTreeSet<String> {
        self.pending.changed.keys().cloned().collect()
    }

    pub fn deleted(&self) -> BTreeSet<String> {
        self.pending.deleted.keys().cloned().collect()
    }

    pub fn checkpoints(&self) -> &Checkpoints {
        &self.checkpoints
    }

    pub fn diff_checkpoint(&self) -> Option<&UniqueId> {
        self.checkpoints.diff.as_ref()
    }

    pub fn dump_checkpoint(&self) -> Option<&UniqueId> {
        self.checkpoints.dump.as_ref()
    }

    pub fn set_dump_checkpoint(&mut self, to: UniqueId) {
        self.checkpoints.dump = Some(to);
    }

    /// Forget changes covered by `to` and move the diff checkpoint there.
    ///
    /// The new state is written first; on error nothing changes in memory.
    pub fn advance(&mut self, to: &UniqueId) -> Result<(), TrackerError> {
        let mut pending = self.pending.clone();
        pending.changed.retain(|_, id| *id > *to);
        pending.deleted.retain(|_, id| *id > *to);
        let checkpoints = Checkpoints {
            diff: Some(to.clone()),
            ..self.checkpoints.clone()
        };

        self.write(&pending, &checkpoints)?;
        self.pending = pending;
        self.checkpoints = checkpoints;
        Ok(())
    }

    /// Drop all pending changes and checkpoints
    pub fn reset(&mut self) {
        self.pending = PendingChanges::default();
        self.checkpoints = Checkpoints::default();
    }

    /// Write both files, each through a temp file and rename
    pub fn persist(&self) -> Result<(), TrackerError> {
        self.write(&self.pending, &self.checkpoints)
    }

    fn write(&self, pending: &PendingChanges, checkpoints: &Checkpoints) -> Result<(), TrackerError> {
        write_json(&self.dir.join(TRACKER_FILE), pending)?;
        write_json(&self.dir.join(CHECKPOINT_FILE), checkpoints)
    }
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(err) => {
            tracing::warn!("Failed to read {:?}: {}", path, err);
            return T::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("Ignoring corrupt {:?}: {}", path, err);
            T::default()
        }
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TrackerError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');

    let tmp = path.with_extension("json.tmp");
    let io_err = |source| TrackerError::Io {
        path: path.to_path_buf(),
        source,
    };
    std::fs::write(&tmp, &bytes).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn id(n: u32) -> UniqueId {
        format!("2021-08-02_00-00-00.000000__{n:04}").parse().unwrap()
    }

    #[test]
    fn test_write_marks_ancestors() {
        let dir = tempdir().unwrap();
        let mut tracker = Tracker::open(dir.path()).unwrap();

        tracker.record_write("en/user/1.json", &id(1), ["en/host.json".to_string()]);

        assert_eq!(
            tracker.changed().into_iter().collect::<Vec<_>>(),
            vec!["en/host.json", "en/user/1.json"]
        );
        assert!(tracker.deleted().is_empty());
    }

    #[test]
    fn test_delete_then_write() {
        let dir = tempdir().unwrap();
        let mut tracker = Tracker::open(dir.path()).unwrap();

        tracker.record_delete("en/a.json", &id(1), Vec::new());
        assert!(tracker.deleted().contains("en/a.json"));

        tracker.record_write("en/a.json", &id(2), Vec::new());
        assert!(tracker.deleted().is_empty());
        assert!(tracker.changed().contains("en/a.json"));
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut tracker = Tracker::open(dir.path()).unwrap();
            tracker.record_write("en/a.json", &id(1), Vec::new());
            tracker.record_delete("en/b.json", &id(2), Vec::new());
            tracker.set_dump_checkpoint(id(2));
            tracker.persist().unwrap();
        }

        let tracker = Tracker::open(dir.path()).unwrap();
        assert!(tracker.changed().contains("en/a.json"));
        assert!(tracker.deleted().contains("en/b.json"));
        assert_eq!(tracker.dump_checkpoint(), Some(&id(2)));
        assert_eq!(tracker.diff_checkpoint(), None);
    }

    #[test]
    fn test_advance_prunes_covered_entries() {
        let dir = tempdir().unwrap();
        let mut tracker = Tracker::open(dir.path()).unwrap();
        tracker.record_write("en/old.json", &id(1), Vec::new());
        tracker.record_write("en/new.json", &id(5), Vec::new());

        tracker.advance(&id(3)).unwrap();

        assert_eq!(tracker.changed().into_iter().collect::<Vec<_>>(), vec!["en/new.json"]);
        assert_eq!(tracker.diff_checkpoint(), Some(&id(3)));

        let reopened = Tracker::open(dir.path()).unwrap();
        assert_eq!(reopened.diff_checkpoint(), Some(&id(3)));
    }

    #[test]
    fn test_failed_advance_keeps_pending_changes() {
        let dir = tempdir().unwrap();
        let mut tracker = Tracker::open(dir.path()).unwrap();
        tracker.record_write("en/a.json", &id(1), Vec::new());
        // A directory in the way makes the rename fail
        std::fs::create_dir(dir.path().join(TRACKER_FILE)).unwrap();

        assert!(tracker.advance(&id(3)).is_err());

        assert!(tracker.changed().contains("en/a.json"));
        assert_eq!(tracker.diff_checkpoint(), None);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(TRACKER_FILE), "{not json").unwrap();
        std::fs::write(dir.path().join(CHECKPOINT_FILE), "[]").unwrap();

        let tracker = Tracker::open(dir.path()).unwrap();
        assert!(tracker.changed().is_empty());
        assert_eq!(tracker.diff_checkpoint(), None);
    }
}
