//! Incremental dump writer.
//!
//! Mirrors resolved records into `<dump_dir>/data/<path>` and appends a
//! [`DumpRecord`] to `<dump_dir>/metadata.json` after each run.

use dataserver_types::{DeletedEntry, Diff, DumpRecord, UniqueId, UpdatedEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::include::Resolver;
use crate::tracker::{write_json, TrackerError};

const DATA_DIR: &str = "data";
const METADATA_FILE: &str = "metadata.json";

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt dump metadata {path:?}: {source}")]
    CorruptMetadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to persist dump metadata: {0}")]
    Metadata(#[from] TrackerError),
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpMetadata {
    /// Checkpoint of the newest dump
    pub current: Option<UniqueId>,

    /// Oldest first
    #[serde(default)]
    pub dumps: Vec<DumpRecord>,
}

#[derive(Debug, Clone)]
pub struct DumpWriter {
    dir: PathBuf,
    max_records: usize,
}

impl DumpWriter {
    pub fn new(dir: impl Into<PathBuf>, max_records: usize) -> Self {
        Self {
            dir: dir.into(),
            max_records,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding the mirrored records
    pub fn data_dir(&self) -> PathBuf {
        self.dir.join(DATA_DIR)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn read_metadata(&self) -> Result<DumpMetadata, DumpError> {
        let path = self.metadata_path();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(DumpMetadata::default())
            }
            Err(source) => return Err(DumpError::Io { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| DumpError::CorruptMetadata { path, source })
    }

    /// Write the records named by `diff` and append the run's metadata.
    ///
    /// Files whose bytes are unchanged are left alone and do not appear in
    /// the returned record. A full diff also removes mirrored files that
    /// are no longer in the store.
    pub fn write(&self, resolver: &Resolver<'_>, diff: &Diff) -> Result<DumpRecord, DumpError> {
        let data_dir = self.data_dir();
        let store = resolver.store();
        let mut record = DumpRecord {
            since: diff.since.clone(),
            to: diff.to.clone(),
            ..DumpRecord::default()
        };

        for path in &diff.updated {
            let Some(content) = store.get(path) else {
                tracing::debug!("Skipping {}: no longer in the store", path);
                continue;
            };
            let Some(bytes) = resolver.serialize(content) else {
                tracing::debug!("Skipping {}: nothing to write", path);
                continue;
            };

            let Some(target) = contained(&data_dir, path) else {
                tracing::warn!("Refusing to write {:?} outside {:?}", path, data_dir);
                continue;
            };
            let existing = std::fs::read(&target).ok();
            if existing.as_deref() == Some(bytes.as_slice()) {
                continue;
            }

            let new_public_url = content.public_url().map(str::to_string);
            let old_public_url = existing
                .as_deref()
                .and_then(public_url_of)
                .filter(|old| Some(old) != new_public_url.as_ref());

            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|source| DumpError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::write(&target, &bytes).map_err(|source| DumpError::Io {
                path: target.clone(),
                source,
            })?;

            record.updated.insert(
                path.clone(),
                UpdatedEntry {
                    old_public_url,
                    new_public_url,
                },
            );
        }

        let mut deleted: BTreeSet<String> = diff.deleted.clone();
        if diff.is_full() {
            deleted.extend(self.stale_files(&diff.updated));
        }
        for path in &deleted {
            if let Some(entry) = self.delete(path)? {
                record.deleted.insert(path.clone(), entry);
            }
        }

        if let Err(err) = self.append_metadata(&record) {
            tracing::error!("Dump metadata not written, checkpoint stays put: {}", err);
            return Err(err);
        }

        tracing::info!(
            "Dumped {} updated and {} deleted files",
            record.updated.len(),
            record.deleted.len()
        );
        Ok(record)
    }

    /// Remove a mirrored file; `None` when there was nothing to remove
    fn delete(&self, path: &str) -> Result<Option<DeletedEntry>, DumpError> {
        let data_dir = self.data_dir();
        let Some(target) = contained(&data_dir, path) else {
            tracing::warn!("Refusing to delete {:?} outside {:?}", path, data_dir);
            return Ok(None);
        };
        let existing = match std::fs::read(&target) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(None),
        };

        std::fs::remove_file(&target).map_err(|source| DumpError::Io {
            path: target.clone(),
            source,
        })?;
        prune_empty_parents(&target, &data_dir);

        Ok(Some(DeletedEntry {
            old_public_url: public_url_of(&existing),
        }))
    }

    /// Mirrored files that are not in `keep`
    fn stale_files(&self, keep: &BTreeSet<String>) -> BTreeSet<String> {
        let data_dir = self.data_dir();
        WalkDir::new(&data_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&data_dir).ok()?;
                Some(relative_path_string(relative))
            })
            .filter(|path| !keep.contains(path))
            .collect()
    }

    fn append_metadata(&self, record: &DumpRecord) -> Result<(), DumpError> {
        let mut metadata = self.read_metadata()?;
        if record.to.is_some() {
            metadata.current = record.to.clone();
        }
        metadata.dumps.push(record.clone());
        if self.max_records > 0 && metadata.dumps.len() > self.max_records {
            let excess = metadata.dumps.len() - self.max_records;
            metadata.dumps.drain(..excess);
        }

        std::fs::create_dir_all(&self.dir).map_err(|source| DumpError::Io {
            path: self.dir.clone(),
            source,
        })?;
        write_json(&self.metadata_path(), &metadata)?;
        Ok(())
    }
}

fn public_url_of(bytes: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value
        .pointer("/data/content/url/path")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `root.join(path)` when every component of `path` is a plain name
fn contained(root: &Path, path: &str) -> Option<PathBuf> {
    let relative = Path::new(path);
    let plain = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if path.is_empty() || !plain {
        return None;
    }
    Some(root.join(relative))
}

/// Remove empty directories between `file` and `root`
fn prune_empty_parents(file: &Path, root: &Path) {
    let mut current = file.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        // Fails on non-empty directories, which ends the walk
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

pub(crate) fn relative_path_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_prune_empty_parents_stops_at_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("data");
        let file = root.join("es/entity/node/10.json");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(root.join("es/keep.json"), "{}").unwrap();

        prune_empty_parents(&file, &root);

        assert!(!root.join("es/entity").exists());
        assert!(root.join("es").exists());
        assert!(root.exists());
    }

    #[test]
    fn test_delete_stays_inside_data_dir() {
        let dir = tempdir().unwrap();
        let writer = DumpWriter::new(dir.path().join("dump"), 0);
        std::fs::create_dir_all(writer.data_dir().join("en")).unwrap();
        std::fs::write(writer.data_dir().join("en/a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("dump/precious.txt"), "keep").unwrap();

        assert!(writer.delete("../precious.txt").unwrap().is_none());
        assert!(writer.delete("/etc/passwd").unwrap().is_none());
        assert!(dir.path().join("dump/precious.txt").is_file());

        assert!(writer.delete("en/a.json").unwrap().is_some());
        assert!(!writer.data_dir().join("en/a.json").exists());
    }

    #[test]
    fn test_metadata_is_capped() {
        let dir = tempdir().unwrap();
        let writer = DumpWriter::new(dir.path(), 2);
        for n in 1..=3 {
            let record = DumpRecord {
                to: Some(format!("2021-08-02_00-00-00.000000__{n:04}").parse().unwrap()),
                ..DumpRecord::default()
            };
            writer.append_metadata(&record).unwrap();
        }

        let metadata = writer.read_metadata().unwrap();
        assert_eq!(metadata.dumps.len(), 2);
        assert_eq!(
            metadata.current.unwrap().as_str(),
            "2021-08-02_00-00-00.000000__0003"
        );
    }

    #[test]
    fn test_public_url_of() {
        assert_eq!(
            public_url_of(br#"{"data":{"content":{"url":{"path":"/a"}}}}"#),
            Some("/a".to_string())
        );
        assert_eq!(public_url_of(b"raw bytes"), None);
    }
}
