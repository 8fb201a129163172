//! In-memory content store.
//!
//! One [`ContentRecord`] per relative path under the data directory, plus
//! URL/UUID/custom indices and the include index used to find the hosts of
//! a changed file.

pub mod index;
pub mod record;
pub mod subset;

pub use index::Indices;
pub use record::{Content, ContentRecord, RecordId};
pub use subset::SubsetFilter;

use dataserver_incremental::{IncludeIndex, Revision};
use dataserver_types::UniqueId;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid content path: {0:?}")]
    InvalidPath(String),
}

/// Whether a write created the record or replaced an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Added,
    Updated,
}

#[derive(Debug)]
pub struct Store {
    data_dir: PathBuf,
    records: HashMap<String, ContentRecord>,
    next_id: u64,
    indices: Indices,
    includes: IncludeIndex,
    checkpoint: Option<UniqueId>,
    revision: Revision,
    subsets: Mutex<LruCache<SubsetFilter, Arc<Vec<String>>>>,
}

impl Store {
    pub fn new(data_dir: impl Into<PathBuf>, subset_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(subset_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            data_dir: data_dir.into(),
            records: HashMap::new(),
            next_id: 1,
            indices: Indices::default(),
            includes: IncludeIndex::new(),
            checkpoint: None,
            revision: Revision::ZERO,
            subsets: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Add a record, or update it in place when the path is already loaded.
    ///
    /// With `raw = None` the file is read from the data directory; an
    /// unreadable file yields a record with missing content.
    pub fn add(&mut self, path: &str, raw: Option<Vec<u8>>) -> Result<WriteKind, StoreError> {
        validate_path(path)?;
        let bytes = raw.or_else(|| self.read_file(path));

        let kind = match self.records.get_mut(path) {
            Some(existing) => {
                self.indices.purge(existing);
                let fresh = ContentRecord::parse(existing.id(), path, bytes);
                existing.replace_with(fresh);
                WriteKind::Updated
            }
            None => {
                let id = RecordId(self.next_id);
                self.next_id += 1;
                self.records
                    .insert(path.to_string(), ContentRecord::parse(id, path, bytes));
                self.subsets.lock().clear();
                WriteKind::Added
            }
        };

        if let Some(record) = self.records.get(path) {
            self.indices.insert(record);
            self.includes
                .set_includes(path, record.includes().static_targets());
        }
        self.revision = self.revision.next();

        tracing::debug!(path, ?kind, revision = %self.revision, "Stored record");
        Ok(kind)
    }

    /// Same as [`Store::add`]; kept separate so call sites read naturally
    pub fn update(&mut self, path: &str, raw: Option<Vec<u8>>) -> Result<WriteKind, StoreError> {
        self.add(path, raw)
    }

    /// Remove a record and every index entry pointing at it
    pub fn remove(&mut self, path: &str) -> Result<Option<ContentRecord>, StoreError> {
        validate_path(path)?;
        let Some(record) = self.records.remove(path) else {
            return Ok(None);
        };

        self.indices.purge(&record);
        self.includes.remove_host(path);
        self.subsets.lock().clear();
        self.revision = self.revision.next();

        tracing::debug!(path, revision = %self.revision, "Removed record");
        Ok(Some(record))
    }

    pub fn get(&self, path: &str) -> Option<&ContentRecord> {
        self.records.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    /// Sorted paths matching `filter`, cached until the next add or remove
    pub fn subset(&self, filter: &SubsetFilter) -> Arc<Vec<String>> {
        let mut cache = self.subsets.lock();
        if let Some(paths) = cache.get(filter) {
            return Arc::clone(paths);
        }

        let mut paths: Vec<String> = self
            .records
            .keys()
            .filter(|path| filter.matches(path))
            .cloned()
            .collect();
        paths.sort();

        let paths = Arc::new(paths);
        cache.put(filter.clone(), Arc::clone(&paths));
        paths
    }

    /// All loaded paths, sorted
    pub fn paths(&self) -> BTreeSet<String> {
        self.records.keys().cloned().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &ContentRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn by_url(&self, url: &str) -> Option<&ContentRecord> {
        self.indices.by_url(url).and_then(|path| self.get(path))
    }

    pub fn by_uuid(&self, locale: &str, uuid: &str) -> Option<&ContentRecord> {
        self.indices
            .by_uuid(locale, uuid)
            .and_then(|path| self.get(path))
    }

    /// Register `path` under `key` in the custom index `name`.
    ///
    /// Custom entries are dropped whenever the record is updated or removed.
    pub fn set_custom_index(&mut self, name: &str, key: &str, path: &str) -> bool {
        if !self.contains(path) {
            return false;
        }
        self.indices.set_custom(name, key, path);
        true
    }

    pub fn custom_index(&self, name: &str, key: &str) -> Option<&ContentRecord> {
        self.indices.custom(name, key).and_then(|path| self.get(path))
    }

    pub fn indices(&self) -> &Indices {
        &self.indices
    }

    pub fn include_index(&self) -> &IncludeIndex {
        &self.includes
    }

    /// Paths whose content embeds at least one query include
    pub fn paths_with_dynamic_includes(&self) -> BTreeSet<String> {
        self.records
            .values()
            .filter(|record| record.has_dynamic_includes())
            .map(|record| record.path().to_string())
            .collect()
    }

    pub fn checkpoint(&self) -> Option<&UniqueId> {
        self.checkpoint.as_ref()
    }

    pub fn set_checkpoint(&mut self, checkpoint: UniqueId) {
        self.checkpoint = Some(checkpoint);
    }

    /// Bumped on every add, update and remove
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Drop all records and indices, keeping the checkpoint
    pub fn clear(&mut self) {
        self.records.clear();
        self.indices.clear();
        self.includes.clear();
        self.subsets.lock().clear();
        self.revision = self.revision.next();
    }

    fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        let full_path = self.data_dir.join(path);
        match std::fs::read(&full_path) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::warn!("Failed to read {:?}: {}", full_path, err);
                None
            }
        }
    }
}

fn validate_path(path: &str) -> Result<(), StoreError> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|segment| segment == ".." || segment.is_empty());
    if invalid {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}
