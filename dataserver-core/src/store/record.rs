//! Content records.

use serde_json::Value;
use std::fmt;

use crate::include::{mount_declarations, IncludeMetadata, Mount, MountSource};
use crate::query::QuerySpec;

/// Stable identifier assigned when a path is first added.
///
/// Survives in-place updates; a removed and re-added path gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Payload of a record
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Parsed JSON with include declarations stripped
    Json(Value),

    /// Anything that is not (valid) JSON, kept verbatim
    Raw(Vec<u8>),

    /// The file could not be read
    Missing,
}

/// One file of the data directory, held in memory
#[derive(Debug)]
pub struct ContentRecord {
    id: RecordId,
    path: String,
    content: Content,
    includes: IncludeMetadata,
    mounts: Vec<Mount>,
    public_url: Option<String>,
    uuid: Option<String>,
    locale: Option<String>,
}

impl ContentRecord {
    /// Build a record from the file's bytes (`None` when unreadable)
    pub fn parse(id: RecordId, path: &str, bytes: Option<Vec<u8>>) -> Self {
        let mut record = ContentRecord {
            id,
            path: path.to_string(),
            content: Content::Missing,
            includes: IncludeMetadata::default(),
            mounts: Vec::new(),
            public_url: None,
            uuid: None,
            locale: None,
        };

        let Some(bytes) = bytes else {
            return record;
        };

        if !path.ends_with(".json") {
            record.content = Content::Raw(bytes);
            return record;
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(mut value) => {
                record.includes = IncludeMetadata::from_value(&value);
                record.mounts = mount_declarations(path, &mut value, &record.includes);
                record.public_url = string_at(&value, "/data/content/url/path");
                record.uuid = string_at(&value, "/data/content/uuid");
                record.locale = string_at(&value, "/data/content/langcode")
                    .or_else(|| first_segment(path));
                record.content = Content::Json(value);
            }
            Err(err) => {
                tracing::warn!("{}: invalid JSON, keeping raw content: {}", path, err);
                record.content = Content::Raw(bytes);
            }
        }

        record
    }

    /// Take over everything from `fresh` except the identity
    pub(crate) fn replace_with(&mut self, fresh: ContentRecord) {
        let id = self.id;
        *self = fresh;
        self.id = id;
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Unresolved JSON payload, if the record holds JSON
    pub fn json(&self) -> Option<&Value> {
        match &self.content {
            Content::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.content, Content::Missing)
    }

    pub fn includes(&self) -> &IncludeMetadata {
        &self.includes
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }

    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn has_dynamic_includes(&self) -> bool {
        self.mounts.iter().any(Mount::is_dynamic)
    }

    /// Queries behind this record's dynamic includes
    pub fn query_specs(&self) -> impl Iterator<Item = &QuerySpec> {
        self.mounts.iter().filter_map(|mount| match &mount.source {
            MountSource::Dynamic(lazy) => Some(lazy.spec()),
            MountSource::Static { .. } => None,
        })
    }
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_segment(path: &str) -> Option<String> {
    path.split_once('/').map(|(first, _)| first.to_string())
}
