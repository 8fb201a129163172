//! Shared types for dataserver
//!
//! This crate provides the plain data exchanged between the store, the
//! change tracker and the dump writer: log cursors, change-log entries,
//! diffs and dump records.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Format of the fixed-width part of a unique id, before the `__NNNN` suffix.
const UNIQUE_ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.6f";

/// Lexically sortable log cursor, e.g. `2021-08-01_10-23-45.123456__0042`.
///
/// Ordering of the string is ordering in time, which lets checkpoints be
/// compared without parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UniqueId(String);

impl UniqueId {
    /// Smallest unique id at the given instant.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(format!("{}__0000", at.format(UNIQUE_ID_FORMAT)))
    }

    /// Unique id for the current wall-clock instant.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Smallest unique id on the given day (midnight UTC).
    pub fn from_date(date: NaiveDate) -> Self {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or(NaiveDateTime::MIN);
        Self::from_datetime(midnight.and_utc())
    }

    /// Parse a user-supplied checkpoint: a unique id, an RFC 3339 timestamp
    /// or a plain `YYYY-MM-DD` date.
    pub fn parse_checkpoint(input: &str) -> Result<Self, UniqueIdError> {
        if let Ok(id) = input.parse::<UniqueId>() {
            return Ok(id);
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
            return Ok(Self::from_datetime(ts.with_timezone(&Utc)));
        }
        if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
            return Ok(Self::from_date(date));
        }
        Err(UniqueIdError(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Returned when a string is not a well-formed unique id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueIdError(pub String);

impl fmt::Display for UniqueIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid unique id: {:?}", self.0)
    }
}

impl std::error::Error for UniqueIdError {}

impl FromStr for UniqueId {
    type Err = UniqueIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (stamp, suffix) = s.split_once("__").ok_or_else(|| UniqueIdError(s.into()))?;
        let suffix_ok = suffix.len() == 4 && suffix.bytes().all(|b| b.is_ascii_digit());
        // Fixed width keeps the string order equal to the time order.
        let stamp_ok = stamp.len() == 26
            && NaiveDateTime::parse_from_str(stamp, UNIQUE_ID_FORMAT).is_ok();
        if suffix_ok && stamp_ok {
            Ok(Self(s.to_string()))
        } else {
            Err(UniqueIdError(s.into()))
        }
    }
}

impl TryFrom<String> for UniqueId {
    type Error = UniqueIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UniqueId> for String {
    fn from(id: UniqueId) -> Self {
        id.0
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operation recorded in the change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Write,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Write => "write",
            Operation::Delete => "delete",
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write" => Ok(Operation::Write),
            "delete" => Ok(Operation::Delete),
            other => Err(format!("unknown operation {other:?}")),
        }
    }
}

/// One parsed line of the change log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub unique_id: UniqueId,
    pub operation: Operation,
    pub file_id: String,
    pub label: String,
    /// Path relative to the content directory.
    pub relative_path: String,
}

/// Paths changed within a log window, after collapsing repeated operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFiles {
    pub updated: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl ChangedFiles {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// What changed in the store since a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    /// `None` when the diff covers the whole store.
    pub since: Option<UniqueId>,
    /// Store checkpoint this diff reflects.
    pub to: Option<UniqueId>,
    pub updated: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.since.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedEntry {
    pub old_public_url: Option<String>,
    pub new_public_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedEntry {
    pub old_public_url: Option<String>,
}

/// Outcome of one dump run, appended to the dump metadata log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpRecord {
    pub since: Option<UniqueId>,
    pub to: Option<UniqueId>,
    pub updated: BTreeMap<String, UpdatedEntry>,
    pub deleted: BTreeMap<String, DeletedEntry>,
}

impl DumpRecord {
    /// Public URLs that no longer point at the same content.
    pub fn outdated_urls(&self) -> BTreeSet<String> {
        let renamed = self.updated.values().filter_map(|entry| {
            match (&entry.old_public_url, &entry.new_public_url) {
                (Some(old), new) if Some(old) != new.as_ref() => Some(old.clone()),
                _ => None,
            }
        });
        let deleted = self
            .deleted
            .values()
            .filter_map(|entry| entry.old_public_url.clone());
        renamed.chain(deleted).collect()
    }
}
