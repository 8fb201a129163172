//! Reader for the upstream exporter's change log.
//!
//! One entry per line:
//!
//! ```text
//! 2021-08-02_10-00-00.000000__0001 write [ID: 42] Article 10 | public://en/entity/node/article/10.json
//! ```

use dataserver_types::{ChangeLogEntry, ChangedFiles, Operation, UniqueId};
use regex::Regex;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChangeLogError {
    #[error("Failed to read change log {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed change log line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

static LINE_REGEX: OnceLock<Regex> = OnceLock::new();

fn line_regex() -> &'static Regex {
    LINE_REGEX.get_or_init(|| {
        Regex::new(
            r"^(?P<id>\S+)\s+(?P<op>write|delete)\s+\[ID:\s*(?P<file_id>[^\]]*)\]\s*(?P<label>.*?)\s*\|\s*(?P<uri>\S*)\s*$",
        )
        .expect("valid regex")
    })
}

#[derive(Debug, Clone)]
pub struct ChangeLog {
    path: PathBuf,
    uri_prefix: Option<String>,
}

impl ChangeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            uri_prefix: None,
        }
    }

    /// Only keep entries under `prefix`, with the prefix stripped
    pub fn with_uri_prefix(mut self, prefix: Option<String>) -> Self {
        self.uri_prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse one line.
    ///
    /// `Ok(None)` for lines that are not entries or fall outside the URI
    /// prefix.
    pub fn parse_line(&self, number: usize, line: &str) -> Result<Option<ChangeLogEntry>, ChangeLogError> {
        let Some(caps) = line_regex().captures(line) else {
            return Ok(None);
        };
        let malformed = |reason: String| ChangeLogError::Malformed {
            line: number,
            reason,
        };

        let unique_id: UniqueId = caps["id"]
            .parse()
            .map_err(|e| malformed(format!("{e}")))?;
        let operation: Operation = caps["op"]
            .parse()
            .map_err(|_| malformed(format!("unknown operation {:?}", &caps["op"])))?;

        let file_id = caps["file_id"].trim();
        if file_id.is_empty() {
            return Err(malformed("missing file id".into()));
        }

        let uri = &caps["uri"];
        let Some((_, relative)) = uri.split_once("://") else {
            return Err(malformed(format!("URI {uri:?} has no scheme")));
        };
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            return Err(malformed(format!("URI {uri:?} has no path")));
        }

        let relative_path = match &self.uri_prefix {
            None => relative.to_string(),
            Some(prefix) => match relative
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                Some(rest) if !rest.is_empty() => rest.to_string(),
                _ => {
                    tracing::trace!("Skipping {} outside {}", relative, prefix);
                    return Ok(None);
                }
            },
        };

        if relative_path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(malformed(format!("URI {uri:?} escapes the content root")));
        }

        Ok(Some(ChangeLogEntry {
            unique_id,
            operation,
            file_id: file_id.to_string(),
            label: caps["label"].to_string(),
            relative_path,
        }))
    }

    /// Entries with `lower < unique_id <= upper`, in log order.
    ///
    /// A missing log file reads as empty.
    pub fn read_range(
        &self,
        lower: Option<&UniqueId>,
        upper: Option<&UniqueId>,
    ) -> Result<Vec<ChangeLogEntry>, ChangeLogError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Change log {:?} does not exist", self.path);
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(ChangeLogError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| ChangeLogError::Io {
                path: self.path.clone(),
                source,
            })?;
            let Some(entry) = self.parse_line(index + 1, &line)? else {
                continue;
            };
            if lower.is_some_and(|lower| entry.unique_id <= *lower) {
                continue;
            }
            if upper.is_some_and(|upper| entry.unique_id > *upper) {
                continue;
            }
            entries.push(entry);
        }

        tracing::debug!(
            "Read {} change log entries in ({}, {}]",
            entries.len(),
            lower.map(UniqueId::as_str).unwrap_or("-"),
            upper.map(UniqueId::as_str).unwrap_or("-")
        );
        Ok(entries)
    }

    /// Paths written or deleted in `(since, until]`
    pub fn get_changed_files_since(
        &self,
        since: Option<&UniqueId>,
        until: Option<&UniqueId>,
    ) -> Result<ChangedFiles, ChangeLogError> {
        Ok(collapse(&self.read_range(since, until)?))
    }
}

/// Reduce entries to one operation per path; the latest entry wins
pub fn collapse(entries: &[ChangeLogEntry]) -> ChangedFiles {
    let mut ordered: Vec<&ChangeLogEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));

    let mut changes = ChangedFiles::default();
    for entry in ordered {
        let path = entry.relative_path.clone();
        match entry.operation {
            Operation::Write => {
                changes.deleted.remove(&path);
                changes.updated.insert(path);
            }
            Operation::Delete => {
                changes.updated.remove(&path);
                changes.deleted.insert(path);
            }
        }
    }
    changes
}
