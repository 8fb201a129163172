//! Configuration parsing and management.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Data directory does not exist: {0:?}")]
    MissingDataDir(PathBuf),

    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Whether the server runs for local development or for publishing.
///
/// Development disables the query cache and surfaces query failures inside
/// resolved content instead of hiding them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Development,
    #[default]
    Production,
}

impl RunMode {
    pub fn is_development(&self) -> bool {
        matches!(self, RunMode::Development)
    }
}

/// Main configuration struct matching the dataserver.yml schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,

    #[serde(default)]
    pub run_mode: RunMode,

    #[serde(default)]
    pub changelog: Option<ChangeLogConfig>,

    #[serde(default)]
    pub dump: DumpConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Regular expressions matched against relative paths skipped on load
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    // Internal: path to config file (for relative path resolution)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory of generated content files
    pub data: PathBuf,

    /// Directory receiving resolved dumps
    pub dump: PathBuf,

    /// Root for tracker and checkpoint files (defaults to the system temp dir)
    #[serde(default)]
    pub work: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogConfig {
    /// Append-only log written by the upstream exporter
    pub file: PathBuf,

    /// Leading directory stripped from log URIs to get content paths
    #[serde(default)]
    pub uri_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Number of dump records kept in metadata.json (0 = unlimited)
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

fn default_max_records() -> usize {
    100
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Query result cache budget in bytes (0 = unlimited)
    #[serde(default)]
    pub max_size_bytes: usize,

    /// Number of distinct subset filters kept
    #[serde(default = "default_subset_capacity")]
    pub subset_capacity: usize,
}

fn default_subset_capacity() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 0,
            subset_capacity: default_subset_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;

        // Store config file path for relative path resolution
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Build a configuration in code, without a config file
    pub fn new(data_dir: impl Into<PathBuf>, dump_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                data: data_dir.into(),
                dump: dump_dir.into(),
                work: None,
            },
            run_mode: RunMode::default(),
            changelog: None,
            dump: DumpConfig::default(),
            cache: CacheConfig::default(),
            ignore_patterns: Vec::new(),
            config_path: None,
        }
    }

    pub fn with_run_mode(mut self, mode: RunMode) -> Self {
        self.run_mode = mode;
        self
    }

    pub fn with_changelog(mut self, file: impl Into<PathBuf>) -> Self {
        self.changelog = Some(ChangeLogConfig {
            file: file.into(),
            uri_prefix: None,
        });
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.work = Some(dir.into());
        self
    }

    /// Fail fast on settings that cannot work at runtime.
    ///
    /// Returns the compiled ignore patterns.
    pub fn validate(&self) -> Result<Vec<Regex>, ConfigError> {
        if self.paths.data.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("paths.data".into()));
        }
        if self.paths.dump.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("paths.dump".into()));
        }
        let data_dir = self.data_dir();
        if !data_dir.is_dir() {
            return Err(ConfigError::MissingDataDir(data_dir));
        }
        if let Some(changelog) = &self.changelog {
            if changelog.file.as_os_str().is_empty() {
                return Err(ConfigError::MissingField("changelog.file".into()));
            }
        }
        self.ignore_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// Get the data directory, resolved relative to config file
    pub fn data_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.data)
    }

    /// Get the dump directory, resolved relative to config file
    pub fn dump_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.dump)
    }

    /// Get the change log file, resolved relative to config file
    pub fn changelog_file(&self) -> Option<PathBuf> {
        self.changelog
            .as_ref()
            .map(|changelog| self.resolve_path(&changelog.file))
    }

    /// Per-instance working directory for tracker and checkpoint files.
    ///
    /// Keyed by a hash of the data directory so several instances serving
    /// different content can share one work root.
    pub fn instance_dir(&self) -> PathBuf {
        let root = match &self.paths.work {
            Some(work) => self.resolve_path(work),
            None => std::env::temp_dir().join("dataserver"),
        };
        let data_dir = self.data_dir();
        let canonical = data_dir.canonicalize().unwrap_or(data_dir);
        let hash = blake3::hash(canonical.to_string_lossy().as_bytes());
        root.join(&hash.to_hex().as_str()[..16])
    }

    /// Resolve a path relative to the config file location
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(config_path) = &self.config_path {
            if let Some(parent) = config_path.parent() {
                parent.join(path)
            } else {
                path.to_path_buf()
            }
        } else {
            path.to_path_buf()
        }
    }
}
