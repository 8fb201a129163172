//! # dataserver-core
//!
//! Core library for the dataserver content tier.
//!
//! Loads a directory of generated JSON and asset files into an in-memory
//! [`Store`], resolves includes between them, follows the upstream change
//! log, and dumps resolved content incrementally for publishing.

pub mod changelog;
pub mod config;
pub mod dump;
pub mod hooks;
pub mod include;
pub mod query;
pub mod server;
pub mod store;
pub mod tracker;

pub use changelog::{ChangeLog, ChangeLogError};
pub use config::{Config, ConfigError, RunMode};
pub use dump::{DumpError, DumpMetadata, DumpWriter};
pub use hooks::{HookContext, HookError, Hooks, NoHooks};
pub use include::{IncludeFlavor, IncludeMetadata, LazyQuery, Mount, MountSource, Resolver};
pub use query::{
    CacheStatus, QueryArgs, QueryContext, QueryError, QueryHandler, QueryOutput, QueryRegistry,
    QueryResponse, QueryRunner, QuerySpec, TaskHandler, TaskRegistry, TaskRunner,
};
pub use server::{DataServer, DataServerBuilder, DataServerError, FileEvent};
pub use store::{Content, ContentRecord, RecordId, Store, StoreError, SubsetFilter, WriteKind};
pub use tracker::{Checkpoints, Tracker, TrackerError};

pub use dataserver_types::{ChangeLogEntry, ChangedFiles, Diff, DumpRecord, Operation, UniqueId};
