//! The data server: store, dependency graph, tracker and dump writer wired
//! together.

use dataserver_incremental::{DependencyTagger, InvalidationBridge, StoreChange, WILDCARD};
use dataserver_types::{ChangeLogEntry, ChangedFiles, Diff, DumpRecord, Operation, UniqueId};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

use crate::changelog::{collapse, ChangeLog, ChangeLogError};
use crate::config::{Config, ConfigError};
use crate::dump::{relative_path_string, DumpError, DumpWriter};
use crate::hooks::{HookContext, HookError, Hooks, NoHooks};
use crate::include::Resolver;
use crate::query::{
    QueryArgs, QueryError, QueryRegistry, QueryResponse, QueryRunner, QuerySpec, TaskRegistry,
    TaskRunner,
};
use crate::store::{Store, StoreError, WriteKind};
use crate::tracker::{Tracker, TrackerError};

#[derive(Error, Debug)]
pub enum DataServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    ChangeLog(#[from] ChangeLogError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Hook(#[from] HookError),
}

/// A file system change reported by a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    Added,
    Changed,
    Removed,
}

pub struct DataServerBuilder {
    config: Config,
    queries: Option<QueryRegistry>,
    tasks: Option<TaskRegistry>,
    hooks: Option<Box<dyn Hooks>>,
}

impl DataServerBuilder {
    pub fn queries(mut self, registry: QueryRegistry) -> Self {
        self.queries = Some(registry);
        self
    }

    pub fn tasks(mut self, registry: TaskRegistry) -> Self {
        self.tasks = Some(registry);
        self
    }

    pub fn hooks(mut self, hooks: impl Hooks + 'static) -> Self {
        self.hooks = Some(Box::new(hooks));
        self
    }

    /// Validate the configuration and open the tracker; nothing is loaded yet
    pub fn build(self) -> Result<DataServer, DataServerError> {
        let config = self.config;
        let ignore = config.validate()?;

        let tracker = Tracker::open(config.instance_dir())?;
        let changelog = config.changelog_file().map(|file| {
            ChangeLog::new(file).with_uri_prefix(
                config
                    .changelog
                    .as_ref()
                    .and_then(|changelog| changelog.uri_prefix.clone()),
            )
        });

        let tagger = Arc::new(DependencyTagger::new());
        let queries = QueryRunner::new(
            self.queries,
            Arc::clone(&tagger),
            config.run_mode,
            config.cache.max_size_bytes,
        );

        Ok(DataServer {
            store: Store::new(config.data_dir(), config.cache.subset_capacity),
            dump: DumpWriter::new(config.dump_dir(), config.dump.max_records),
            tasks: TaskRunner::new(self.tasks),
            hooks: self.hooks.unwrap_or_else(|| Box::new(NoHooks)),
            bridge: InvalidationBridge::new(Arc::clone(&tagger)),
            queries,
            tagger,
            tracker,
            changelog,
            ignore,
            config,
        })
    }
}

pub struct DataServer {
    config: Config,
    store: Store,
    queries: QueryRunner,
    tasks: TaskRunner,
    hooks: Box<dyn Hooks>,
    tagger: Arc<DependencyTagger>,
    bridge: InvalidationBridge,
    tracker: Tracker,
    changelog: Option<ChangeLog>,
    dump: DumpWriter,
    ignore: Vec<Regex>,
}

impl DataServer {
    pub fn builder(config: Config) -> DataServerBuilder {
        DataServerBuilder {
            config,
            queries: None,
            tasks: None,
            hooks: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn tagger(&self) -> &DependencyTagger {
        &self.tagger
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn queries(&self) -> &QueryRunner {
        &self.queries
    }

    pub fn tasks(&self) -> &TaskRunner {
        &self.tasks
    }

    pub fn changelog(&self) -> Option<&ChangeLog> {
        self.changelog.as_ref()
    }

    pub fn dump_writer(&self) -> &DumpWriter {
        &self.dump
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.store, &self.queries)
    }

    /// Load every file under the data directory, replacing the store.
    ///
    /// Returns the number of records loaded.
    pub fn load(&mut self) -> Result<usize, DataServerError> {
        // Changes logged while we walk must land after this checkpoint
        let to = UniqueId::now();
        self.store.clear();
        self.tagger.reset();
        self.store.set_checkpoint(to.clone());

        self.call_hook("before_store_load", None, |hooks, ctx| hooks.before_store_load(ctx))?;

        let data_dir = self.store.data_dir().to_path_buf();
        let mut count = 0;
        for entry in WalkDir::new(&data_dir).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&data_dir) else {
                continue;
            };
            let path = relative_path_string(relative);
            if self.is_ignored(&path) {
                tracing::trace!("Ignoring {}", path);
                continue;
            }
            self.write_item(&path)?;
            count += 1;
        }

        // Bring a tracker left behind by a crash up to date with the log
        let replay = match (self.tracker.diff_checkpoint(), &self.changelog) {
            (Some(since), Some(changelog)) => changelog.read_range(Some(since), Some(&to))?,
            _ => Vec::new(),
        };
        if !replay.is_empty() {
            self.track_entries(&replay)?;
        }
        self.tagger.clear_invalidated_tags();

        self.call_hook("after_store_load", None, |hooks, ctx| hooks.after_store_load(ctx))?;
        tracing::info!("Loaded {} records from {:?}", count, data_dir);
        Ok(count)
    }

    /// Apply change log entries written since the store checkpoint
    pub fn update(&mut self) -> Result<ChangedFiles, DataServerError> {
        let Some(changelog) = &self.changelog else {
            tracing::debug!("No change log configured, nothing to update");
            return Ok(ChangedFiles::default());
        };

        let from = self.store.checkpoint().cloned();
        let to = UniqueId::now();
        self.store.set_checkpoint(to.clone());

        let entries = changelog.read_range(from.as_ref(), Some(&to))?;
        if entries.is_empty() {
            return Ok(ChangedFiles::default());
        }

        // Ancestors must be computed before the store drops any include edge
        self.track_entries(&entries)?;

        // Each path is applied on its own; a failure only drops that path
        let mut changes = collapse(&entries);
        changes.deleted.retain(|path| match self.remove_item(path) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!("Failed to remove {}: {}", path, err);
                false
            }
        });
        changes.updated.retain(|path| match self.write_item(path) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!("Failed to write {}: {}", path, err);
                false
            }
        });

        tracing::info!(
            "Applied {} updated and {} deleted files",
            changes.updated.len(),
            changes.deleted.len()
        );
        Ok(changes)
    }

    /// Apply a single watcher event to the store and tracker
    pub fn on_file_event(&mut self, event: FileEvent, path: &Path) -> Result<(), DataServerError> {
        let Some(path) = self.relative_path(path) else {
            tracing::warn!("Ignoring event outside the data directory: {:?}", path);
            return Ok(());
        };
        if self.is_ignored(&path) {
            return Ok(());
        }

        let id = UniqueId::now();
        let ancestors = self.store.include_index().ancestors(&path);
        match event {
            FileEvent::Added | FileEvent::Changed => self.tracker.record_write(&path, &id, ancestors),
            FileEvent::Removed => self.tracker.record_delete(&path, &id, ancestors),
        }
        self.tracker.persist()?;

        match event {
            FileEvent::Added | FileEvent::Changed => self.write_item(&path),
            FileEvent::Removed => self.remove_item(&path),
        }
    }

    /// Paths to publish since the last consumed diff.
    ///
    /// Falls back to every loaded path when `incremental` is false or no
    /// diff was consumed yet.
    pub fn get_diff(&mut self, incremental: bool) -> Result<Diff, DataServerError> {
        self.update()?;
        let to = self.store.checkpoint().cloned();

        let since = match (incremental, self.tracker.diff_checkpoint()) {
            (true, Some(since)) => since.clone(),
            _ => {
                return Ok(Diff {
                    since: None,
                    to,
                    updated: self.store.paths(),
                    deleted: BTreeSet::new(),
                })
            }
        };

        let deleted = self.tracker.deleted();
        let mut updated: BTreeSet<String> = self
            .tracker
            .changed()
            .into_iter()
            .filter(|path| !deleted.contains(path))
            .collect();
        // Query results cannot be compared, so their hosts always count
        updated.extend(self.store.paths_with_dynamic_includes());
        updated.extend(self.tagger.get_all_invalidated_tags());
        updated.retain(|path| self.store.contains(path));

        Ok(Diff {
            since: Some(since),
            to,
            updated,
            deleted,
        })
    }

    /// Mark everything up to `to` as consumed
    pub fn reset_diff(&mut self, to: &UniqueId) -> Result<(), DataServerError> {
        self.tracker.advance(to)?;
        self.tagger.clear_invalidated_tags();
        Ok(())
    }

    /// Write the current diff to the dump directory.
    ///
    /// The diff checkpoint only moves once the dump metadata is on disk.
    pub fn dump(&mut self, incremental: bool) -> Result<DumpRecord, DataServerError> {
        let diff = self.get_diff(incremental)?;
        let record = self.dump.write(&self.resolver(), &diff)?;

        if let Some(to) = &diff.to {
            self.reset_diff(to)?;
            self.tracker.set_dump_checkpoint(to.clone());
            self.tracker.persist()?;
        }

        let ctx = HookContext {
            store: &self.store,
            path: None,
            record: None,
        };
        self.hooks.after_dump(&ctx, &record).map_err(|source| {
            let err = HookError {
                hook: "after_dump",
                path: None,
                source,
            };
            tracing::error!("{}", err);
            err
        })?;

        Ok(record)
    }

    /// Fully resolved content of `path`
    pub fn resolve(&self, path: &str) -> Option<Value> {
        self.resolver().resolve(path)
    }

    pub fn run_query(&self, id: &str, args: &QueryArgs) -> Result<QueryResponse, QueryError> {
        self.queries.run(&self.store, id, args)
    }

    pub fn run_task(&self, id: &str, args: &QueryArgs) -> Result<QueryResponse, QueryError> {
        self.tasks.run(&self.store, id, args)
    }

    /// Content path for a watcher path, which may be absolute
    fn relative_path(&self, path: &Path) -> Option<String> {
        if path.is_relative() {
            return Some(relative_path_string(path));
        }
        let data_dir = self.store.data_dir();
        if let Ok(relative) = path.strip_prefix(data_dir) {
            return Some(relative_path_string(relative));
        }
        let canonical = data_dir.canonicalize().ok()?;
        let relative = path.strip_prefix(&canonical).ok()?;
        Some(relative_path_string(relative))
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.ignore.iter().any(|re| re.is_match(path))
    }

    /// Record log entries, and the files including them, in the tracker
    fn track_entries(&mut self, entries: &[ChangeLogEntry]) -> Result<(), DataServerError> {
        for entry in entries {
            let path = &entry.relative_path;
            let ancestors = self.store.include_index().ancestors(path);
            match entry.operation {
                Operation::Write => self.tracker.record_write(path, &entry.unique_id, ancestors),
                Operation::Delete => self.tracker.record_delete(path, &entry.unique_id, ancestors),
            }
        }
        self.tracker.persist()?;
        Ok(())
    }

    fn write_item(&mut self, path: &str) -> Result<(), DataServerError> {
        if self.store.contains(path) {
            self.call_hook("before_item_update", Some(path), |hooks, ctx| hooks.before_item_update(ctx))?;
        } else {
            self.call_hook("before_item_add", Some(path), |hooks, ctx| hooks.before_item_add(ctx))?;
        }

        let kind = self.store.add(path, None)?;
        self.register_dependencies(path);
        self.bridge.on_store_change(&StoreChange::Written {
            path: path.to_string(),
        });

        match kind {
            WriteKind::Added => self.call_hook("after_item_add", Some(path), |hooks, ctx| hooks.after_item_add(ctx))?,
            WriteKind::Updated => {
                self.call_hook("after_item_update", Some(path), |hooks, ctx| hooks.after_item_update(ctx))?
            }
        }
        Ok(())
    }

    fn remove_item(&mut self, path: &str) -> Result<(), DataServerError> {
        if !self.store.contains(path) {
            tracing::debug!("{} is not loaded, nothing to remove", path);
            return Ok(());
        }

        self.call_hook("before_item_remove", Some(path), |hooks, ctx| hooks.before_item_remove(ctx))?;
        self.store.remove(path)?;
        self.bridge.on_store_change(&StoreChange::Removed {
            path: path.to_string(),
        });
        self.call_hook("after_item_remove", Some(path), |hooks, ctx| hooks.after_item_remove(ctx))?;
        Ok(())
    }

    /// A file depends on its static targets and on the tags of its queries;
    /// a query nobody has run yet depends on everything.
    fn register_dependencies(&self, path: &str) {
        let Some(record) = self.store.get(path) else {
            return;
        };

        let query_tags: Vec<String> = record.query_specs().map(QuerySpec::tag).collect();
        let deps: Vec<String> = record
            .includes()
            .static_targets()
            .map(str::to_string)
            .chain(query_tags.iter().cloned())
            .collect();
        self.tagger.set_dependency(path, deps);

        for tag in query_tags {
            if !self.tagger.contains(&tag) {
                self.tagger.set_dependency(&tag, [WILDCARD]);
            }
        }
    }

    fn call_hook<F>(&self, hook: &'static str, path: Option<&str>, f: F) -> Result<(), HookError>
    where
        F: FnOnce(&dyn Hooks, &HookContext<'_>) -> anyhow::Result<()>,
    {
        let ctx = HookContext {
            store: &self.store,
            path,
            record: path.and_then(|p| self.store.get(p)),
        };
        f(self.hooks.as_ref(), &ctx).map_err(|source| {
            let err = HookError {
                hook,
                path: path.map(str::to_string),
                source,
            };
            tracing::error!("{}", err);
            err
        })
    }
}
