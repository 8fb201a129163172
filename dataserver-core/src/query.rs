//! Query and task execution.
//!
//! Queries and tasks are user handlers registered by id. Both receive the
//! store and string arguments; query results are cached per store revision
//! and may report the dependency tags they read.

use dataserver_incremental::{
    CacheError, CacheKey, DependencyTagger, MetricsRegistry, MetricsSnapshot, ResultCache,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::form_urlencoded;

use crate::config::RunMode;
use crate::store::Store;

/// Handler arguments, decoded from `?a=1&b=2`
pub type QueryArgs = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("No handler registered for '{0}'")]
    NotFound(String),

    #[error("Handler '{id}' failed (args: {args}): {source:#}")]
    Handler {
        id: String,
        args: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Query cache error: {0}")]
    Cache(#[from] CacheError),
}

/// A query id plus its arguments, as written in a dynamic include
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuerySpec {
    pub id: String,
    pub args: QueryArgs,
}

impl QuerySpec {
    pub fn new(id: impl Into<String>, args: QueryArgs) -> Self {
        Self {
            id: id.into(),
            args,
        }
    }

    /// Parse `queryId?arg=value&...`; arguments are URL-decoded
    pub fn parse(spec: &str) -> Self {
        let (id, query) = spec.split_once('?').unwrap_or((spec, ""));
        let args = form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        Self::new(id.trim(), args)
    }

    /// Dependency tag standing for this query's result
    pub fn tag(&self) -> String {
        format!("query:{self}")
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)?;
        if !self.args.is_empty() {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.args)
                .finish();
            write!(f, "?{encoded}")?;
        }
        Ok(())
    }
}

/// What a handler sees
pub struct QueryContext<'a> {
    pub store: &'a Store,
    pub args: &'a QueryArgs,
}

impl QueryContext<'_> {
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }
}

/// What a handler returns
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    pub result: Value,
    pub cacheable: bool,
    pub content_type: Option<String>,

    /// Tags the result was computed from; `None` means "may depend on
    /// anything"
    pub tags: Option<Vec<String>>,
}

impl QueryOutput {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            cacheable: true,
            content_type: None,
            tags: None,
        }
    }

    pub fn uncacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }
}

impl From<Value> for QueryOutput {
    fn from(result: Value) -> Self {
        Self::new(result)
    }
}

pub trait QueryHandler: Send + Sync {
    fn run(&self, ctx: &QueryContext<'_>) -> anyhow::Result<QueryOutput>;
}

impl<F> QueryHandler for F
where
    F: Fn(&QueryContext<'_>) -> anyhow::Result<QueryOutput> + Send + Sync,
{
    fn run(&self, ctx: &QueryContext<'_>) -> anyhow::Result<QueryOutput> {
        self(ctx)
    }
}

/// Tasks share the query contract but are never cached
pub trait TaskHandler: Send + Sync {
    fn run(&self, ctx: &QueryContext<'_>) -> anyhow::Result<QueryOutput>;
}

impl<F> TaskHandler for F
where
    F: Fn(&QueryContext<'_>) -> anyhow::Result<QueryOutput> + Send + Sync,
{
    fn run(&self, ctx: &QueryContext<'_>) -> anyhow::Result<QueryOutput> {
        self(ctx)
    }
}

/// Handlers by id
pub struct Registry<H: ?Sized> {
    handlers: BTreeMap<String, Arc<H>>,
}

pub type QueryRegistry = Registry<dyn QueryHandler>;
pub type TaskRegistry = Registry<dyn TaskHandler>;

impl<H: ?Sized> Registry<H> {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<H>> {
        self.handlers.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<H: ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized> fmt::Debug for Registry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

impl Registry<dyn QueryHandler> {
    pub fn register(mut self, id: impl Into<String>, handler: impl QueryHandler + 'static) -> Self {
        self.handlers.insert(id.into(), Arc::new(handler));
        self
    }

    /// Register a closure; its signature is inferred from the bound
    pub fn register_fn<F>(self, id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&QueryContext<'_>) -> anyhow::Result<QueryOutput> + Send + Sync + 'static,
    {
        self.register(id, handler)
    }
}

impl Registry<dyn TaskHandler> {
    pub fn register(mut self, id: impl Into<String>, handler: impl TaskHandler + 'static) -> Self {
        self.handlers.insert(id.into(), Arc::new(handler));
        self
    }

    pub fn register_fn<F>(self, id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&QueryContext<'_>) -> anyhow::Result<QueryOutput> + Send + Sync + 'static,
    {
        self.register(id, handler)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub execution_time_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStatus>,

    /// Number of items when the result is an array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub meta: ResponseMeta,
}

impl QueryResponse {
    fn success(data: Value, content_type: Option<String>, cache: Option<CacheStatus>, elapsed: Duration) -> Self {
        let count = data.as_array().map(Vec::len);
        Self {
            data,
            content_type,
            error: None,
            meta: ResponseMeta {
                execution_time_ms: elapsed.as_millis() as u64,
                cache,
                count,
            },
        }
    }

    /// A structured failure returned instead of an error
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            data: Value::Null,
            content_type: None,
            error: Some(message.into()),
            meta: ResponseMeta {
                execution_time_ms: 0,
                cache: None,
                count: None,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Cached part of a query result
#[derive(Debug, Serialize, Deserialize)]
struct CachedResult {
    data: Value,
    content_type: Option<String>,
}

/// Runs registered queries with caching, metrics and dependency reporting
pub struct QueryRunner {
    registry: Option<QueryRegistry>,
    cache: ResultCache,
    metrics: MetricsRegistry,
    tagger: Arc<DependencyTagger>,
    mode: RunMode,
}

impl fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRunner")
            .field("registry", &self.registry)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl QueryRunner {
    pub fn new(
        registry: Option<QueryRegistry>,
        tagger: Arc<DependencyTagger>,
        mode: RunMode,
        max_cache_bytes: usize,
    ) -> Self {
        Self {
            registry,
            cache: ResultCache::with_max_size(max_cache_bytes),
            metrics: MetricsRegistry::new(),
            tagger,
            mode,
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn metrics(&self) -> Vec<MetricsSnapshot> {
        self.metrics.snapshots()
    }

    pub fn run(&self, store: &Store, id: &str, args: &QueryArgs) -> Result<QueryResponse, QueryError> {
        let Some(registry) = &self.registry else {
            return Ok(QueryResponse::failure("No query handlers are configured"));
        };
        if id.is_empty() {
            return Ok(QueryResponse::failure("Query id is required"));
        }
        let Some(handler) = registry.get(id) else {
            tracing::error!(query = id, "Unknown query");
            return Err(QueryError::NotFound(id.to_string()));
        };

        let started = Instant::now();
        let metrics = self.metrics.for_query(id);
        let use_cache = !self.mode.is_development();
        let key = CacheKey::for_query(id, args)?;

        if use_cache {
            self.cache.sync_revision(store.revision());
            if let Some(cached) = self.cache.get::<CachedResult>(&key) {
                metrics.record_hit();
                tracing::debug!(query = id, "Query cache hit");
                return Ok(QueryResponse::success(
                    cached.data,
                    cached.content_type,
                    Some(CacheStatus::Hit),
                    started.elapsed(),
                ));
            }
        }
        metrics.record_miss();

        let ctx = QueryContext { store, args };
        let output = handler.run(&ctx).map_err(|source| {
            metrics.record_error();
            handler_error(id, args, source)
        })?;
        metrics.record_execution(started.elapsed());

        let spec = QuerySpec::new(id, args.clone());
        if let Some(tags) = &output.tags {
            self.tagger.set_dependency(&spec.tag(), tags.iter().map(String::as_str));
        }

        if use_cache && output.cacheable {
            let cached = CachedResult {
                data: output.result.clone(),
                content_type: output.content_type.clone(),
            };
            if let Err(err) = self.cache.put(key, &cached) {
                tracing::debug!(query = id, "Result not cached: {}", err);
            }
        }

        Ok(QueryResponse::success(
            output.result,
            output.content_type,
            Some(CacheStatus::Miss),
            started.elapsed(),
        ))
    }
}

/// Runs registered tasks; no caching, no dependency tags
pub struct TaskRunner {
    registry: Option<TaskRegistry>,
    metrics: MetricsRegistry,
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl TaskRunner {
    pub fn new(registry: Option<TaskRegistry>) -> Self {
        Self {
            registry,
            metrics: MetricsRegistry::new(),
        }
    }

    pub fn metrics(&self) -> Vec<MetricsSnapshot> {
        self.metrics.snapshots()
    }

    pub fn run(&self, store: &Store, id: &str, args: &QueryArgs) -> Result<QueryResponse, QueryError> {
        let Some(registry) = &self.registry else {
            return Ok(QueryResponse::failure("No task handlers are configured"));
        };
        if id.is_empty() {
            return Ok(QueryResponse::failure("Task id is required"));
        }

        let Some(handler) = registry.get(id) else {
            tracing::error!(task = id, "Unknown task");
            return Err(QueryError::NotFound(id.to_string()));
        };

        let started = Instant::now();
        let metrics = self.metrics.for_query(id);
        let ctx = QueryContext { store, args };
        let output = handler.run(&ctx).map_err(|source| {
            metrics.record_error();
            handler_error(id, args, source)
        })?;
        metrics.record_execution(started.elapsed());

        Ok(QueryResponse::success(
            output.result,
            output.content_type,
            None,
            started.elapsed(),
        ))
    }
}

fn handler_error(id: &str, args: &QueryArgs, source: anyhow::Error) -> QueryError {
    let args = serde_json::to_string(args).unwrap_or_default();
    tracing::error!(handler = id, args = %args, "Handler failed: {:#}", source);
    QueryError::Handler {
        id: id.to_string(),
        args,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataserver_incremental::WILDCARD;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn args(pairs: &[(&str, &str)]) -> QueryArgs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn runner(registry: QueryRegistry, mode: RunMode) -> QueryRunner {
        QueryRunner::new(Some(registry), Arc::new(DependencyTagger::new()), mode, 0)
    }

    #[test]
    fn test_spec_parse_and_tag() {
        let spec = QuerySpec::parse("latest?limit=3&type=news%20item");
        assert_eq!(spec.id, "latest");
        assert_eq!(spec.args, args(&[("limit", "3"), ("type", "news item")]));
        assert_eq!(spec.tag(), "query:latest?limit=3&type=news+item");

        let bare = QuerySpec::parse("all");
        assert!(bare.args.is_empty());
        assert_eq!(bare.to_string(), "all");
    }

    #[test]
    fn test_second_run_hits_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = QueryRegistry::new().register_fn("q", move |ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(QueryOutput::new(json!([ctx.arg("x")])))
        });
        let runner = runner(registry, RunMode::Production);
        let store = Store::new("data", 8);
        let x = args(&[("x", "1")]);

        let first = runner.run(&store, "q", &x).unwrap();
        let second = runner.run(&store, "q", &x).unwrap();

        assert_eq!(first.meta.cache, Some(CacheStatus::Miss));
        assert_eq!(second.meta.cache, Some(CacheStatus::Hit));
        assert_eq!(first.data, second.data);
        assert_eq!(second.meta.count, Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = runner.cache().stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
        let metrics = runner.metrics();
        assert_eq!((metrics[0].hits, metrics[0].misses, metrics[0].executions), (1, 1, 1));
    }

    #[test]
    fn test_store_mutation_clears_cache() {
        let registry = QueryRegistry::new()
            .register_fn("count", |ctx| Ok(json!(ctx.store.len()).into()));
        let runner = runner(registry, RunMode::Production);
        let mut store = Store::new("data", 8);

        assert_eq!(runner.run(&store, "count", &QueryArgs::new()).unwrap().data, json!(0));
        store.add("en/a.json", Some(b"{}".to_vec())).unwrap();

        let after = runner.run(&store, "count", &QueryArgs::new()).unwrap();
        assert_eq!(after.data, json!(1));
        assert_eq!(after.meta.cache, Some(CacheStatus::Miss));
    }

    #[test]
    fn test_development_and_uncacheable_skip_cache() {
        let registry = QueryRegistry::new().register_fn("q", |_| Ok(json!(1).into()));
        let store = Store::new("data", 8);
        let none = QueryArgs::new();

        let dev = runner(registry, RunMode::Development);
        dev.run(&store, "q", &none).unwrap();
        assert_eq!(dev.run(&store, "q", &none).unwrap().meta.cache, Some(CacheStatus::Miss));

        let prod = runner(
            QueryRegistry::new().register_fn("volatile", |_| {
                Ok(QueryOutput::new(json!(2)).uncacheable())
            }),
            RunMode::Production,
        );
        prod.run(&store, "volatile", &none).unwrap();
        assert_eq!(
            prod.run(&store, "volatile", &none).unwrap().meta.cache,
            Some(CacheStatus::Miss)
        );
    }

    #[test]
    fn test_structured_failures() {
        let store = Store::new("data", 8);
        let none = QueryArgs::new();

        let unconfigured = QueryRunner::new(None, Arc::new(DependencyTagger::new()), RunMode::Production, 0);
        assert!(!unconfigured.run(&store, "q", &none).unwrap().is_success());

        let runner = runner(QueryRegistry::new(), RunMode::Production);
        assert!(!runner.run(&store, "", &none).unwrap().is_success());
        assert!(matches!(
            runner.run(&store, "missing", &none),
            Err(QueryError::NotFound(id)) if id == "missing"
        ));
        assert!(runner.metrics().is_empty());
        assert_eq!(runner.cache().stats().misses, 0);
    }

    #[test]
    fn test_handler_errors_propagate() {
        let registry = QueryRegistry::new().register_fn("broken", |_| {
            Err(anyhow::anyhow!("database on fire"))
        });
        let runner = runner(registry, RunMode::Production);
        let store = Store::new("data", 8);

        let err = runner
            .run(&store, "broken", &args(&[("a", "1")]))
            .unwrap_err();
        match err {
            QueryError::Handler { id, args, .. } => {
                assert_eq!(id, "broken");
                assert_eq!(args, r#"{"a":"1"}"#);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runner.metrics()[0].errors, 1);
    }

    #[test]
    fn test_reported_tags_replace_wildcard() {
        let tagger = Arc::new(DependencyTagger::new());
        let registry = QueryRegistry::new().register_fn("by-author", |_| {
            Ok(QueryOutput::new(json!([])).with_tags(["en/user/1.json"]))
        });
        let runner = QueryRunner::new(Some(registry), Arc::clone(&tagger), RunMode::Production, 0);
        let spec = QuerySpec::parse("by-author?uid=1");
        tagger.set_dependency(&spec.tag(), [WILDCARD]);

        runner.run(&Store::new("data", 8), &spec.id, &spec.args).unwrap();

        assert_eq!(
            tagger.dependencies(&spec.tag()).into_iter().collect::<Vec<_>>(),
            vec!["en/user/1.json".to_string()]
        );
    }

    #[test]
    fn test_tasks_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let tasks = TaskRunner::new(Some(TaskRegistry::new().register_fn(
            "rebuild",
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("done").into())
            },
        )));
        let store = Store::new("data", 8);

        tasks.run(&store, "rebuild", &QueryArgs::new()).unwrap();
        let response = tasks.run(&store, "rebuild", &QueryArgs::new()).unwrap();

        assert_eq!(response.meta.cache, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
