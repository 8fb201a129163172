//! Deferred query includes.

use dataserver_incremental::Revision;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

use super::Resolver;
use crate::query::QuerySpec;

/// A query include that runs only when its value is read.
///
/// The computed value is kept until the store moves to another revision.
#[derive(Debug)]
pub struct LazyQuery {
    spec: QuerySpec,
    cached: Mutex<Option<(Revision, Value)>>,
    evaluating: AtomicBool,
}

impl LazyQuery {
    pub fn new(spec: QuerySpec) -> Self {
        Self {
            spec,
            cached: Mutex::new(None),
            evaluating: AtomicBool::new(false),
        }
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Run the query if needed and return its value
    pub fn force(&self, resolver: &Resolver<'_>) -> Value {
        let revision = resolver.store().revision();
        {
            let cached = self.cached.lock();
            if let Some((at, value)) = cached.as_ref() {
                if *at == revision {
                    return value.clone();
                }
            }
        }

        // A handler that resolves the record holding this include would
        // otherwise recurse forever.
        if self.evaluating.swap(true, Ordering::SeqCst) {
            tracing::warn!("Query include {} depends on itself", self.spec);
            return Value::Null;
        }
        let value = resolver.run_query(&self.spec);
        self.evaluating.store(false, Ordering::SeqCst);

        *self.cached.lock() = Some((revision, value.clone()));
        value
    }
}
