//! Resolution of records into their published form.

use serde_json::Value;

use super::{navigate_mut, MountSource};
use crate::query::{QueryRunner, QuerySpec};
use crate::store::{Content, ContentRecord, Store};

/// Resolves records against the current store, forcing query includes.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    store: &'a Store,
    queries: &'a QueryRunner,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a Store, queries: &'a QueryRunner) -> Self {
        Self { store, queries }
    }

    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// Fully resolved value of the record at `path`, if it exists
    pub fn resolve(&self, path: &str) -> Option<Value> {
        self.store.get(path).map(|record| self.resolve_record(record))
    }

    /// Fully resolved value of `record`.
    ///
    /// Raw files resolve to a string, missing files to null.
    pub fn resolve_record(&self, record: &ContentRecord) -> Value {
        let mut visiting = vec![record.path().to_string()];
        self.resolve_inner(record, &mut visiting)
    }

    /// Bytes written when publishing `record`; `None` for missing files
    pub fn serialize(&self, record: &ContentRecord) -> Option<Vec<u8>> {
        match record.content() {
            Content::Missing => None,
            Content::Raw(bytes) => Some(bytes.clone()),
            Content::Json(_) => {
                let value = self.resolve_record(record);
                match serde_json::to_vec_pretty(&value) {
                    Ok(mut bytes) => {
                        bytes.push(b'\n');
                        Some(bytes)
                    }
                    Err(err) => {
                        tracing::error!("Failed to serialize {}: {}", record.path(), err);
                        None
                    }
                }
            }
        }
    }

    fn resolve_inner(&self, record: &ContentRecord, visiting: &mut Vec<String>) -> Value {
        let mut value = match record.content() {
            Content::Missing => return Value::Null,
            Content::Raw(bytes) => return Value::String(String::from_utf8_lossy(bytes).into_owned()),
            Content::Json(value) => value.clone(),
        };

        for mount in record.mounts() {
            let mounted = match &mount.source {
                MountSource::Static { target, flavor } => {
                    if visiting.iter().any(|p| p == target) {
                        tracing::warn!(
                            "Include cycle: {} -> {} (mounting null)",
                            record.path(),
                            target
                        );
                        Value::Null
                    } else {
                        match self.store.get(target) {
                            Some(target_record) => {
                                visiting.push(target.clone());
                                let resolved = self.resolve_inner(target_record, visiting);
                                visiting.pop();
                                flavor.select(resolved)
                            }
                            None => {
                                tracing::debug!("{}: include target {} not loaded", record.path(), target);
                                Value::Null
                            }
                        }
                    }
                }
                MountSource::Dynamic(lazy) => lazy.force(self),
            };

            match navigate_mut(&mut value, &mount.parent) {
                Some(Value::Object(map)) => {
                    map.insert(mount.key.clone(), mounted);
                }
                _ => tracing::debug!("{}: mount parent for {} vanished", record.path(), mount.key),
            }
        }

        value
    }

    /// Execute a query include; failures become a diagnostic in development
    /// and null in production
    pub(crate) fn run_query(&self, spec: &QuerySpec) -> Value {
        let failure = match self.queries.run(self.store, &spec.id, &spec.args) {
            Ok(response) => match response.error {
                None => return response.data,
                Some(error) => error,
            },
            Err(err) => err.to_string(),
        };

        tracing::warn!("Query include {} failed: {}", spec, failure);
        if self.queries.mode().is_development() {
            Value::String(format!("Error running query {spec}: {failure}"))
        } else {
            Value::Null
        }
    }
}
