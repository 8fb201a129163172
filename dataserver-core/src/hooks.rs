//! Lifecycle hooks.

use dataserver_types::DumpRecord;
use thiserror::Error;

use crate::store::{ContentRecord, Store};

#[derive(Error, Debug)]
#[error("{hook} hook failed{}: {source:#}", .path.as_deref().map(|p| format!(" for {p}")).unwrap_or_default())]
pub struct HookError {
    pub hook: &'static str,
    pub path: Option<String>,
    #[source]
    pub source: anyhow::Error,
}

/// State handed to every hook
pub struct HookContext<'a> {
    pub store: &'a Store,
    pub path: Option<&'a str>,

    /// The record as currently stored; `None` before an add and after a remove
    pub record: Option<&'a ContentRecord>,
}

/// Callbacks around store and dump operations.
///
/// Every method defaults to a no-op. An error aborts the surrounding
/// operation and is reported as a [`HookError`].
#[allow(unused_variables)]
pub trait Hooks: Send + Sync {
    fn before_store_load(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_store_load(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn before_item_add(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_item_add(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn before_item_update(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_item_update(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn before_item_remove(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_item_remove(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_dump(&self, ctx: &HookContext<'_>, record: &DumpRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl Hooks for NoHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_names_hook_and_path() {
        let err = HookError {
            hook: "before_item_add",
            path: Some("en/a.json".into()),
            source: anyhow::anyhow!("rejected"),
        };
        assert_eq!(err.to_string(), "before_item_add hook failed for en/a.json: rejected");

        let err = HookError {
            hook: "after_store_load",
            path: None,
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(err.to_string(), "after_store_load hook failed: boom");
    }

    #[test]
    fn test_defaults_are_noops() {
        let store = Store::new("data", 8);
        let ctx = HookContext {
            store: &store,
            path: None,
            record: None,
        };
        assert!(NoHooks.before_store_load(&ctx).is_ok());
        assert!(NoHooks.after_dump(&ctx, &DumpRecord::default()).is_ok());
    }
}
