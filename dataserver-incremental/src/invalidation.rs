//! Store change invalidation bridge
//!
//! This module bridges content store changes to tag invalidation, so the
//! dependency graph stays synchronized with what was loaded from disk.

use crate::tagger::DependencyTagger;
use std::sync::Arc;

/// A change applied to the content store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// A record was added or updated in place
    Written { path: String },

    /// A record was removed
    Removed { path: String },
}

impl StoreChange {
    pub fn path(&self) -> &str {
        match self {
            StoreChange::Written { path } | StoreChange::Removed { path } => path,
        }
    }
}

/// Bridge between store changes and the dependency tagger
#[derive(Debug, Clone)]
pub struct InvalidationBridge {
    tagger: Arc<DependencyTagger>,
}

impl InvalidationBridge {
    pub fn new(tagger: Arc<DependencyTagger>) -> Self {
        InvalidationBridge { tagger }
    }

    /// Handle a store change and invalidate the affected tag
    pub fn on_store_change(&self, change: &StoreChange) {
        match change {
            StoreChange::Written { path } => {
                self.tagger.invalidate_tags([path.as_str()]);
            }
            StoreChange::Removed { path } => {
                // A removed file no longer depends on anything, but whatever
                // depended on it must still be rebuilt.
                self.tagger.invalidate_tags([path.as_str()]);
                self.tagger.delete_dependency(path, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_written_invalidates_dependents() {
        let tagger = Arc::new(DependencyTagger::new());
        tagger.set_dependency("en/page.json", ["en/block.json"]);
        let bridge = InvalidationBridge::new(tagger.clone());

        bridge.on_store_change(&StoreChange::Written {
            path: "en/block.json".into(),
        });

        let all = tagger.get_all_invalidated_tags();
        assert!(all.contains("en/block.json"));
        assert!(all.contains("en/page.json"));
    }

    #[test]
    fn test_removed_drops_forward_edges() {
        let tagger = Arc::new(DependencyTagger::new());
        tagger.set_dependency("en/page.json", ["en/block.json"]);
        let bridge = InvalidationBridge::new(tagger.clone());

        bridge.on_store_change(&StoreChange::Removed {
            path: "en/page.json".into(),
        });

        assert!(!tagger.contains("en/page.json"));
        assert!(tagger.invalidated_tags().contains("en/page.json"));
    }
}
