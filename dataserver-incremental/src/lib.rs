//! Dataserver incremental invalidation engine
//!
//! This crate holds the bookkeeping that makes the content store an
//! incremental, dependency-aware cache:
//!
//! - **Dependency tags**: a forward graph of "tag depends on tags" with a
//!   lazily rebuilt reverse, used for cascading invalidation
//! - **Include index**: which files statically include which, for
//!   propagating a change to every file that embeds it
//! - **Result cache**: query results addressed by a hash of id and
//!   arguments, dropped whenever the store revision moves
//! - **Metrics**: per-query hit/miss and timing counters
//!
//! # Example
//!
//! ```rust
//! use dataserver_incremental::{DependencyTagger, WILDCARD};
//!
//! let tagger = DependencyTagger::new();
//! tagger.set_dependency("en/home.json", ["en/menu.json"]);
//! tagger.set_dependency("query:latest?", [WILDCARD]);
//!
//! tagger.invalidate_tags(["en/menu.json"]);
//! let invalidated = tagger.get_all_invalidated_tags();
//! assert!(invalidated.contains("en/home.json"));
//! assert!(invalidated.contains("query:latest?"));
//! ```

#![warn(missing_debug_implementations)]

pub mod cache;
pub mod include_index;
pub mod invalidation;
pub mod metrics;
pub mod revision;
pub mod tagger;

pub use cache::{CacheError, CacheKey, CacheStats, ResultCache};
pub use include_index::IncludeIndex;
pub use invalidation::{InvalidationBridge, StoreChange};
pub use metrics::{MetricsRegistry, MetricsSnapshot, QueryMetrics};
pub use revision::Revision;
pub use tagger::{DependencyTagger, WILDCARD};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheKey, ResultCache};
    pub use crate::include_index::IncludeIndex;
    pub use crate::invalidation::{InvalidationBridge, StoreChange};
    pub use crate::revision::Revision;
    pub use crate::tagger::{DependencyTagger, WILDCARD};
}
