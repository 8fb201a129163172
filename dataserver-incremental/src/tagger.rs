//! Dependency tag graph
//!
//! This module implements the forward dependency graph between tags,
//! its lazily rebuilt reverse, and cascading invalidation.
//!
//! A tag is an opaque string, usually a relative file path or a query
//! definition. The forward graph maps a tag to the tags it depends on; the
//! reversed graph maps a tag to the tags that depend on it ("parents").

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Tag meaning "depends on everything".
pub const WILDCARD: &str = "*";

#[derive(Debug, Default)]
struct TagGraph {
    /// Forward edges: tag -> tags it depends on
    forward: HashMap<String, HashSet<String>>,

    /// Reverse edges: tag -> tags that depend on it
    reversed: HashMap<String, HashSet<String>>,

    /// Set on every forward mutation, cleared by `rebuild_reversed`
    reversed_dirty: bool,

    /// Explicitly invalidated tags, consumed by a diff/dump cycle
    invalidated: HashSet<String>,
}

impl TagGraph {
    fn rebuild_reversed(&mut self) {
        let mut reversed: HashMap<String, HashSet<String>> = HashMap::new();
        for (tag, deps) in &self.forward {
            for dep in deps {
                reversed
                    .entry(dep.clone())
                    .or_default()
                    .insert(tag.clone());
            }
        }
        self.reversed = reversed;
        self.reversed_dirty = false;
    }

    /// Depth-first walk over the reversed graph.
    ///
    /// The graph is not acyclic by construction, so every visited tag is
    /// remembered and never expanded twice.
    fn parents(&self, tag: &str) -> BTreeSet<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(tag);
        let mut stack: Vec<&str> = vec![tag];
        let mut parents = BTreeSet::new();

        while let Some(current) = stack.pop() {
            let Some(dependents) = self.reversed.get(current) else {
                continue;
            };
            for parent in dependents {
                if visited.insert(parent.as_str()) {
                    parents.insert(parent.clone());
                    stack.push(parent.as_str());
                } else if parent == tag {
                    tracing::debug!("Dependency cycle through tag {}", tag);
                }
            }
        }

        parents
    }
}

/// Dependency tagger with cascading invalidation
#[derive(Debug, Default)]
pub struct DependencyTagger {
    graph: RwLock<TagGraph>,
}

impl DependencyTagger {
    /// Create an empty tagger
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the outgoing edges of `tag`.
    ///
    /// An empty `deps` removes the tag's forward entry.
    pub fn set_dependency<I, S>(&self, tag: &str, deps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let deps: HashSet<String> = deps.into_iter().map(Into::into).collect();
        let mut graph = self.graph.write();
        if deps.is_empty() {
            graph.forward.remove(tag);
        } else {
            graph.forward.insert(tag.to_string(), deps);
        }
        graph.reversed_dirty = true;
    }

    /// Merge `deps` into the outgoing edges of `tag`
    pub fn add_dependency<I, S>(&self, tag: &str, deps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = self.graph.write();
        let entry = graph.forward.entry(tag.to_string()).or_default();
        entry.extend(deps.into_iter().map(Into::into));
        if entry.is_empty() {
            graph.forward.remove(tag);
        }
        graph.reversed_dirty = true;
    }

    /// Remove edges from `tag`; `None` removes all of them.
    pub fn delete_dependency(&self, tag: &str, deps: Option<&[String]>) {
        let mut graph = self.graph.write();
        match deps {
            None => {
                graph.forward.remove(tag);
            }
            Some(deps) => {
                let now_empty = match graph.forward.get_mut(tag) {
                    Some(entry) => {
                        for dep in deps {
                            entry.remove(dep);
                        }
                        entry.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    graph.forward.remove(tag);
                }
            }
        }
        graph.reversed_dirty = true;
    }

    /// Tags `tag` directly depends on
    pub fn dependencies(&self, tag: &str) -> BTreeSet<String> {
        self.graph
            .read()
            .forward
            .get(tag)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `tag` has a forward entry
    pub fn contains(&self, tag: &str) -> bool {
        self.graph.read().forward.contains_key(tag)
    }

    /// Number of tags with outgoing edges
    pub fn len(&self) -> usize {
        self.graph.read().forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All tags that transitively depend on `tag`
    pub fn get_tag_parents(&self, tag: &str) -> BTreeSet<String> {
        self.with_reversed(|graph| graph.parents(tag))
    }

    /// Mark tags as explicitly invalidated
    pub fn invalidate_tags<I, S>(&self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = self.graph.write();
        graph.invalidated.extend(tags.into_iter().map(Into::into));
    }

    /// Explicitly invalidated tags, without expansion
    pub fn invalidated_tags(&self) -> BTreeSet<String> {
        self.graph.read().invalidated.iter().cloned().collect()
    }

    /// Every explicitly invalidated tag plus all of its cascading parents.
    ///
    /// Invalidating any concrete tag also invalidates everything that
    /// depends on the wildcard. The wildcard itself is only reported when it
    /// was invalidated explicitly.
    pub fn get_all_invalidated_tags(&self) -> BTreeSet<String> {
        self.with_reversed(|graph| {
            let mut all = BTreeSet::new();
            let mut concrete = false;

            for tag in &graph.invalidated {
                if tag != WILDCARD {
                    concrete = true;
                }
                all.insert(tag.clone());
                all.extend(graph.parents(tag));
            }

            if concrete {
                all.extend(graph.parents(WILDCARD));
            }

            all
        })
    }

    /// Forget explicit invalidations once a diff/dump cycle consumed them
    pub fn clear_invalidated_tags(&self) {
        self.graph.write().invalidated.clear();
    }

    /// Drop every edge and invalidation
    pub fn reset(&self) {
        *self.graph.write() = TagGraph::default();
    }

    fn with_reversed<R>(&self, f: impl FnOnce(&TagGraph) -> R) -> R {
        let graph = self.graph.upgradable_read();
        if graph.reversed_dirty {
            let mut graph = RwLockUpgradableReadGuard::upgrade(graph);
            graph.rebuild_reversed();
            f(&graph)
        } else {
            f(&graph)
        }
    }
}
