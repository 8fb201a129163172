//! Static include index
//!
//! Maps an included target path to the set of files that statically include
//! it, so a change to one file can be propagated to every file whose
//! resolved output embeds it.

use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Default, Clone)]
pub struct IncludeIndex {
    /// target -> hosts that include it
    hosts: HashMap<String, HashSet<String>>,

    /// host -> targets it includes, kept to drop stale edges on update
    targets: HashMap<String, HashSet<String>>,
}

impl IncludeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every include edge leaving `host`
    pub fn set_includes<I, S>(&mut self, host: &str, targets: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove_host(host);

        let targets: HashSet<String> = targets.into_iter().map(Into::into).collect();
        if targets.is_empty() {
            return;
        }
        for target in &targets {
            self.hosts
                .entry(target.clone())
                .or_default()
                .insert(host.to_string());
        }
        self.targets.insert(host.to_string(), targets);
    }

    /// Drop every include edge leaving `host`
    pub fn remove_host(&mut self, host: &str) {
        let Some(old) = self.targets.remove(host) else {
            return;
        };
        for target in old {
            if let Some(hosts) = self.hosts.get_mut(&target) {
                hosts.remove(host);
                if hosts.is_empty() {
                    self.hosts.remove(&target);
                }
            }
        }
    }

    /// Files that directly include `target`
    pub fn hosts_of(&self, target: &str) -> BTreeSet<String> {
        self.hosts
            .get(target)
            .map(|hosts| hosts.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every file that includes `path`, directly or through other includes.
    ///
    /// Include chains may form cycles; a visited set guarantees termination
    /// and `path` itself is never reported.
    pub fn ancestors(&self, path: &str) -> BTreeSet<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(path);
        let mut stack = vec![path];
        let mut ancestors = BTreeSet::new();

        while let Some(current) = stack.pop() {
            let Some(hosts) = self.hosts.get(current) else {
                continue;
            };
            for host in hosts {
                if visited.insert(host.as_str()) {
                    ancestors.insert(host.clone());
                    stack.push(host.as_str());
                } else if host == path {
                    tracing::warn!("Include cycle detected through {}", path);
                }
            }
        }

        ancestors
    }

    /// Number of distinct include targets
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn clear(&mut self) {
        self.hosts.clear();
        self.targets.clear();
    }
}
