//! Secondary indices over the store.

use std::collections::HashMap;

use super::ContentRecord;

/// URL, UUID and custom lookups, all resolving to record paths
#[derive(Debug, Default)]
pub struct Indices {
    /// public URL -> path
    url: HashMap<String, String>,

    /// locale -> uuid -> path
    uuid: HashMap<String, HashMap<String, String>>,

    /// index name -> key -> path
    custom: HashMap<String, HashMap<String, String>>,
}

impl Indices {
    pub fn insert(&mut self, record: &ContentRecord) {
        if let Some(url) = record.public_url() {
            if let Some(previous) = self.url.insert(url.to_string(), record.path().to_string()) {
                if previous != record.path() {
                    tracing::warn!(
                        "URL {} moved from {} to {}",
                        url,
                        previous,
                        record.path()
                    );
                }
            }
        }
        if let (Some(locale), Some(uuid)) = (record.locale(), record.uuid()) {
            self.uuid
                .entry(locale.to_string())
                .or_default()
                .insert(uuid.to_string(), record.path().to_string());
        }
    }

    /// Drop every entry that points at `record`'s path
    pub fn purge(&mut self, record: &ContentRecord) {
        let path = record.path();
        if let Some(url) = record.public_url() {
            if self.url.get(url).is_some_and(|p| p == path) {
                self.url.remove(url);
            }
        }
        if let (Some(locale), Some(uuid)) = (record.locale(), record.uuid()) {
            if let Some(by_uuid) = self.uuid.get_mut(locale) {
                if by_uuid.get(uuid).is_some_and(|p| p == path) {
                    by_uuid.remove(uuid);
                }
                if by_uuid.is_empty() {
                    self.uuid.remove(locale);
                }
            }
        }
        for entries in self.custom.values_mut() {
            entries.retain(|_, p| p != path);
        }
        self.custom.retain(|_, entries| !entries.is_empty());
    }

    pub fn by_url(&self, url: &str) -> Option<&str> {
        self.url.get(url).map(String::as_str)
    }

    pub fn by_uuid(&self, locale: &str, uuid: &str) -> Option<&str> {
        self.uuid.get(locale)?.get(uuid).map(String::as_str)
    }

    pub fn set_custom(&mut self, name: &str, key: &str, path: &str) {
        self.custom
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), path.to_string());
    }

    pub fn custom(&self, name: &str, key: &str) -> Option<&str> {
        self.custom.get(name)?.get(key).map(String::as_str)
    }

    /// Whether any index still references `path`
    pub fn references(&self, path: &str) -> bool {
        self.url.values().any(|p| p == path)
            || self.uuid.values().flat_map(HashMap::values).any(|p| p == path)
            || self.custom.values().flat_map(HashMap::values).any(|p| p == path)
    }

    pub fn clear(&mut self) {
        self.url.clear();
        self.uuid.clear();
        self.custom.clear();
    }
}
