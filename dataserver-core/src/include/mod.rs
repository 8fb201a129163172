//! Include declarations and mounts.
//!
//! A content file declares its includes under `metadata.includes`:
//!
//! ```json
//! {
//!   "data": { "content": { "author": { "entityInclude": "en/entity/user/1.json" } } },
//!   "metadata": {
//!     "includes": {
//!       "static":  { "data.content.author.entityInclude": "en/entity/user/1.json" },
//!       "dynamic": { "data.content.latest.queryInclude": "latest-articles?limit=3" }
//!     }
//!   }
//! }
//! ```
//!
//! Each declaration key is removed from the payload and replaced by a
//! [`Mount`] on its parent object. Static mounts keep the target's path and
//! re-read the target whenever the host is resolved, so the host always sees
//! the target's current data. Dynamic mounts hold a [`LazyQuery`] that runs
//! only when the host is serialized.

pub mod lazy;
pub mod resolve;

pub use lazy::LazyQuery;
pub use resolve::Resolver;

use serde_json::Value;
use std::collections::BTreeMap;

use crate::query::QuerySpec;

/// Kind of include, derived from the declaring property's suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncludeFlavor {
    Entity,
    Config,
    Locale,
    Custom,
    Query,
}

impl IncludeFlavor {
    const ALL: [IncludeFlavor; 5] = [
        IncludeFlavor::Entity,
        IncludeFlavor::Config,
        IncludeFlavor::Locale,
        IncludeFlavor::Custom,
        IncludeFlavor::Query,
    ];

    /// Generic type name, also the mount key of an unprefixed declaration
    pub fn type_name(&self) -> &'static str {
        match self {
            IncludeFlavor::Entity => "entity",
            IncludeFlavor::Config => "config",
            IncludeFlavor::Locale => "locale",
            IncludeFlavor::Custom => "custom",
            IncludeFlavor::Query => "query",
        }
    }

    /// Suffix stripped from prefixed declarations (`authorEntityInclude`)
    fn prefixed_suffix(&self) -> &'static str {
        match self {
            IncludeFlavor::Entity => "EntityInclude",
            IncludeFlavor::Config => "ConfigInclude",
            IncludeFlavor::Locale => "LocaleInclude",
            IncludeFlavor::Custom => "CustomInclude",
            IncludeFlavor::Query => "QueryInclude",
        }
    }

    /// Pick the part of a resolved target that gets mounted.
    ///
    /// Entity, config and locale includes mount the target's main payload
    /// (`data.content`); custom includes mount the whole document.
    pub fn select(&self, target: Value) -> Value {
        match self {
            IncludeFlavor::Entity | IncludeFlavor::Config | IncludeFlavor::Locale => {
                match target.pointer("/data/content") {
                    Some(content) => content.clone(),
                    None => target,
                }
            }
            IncludeFlavor::Custom | IncludeFlavor::Query => target,
        }
    }
}

/// Derive the flavor and mount key from a declaring property name.
///
/// `entityInclude` mounts as `entity`, `authorEntityInclude` as `author`.
/// Returns `None` when the property carries no known include suffix.
pub fn mount_key(property: &str) -> Option<(IncludeFlavor, String)> {
    for flavor in IncludeFlavor::ALL {
        let type_name = flavor.type_name();
        if property.len() == type_name.len() + "Include".len()
            && property.starts_with(type_name)
            && property.ends_with("Include")
        {
            return Some((flavor, type_name.to_string()));
        }
        if let Some(prefix) = property.strip_suffix(flavor.prefixed_suffix()) {
            if !prefix.is_empty() {
                return Some((flavor, prefix.to_string()));
            }
        }
    }
    None
}

/// Include declarations as read from `metadata.includes`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeMetadata {
    /// mount path -> target path
    pub static_includes: BTreeMap<String, String>,

    /// mount path -> query spec (`queryId?args`)
    pub dynamic_includes: BTreeMap<String, String>,
}

impl IncludeMetadata {
    pub fn from_value(value: &Value) -> Self {
        Self {
            static_includes: string_map(value.pointer("/metadata/includes/static")),
            dynamic_includes: string_map(value.pointer("/metadata/includes/dynamic")),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.static_includes.is_empty() && self.dynamic_includes.is_empty()
    }

    /// Distinct static include targets
    pub fn static_targets(&self) -> impl Iterator<Item = &str> {
        let mut targets: Vec<&str> = self.static_includes.values().map(String::as_str).collect();
        targets.sort_unstable();
        targets.dedup();
        targets.into_iter()
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    let Some(Value::Object(map)) = value else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
        .collect()
}

/// What a mount resolves to
#[derive(Debug)]
pub enum MountSource {
    /// Live reference to another record, by path
    Static {
        target: String,
        flavor: IncludeFlavor,
    },

    /// Query evaluated on first read
    Dynamic(LazyQuery),
}

/// A value grafted onto a record's payload at resolution time
#[derive(Debug)]
pub struct Mount {
    /// Segments leading from the payload root to the parent object
    pub parent: Vec<String>,

    /// Key inserted on the parent object
    pub key: String,

    pub source: MountSource,
}

impl Mount {
    pub fn is_dynamic(&self) -> bool {
        matches!(self.source, MountSource::Dynamic(_))
    }
}

/// Strip declaration keys from `data` and turn them into mounts.
///
/// Declarations whose parent object does not exist are skipped with a
/// warning; the rest of the record still loads.
pub fn mount_declarations(path: &str, data: &mut Value, includes: &IncludeMetadata) -> Vec<Mount> {
    let mut mounts = Vec::new();

    for (mount_path, target) in &includes.static_includes {
        let Some((parent, property)) = split_mount_path(mount_path) else {
            tracing::warn!("{}: empty static include path", path);
            continue;
        };
        if !remove_declaration(data, &parent, &property) {
            tracing::warn!("{}: no object at static include path {}", path, mount_path);
            continue;
        }
        let (flavor, key) = mount_key(&property).unwrap_or_else(|| {
            tracing::warn!("{}: unknown include type in {}", path, mount_path);
            (IncludeFlavor::Custom, property.clone())
        });
        mounts.push(Mount {
            parent,
            key,
            source: MountSource::Static {
                target: target.clone(),
                flavor,
            },
        });
    }

    for (mount_path, spec) in &includes.dynamic_includes {
        let Some((parent, property)) = split_mount_path(mount_path) else {
            tracing::warn!("{}: empty dynamic include path", path);
            continue;
        };
        if !remove_declaration(data, &parent, &property) {
            tracing::warn!("{}: no object at dynamic include path {}", path, mount_path);
            continue;
        }
        let key = match mount_key(&property) {
            Some((IncludeFlavor::Query, key)) => key,
            _ => property.clone(),
        };
        mounts.push(Mount {
            parent,
            key,
            source: MountSource::Dynamic(LazyQuery::new(QuerySpec::parse(spec))),
        });
    }

    mounts
}

fn split_mount_path(mount_path: &str) -> Option<(Vec<String>, String)> {
    let mut segments: Vec<String> = mount_path
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let property = segments.pop()?;
    Some((segments, property))
}

/// Remove `property` from the object at `parent`; true when the parent exists
fn remove_declaration(data: &mut Value, parent: &[String], property: &str) -> bool {
    match navigate_mut(data, parent) {
        Some(Value::Object(map)) => {
            map.remove(property);
            true
        }
        _ => false,
    }
}

/// Walk object keys and array indices down from `root`
pub(crate) fn navigate_mut<'a>(root: &'a mut Value, segments: &[String]) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mount_key_generic_names() {
        assert_eq!(
            mount_key("entityInclude"),
            Some((IncludeFlavor::Entity, "entity".into()))
        );
        assert_eq!(
            mount_key("configInclude"),
            Some((IncludeFlavor::Config, "config".into()))
        );
        assert_eq!(
            mount_key("queryInclude"),
            Some((IncludeFlavor::Query, "query".into()))
        );
    }

    #[test]
    fn test_mount_key_prefixed_names() {
        assert_eq!(
            mount_key("authorEntityInclude"),
            Some((IncludeFlavor::Entity, "author".into()))
        );
        assert_eq!(
            mount_key("siteConfigInclude"),
            Some((IncludeFlavor::Config, "site".into()))
        );
        assert_eq!(
            mount_key("menuCustomInclude"),
            Some((IncludeFlavor::Custom, "menu".into()))
        );
        assert_eq!(
            mount_key("latestQueryInclude"),
            Some((IncludeFlavor::Query, "latest".into()))
        );
    }

    #[test]
    fn test_mount_key_unknown() {
        assert_eq!(mount_key("author"), None);
        assert_eq!(mount_key("EntityInclude"), None);
        assert_eq!(mount_key("fooInclude"), None);
    }

    #[test]
    fn test_flavor_select() {
        let target = json!({"data": {"content": {"title": "T"}}, "metadata": {}});
        assert_eq!(IncludeFlavor::Entity.select(target.clone()), json!({"title": "T"}));
        assert_eq!(IncludeFlavor::Custom.select(target.clone()), target);
        assert_eq!(IncludeFlavor::Locale.select(json!("raw")), json!("raw"));
    }

    #[test]
    fn test_mount_declarations_strip_keys() {
        let mut data = json!({
            "data": {"content": {
                "title": "Host",
                "author": {"entityInclude": "en/user/1.json"},
                "items": [{"mediaEntityInclude": "en/media/2.json"}],
                "latest": {"queryInclude": "latest?limit=3"}
            }},
            "metadata": {"includes": {
                "static": {
                    "data.content.author.entityInclude": "en/user/1.json",
                    "data.content.items.0.mediaEntityInclude": "en/media/2.json"
                },
                "dynamic": {"data.content.latest.queryInclude": "latest?limit=3"}
            }}
        });
        let includes = IncludeMetadata::from_value(&data);
        let mounts = mount_declarations("en/host.json", &mut data, &includes);

        assert_eq!(mounts.len(), 3);
        assert_eq!(data.pointer("/data/content/author"), Some(&json!({})));
        assert_eq!(data.pointer("/data/content/items/0"), Some(&json!({})));
        assert_eq!(data.pointer("/data/content/latest"), Some(&json!({})));

        let media = mounts.iter().find(|m| m.key == "media").unwrap();
        assert_eq!(media.parent, vec!["data", "content", "items", "0"]);
        assert!(mounts.iter().any(|m| m.key == "query" && m.is_dynamic()));
    }

    #[test]
    fn test_missing_parent_is_skipped() {
        let mut data = json!({"data": {}});
        let mut includes = IncludeMetadata::default();
        includes
            .static_includes
            .insert("data.nowhere.entityInclude".into(), "en/x.json".into());

        assert!(mount_declarations("en/host.json", &mut data, &includes).is_empty());
    }

    #[test]
    fn test_static_targets_deduplicated() {
        let mut includes = IncludeMetadata::default();
        includes.static_includes.insert("a.entityInclude".into(), "en/x.json".into());
        includes.static_includes.insert("b.entityInclude".into(), "en/x.json".into());
        assert_eq!(includes.static_targets().count(), 1);
    }
}
