//! Path filters for store subsets.

/// Selects records by directory, variant and extension.
///
/// Variants are alternate renderings stored next to the base file with a
/// `--<variant>` suffix before the extension (`menu--footer.json`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubsetFilter {
    dir: String,
    variant: Option<String>,
    extension: String,
    recursive: bool,
}

impl SubsetFilter {
    /// Every base `.json` record directly inside `dir`
    pub fn new(dir: &str) -> Self {
        Self {
            dir: dir.trim_matches('/').to_string(),
            variant: None,
            extension: "json".to_string(),
            recursive: false,
        }
    }

    pub fn variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn matches(&self, path: &str) -> bool {
        let rest = if self.dir.is_empty() {
            path
        } else {
            match path
                .strip_prefix(self.dir.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                Some(rest) => rest,
                None => return false,
            }
        };

        if !self.recursive && rest.contains('/') {
            return false;
        }

        let name = rest.rsplit('/').next().unwrap_or(rest);
        let Some(stem) = name
            .strip_suffix(self.extension.as_str())
            .and_then(|stem| stem.strip_suffix('.'))
        else {
            return false;
        };

        match &self.variant {
            Some(variant) => stem
                .rsplit_once("--")
                .is_some_and(|(base, v)| !base.is_empty() && v == variant),
            None => !stem.contains("--"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_children_only() {
        let filter = SubsetFilter::new("en/entity/node");
        assert!(filter.matches("en/entity/node/1.json"));
        assert!(!filter.matches("en/entity/node/article/1.json"));
        assert!(!filter.matches("en/entity/nodes/1.json"));
        assert!(!filter.matches("en/entity/node/1.txt"));
    }

    #[test]
    fn test_recursive() {
        let filter = SubsetFilter::new("/en/entity/").recursive(true);
        assert!(filter.matches("en/entity/node/article/1.json"));
        assert!(!filter.matches("es/entity/node/article/1.json"));
    }

    #[test]
    fn test_variants() {
        let base = SubsetFilter::new("en/menu");
        assert!(base.matches("en/menu/main.json"));
        assert!(!base.matches("en/menu/main--footer.json"));

        let footer = SubsetFilter::new("en/menu").variant("footer");
        assert!(footer.matches("en/menu/main--footer.json"));
        assert!(!footer.matches("en/menu/main.json"));
        assert!(!footer.matches("en/menu/main--header.json"));
    }

    #[test]
    fn test_extension_and_root() {
        let filter = SubsetFilter::new("").extension(".xml").recursive(true);
        assert!(filter.matches("sitemap.xml"));
        assert!(filter.matches("en/sitemap.xml"));
        assert!(!filter.matches("en/page.json"));
    }
}
