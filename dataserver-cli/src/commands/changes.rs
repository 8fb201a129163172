//! Summarize the change log over a checkpoint range.

use anyhow::{anyhow, Context, Result};
use dataserver_core::{ChangeLog, Config, UniqueId};
use std::path::Path;

use super::print_json;

pub fn list_changes(config_path: &Path, since: Option<&str>, until: Option<&str>) -> Result<()> {
    let config = Config::from_file(config_path).context("Failed to load configuration")?;
    let file = config
        .changelog_file()
        .ok_or_else(|| anyhow!("No change log configured in {:?}", config_path))?;
    let changelog = ChangeLog::new(file)
        .with_uri_prefix(config.changelog.as_ref().and_then(|c| c.uri_prefix.clone()));

    let since = since.map(parse_bound).transpose()?;
    let until = until.map(parse_bound).transpose()?;

    let changes = changelog
        .get_changed_files_since(since.as_ref(), until.as_ref())
        .context("Failed to read change log")?;
    print_json(&changes)
}

fn parse_bound(input: &str) -> Result<UniqueId> {
    UniqueId::parse_checkpoint(input).with_context(|| format!("Invalid checkpoint {:?}", input))
}
