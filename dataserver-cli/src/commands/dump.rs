//! Write resolved records to the dump directory.

use anyhow::{Context, Result};
use std::path::Path;

use super::{open_server, print_json};

pub fn dump_data(config_path: &Path, full: bool) -> Result<()> {
    let mut server = open_server(config_path)?;
    let record = server.dump(!full).context("Dump failed")?;
    print_json(&record)
}
