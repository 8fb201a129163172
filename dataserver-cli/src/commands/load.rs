//! Load the data directory once and summarize it.

use anyhow::Result;
use serde_json::json;
use std::path::Path;

use super::{open_server, print_json};

pub fn load_data(config_path: &Path) -> Result<()> {
    let server = open_server(config_path)?;
    let store = server.store();

    let dynamic = store.paths_with_dynamic_includes();
    print_json(&json!({
        "records": store.len(),
        "dynamic": dynamic.len(),
        "checkpoint": store.checkpoint(),
        "dump_checkpoint": server.tracker().dump_checkpoint(),
    }))
}
