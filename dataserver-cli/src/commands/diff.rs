//! Print the pending diff.

use anyhow::Result;
use std::path::Path;

use super::{open_server, print_json};

pub fn show_diff(config_path: &Path, full: bool, reset: bool) -> Result<()> {
    let mut server = open_server(config_path)?;
    let diff = server.get_diff(!full)?;

    if reset {
        if let Some(to) = &diff.to {
            server.reset_diff(to)?;
        }
    }

    print_json(&diff)
}
