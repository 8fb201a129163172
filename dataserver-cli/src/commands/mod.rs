//! CLI command implementations.

pub mod changes;
pub mod diff;
pub mod dump;
pub mod get;
pub mod load;
pub mod query;
pub mod watch;

pub use changes::list_changes;
pub use diff::show_diff;
pub use dump::dump_data;
pub use get::get_record;
pub use load::load_data;
pub use query::run_query;
pub use watch::watch_data;

use anyhow::{Context, Result};
use dataserver_core::{Config, DataServer};
use std::path::Path;

/// Build a server from the config file with the built-in queries and load it
pub(crate) fn open_server(config_path: &Path) -> Result<DataServer> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    let mut server = DataServer::builder(config)
        .queries(crate::queries::builtin())
        .build()
        .context("Failed to start data server")?;
    server.load().context("Failed to load data directory")?;
    Ok(server)
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
