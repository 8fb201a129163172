//! Print a resolved record.

use anyhow::{bail, Result};
use dataserver_core::Content;
use std::path::Path;

use super::{open_server, print_json};

pub fn get_record(config_path: &Path, key: &str, by_url: bool) -> Result<()> {
    let server = open_server(config_path)?;

    let record = if by_url {
        server.store().by_url(key)
    } else {
        server.store().get(key.trim_start_matches('/'))
    };
    let Some(record) = record else {
        bail!("No record found for {:?}", key);
    };

    match record.content() {
        Content::Json(_) => print_json(&server.resolver().resolve_record(record)),
        Content::Raw(bytes) => {
            print!("{}", String::from_utf8_lossy(bytes));
            Ok(())
        }
        Content::Missing => bail!("{:?} could not be read", record.path()),
    }
}
