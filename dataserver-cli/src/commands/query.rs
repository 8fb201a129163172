//! Run a query or task from the command line.

use anyhow::{bail, Result};
use dataserver_core::QueryArgs;
use serde_json::json;
use std::path::Path;

use super::{open_server, print_json};

pub fn run_query(
    config_path: &Path,
    id: &str,
    raw_args: &[String],
    task: bool,
    stats: bool,
) -> Result<()> {
    let args = parse_args(raw_args)?;
    let server = open_server(config_path)?;

    let response = if task {
        server.run_task(id, &args)?
    } else {
        server.run_query(id, &args)?
    };

    if stats {
        let metrics = if task {
            server.tasks().metrics()
        } else {
            server.queries().metrics()
        };
        print_json(&json!({
            "response": response,
            "cache": server.queries().cache().stats(),
            "metrics": metrics,
        }))?;
    } else {
        print_json(&response)?;
    }
    if let Some(error) = &response.error {
        bail!("{} failed: {}", id, error);
    }
    Ok(())
}

fn parse_args(raw: &[String]) -> Result<QueryArgs> {
    let mut args = QueryArgs::new();
    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Expected key=value, got {:?}", pair);
        };
        args.insert(key.to_string(), value.to_string());
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = parse_args(&["dir=en/node".into(), "expr=a=b".into()]).unwrap();
        assert_eq!(args["dir"], "en/node");
        assert_eq!(args["expr"], "a=b");

        assert!(parse_args(&["nokey".into()]).is_err());
    }
}
