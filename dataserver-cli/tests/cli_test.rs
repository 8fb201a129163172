use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_site(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(root.join("data/en/node"))?;
    fs::write(
        root.join("dataserver.yml"),
        r#"
paths:
  data: "data"
  dump: "dump"
  work: "work"
changelog:
  file: "changes.log"
"#,
    )?;

    fs::write(
        root.join("data/en/node/1.json"),
        r#"{"data": {"content": {"title": "Ada", "url": {"path": "/ada"}, "uuid": "u-1"}}}"#,
    )?;
    fs::write(
        root.join("data/en/home.json"),
        r#"{
  "data": {"content": {
    "featured": {"entityInclude": "en/node/1.json"},
    "nodes": {"queryInclude": "list?dir=en/node"}
  }},
  "metadata": {"includes": {
    "static": {"data.content.featured.entityInclude": "en/node/1.json"},
    "dynamic": {"data.content.nodes.queryInclude": "list?dir=en/node"}
  }}
}"#,
    )?;
    fs::write(
        root.join("changes.log"),
        "2021-08-02_10-00-00.000000__0001 write [ID: 1] Ada | public://en/node/1.json\n\
         2021-08-03_10-00-00.000000__0001 delete [ID: 2] Gone | public://en/node/2.json\n",
    )?;
    Ok(())
}

#[allow(deprecated)]
fn dataserver(root: &Path) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("dataserver")?;
    cmd.current_dir(root);
    Ok(cmd)
}

#[test]
fn get_prints_resolved_record() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_site(dir.path())?;

    let output = dataserver(dir.path())?
        .args(["get", "en/home.json"])
        .output()?;
    assert!(output.status.success());

    let value: Value = serde_json::from_slice(&output.stdout)?;
    let content = &value["data"]["content"];
    assert_eq!(content["featured"]["entity"]["title"], "Ada");
    assert_eq!(content["nodes"]["query"][0]["path"], "en/node/1.json");
    Ok(())
}

#[test]
fn get_by_url() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_site(dir.path())?;

    dataserver(dir.path())?
        .args(["get", "--url", "/ada"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"uuid\": \"u-1\""));

    dataserver(dir.path())?
        .args(["get", "--url", "/nobody"])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn query_runs_builtin_handlers() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_site(dir.path())?;

    let output = dataserver(dir.path())?
        .args(["query", "uuid", "locale=en", "uuid=u-1"])
        .output()?;
    assert!(output.status.success());

    let response: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(response["data"]["path"], "en/node/1.json");
    assert_eq!(response["meta"]["cache"], "miss");

    dataserver(dir.path())?
        .args(["query", "nope"])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn query_stats_reports_cache_and_metrics() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_site(dir.path())?;

    let output = dataserver(dir.path())?
        .args(["query", "--stats", "url", "path=/ada"])
        .output()?;
    assert!(output.status.success());

    let value: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(value["response"]["data"]["uuid"], "u-1");
    assert_eq!(value["cache"]["misses"], 1);
    assert_eq!(value["cache"]["entries"], 1);
    assert_eq!(value["metrics"][0]["query_id"], "url");
    assert_eq!(value["metrics"][0]["executions"], 1);
    Ok(())
}

#[test]
fn changes_lists_log_entries_since_checkpoint() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_site(dir.path())?;

    let output = dataserver(dir.path())?
        .args(["changes", "--since", "2021-08-03"])
        .output()?;
    assert!(output.status.success());

    let changes: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(changes["updated"], serde_json::json!([]));
    assert_eq!(changes["deleted"], serde_json::json!(["en/node/2.json"]));
    Ok(())
}

#[test]
fn dump_writes_then_skips_unchanged_files() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    write_site(dir.path())?;

    let output = dataserver(dir.path())?.args(["dump"]).output()?;
    assert!(output.status.success());
    let first: Value = serde_json::from_slice(&output.stdout)?;
    assert!(first["updated"]["en/home.json"].is_object());
    assert!(dir.path().join("dump/data/en/node/1.json").is_file());
    assert!(dir.path().join("dump/metadata.json").is_file());

    let output = dataserver(dir.path())?.args(["dump"]).output()?;
    assert!(output.status.success());
    let second: Value = serde_json::from_slice(&output.stdout)?;
    assert!(second["since"].is_string());
    assert_eq!(second["updated"], serde_json::json!({}));
    Ok(())
}

#[test]
fn missing_config_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;

    dataserver(dir.path())?
        .arg("load")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
    Ok(())
}
