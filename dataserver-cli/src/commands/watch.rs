//! Keep the store in sync with the data directory.

use anyhow::{Context, Result};
use dataserver_core::FileEvent;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use super::open_server;

pub async fn watch_data(config_path: &Path, dump: bool) -> Result<()> {
    let mut server = open_server(config_path)?;
    let data_dir = server.config().data_dir();

    tracing::info!("Watching {:?} for changes (Ctrl+C to stop)", data_dir);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut _watcher = RecommendedWatcher::new(
        move |res| {
            let _ = tx.send(res);
        },
        notify::Config::default(),
    )
    .context("Failed to initialize watcher")?;

    _watcher
        .watch(&data_dir, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {:?}", data_dir))?;

    // Events are applied one at a time, in arrival order
    while let Some(event) = rx.recv().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!("Watcher error: {}", err);
                continue;
            }
        };

        let file_events = translate(&event);
        if file_events.is_empty() {
            continue;
        }

        for (kind, path) in file_events {
            tracing::debug!("{:?} {:?}", kind, path);
            if let Err(err) = server.on_file_event(kind, &path) {
                tracing::error!("Failed to apply {:?} for {:?}: {:#}", kind, path, err);
            }
        }

        if dump {
            match server.dump(true) {
                Ok(record) if !record.updated.is_empty() || !record.deleted.is_empty() => {
                    println!("{}", serde_json::to_string(&record)?);
                }
                Ok(_) => {}
                Err(err) => tracing::error!("Dump failed: {:#}", err),
            }
        }
    }

    Ok(())
}

/// Map a watcher event onto store operations
fn translate(event: &Event) -> Vec<(FileEvent, PathBuf)> {
    let kind = match &event.kind {
        EventKind::Create(_) => FileEvent::Added,
        EventKind::Remove(_) => FileEvent::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FileEvent::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FileEvent::Added,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            return vec![
                (FileEvent::Removed, event.paths[0].clone()),
                (FileEvent::Added, event.paths[1].clone()),
            ];
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            return event
                .paths
                .iter()
                .map(|path| {
                    let kind = if path.exists() {
                        FileEvent::Added
                    } else {
                        FileEvent::Removed
                    };
                    (kind, path.clone())
                })
                .filter(|(kind, path)| *kind == FileEvent::Removed || path.is_file())
                .collect();
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(_) => FileEvent::Changed,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        // Directories are not records
        .filter(|path| kind == FileEvent::Removed || path.is_file())
        .map(|path| (kind, path.clone()))
        .collect()
}
