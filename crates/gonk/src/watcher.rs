//! Module File Watcher
//!
//! Watches the modules directory so edited scripts can be reloaded and
//! deleted ones unloaded.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::loader::module_name;

/// A module script changed on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleChange {
    /// Created or modified, reload from this path
    Changed(PathBuf),
    /// Deleted, unload the module with this name
    Removed(String),
}

/// Watches a modules directory
pub struct ModuleWatcher {
    rx: mpsc::Receiver<ModuleChange>,
    /// Kept alive for as long as changes are wanted
    _watcher: RecommendedWatcher,
}

impl ModuleWatcher {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, notify::Error> {
        let dir = dir
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| dir.as_ref().to_path_buf());
        let (tx, rx) = mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    for change in event_to_changes(&event) {
                        let _ = tx.blocking_send(change);
                    }
                }
                Err(e) => {
                    error!("Module watcher error: {}", e);
                }
            }
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("Watching modules directory: {}", dir.display());

        Ok(Self {
            rx,
            _watcher: watcher,
        })
    }

    /// Next change, `None` once the watcher has stopped
    pub async fn next(&mut self) -> Option<ModuleChange> {
        self.rx.recv().await
    }
}

/// Convert a notify event into module changes
fn event_to_changes(event: &Event) -> Vec<ModuleChange> {
    let removed = match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => false,
        EventKind::Remove(_) => true,
        _ => {
            debug!("Ignoring event kind: {:?}", event.kind);
            return Vec::new();
        }
    };

    event
        .paths
        .iter()
        .filter_map(|path| {
            let name = module_name(path)?;
            // Renames report both paths; the old one no longer exists
            if removed || !path.exists() {
                Some(ModuleChange::Removed(name))
            } else {
                Some(ModuleChange::Changed(path.clone()))
            }
        })
        .collect()
}
