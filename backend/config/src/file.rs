//! File provider that survives atomic saves.
//!
//! Editors commonly save by writing a temp file and renaming it over the
//! target, which replaces the inode a file-level watch is attached to. The
//! watcher is therefore registered on the containing directory and events
//! are filtered down to the target file name.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use conflux_core::{ConfigError, Result};

use crate::parser::{parser_for_path, Parser};
use crate::provider::{Provider, ProviderKind, WatchCallback, Watchable};

pub struct FileWatcher {
    path: PathBuf,
    dir: PathBuf,
    file_name: OsString,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileWatcher {
    /// The file does not need to exist yet; reads fail until it does.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let file_name = path
            .file_name()
            .ok_or_else(|| ConfigError::unsupported_source(format!("'{display}' is not a file path")))?
            .to_os_string();

        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| {
                    ConfigError::watch(&display, "cannot resolve working directory").with_cause(e)
                })?
                .join(path)
        };
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        Ok(Self {
            path,
            dir,
            file_name,
            watcher: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Provider for FileWatcher {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::RawBytes
    }

    async fn read(&self) -> Result<Map<String, Value>> {
        let bytes = self.read_bytes().await?;
        parser_for_path(&self.path).parse(&self.name(), &bytes)
    }

    async fn read_bytes(&self) -> Result<Vec<u8>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                debug!(path = %self.path.display(), bytes = bytes.len(), "Read config file");
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ConfigError::file_not_found(self.name()).with_cause(e))
            }
            Err(e) => Err(ConfigError::parse(self.name(), format!("cannot read file: {e}")).with_cause(e)),
        }
    }

    fn required_parser(&self) -> Option<Arc<dyn Parser>> {
        Some(parser_for_path(&self.path))
    }

    fn as_watchable(&self) -> Option<&dyn Watchable> {
        Some(self)
    }

    fn close(&self) -> Result<()> {
        self.unwatch()
    }
}

impl Watchable for FileWatcher {
    fn watch(&self, callback: WatchCallback) -> Result<()> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Ok(());
        }

        let target = self.path.clone();
        let name = self.file_name.clone();
        let source = self.name();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_change(&event, &target, &name) {
                    debug!(path = %target.display(), kind = ?event.kind, "Config file changed");
                    callback(Ok(()));
                }
            }
            Err(e) => {
                warn!(path = %target.display(), error = %e, "File watcher error");
                callback(Err(ConfigError::watch(&source, format!("watcher error: {e}")).with_cause(e)));
            }
        })
        .map_err(|e| ConfigError::watch(self.name(), format!("cannot create watcher: {e}")).with_cause(e))?;

        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                ConfigError::watch(
                    self.name(),
                    format!("cannot watch directory '{}': {e}", self.dir.display()),
                )
                .with_cause(e)
            })?;

        info!(path = %self.path.display(), dir = %self.dir.display(), "Watching config file");
        *slot = Some(watcher);
        Ok(())
    }

    fn unwatch(&self) -> Result<()> {
        if let Some(mut watcher) = self.watcher.lock().take() {
            // The directory may already be gone; dropping the watcher closes it
            // either way.
            let _ = watcher.unwatch(&self.dir);
            info!(path = %self.path.display(), "Stopped watching config file");
        }
        Ok(())
    }

    fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        let _ = self.unwatch();
    }
}

/// Editor scratch files that must never trigger a reload.
pub fn is_temp_name(candidate: &OsStr, target: &OsStr) -> bool {
    let (Some(candidate), Some(target)) = (candidate.to_str(), target.to_str()) else {
        return false;
    };
    candidate == format!(".{target}.swp")
        || candidate == format!(".{target}.tmp")
        || candidate == format!("{target}.tmp")
        || candidate == format!("{target}~")
        || candidate == format!(".#{target}")
}

fn is_write_create_or_rename(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
    )
}

fn is_create_or_rename(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)))
}

/// Whether a directory event means the target file changed.
fn is_change(event: &Event, target: &Path, name: &OsStr) -> bool {
    if !is_write_create_or_rename(&event.kind) {
        return false;
    }

    let mut others = false;
    for path in &event.paths {
        match path.file_name() {
            Some(base) if base == name => return true,
            Some(base) if is_temp_name(base, name) => {}
            _ => others = true,
        }
    }

    // Another file was created or renamed; it may have replaced the target.
    others && is_create_or_rename(&event.kind) && target.exists()
}
