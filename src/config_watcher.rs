//! Configuration hot reload
//!
//! Watches the directory holding the config file, since editors usually
//! replace the file instead of writing it in place, and publishes every
//! reloaded configuration that differs from the previous one.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use notify::event::EventKind;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::Config;

/// Keeps the underlying watcher alive; dropping it stops the reloads
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Watch `path` and send each changed configuration on `tx`
    pub fn start(path: &Path, tx: UnboundedSender<Config>) -> Result<Self, WatchError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .ok_or_else(|| WatchError::NoParent(path.to_path_buf()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| WatchError::NoParent(path.to_path_buf()))?;

        let config_path = path.to_path_buf();
        let mut last = Config::load(&config_path).ok();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !is_config_event(&event, &file_name) {
                    return;
                }
                if let Some(config) = reload_if_changed(&config_path, &mut last) {
                    if tx.send(config).is_err() {
                        tracing::debug!("Config receiver dropped, ignoring reload");
                    }
                }
            }
            Err(e) => tracing::warn!("Config watch error: {}", e),
        })?;
        watcher.watch(parent, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Watching configuration");
        Ok(Self { _watcher: watcher })
    }
}

fn is_config_event(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name.as_os_str()))
}

/// Load the file and return it only when it differs from `last`
///
/// A file that fails to load or validate keeps the previous configuration.
fn reload_if_changed(path: &Path, last: &mut Option<Config>) -> Option<Config> {
    let config = match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Ignoring invalid config: {}", e);
            return None;
        }
    };
    if last.as_ref() == Some(&config) {
        return None;
    }
    tracing::info!(path = %path.display(), "Configuration reloaded");
    *last = Some(config.clone());
    Some(config)
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum WatchError {
    /// The path has no directory that could be watched
    NoParent(PathBuf),
    Notify(notify::Error),
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::NoParent(path) => write!(f, "Cannot watch {}: no parent directory", path.display()),
            WatchError::Notify(e) => write!(f, "Watch error: {}", e),
        }
    }
}

impl std::error::Error for WatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatchError::Notify(e) => Some(e),
            WatchError::NoParent(_) => None,
        }
    }
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::Notify(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use tempfile::TempDir;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_only_config_file_changes_are_relevant() {
        let name = OsString::from("config.json");
        assert!(is_config_event(
            &event(EventKind::Modify(ModifyKind::Any), "/tmp/vibrationd/config.json"),
            &name
        ));
        assert!(is_config_event(
            &event(EventKind::Create(CreateKind::File), "/tmp/vibrationd/config.json"),
            &name
        ));
        assert!(!is_config_event(
            &event(EventKind::Remove(RemoveKind::File), "/tmp/vibrationd/config.json"),
            &name
        ));
        assert!(!is_config_event(
            &event(EventKind::Modify(ModifyKind::Any), "/tmp/vibrationd/other.json"),
            &name
        ));
    }

    #[test]
    fn test_reload_only_when_changed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config {
            config_path: Some(path.clone()),
            ..Config::default()
        };
        config.save().unwrap();

        let mut last = None;
        assert!(reload_if_changed(&path, &mut last).is_some());
        assert!(reload_if_changed(&path, &mut last).is_none());

        config.vibration.ramp_down_duration_ms = 40;
        config.save().unwrap();
        let reloaded = reload_if_changed(&path, &mut last).unwrap();
        assert_eq!(reloaded.vibration.ramp_down_duration_ms, 40);
    }

    #[test]
    fn test_invalid_file_keeps_previous() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();
        let mut last = None;
        reload_if_changed(&path, &mut last);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(reload_if_changed(&path, &mut last).is_none());
        assert!(last.is_some());
    }

    #[test]
    fn test_path_without_parent_rejected() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let result = ConfigWatcher::start(Path::new("config.json"), tx);
        assert!(matches!(result, Err(WatchError::NoParent(_))));
    }
}
