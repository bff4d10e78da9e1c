use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};
use treesync_core::{PersistedViewState, SyncError, ViewStateStore};

/// JSON-file view-state store.
///
/// One file per view:
/// ```text
/// {base_dir}/
///   {view}.json
/// ```
#[derive(Debug, Clone)]
pub struct FileViewStateStore {
    base_dir: PathBuf,
}

impl FileViewStateStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn view_path(&self, view: &str) -> Result<PathBuf, SyncError> {
        let valid = !view.is_empty()
            && view
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SyncError::InvalidArgument(format!(
                "view name {:?} is not usable as a file name",
                view
            )));
        }
        Ok(self.base_dir.join(format!("{}.json", view)))
    }
}

impl ViewStateStore for FileViewStateStore {
    #[instrument(skip(self), level = "debug")]
    fn load(&self, view: &str) -> Result<Option<PersistedViewState>, SyncError> {
        let path = self.view_path(view)?;
        match fs::read_to_string(&path) {
            Ok(json) => {
                let state: PersistedViewState = serde_json::from_str(&json).map_err(|e| {
                    SyncError::Serialization(format!(
                        "Failed to parse view state {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                debug!(
                    "Loaded view state for {} ({} selected)",
                    view,
                    state.selected_ids.len()
                );
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::Io(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    #[instrument(skip(self, state), level = "debug")]
    fn save(&self, view: &str, state: &PersistedViewState) -> Result<(), SyncError> {
        let path = self.view_path(view)?;
        fs::create_dir_all(&self.base_dir)?;

        let json = serde_json::to_string_pretty(state).map_err(|e| {
            SyncError::Serialization(format!("Failed to serialize view state: {}", e))
        })?;

        // Write atomically
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &json)
            .map_err(|e| SyncError::Io(format!("Failed to write {}: {}", temp_path.display(), e)))?;
        fs::rename(&temp_path, &path)
            .map_err(|e| SyncError::Io(format!("Failed to rename to {}: {}", path.display(), e)))?;

        debug!("Saved view state for {}", view);
        Ok(())
    }
}
