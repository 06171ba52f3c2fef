//! Durable checkpoint file.
//!
//! The checkpoint is a single JSON document replaced atomically on every
//! persist: the new content goes to a hidden temp sibling, is synced, and is
//! renamed over the old file. A crash at any point leaves either the previous
//! checkpoint or the new one on disk, never a torn mix.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use enricher_shared::{CHECKPOINT_SCHEMA_VERSION, CheckpointState, EnricherError, Result};

/// Load/persist/discard access to the checkpoint artifact.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    /// Highest index loaded or persisted through this store.
    high_water: Option<u64>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            high_water: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoint".into());
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    /// Read the persisted checkpoint. `None` means a fresh run.
    ///
    /// An unreadable or inconsistent file is an error, never a state.
    pub fn load(&mut self) -> Result<Option<CheckpointState>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no checkpoint found");
                return Ok(None);
            }
            Err(e) => return Err(EnricherError::io(&self.path, e)),
        };

        let state: CheckpointState = serde_json::from_str(&content).map_err(|e| {
            EnricherError::Checkpoint(format!("corrupt checkpoint {}: {e}", self.path.display()))
        })?;

        if state.schema_version != CHECKPOINT_SCHEMA_VERSION {
            return Err(EnricherError::Checkpoint(format!(
                "unsupported checkpoint schema_version {} (expected {CHECKPOINT_SCHEMA_VERSION})",
                state.schema_version
            )));
        }
        if !state.counters.is_consistent()
            || state.last_processed_index.is_none() != (state.counters.processed == 0)
        {
            return Err(EnricherError::Checkpoint(format!(
                "inconsistent counters in {}",
                self.path.display()
            )));
        }

        self.high_water = state.last_processed_index;
        info!(
            path = %self.path.display(),
            processed = state.counters.processed,
            last_index = ?state.last_processed_index,
            "checkpoint loaded"
        );
        Ok(Some(state))
    }

    /// Atomically replace the checkpoint with `state`.
    ///
    /// Refuses a state whose index is behind one this store already saw.
    pub fn persist(&mut self, state: &CheckpointState) -> Result<()> {
        if state.last_processed_index < self.high_water {
            return Err(EnricherError::validation(format!(
                "checkpoint would move backwards: {:?} < {:?}",
                state.last_processed_index, self.high_water
            )));
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| EnricherError::Storage(format!("serialize checkpoint: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EnricherError::io(parent, e))?;
        }

        // Write to temp file first
        let temp = self.temp_path();
        {
            let mut file = File::create(&temp).map_err(|e| EnricherError::io(&temp, e))?;
            file.write_all(json.as_bytes())
                .and_then(|()| file.write_all(b"\n"))
                .and_then(|()| file.sync_all())
                .map_err(|e| EnricherError::io(&temp, e))?;
        }

        // Atomic rename
        std::fs::rename(&temp, &self.path).map_err(|e| EnricherError::io(&self.path, e))?;
        sync_parent_dir(&self.path);

        self.high_water = state.last_processed_index;
        debug!(
            path = %self.path.display(),
            last_index = ?state.last_processed_index,
            processed = state.counters.processed,
            "checkpoint persisted"
        );
        Ok(())
    }

    /// Remove the checkpoint (explicit restart).
    pub fn discard(&mut self) -> Result<()> {
        for path in [self.path.clone(), self.temp_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => info!(path = %path.display(), "checkpoint discarded"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(EnricherError::io(&path, e)),
            }
        }
        self.high_water = None;
        Ok(())
    }
}

/// Make the rename itself durable. Not supported everywhere, hence best effort.
fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
            warn!(dir = %parent.display(), error = %e, "directory sync failed");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
