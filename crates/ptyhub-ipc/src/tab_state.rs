//! Persisted layout of the shared surface.
//!
//! Only titles and the active flag survive a reload. Processes do not: a
//! restored tab is a fresh shell under its old title.

use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabDescriptor {
    pub id: String,
    pub title: String,
    pub active: bool,
}

#[derive(Error, Debug)]
pub enum TabStateError {
    #[error("Tab state error during {operation}: {reason}")]
    Io {
        operation: &'static str,
        reason: String,
    },
}

impl TabStateError {
    fn io(operation: &'static str, path: &Path, err: impl std::fmt::Display) -> Self {
        TabStateError::Io {
            operation,
            reason: format!("'{}': {}", path.display(), err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TabStateStore {
    path: PathBuf,
}

impl TabStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved tabs. A missing or corrupt file yields an empty list.
    pub fn load(&self) -> Vec<TabDescriptor> {
        if !self.path.exists() {
            return Vec::new();
        }

        match File::open(&self.path) {
            Ok(file) => match serde_json::from_reader(BufReader::new(file)) {
                Ok(tabs) => tabs,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Tab state file corrupted, starting with no saved tabs"
                    );
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to open tab state file");
                Vec::new()
            }
        }
    }

    /// Write atomically: temp file, then rename over the old state.
    pub fn save(&self, tabs: &[TabDescriptor]) -> Result<(), TabStateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| TabStateError::io("create_dir", parent, e))?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let file =
            File::create(&temp_path).map_err(|e| TabStateError::io("create_temp", &temp_path, e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), tabs)
            .map_err(|e| TabStateError::io("write_json", &temp_path, e))?;
        fs::rename(&temp_path, &self.path)
            .map_err(|e| TabStateError::io("rename", &self.path, e))?;
        Ok(())
    }
}
