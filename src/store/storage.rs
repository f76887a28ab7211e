//! JSON file storage
//!
//! A sink and loader pair backed by one JSON file per channel. Writes go to
//! a sibling temp file that is renamed over the target, so a crash mid-write
//! leaves the previous snapshot intact.

use crate::error::PersistError;
use crate::store::channel::{PersistSink, PersistedDataLoader};
use crate::tree::{Tree, Value};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File-backed persistence for one channel.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write `snapshot` as pretty JSON.
    pub fn write(&self, snapshot: &Tree) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();
        std::fs::write(&temp, bytes)?;
        std::fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), "Wrote persisted snapshot");
        Ok(())
    }

    /// Read the stored snapshot.
    ///
    /// A missing file is `None`. So is a corrupt one: it is logged and
    /// ignored, since unreadable storage must not block restoration.
    pub fn read(&self) -> Result<Option<Value>, PersistError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(self.parse(&bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn parse(&self, bytes: &[u8]) -> Option<Value> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Ignoring unreadable persisted snapshot"
                );
                None
            }
        }
    }
}

impl PersistSink for JsonFileStorage {
    fn persist(&self, snapshot: &Tree, _previous: &Tree) -> Result<(), PersistError> {
        self.write(snapshot)
    }
}

#[async_trait]
impl PersistedDataLoader for JsonFileStorage {
    async fn load(&self) -> Result<Option<Value>, PersistError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(self.parse(&bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
