//! Harvest state stores.
//!
//! A store keeps resumption markers, such as the newest photo harvested for a
//! user, under a `(namespace, key)` pair. Namespaces keep different resource
//! types from clashing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use engine_logging::engine_debug;
use thiserror::Error;

use crate::persist::{read_if_exists, AtomicFileWriter, PersistError};

pub const STATE_FILENAME: &str = "state.json";

type State = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to parse state from {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("failed to serialize state: {0}")]
    Serialize(String),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
}

pub trait CheckpointStore {
    fn get_state(&self, namespace: &str, key: &str) -> Result<Option<String>, CheckpointError>;

    /// `None` clears the value.
    fn set_state(
        &mut self,
        namespace: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), CheckpointError>;

    /// Flushes the store. Behaviour after close is unspecified.
    fn close(&mut self) -> Result<(), CheckpointError> {
        Ok(())
    }
}

/// Store backed by a map and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryCheckpointStore {
    state: State,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get_state(&self, namespace: &str, key: &str) -> Result<Option<String>, CheckpointError> {
        Ok(self
            .state
            .get(namespace)
            .and_then(|values| values.get(key))
            .cloned())
    }

    fn set_state(
        &mut self,
        namespace: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), CheckpointError> {
        engine_debug!("Setting state for {} with key {} to {:?}", namespace, key, value);
        match value {
            Some(value) => {
                self.state
                    .entry(namespace.to_string())
                    .or_default()
                    .insert(key.to_string(), value.to_string());
            }
            None => {
                if let Some(values) = self.state.get_mut(namespace) {
                    values.remove(key);
                    if values.is_empty() {
                        self.state.remove(namespace);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Store kept as JSON in `<dir>/state.json`, loaded on open and written
/// atomically on close.
#[derive(Debug)]
pub struct JsonCheckpointStore {
    dir: PathBuf,
    inner: MemoryCheckpointStore,
    persist_on_close: bool,
}

impl JsonCheckpointStore {
    pub fn open(dir: &Path) -> Result<Self, CheckpointError> {
        let path = dir.join(STATE_FILENAME);
        let state = match read_if_exists(&path)? {
            Some(text) => {
                engine_debug!("Loading state from {:?}", path);
                serde_json::from_str(&text).map_err(|err| CheckpointError::Parse {
                    path: path.clone(),
                    message: err.to_string(),
                })?
            }
            None => State::new(),
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            inner: MemoryCheckpointStore { state },
            persist_on_close: true,
        })
    }

    /// Keeps changes in memory only; the file on disk is left as loaded.
    pub fn read_only(mut self) -> Self {
        self.persist_on_close = false;
        self
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILENAME)
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn get_state(&self, namespace: &str, key: &str) -> Result<Option<String>, CheckpointError> {
        self.inner.get_state(namespace, key)
    }

    fn set_state(
        &mut self,
        namespace: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), CheckpointError> {
        self.inner.set_state(namespace, key, value)
    }

    fn close(&mut self) -> Result<(), CheckpointError> {
        if !self.persist_on_close {
            return Ok(());
        }
        let json = serde_json::to_string(&self.inner.state)
            .map_err(|err| CheckpointError::Serialize(err.to_string()))?;
        engine_debug!("Storing harvest state to {:?}", self.path());
        AtomicFileWriter::new(self.dir.clone()).write(STATE_FILENAME, json)?;
        Ok(())
    }
}

/// Store that remembers nothing; every harvest starts from scratch.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCheckpointStore;

impl CheckpointStore for NullCheckpointStore {
    fn get_state(&self, _namespace: &str, _key: &str) -> Result<Option<String>, CheckpointError> {
        Ok(None)
    }

    fn set_state(
        &mut self,
        _namespace: &str,
        _key: &str,
        _value: Option<&str>,
    ) -> Result<(), CheckpointError> {
        Ok(())
    }
}
