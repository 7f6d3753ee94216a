use serde_json::Value;
use std::collections::HashMap;
use std::error::Error as StdError;
use thiserror::Error;

/// Errors surfaced by [`TrainerStore`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Stored value could not be (de)serialized.
    #[error("failed to encode or decode stored value: {0}")]
    Serde(#[from] serde_json::Error),
    /// Backing storage failed.
    #[error("store backend failure: {0}")]
    Backend(#[source] Box<dyn StdError + Send + Sync>),
}

/// Key/value persistence used to save and restore trainer state.
pub trait TrainerStore: Send {
    fn write(&mut self, key: &str, value: &Value) -> Result<(), StoreError>;
    fn read(&self, key: &str) -> Result<Option<Value>, StoreError>;
}

/// No-op store; writes are dropped and reads find nothing.
#[derive(Debug, Default)]
pub struct NullStore;

impl TrainerStore for NullStore {
    fn write(&mut self, _key: &str, _value: &Value) -> Result<(), StoreError> {
        Ok(())
    }

    fn read(&self, _key: &str) -> Result<Option<Value>, StoreError> {
        Ok(None)
    }
}

/// In-process store, useful for tests and short sessions.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, Value>,
    writes: usize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Number of successful writes so far.
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.writes
    }
}

impl TrainerStore for MemoryStore {
    fn write(&mut self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.clone());
        self.writes += 1;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }
}
