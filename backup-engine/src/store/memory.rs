//! In-process job store, used by tests and by embedders without a database.

use super::JobStore;
use crate::{EngineError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<String, (Value, bool)>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durability flag the record was last written with
    pub fn is_durable(&self, key: &str) -> Option<bool> {
        self.records.read().ok()?.get(key).map(|(_, durable)| *durable)
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> EngineError {
    EngineError::Store("memory store lock poisoned".into())
}

impl JobStore for MemoryJobStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(key).map(|(value, _)| value.clone()))
    }

    fn put(&self, key: &str, value: &Value, durable: bool) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(key.to_string(), (value.clone(), durable));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(key).is_some())
    }
}
