use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{DurableStore, Result, StoreError, Versioned, Write, WriteBatch};

#[derive(Debug, Default)]
struct MemoryState {
    kv: HashMap<String, Versioned>,
    lists: HashMap<String, Vec<String>>,
}

impl MemoryState {
    fn version(&self, key: &str) -> u64 {
        self.kv.get(key).map(|v| v.version).unwrap_or(0)
    }

    fn list_len(&self, list: &str) -> u64 {
        self.lists.get(list).map(|l| l.len() as u64).unwrap_or(0)
    }

    fn put(&mut self, key: &str, value: &str) -> u64 {
        let version = self.version(key) + 1;
        self.kv.insert(
            key.to_string(),
            Versioned {
                value: value.to_string(),
                version,
            },
        );
        version
    }

    fn push(&mut self, list: &str, value: &str) -> u64 {
        let items = self.lists.entry(list.to_string()).or_default();
        items.push(value.to_string());
        items.len() as u64
    }
}

/// In-process store. Shared between economies with `Arc` to model several
/// writers against one backing store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Overwrite one list item in place, bypassing versioning.
    /// Used by operators to inspect how verification reacts to a bad record.
    pub fn replace_item(&self, list: &str, index: u64, value: &str) -> Result<()> {
        let mut state = self.lock()?;
        let item = state
            .lists
            .get_mut(list)
            .and_then(|items| items.get_mut(index as usize))
            .ok_or_else(|| StoreError::InvalidData(format!("{list}[{index}] does not exist")))?;
        *item = value.to_string();
        Ok(())
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Versioned>> {
        Ok(self.lock()?.kv.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str, expected_version: u64) -> Result<u64> {
        let mut state = self.lock()?;
        if state.version(key) != expected_version {
            return Err(StoreError::Conflict { key: key.to_string() });
        }
        Ok(state.put(key, value))
    }

    fn append(&self, list: &str, value: &str) -> Result<u64> {
        Ok(self.lock()?.push(list, value))
    }

    fn len(&self, list: &str) -> Result<u64> {
        Ok(self.lock()?.list_len(list))
    }

    fn range(&self, list: &str, start: u64, end: u64) -> Result<Vec<String>> {
        let state = self.lock()?;
        let items = match state.lists.get(list) {
            Some(items) => items,
            None => return Ok(Vec::new()),
        };
        let end = (end as usize).min(items.len());
        let start = (start as usize).min(end);
        Ok(items[start..end].to_vec())
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        batch.check_distinct()?;
        let mut state = self.lock()?;

        for write in batch.writes() {
            let ok = match write {
                Write::Set { key, expected_version, .. } => state.version(key) == *expected_version,
                Write::Append { list, expected_len, .. } => state.list_len(list) == *expected_len,
            };
            if !ok {
                return Err(StoreError::Conflict {
                    key: write.target().to_string(),
                });
            }
        }

        for write in batch.writes() {
            match write {
                Write::Set { key, value, .. } => {
                    state.put(key, value);
                }
                Write::Append { list, value, .. } => {
                    state.push(list, value);
                }
            }
        }
        Ok(())
    }
}
