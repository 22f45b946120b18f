//! Durable store abstraction
//!
//! The economy persists its curve state, accounts and the thought chain
//! through [`DurableStore`]. Every read-then-write goes through a
//! [`WriteBatch`] whose conditional writes are checked and applied atomically;
//! a failed precondition is a [`StoreError::Conflict`] and nothing is written.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::de::DeserializeOwned;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A conditional write found a different version or length
    #[error("conflicting concurrent write on {key}")]
    Conflict { key: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A value and the version it was read at. Absent keys have version 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: String,
    pub version: u64,
}

/// One conditional write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    /// Set `key` if its current version equals `expected_version`
    Set {
        key: String,
        value: String,
        expected_version: u64,
    },
    /// Append to `list` if its current length equals `expected_len`
    Append {
        list: String,
        value: String,
        expected_len: u64,
    },
}

impl Write {
    pub fn target(&self) -> &str {
        match self {
            Write::Set { key, .. } => key,
            Write::Append { list, .. } => list,
        }
    }
}

/// Writes applied all-or-nothing by [`DurableStore::apply`]
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>, expected_version: u64) {
        self.writes.push(Write::Set {
            key: key.into(),
            value: value.into(),
            expected_version,
        });
    }

    pub fn append(&mut self, list: impl Into<String>, value: impl Into<String>, expected_len: u64) {
        self.writes.push(Write::Append {
            list: list.into(),
            value: value.into(),
            expected_len,
        });
    }

    pub fn extend(&mut self, other: WriteBatch) {
        self.writes.extend(other.writes);
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    /// Reject batches that touch the same key twice
    pub fn check_distinct(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for w in &self.writes {
            if !seen.insert(w.target()) {
                return Err(StoreError::InvalidData(format!(
                    "batch writes {} more than once",
                    w.target()
                )));
            }
        }
        Ok(())
    }
}

/// Get/set-with-version plus append-to-list, with an atomic batch primitive
pub trait DurableStore: Send + Sync {
    /// Current value and version of `key`
    fn get(&self, key: &str) -> Result<Option<Versioned>>;

    /// Conditional set; returns the new version
    fn set(&self, key: &str, value: &str, expected_version: u64) -> Result<u64>;

    /// Unconditional append; returns the new length
    fn append(&self, list: &str, value: &str) -> Result<u64>;

    /// Number of items in `list`
    fn len(&self, list: &str) -> Result<u64>;

    /// Items `start..end` of `list`, clamped to its length
    fn range(&self, list: &str, start: u64, end: u64) -> Result<Vec<String>>;

    /// Check every precondition, then apply every write, atomically
    fn apply(&self, batch: WriteBatch) -> Result<()>;
}

/// Read and decode a JSON value together with its version
pub fn get_json<T: DeserializeOwned>(store: &dyn DurableStore, key: &str) -> Result<Option<(T, u64)>> {
    match store.get(key)? {
        Some(v) => {
            let decoded = serde_json::from_str(&v.value)
                .map_err(|e| StoreError::InvalidData(format!("{key}: {e}")))?;
            Ok(Some((decoded, v.version)))
        }
        None => Ok(None),
    }
}

/// Store key layout
pub mod keys {
    /// Bonding curve state
    pub const CURVE: &str = "economy:curve";
    /// The thought chain, one JSON block per item
    pub const CHAIN: &str = "chain:blocks";
    /// Last Keeper slot that committed a block
    pub const KEEPER_LAST_SLOT: &str = "keeper:last_slot";

    pub fn account(participant: &str) -> String {
        format!("ledger:account:{participant}")
    }

    /// Idempotency marker for one engagement id
    pub fn engagement(id: &str) -> String {
        format!("ledger:engagement:{id}")
    }

    /// Prior turns of a session, used as novelty context
    pub fn session(id: &str) -> String {
        format!("session:{id}:turns")
    }
}
