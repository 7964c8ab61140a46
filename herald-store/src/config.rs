use std::sync::Arc;

use serde::Deserialize;

use crate::{backends::MemoryStore, r#trait::Store};

/// Configuration for the store
///
/// Memory store with a capacity limit in RON config:
/// ```ron
/// Herald (
///     store: Memory((
///         capacity: Some(1000),
///     )),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum StoreConfig {
    /// In-memory tables
    Memory(MemoryConfig),
}

/// Configuration for the memory store
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryConfig {
    /// Maximum number of queued emails (omit for unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory(MemoryConfig::default())
    }
}

impl StoreConfig {
    /// Build the configured backend.
    #[must_use]
    pub fn into_store(self) -> Arc<dyn Store> {
        match self {
            Self::Memory(MemoryConfig { capacity: Some(capacity) }) => {
                Arc::new(MemoryStore::with_capacity(capacity))
            }
            Self::Memory(MemoryConfig { capacity: None }) => Arc::new(MemoryStore::new()),
        }
    }
}
