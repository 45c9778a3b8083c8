//! Storage capabilities injected by the embedding application
//!
//! The orchestrator and the state reset endpoint never probe for a backing
//! store; they receive these capabilities explicitly, or nothing at all.

use std::hash::Hash;

use dashmap::DashMap;

use crate::Result;

/// A store that can open one rollback-only unit of work
pub trait TransactionalStore: Send + Sync {
    /// Begin a transaction isolated from any ambient transaction
    fn begin_isolated(&self) -> Result<()>;

    /// Roll back the transaction opened by [`begin_isolated`](Self::begin_isolated)
    fn rollback(&self) -> Result<()>;

    /// Whether a transaction opened by this store is still open
    fn transaction_open(&self) -> bool;
}

/// A store whose application-managed data can be wiped in one operation
pub trait BulkCleanable: Send + Sync {
    /// Remove all application data, keeping schema and bookkeeping state
    fn clear_all(&self) -> Result<()>;
}

/// Anything holding cached state that can be dropped wholesale
pub trait Clearable: Send + Sync {
    fn clear(&self);
}

impl<K, V> Clearable for DashMap<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
{
    fn clear(&self) {
        DashMap::clear(self);
    }
}
