//! Rollback-only transaction around a test run

use std::sync::Arc;
use tracing::{debug, info, warn};

use testbridge_common::TransactionalStore;

use crate::error::E2eResult;

/// Opens at most one isolated transaction and always rolls it back
pub struct TransactionScope {
    store: Option<Arc<dyn TransactionalStore>>,
    enabled: bool,
    opened: bool,
}

impl TransactionScope {
    /// A scope that opens a transaction only when `enabled` and a store is present
    pub fn new(store: Option<Arc<dyn TransactionalStore>>, enabled: bool) -> Self {
        Self {
            store,
            enabled,
            opened: false,
        }
    }

    /// A scope that never opens anything
    pub fn disabled() -> Self {
        Self::new(None, false)
    }

    /// Whether [`begin`](Self::begin) would open a transaction
    pub fn is_active(&self) -> bool {
        self.enabled && self.store.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.opened
            && self
                .store
                .as_ref()
                .map(|s| s.transaction_open())
                .unwrap_or(false)
    }

    /// Begin the transaction; returns whether one was opened
    pub fn begin(&mut self) -> E2eResult<bool> {
        let Some(store) = self.store.as_ref().filter(|_| self.enabled) else {
            debug!("Transactional run disabled or no store present");
            return Ok(false);
        };
        if self.opened {
            return Ok(true);
        }

        store.begin_isolated()?;
        self.opened = true;
        info!("Opened run transaction");
        Ok(true)
    }

    /// Roll back if a transaction is still open; never fails the caller
    pub fn rollback(&mut self) {
        if !self.opened {
            return;
        }
        self.opened = false;

        let Some(store) = self.store.as_ref() else {
            return;
        };
        if !store.transaction_open() {
            debug!("Run transaction already closed");
            return;
        }
        match store.rollback() {
            Ok(()) => info!("Rolled back run transaction"),
            Err(e) => warn!("Failed to roll back run transaction: {}", e),
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        self.rollback();
    }
}
