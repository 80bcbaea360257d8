//! Per-address signing locks
//!
//! Two build+sign+broadcast flows for the same address would each fetch the
//! same nonce. Holding the address lock for the whole flow serializes them;
//! flows for different addresses never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::ChainRef;

/// Held for the duration of one flow; released on drop
pub type AddressGuard = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
pub struct AddressLocks {
    locks: Mutex<HashMap<(ChainRef, String), Arc<AsyncMutex<()>>>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `address_hex` on `chain`
    pub async fn lock(&self, chain: ChainRef, address_hex: &str) -> AddressGuard {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // drop entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((chain, address_hex.to_lowercase()))
                .or_default()
                .clone()
        };
        entry.lock_owned().await
    }

    /// Addresses currently locked or waited on
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|lock| Arc::strong_count(lock) > 1).count()
    }
}
