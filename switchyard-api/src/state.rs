//! Application State
//!
//! Shared state for the Switchyard API server

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::SwitchyardConfig;
use crate::db::Database;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SwitchyardConfig>,
    pub database: Arc<Database>,
    pub host_locks: HostLocks,
}

/// Per-host mutation exclusion.
///
/// Bridge create/delete edits the host's interfaces file; two edits racing
/// against the same file would corrupt it, so only one mutation per host may
/// be in flight at a time. Different hosts proceed independently.
#[derive(Clone, Default)]
pub struct HostLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl HostLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutation lock for one host, waiting for any in-flight
    /// mutation on the same host to finish first.
    pub async fn acquire(&self, host_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(host_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
