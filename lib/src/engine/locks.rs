// lib/src/engine/locks.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

/// Per-key async mutexes, created on first use. Bottles and orders are the
/// contended resources; each gets its own lock so unrelated operations
/// never serialize against each other.
#[derive(Debug, Default)]
pub struct LockRegistry {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().expect("lock registry poisoned");
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
