//! In-progress download registry
//!
//! Every acquisition registers its query for as long as it runs. The entry
//! is owned by a `DownloadGuard` and removed when the guard drops, so it
//! disappears on every exit path: success, failure, timeout or a cancelled
//! future.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    started: Instant,
    /// Concurrent acquisitions of the same query share one entry
    active: usize,
}

/// Shared map of query → start time
#[derive(Debug, Clone, Default)]
pub struct DownloadRegistry {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // Entries stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `query`; the entry lives until the returned guard drops
    pub fn register(&self, query: &str) -> DownloadGuard {
        self.entries()
            .entry(query.to_string())
            .and_modify(|e| e.active += 1)
            .or_insert_with(|| Entry {
                started: Instant::now(),
                active: 1,
            });

        DownloadGuard {
            registry: self.clone(),
            query: query.to_string(),
        }
    }

    fn release(&self, query: &str) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(query) {
            entry.active -= 1;
            if entry.active == 0 {
                entries.remove(query);
            }
        }
    }

    /// Seconds elapsed since each in-progress query started
    pub fn elapsed(&self) -> BTreeMap<String, f64> {
        let now = Instant::now();
        self.entries()
            .iter()
            .map(|(q, e)| (q.clone(), now.duration_since(e.started).as_secs_f64()))
            .collect()
    }

    pub fn contains(&self, query: &str) -> bool {
        self.entries().contains_key(query)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Scope guard for one registered acquisition
#[derive(Debug)]
pub struct DownloadGuard {
    registry: DownloadRegistry,
    query: String,
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        self.registry.release(&self.query);
    }
}
