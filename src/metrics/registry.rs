use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Default)]
struct Entries {
    next_id: u64,
    batchers: BTreeMap<u64, (&'static str, CancellationToken)>,
}

/// Tracks running batchers so shutdown can stop them all at once.
///
/// Owned by the composition root and cloned into each batcher. Stopping
/// cancels the flush timers; queued items are dropped, not flushed.
#[derive(Debug, Clone, Default)]
pub struct BatcherRegistry {
    entries: Arc<Mutex<Entries>>,
}

impl BatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a batcher's timer. Returns the id to unregister with.
    pub fn register(&self, name: &'static str, token: CancellationToken) -> u64 {
        let mut entries = self.lock();
        let id = entries.next_id;
        entries.next_id += 1;
        entries.batchers.insert(id, (name, token));
        id
    }

    /// Forget a batcher. Returns whether it was still registered.
    pub fn unregister(&self, id: u64) -> bool {
        self.lock().batchers.remove(&id).is_some()
    }

    /// Cancel every registered timer and clear the registry.
    pub fn stop_all(&self) -> usize {
        let batchers = std::mem::take(&mut self.lock().batchers);
        for (name, token) in batchers.values() {
            token.cancel();
            tracing::debug!(batcher = name, "Stopped metric batcher");
        }
        if !batchers.is_empty() {
            info!(count = batchers.len(), "Stopped all metric batchers");
        }
        batchers.len()
    }

    pub fn len(&self) -> usize {
        self.lock().batchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.lock().batchers.values().map(|(name, _)| *name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_all_cancels_and_clears() {
        let registry = BatcherRegistry::new();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        registry.register("login", a.clone());
        registry.register("order", b.clone());
        assert_eq!(registry.names(), vec!["login", "order"]);

        assert_eq!(registry.stop_all(), 2);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(registry.is_empty());
        assert_eq!(registry.stop_all(), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = BatcherRegistry::new();
        let token = CancellationToken::new();
        let id = registry.register("request", token.clone());

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn clones_share_entries() {
        let registry = BatcherRegistry::new();
        let clone = registry.clone();
        clone.register("latency", CancellationToken::new());
        assert_eq!(registry.len(), 1);
    }
}
