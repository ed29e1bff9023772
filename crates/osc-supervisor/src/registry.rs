use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

/// Process-wide mapping from `migration.id` to child PID. Mutated only
/// under its dedicated mutex, per spec.md §3/§5.
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<Mutex<HashMap<i64, u32>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: i64, pid: u32) {
        self.inner.lock().await.insert(id, pid);
    }

    pub async fn remove(&self, id: i64) -> Option<u32> {
        self.inner.lock().await.remove(&id)
    }

    pub async fn get(&self, id: i64) -> Option<u32> {
        self.inner.lock().await.get(&id).copied()
    }

    pub async fn snapshot(&self) -> Vec<(i64, u32)> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|(id, pid)| (*id, *pid))
            .collect()
    }
}

/// Whether the claim loop is currently allowed to accept new work. Cleared
/// during fleet handoff and restored when the stop-file disappears.
#[derive(Clone, Default)]
pub struct AcceptFlag(Arc<AtomicBool>);

impl AcceptFlag {
    pub fn new(initial: bool) -> Self {
        Self(Arc::new(AtomicBool::new(initial)))
    }

    pub fn is_accepting(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, accepting: bool) {
        self.0.store(accepting, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_remove_round_trips() {
        let registry = InFlightRegistry::new();
        registry.insert(1, 1234).await;
        assert_eq!(registry.get(1).await, Some(1234));
        assert_eq!(registry.remove(1).await, Some(1234));
        assert_eq!(registry.get(1).await, None);
    }

    #[tokio::test]
    async fn at_most_one_pid_per_migration_id() {
        let registry = InFlightRegistry::new();
        registry.insert(7, 100).await;
        registry.insert(7, 200).await;
        assert_eq!(registry.snapshot().await, vec![(7, 200)]);
    }
}
