//! Per-thread serialization: inbound messages on the same thread are
//! processed one at a time, different threads run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held while a thread's message is being processed.
pub type ThreadGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct ThreadSerializer {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ThreadSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `thread_id`.
    pub async fn acquire(&self, thread_id: &str) -> ThreadGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds or waits on.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Threads with a holder or waiter.
    pub async fn active(&self) -> usize {
        self.locks
            .lock()
            .await
            .values()
            .filter(|l| Arc::strong_count(l) > 1)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_thread_waits() {
        let serializer = Arc::new(ThreadSerializer::new());
        let guard = serializer.acquire("t-1").await;

        let s = serializer.clone();
        let waiter = tokio::spawn(async move {
            let _g = s.acquire("t-1").await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_threads_do_not_block() {
        let serializer = ThreadSerializer::new();
        let _a = serializer.acquire("t-1").await;
        let b = tokio::time::timeout(Duration::from_millis(200), serializer.acquire("t-2")).await;
        let b = b.unwrap();
        assert_eq!(serializer.active().await, 2);

        drop(b);
        assert_eq!(serializer.active().await, 1);
    }
}
