//! Per-record write serialisation.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = Arc<DashMap<Uuid, Arc<Mutex<()>>>>;

/// One async mutex per record id (a bill, a payment without a bill, or a
/// subscription). Anything that reads a record and writes it back holds the
/// guard for the whole read-modify-write.
#[derive(Clone, Default)]
pub struct RecordLocks {
    locks: LockMap,
}

/// Holds a record's mutex. Dropping the last guard for an id removes its
/// map entry, so the map only tracks ids with a holder or a waiter.
pub struct RecordGuard {
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold a clone of the Arc, so a count of one means only the map is left.
        self.locks
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: Uuid) -> RecordGuard {
        // Clone the Arc out so the shard guard is released before awaiting.
        let mutex = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        RecordGuard {
            id,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_record_is_serialised() {
        let locks = RecordLocks::new();
        let id = Uuid::new_v4();

        let guard = locks.lock(id).await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(id)).await;
        assert!(second.is_err());

        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(50), locks.lock(id)).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn different_records_do_not_contend() {
        let locks = RecordLocks::new();
        let _a = locks.lock(Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock(Uuid::new_v4())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn entries_are_released_with_the_last_guard() {
        let locks = RecordLocks::new();
        for _ in 0..100 {
            let _guard = locks.lock(Uuid::new_v4()).await;
        }
        assert!(locks.is_empty());

        let id = Uuid::new_v4();
        let first = locks.lock(id).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        // The waiter still needs the entry once the first guard is gone.
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn contended_locks_still_serialise_and_drain() {
        let locks = RecordLocks::new();
        let id = Uuid::new_v4();
        let counter = Arc::new(Mutex::new(0u32));
        let inside = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let locks = locks.clone();
            let counter = counter.clone();
            let inside = inside.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock(id).await;
                let before = inside.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                assert_eq!(before, 0);
                tokio::task::yield_now().await;
                *counter.lock().await += 1;
                inside.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*counter.lock().await, 32);
        assert!(locks.is_empty());
    }
}
