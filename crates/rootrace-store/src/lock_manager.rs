//! Per-key FIFO async lock used to serialize store-file access within a process.
//!
//! Each key owns a queue of parked waiters. The holder hands the key directly
//! to the oldest live waiter when it finishes, so ordering is strict FIFO and
//! distinct keys never wait on each other. There is no timeout: a holder that
//! never finishes blocks its key forever.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;

/// Owns the key -> waiter-queue map. Construct one per process (or per test)
/// and share it by `Arc` with every store that touches the same files.
#[derive(Debug, Default)]
pub struct LockManager {
    // A key is present exactly while some operation holds it.
    locks: Mutex<HashMap<String, VecDeque<oneshot::Sender<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `operation` once every earlier operation queued on `key` has finished.
    ///
    /// The key is released when `operation` completes, fails, panics, or when
    /// the returned future is dropped, so one bad operation never stalls the
    /// rest of the queue. Its result (including any `Err`) goes only to this
    /// caller.
    pub async fn run<F, Fut, T>(&self, key: impl Into<String>, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = key.into();
        let _turn = self.acquire(&key).await;
        operation().await
    }

    /// Keys that currently have a running operation.
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock_or_recover(&self.locks).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of operations parked behind the current holder of `key`.
    pub fn queued_len(&self, key: &str) -> usize {
        lock_or_recover(&self.locks)
            .get(key)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub fn is_idle(&self) -> bool {
        lock_or_recover(&self.locks).is_empty()
    }

    async fn acquire(&self, key: &str) -> KeyTurn<'_> {
        let receiver = {
            let mut locks = lock_or_recover(&self.locks);
            match locks.get_mut(key) {
                Some(queue) => {
                    let (sender, receiver) = oneshot::channel();
                    queue.push_back(sender);
                    Some(receiver)
                }
                None => {
                    locks.insert(key.to_string(), VecDeque::new());
                    None
                }
            }
        };

        if let Some(receiver) = receiver {
            let mut pending = PendingTurn {
                manager: self,
                key,
                receiver: Some(receiver),
            };
            if let Some(receiver) = pending.receiver.as_mut() {
                // Senders only leave the queue through `release`, which either
                // hands us the key or finds this receiver already gone.
                let _ = receiver.await;
            }
            pending.receiver = None;
        }

        KeyTurn {
            manager: self,
            key: key.to_string(),
        }
    }

    fn release(&self, key: &str) {
        let mut locks = lock_or_recover(&self.locks);
        let Some(queue) = locks.get_mut(key) else {
            return;
        };
        while let Some(next) = queue.pop_front() {
            if next.send(()).is_ok() {
                return;
            }
        }
        locks.remove(key);
    }
}

struct KeyTurn<'a> {
    manager: &'a LockManager,
    key: String,
}

impl Drop for KeyTurn<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.key);
    }
}

// Armed while a waiter is parked. If the waiter is dropped after the key was
// handed to it but before it could run, the key is passed on instead of leaked.
struct PendingTurn<'a> {
    manager: &'a LockManager,
    key: &'a str,
    receiver: Option<oneshot::Receiver<()>>,
}

impl Drop for PendingTurn<'_> {
    fn drop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            if receiver.try_recv().is_ok() {
                self.manager.release(self.key);
            }
        }
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::LockManager;

    fn scratch_file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    #[tokio::test]
    async fn functional_same_key_operations_run_in_queue_order_not_completion_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = scratch_file(&dir, "lock-test.txt");
        let key = target.display().to_string();
        let locks = Arc::new(LockManager::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (label, delay_ms) in [(1_u8, 50_u64), (2, 10), (3, 100)] {
            let locks = Arc::clone(&locks);
            let order = Arc::clone(&order);
            let key = key.clone();
            let target = target.clone();
            handles.push(tokio::spawn(async move {
                locks
                    .run(key, || async move {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        order.lock().expect("order lock").push(label);
                        tokio::fs::write(&target, label.to_string())
                            .await
                            .expect("write");
                    })
                    .await;
            }));
            // Deterministic enqueue order.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        for handle in handles {
            handle.await.expect("join");
        }

        assert_eq!(*order.lock().expect("order lock"), vec![1, 2, 3]);
        let content = tokio::fs::read_to_string(&target).await.expect("read");
        assert_eq!(content, "3");
        assert!(locks.is_idle());
    }

    #[tokio::test]
    async fn functional_distinct_keys_run_in_parallel() {
        let locks = Arc::new(LockManager::new());
        let started = Instant::now();
        let first = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks
                    .run("file1.txt", || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        "file1"
                    })
                    .await
            })
        };
        let second = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks
                    .run("file2.txt", || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        "file2"
                    })
                    .await
            })
        };
        assert_eq!(first.await.expect("join first"), "file1");
        assert_eq!(second.await.expect("join second"), "file2");
        let elapsed = started.elapsed();
        assert!(
            elapsed < Duration::from_millis(380),
            "distinct keys should overlap, took {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn functional_failure_reaches_only_its_caller_and_queue_advances() {
        let locks = LockManager::new();
        let failed: Result<(), String> = locks
            .run("store.json", || async { Err("Test error".to_string()) })
            .await;
        assert_eq!(failed, Err("Test error".to_string()));

        let next: Result<&str, String> = locks.run("store.json", || async { Ok("success") }).await;
        assert_eq!(next, Ok("success"));
        assert!(locks.is_idle());
    }

    #[tokio::test]
    async fn unit_run_returns_operation_result() {
        let locks = LockManager::new();
        let result = locks
            .run("store.json", || async { "operation completed" })
            .await;
        assert_eq!(result, "operation completed");
    }

    #[tokio::test]
    async fn unit_key_entry_is_removed_once_queue_drains() {
        let locks = Arc::new(LockManager::new());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let holder = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks
                    .run("store.json", || async {
                        let _ = release_rx.await;
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.run("store.json", || async { 7 }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(locks.active_keys(), vec!["store.json".to_string()]);
        assert_eq!(locks.queued_len("store.json"), 1);

        release_tx.send(()).expect("release holder");
        holder.await.expect("join holder");
        assert_eq!(waiter.await.expect("join waiter"), 7);
        assert!(locks.is_idle());
        assert_eq!(locks.queued_len("store.json"), 0);
    }

    #[tokio::test]
    async fn regression_cancelled_waiter_does_not_wedge_the_key() {
        let locks = Arc::new(LockManager::new());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let holder = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks
                    .run("store.json", || async {
                        let _ = release_rx.await;
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            locks.run("store.json", || async { "never" }),
        )
        .await;
        assert!(abandoned.is_err(), "waiter should time out while parked");

        release_tx.send(()).expect("release holder");
        holder.await.expect("join holder");
        let after = tokio::time::timeout(
            Duration::from_secs(1),
            locks.run("store.json", || async { "ran" }),
        )
        .await
        .expect("key must be free again");
        assert_eq!(after, "ran");
        assert!(locks.is_idle());
    }

    #[tokio::test]
    async fn regression_panicking_operation_releases_the_key() {
        let locks = Arc::new(LockManager::new());
        let panicking = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                locks
                    .run("store.json", || async {
                        panic!("operation blew up");
                    })
                    .await
            })
        };
        assert!(panicking.await.is_err());

        let after = tokio::time::timeout(
            Duration::from_secs(1),
            locks.run("store.json", || async { 42 }),
        )
        .await
        .expect("key must not stay held after a panic");
        assert_eq!(after, 42);
    }
}
