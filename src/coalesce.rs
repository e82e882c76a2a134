//! Per-key request coalescing.
//!
//! Concurrent callers asking for the same key share one in-flight fetch and
//! all receive a clone of its output. Keys are independent: a slow fetch for
//! one key never delays another.
//!
//! Coalescing is process-local. Repositories running in several processes
//! against one shared cache each issue their own fetch on a miss, so across
//! processes this is a best-effort reduction, not a guarantee.
//!
//! A fetch that read its row before a concurrent update finishes after that
//! update's invalidation and still caches the older record. Such a stale
//! entry lives until the next write to the same id or until its TTL runs out.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

struct Call<V> {
    id: u64,
    fut: Shared<BoxFuture<'static, V>>,
    waiters: usize,
}

type Calls<V> = Arc<Mutex<HashMap<String, Call<V>>>>;

/// Deduplicates concurrent fetches by key.
///
/// The fetch runs inside the callers' own tasks, driven by whichever waiter
/// polls it. If every waiter goes away (cancelled or timed out) the fetch is
/// dropped with them and the key is freed; nothing keeps running
/// unobserved. Once a fetch completes its key is cleared, so the next call
/// starts a new one.
pub struct Coalescer<V> {
    calls: Calls<V>,
    next_id: Arc<AtomicU64>,
}

impl<V> Clone for Coalescer<V> {
    fn clone(&self) -> Self {
        Coalescer {
            calls: Arc::clone(&self.calls),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<V> Default for Coalescer<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Coalescer<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Coalescer {
            calls: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run `fetch` for `key`, or join the fetch already in flight for it.
    ///
    /// `fetch` is only called when this caller starts a new fetch.
    pub async fn run<F, Fut>(&self, key: &str, fetch: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (id, fut) = {
            let mut calls = lock(&self.calls);
            match calls.get_mut(key) {
                Some(call) => {
                    call.waiters += 1;
                    tracing::debug!(key, waiters = call.waiters, "joining in-flight fetch");
                    (call.id, call.fut.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let fut = fetch().boxed().shared();
                    calls.insert(
                        key.to_string(),
                        Call {
                            id,
                            fut: fut.clone(),
                            waiters: 1,
                        },
                    );
                    (id, fut)
                }
            }
        };

        let mut guard = WaiterGuard {
            calls: &self.calls,
            key,
            id,
            finished: false,
        };
        let value = fut.await;
        guard.finish();
        value
    }

    /// Number of keys with a fetch in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.calls).len()
    }
}

fn lock<V>(calls: &Mutex<HashMap<String, Call<V>>>) -> MutexGuard<'_, HashMap<String, Call<V>>> {
    calls.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks one caller's interest in a call.
struct WaiterGuard<'a, V> {
    calls: &'a Mutex<HashMap<String, Call<V>>>,
    key: &'a str,
    id: u64,
    finished: bool,
}

impl<V> WaiterGuard<'_, V> {
    /// The call completed: clear its key unless a newer call already took it.
    fn finish(&mut self) {
        self.finished = true;
        let mut calls = lock(self.calls);
        if calls.get(self.key).is_some_and(|call| call.id == self.id) {
            calls.remove(self.key);
        }
    }
}

impl<V> Drop for WaiterGuard<'_, V> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Cancelled before completion. The last waiter out drops the fetch.
        let mut calls = lock(self.calls);
        let Some(call) = calls.get_mut(self.key) else {
            return;
        };
        if call.id != self.id {
            return;
        }
        call.waiters = call.waiters.saturating_sub(1);
        if call.waiters == 0 {
            calls.remove(self.key);
        }
    }
}
