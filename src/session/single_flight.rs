// src/session/single_flight.rs - In-flight request registry keyed by operation + argument
//
// Two policies over the same idea:
//   SingleFlight  - concurrent callers with the same key share one future.
//   InFlightSet   - a second caller with the same key is turned away.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::infra::errors::SimError;

/// Registry key: the operation name plus its argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlightKey {
    pub op: &'static str,
    pub arg: String,
}

impl FlightKey {
    pub fn new(op: &'static str, arg: impl Into<String>) -> Self {
        Self {
            op,
            arg: arg.into(),
        }
    }
}

impl fmt::Display for FlightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.op, self.arg)
    }
}

type SharedResult<V> = Shared<BoxFuture<'static, Result<V, Arc<SimError>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─── Coalescing ─────────────────────────────────────────────────────────────

/// Coalesces concurrent work: while a future for a key is running, every
/// other caller with that key awaits the same result.
pub struct SingleFlight<K, V> {
    calls: Mutex<HashMap<K, (u64, SharedResult<V>)>>,
    next_id: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` unless a call for `key` is already in flight, in which
    /// case join it. Errors are shared between all waiters.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<V, SimError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, SimError>> + Send + 'static,
    {
        let (id, call) = {
            let mut calls = lock(&self.calls);
            match calls.get(&key) {
                Some((id, call)) => {
                    tracing::debug!("Joining in-flight {key}");
                    (*id, call.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let call = make().map(|r| r.map_err(Arc::new)).boxed().shared();
                    calls.insert(key.clone(), (id, call.clone()));
                    (id, call)
                }
            }
        };

        let result = call.await;

        // Whoever finishes first retires the entry; later waiters find it
        // gone or replaced by a newer call and leave it alone.
        {
            let mut calls = lock(&self.calls);
            if calls.get(&key).map(|(current, _)| *current) == Some(id) {
                calls.remove(&key);
            }
        }

        result.map_err(SimError::from)
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.calls).len()
    }
}

// ─── Rejection ──────────────────────────────────────────────────────────────

/// Keys currently held. A key can be held by one caller at a time.
pub struct InFlightSet<K: Eq + Hash> {
    held: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash> Default for InFlightSet<K> {
    fn default() -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> InFlightSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns `None` when someone else holds it.
    pub fn try_begin(&self, key: K) -> Option<InFlightGuard<K>> {
        let mut held = lock(&self.held);
        if !held.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            held: Arc::clone(&self.held),
            key: Some(key),
        })
    }
}

/// Releases its key when dropped, including on cancellation of the owning
/// future.
pub struct InFlightGuard<K: Eq + Hash> {
    held: Arc<Mutex<HashSet<K>>>,
    key: Option<K>,
}

impl<K: Eq + Hash> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            lock(&self.held).remove(&key);
        }
    }
}
