//! Keyed single-flight execution.
//!
//! The first caller for a key registers a ticket and runs the fetch on its
//! own task; every caller arriving while that ticket is registered waits for
//! the same outcome instead of starting another fetch. Removing the ticket
//! and publishing the outcome happen under the registry lock, so a caller
//! either joins the running fetch or starts a fresh one after it finished.
//!
//! Callers that give up only drop their receiver. The fetch itself always
//! runs to completion.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{Error, Result};

type Outcome<T> = Option<Result<T>>;
type Registry<K, T> = Arc<Mutex<HashMap<K, Arc<watch::Sender<Outcome<T>>>>>>;

/// Deduplicates concurrent work by key.
pub struct SingleFlight<K, T> {
    inflight: Registry<K, T>,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `fetch` for `key` unless a fetch for `key` is already running, and
    /// return that single outcome.
    ///
    /// `fetch` is only invoked by the caller that registers the ticket.
    /// Failures are handed to every waiter and then forgotten; the next call
    /// starts over.
    pub async fn fetch_once<F, Fut>(&self, key: K, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (mut rx, ticket) = {
            let mut inflight = lock(&self.inflight);
            if let Some(tx) = inflight.get(&key) {
                debug!(?key, waiters = tx.receiver_count(), "Joining in-flight fetch");
                (tx.subscribe(), None)
            } else {
                let (tx, rx) = watch::channel(None);
                let tx = Arc::new(tx);
                inflight.insert(key.clone(), Arc::clone(&tx));
                let ticket = Ticket {
                    key,
                    registry: Arc::clone(&self.inflight),
                    tx,
                    published: false,
                };
                (rx, Some(ticket))
            }
        };

        if let Some(ticket) = ticket {
            let work = fetch();
            tokio::spawn(async move {
                let outcome = work.await;
                ticket.publish(outcome);
            });
        }

        let outcome = rx.wait_for(Option::is_some).await;
        match outcome {
            Ok(outcome) => match &*outcome {
                Some(result) => result.clone(),
                None => Err(Error::transport("fetch finished without an outcome")),
            },
            Err(_) => Err(Error::transport("fetch was abandoned before completing")),
        }
    }

    /// Number of callers currently waiting on `key`.
    #[must_use]
    pub fn waiters(&self, key: &K) -> usize {
        lock(&self.inflight)
            .get(key)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Number of keys with a fetch in progress.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> fmt::Debug for SingleFlight<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &lock(&self.inflight).len())
            .finish()
    }
}

fn lock<K, T>(registry: &Registry<K, T>) -> MutexGuard<'_, HashMap<K, Arc<watch::Sender<Outcome<T>>>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration of one running fetch.
///
/// Dropped without publishing (the fetch panicked), it still unregisters so
/// waiters observe a closed channel and later callers start over.
struct Ticket<K: Eq + Hash, T> {
    key: K,
    registry: Registry<K, T>,
    tx: Arc<watch::Sender<Outcome<T>>>,
    published: bool,
}

impl<K: Eq + Hash, T> Ticket<K, T> {
    fn publish(mut self, outcome: Result<T>) {
        let mut inflight = lock(&self.registry);
        self.unregister(&mut inflight);
        self.tx.send_replace(Some(outcome));
        self.published = true;
    }

    fn unregister(&self, inflight: &mut HashMap<K, Arc<watch::Sender<Outcome<T>>>>) {
        if inflight
            .get(&self.key)
            .is_some_and(|tx| Arc::ptr_eq(tx, &self.tx))
        {
            inflight.remove(&self.key);
        }
    }
}

impl<K: Eq + Hash, T> Drop for Ticket<K, T> {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        warn!("In-flight fetch ended without publishing an outcome");
        let mut inflight = lock(&self.registry);
        self.unregister(&mut inflight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    async fn wait_for_waiters(flight: &SingleFlight<&'static str, u32>, key: &'static str, n: usize) {
        while flight.waiters(&key) < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_fetch() {
        let flight = Arc::new(SingleFlight::<&'static str, u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                flight
                    .fetch_once("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok(7)
                    })
                    .await
            }));
        }

        wait_for_waiters(&flight, "k", 16).await;
        gate.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_is_shared_then_forgotten() {
        let flight = Arc::new(SingleFlight::<&'static str, u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let spawn_caller = || {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                flight
                    .fetch_once("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Err(Error::transport("connection reset"))
                    })
                    .await
            })
        };
        let a = spawn_caller();
        let b = spawn_caller();
        wait_for_waiters(&flight, "k", 2).await;
        gate.notify_one();

        assert!(matches!(a.await.unwrap(), Err(Error::Transport { .. })));
        assert!(matches!(b.await.unwrap(), Err(Error::Transport { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let retried = flight.fetch_once("k", || async { Ok(1) }).await.unwrap();
        assert_eq!(retried, 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_other_keys_do_not_wait() {
        let flight = Arc::new(SingleFlight::<&'static str, u32>::new());
        let never = Arc::new(Notify::new());

        let blocked = {
            let flight = Arc::clone(&flight);
            let never = Arc::clone(&never);
            tokio::spawn(async move {
                flight
                    .fetch_once("slow", move || async move {
                        never.notified().await;
                        Ok(0)
                    })
                    .await
            })
        };
        wait_for_waiters(&flight, "slow", 1).await;

        let fast = tokio::time::timeout(
            Duration::from_secs(5),
            flight.fetch_once("fast", || async { Ok(2) }),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(fast, 2);
        assert_eq!(flight.in_flight(), 1);

        never.notify_one();
        assert_eq!(blocked.await.unwrap().unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_caller_does_not_cancel_fetch() {
        let flight = SingleFlight::<&'static str, u32>::new();
        let gate = Arc::new(Notify::new());
        let finished = Arc::new(AtomicBool::new(false));

        let work_gate = Arc::clone(&gate);
        let work_finished = Arc::clone(&finished);
        let gave_up = tokio::time::timeout(
            Duration::from_millis(50),
            flight.fetch_once("k", move || async move {
                work_gate.notified().await;
                work_finished.store(true, Ordering::SeqCst);
                Ok(3)
            }),
        )
        .await;
        assert!(gave_up.is_err());
        assert_eq!(flight.in_flight(), 1);

        gate.notify_one();
        while flight.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_fetch_releases_key() {
        let flight = SingleFlight::<&'static str, u32>::new();

        let result = flight
            .fetch_once("k", || async {
                if true {
                    panic!("fetch blew up");
                }
                Ok(0)
            })
            .await;

        assert!(matches!(result, Err(Error::Transport { .. })));
        assert_eq!(flight.in_flight(), 0);
        assert_eq!(flight.fetch_once("k", || async { Ok(5) }).await.unwrap(), 5);
    }
}
