//! Single-flight task handles.
//!
//! The first caller starts a task and stores a shared handle to it; later
//! callers await the stored handle instead of starting their own. The task
//! runs on the tokio runtime, so it completes even if every caller drops
//! its handle.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::lock;

/// The spawned task panicked or was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct FlightAborted(pub String);

/// Shared handle to an in-flight (or completed) task.
pub type Flight<T> = Shared<BoxFuture<'static, Result<T, FlightAborted>>>;

/// What happens to the stored handle once its task completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearPolicy {
    /// Keep the completed handle; later callers get the finished result.
    Retain,
    /// Drop the handle on completion so the next caller starts a fresh task.
    ClearOnComplete,
}

struct Entry<T: Clone> {
    token: u64,
    flight: Flight<T>,
}

pub struct SingleFlight<T: Clone> {
    slot: Arc<StdMutex<Option<Entry<T>>>>,
    next_token: AtomicU64,
    policy: ClearPolicy,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(policy: ClearPolicy) -> Self {
        Self {
            slot: Arc::new(StdMutex::new(None)),
            next_token: AtomicU64::new(0),
            policy,
        }
    }

    /// The stored handle, if any.
    pub fn current(&self) -> Option<Flight<T>> {
        lock(&self.slot).as_ref().map(|entry| entry.flight.clone())
    }

    /// Whether a stored task has not produced its result yet.
    pub fn is_in_flight(&self) -> bool {
        lock(&self.slot)
            .as_ref()
            .is_some_and(|entry| entry.flight.peek().is_none())
    }

    /// Join the stored task, or start one with `start` if none is stored.
    ///
    /// Returns the handle and whether this call started the task.
    pub fn join_or_start<F, Fut>(&self, start: F) -> (Flight<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        if let Some(entry) = slot.as_ref() {
            return (entry.flight.clone(), false);
        }
        (self.spawn_into(&mut slot, start()), true)
    }

    /// Start a task unconditionally, replacing any stored handle.
    ///
    /// Waiters on the replaced handle still receive its result.
    pub fn start<Fut>(&self, fut: Fut) -> Flight<T>
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        self.spawn_into(&mut slot, fut)
    }

    /// Forget the stored handle without cancelling its task.
    pub fn clear(&self) {
        lock(&self.slot).take();
    }

    fn spawn_into<Fut>(&self, slot: &mut Option<Entry<T>>, fut: Fut) -> Flight<T>
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let shared_slot = Arc::clone(&self.slot);
        let policy = self.policy;

        let handle = tokio::spawn(async move {
            let output = fut.await;
            if policy == ClearPolicy::ClearOnComplete {
                let mut guard = lock(&shared_slot);
                // A newer task may have replaced ours in the meantime.
                if guard.as_ref().is_some_and(|entry| entry.token == token) {
                    *guard = None;
                }
            }
            output
        });

        let flight = async move {
            handle
                .await
                .map_err(|e| FlightAborted(e.to_string()))
        }
        .boxed()
        .shared();

        *slot = Some(Entry {
            token,
            flight: flight.clone(),
        });
        flight
    }
}

/// A handle that is already complete.
pub fn ready<T>(value: T) -> Flight<T>
where
    T: Clone + Send + Sync + 'static,
{
    futures::future::ready(Ok(value)).boxed().shared()
}
