//! Coalescing of concurrent requests into one in-flight attempt.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::{Mutex, PoisonError};

pub(crate) type Attempt<T> = Shared<BoxFuture<'static, T>>;

/// A memoized pending operation.
///
/// The first caller starts the operation; everyone who arrives while it is running, or after
/// it has finished, gets a handle to the same attempt and so observes the same outcome. The
/// slot is only locked for the duration of the lookup, never across an `.await`.
pub(crate) struct InFlight<T> {
    slot: Mutex<Option<Attempt<T>>>,
}

impl<T> InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Joins the current attempt, or begins a new one with `start` if there is none.
    pub(crate) fn join_or_start<F>(&self, start: F) -> Attempt<T>
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert_with(|| start().shared()).clone()
    }

    /// Forgets `attempt` so that the next caller starts afresh.
    ///
    /// Does nothing if the slot has already moved on to a different attempt.
    pub(crate) fn forget(&self, attempt: &Attempt<T>) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| current.ptr_eq(attempt)) {
            *slot = None;
        }
    }
}

impl<T> std::fmt::Debug for InFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let busy = self
            .slot
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or_default();
        f.debug_struct("InFlight").field("memoized", &busy).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use super::*;

    fn counting(runs: &Arc<AtomicUsize>, value: u32) -> impl FnOnce() -> BoxFuture<'static, u32> {
        let runs = Arc::clone(runs);
        move || {
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                value
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_run() {
        let inflight = InFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let a = inflight.join_or_start(counting(&runs, 1));
        let b = inflight.join_or_start(counting(&runs, 2));
        let (a, b) = tokio::join!(a, b);

        assert_eq!((a, b), (1, 1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // finished attempts stay memoized
        assert_eq!(inflight.join_or_start(counting(&runs, 3)).await, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forgetting_allows_a_fresh_attempt() {
        let inflight = InFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let first = inflight.join_or_start(counting(&runs, 1));
        assert_eq!(first.clone().await, 1);
        inflight.forget(&first);

        let second = inflight.join_or_start(counting(&runs, 2));
        assert_eq!(second.clone().await, 2);

        // a stale handle must not evict the newer attempt
        inflight.forget(&first);
        assert_eq!(inflight.join_or_start(counting(&runs, 3)).await, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
