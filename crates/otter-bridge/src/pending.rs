//! Pending-call registry.
//!
//! Tracks host futures handed to the guest per context, so a timed-out
//! evaluation can reject them and abort their tasks before tearing the
//! context down. This is the one piece of bridge state touched from more than
//! one thread: host tasks unregister themselves from tokio workers while the
//! sandbox thread flushes.

use crate::future::JsFuture;
use crate::value::{ErrorValue, Value};
use dashmap::DashMap;
use std::fmt;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Error name seen by guest code awaiting a call that teardown rejected.
pub const HOST_CALL_REJECTED: &str = "HostCallRejected";

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

static REGISTRY: LazyLock<DashMap<ContextId, Vec<PendingCall>>> = LazyLock::new(DashMap::new);

/// Identifies one arena (one guest context) in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

struct PendingCall {
    future: JsFuture,
    task: Option<AbortHandle>,
}

/// Track `future` as an in-flight host call of `context`.
pub fn register(context: ContextId, future: &JsFuture) {
    REGISTRY.entry(context).or_default().push(PendingCall {
        future: future.clone(),
        task: None,
    });
}

/// Attach the task driving `future`, so teardown can abort it. A no-op when
/// the call already settled and unregistered.
pub fn attach_task(context: ContextId, future: &JsFuture, task: AbortHandle) {
    if let Some(mut calls) = REGISTRY.get_mut(&context) {
        if let Some(call) = calls.iter_mut().find(|c| c.future.ptr_eq(future)) {
            call.task = Some(task);
        }
    }
}

/// Forget a settled call.
pub fn unregister(context: ContextId, future_id: u64) {
    let now_empty = match REGISTRY.get_mut(&context) {
        Some(mut calls) => {
            calls.retain(|c| c.future.id() != future_id);
            calls.is_empty()
        }
        None => false,
    };
    if now_empty {
        REGISTRY.remove_if(&context, |_, calls| calls.is_empty());
    }
}

pub fn pending_count(context: ContextId) -> usize {
    REGISTRY.get(&context).map_or(0, |calls| calls.len())
}

/// Calls rejected by [`reject_all`] whose tasks may still be unwinding.
#[must_use = "call `wait` to give aborted tasks their grace window"]
pub struct Rejected {
    context: ContextId,
    calls: Vec<PendingCall>,
}

impl Rejected {
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn running(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| c.task.as_ref().is_some_and(|t| !t.is_finished()))
            .count()
    }

    /// Wait up to `max_wait` for the aborted tasks to finish. Returns how
    /// many calls were rejected.
    pub fn wait(self, max_wait: Duration) -> usize {
        let deadline = Instant::now() + max_wait;
        while self.running() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        let still_running = self.running();
        if still_running > 0 {
            warn!(
                context = %self.context,
                still_running,
                "host calls did not finish within the teardown grace window"
            );
        }
        debug!(context = %self.context, rejected = self.calls.len(), "flushed pending host calls");
        self.calls.len()
    }
}

/// Reject every tracked call of `context` with a `HostCallRejected` error and
/// abort the tasks behind them. The registry forgets the calls immediately.
pub fn reject_all(context: ContextId, message: &str) -> Rejected {
    let calls = REGISTRY
        .remove(&context)
        .map(|(_, calls)| calls)
        .unwrap_or_default();
    let reason = Value::Error(ErrorValue::new(HOST_CALL_REJECTED, message));
    for call in &calls {
        call.future.reject(reason.clone());
        if let Some(task) = &call.task {
            task.abort();
        }
    }
    Rejected { context, calls }
}

/// [`reject_all`] followed by the grace wait. Returns how many calls were
/// rejected.
pub fn reject_and_flush(context: ContextId, message: &str, max_wait: Duration) -> usize {
    reject_all(context, message).wait(max_wait)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let context = ContextId::next();
        let future = JsFuture::new();
        register(context, &future);
        assert_eq!(pending_count(context), 1);
        unregister(context, future.id());
        assert_eq!(pending_count(context), 0);
    }

    #[test]
    fn test_reject_and_flush_rejects_with_distinguished_name() {
        let context = ContextId::next();
        let first = JsFuture::new();
        let second = JsFuture::new();
        register(context, &first);
        register(context, &second);

        let rejected = reject_and_flush(context, "evaluation timed out", Duration::ZERO);
        assert_eq!(rejected, 2);
        assert_eq!(pending_count(context), 0);
        let Some(Err(Value::Error(error))) = first.try_result() else {
            panic!("expected rejection");
        };
        assert_eq!(error.name, HOST_CALL_REJECTED);
        assert!(second.try_result().is_some_and(|r| r.is_err()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flush_aborts_tasks() {
        let context = ContextId::next();
        let future = JsFuture::new();
        register(context, &future);
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(100)).await;
        });
        attach_task(context, &future, task.abort_handle());

        let flushed = tokio::task::spawn_blocking(move || {
            reject_and_flush(context, "timeout", Duration::from_secs(1))
        })
        .await
        .unwrap();
        assert_eq!(flushed, 1);
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rejection_precedes_the_grace_wait() {
        let context = ContextId::next();
        let future = JsFuture::new();
        register(context, &future);
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(100)).await;
        });
        attach_task(context, &future, task.abort_handle());

        let rejected = reject_all(context, "timeout");
        assert_eq!(rejected.len(), 1);
        assert_eq!(pending_count(context), 0);
        assert!(future.try_result().is_some_and(|r| r.is_err()));

        let waited = tokio::task::spawn_blocking(move || rejected.wait(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(waited, 1);
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_contexts_are_isolated() {
        let a = ContextId::next();
        let b = ContextId::next();
        let future = JsFuture::new();
        register(a, &future);
        assert_eq!(reject_and_flush(b, "timeout", Duration::ZERO), 0);
        assert_eq!(pending_count(a), 1);
        unregister(a, future.id());
    }
}
