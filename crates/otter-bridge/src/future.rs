//! Host-side futures.
//!
//! A [`JsFuture`] is a settle-once cell shared between the host and the
//! bridge. Host code can `.await` it; the arena subscribes with
//! [`JsFuture::on_settle`] to forward the outcome into a guest promise.

use crate::value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

static NEXT_FUTURE_ID: AtomicU64 = AtomicU64::new(1);

pub type Settlement = Result<Value, Value>;
type Listener = Box<dyn FnOnce(&Settlement) + Send>;

enum FutureState {
    Pending {
        wakers: Vec<Waker>,
        listeners: Vec<Listener>,
    },
    Settled(Settlement),
}

pub(crate) struct FutureInner {
    id: u64,
    state: Mutex<FutureState>,
}

#[derive(Clone)]
pub struct JsFuture {
    inner: Arc<FutureInner>,
}

impl Default for JsFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl JsFuture {
    pub fn new() -> Self {
        Self::with_state(FutureState::Pending {
            wakers: Vec::new(),
            listeners: Vec::new(),
        })
    }

    fn with_state(state: FutureState) -> Self {
        Self {
            inner: Arc::new(FutureInner {
                id: NEXT_FUTURE_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn resolved(value: Value) -> Self {
        Self::with_state(FutureState::Settled(Ok(value)))
    }

    pub fn rejected(reason: Value) -> Self {
        Self::with_state(FutureState::Settled(Err(reason)))
    }

    /// Run `future` on `handle`, settling the returned `JsFuture` with its
    /// output. The join handle lets callers abort the task.
    pub fn spawn<F>(handle: &Handle, future: F) -> (JsFuture, JoinHandle<()>)
    where
        F: Future<Output = Settlement> + Send + 'static,
    {
        let js_future = JsFuture::new();
        let task = Self::spawn_into(handle, js_future.clone(), future);
        (js_future, task)
    }

    /// Like [`JsFuture::spawn`] but settles an existing future.
    pub fn spawn_into<F>(handle: &Handle, target: JsFuture, future: F) -> JoinHandle<()>
    where
        F: Future<Output = Settlement> + Send + 'static,
    {
        handle.spawn(async move {
            let outcome = future.await;
            target.settle(outcome);
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn resolve(&self, value: Value) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, reason: Value) -> bool {
        self.settle(Err(reason))
    }

    /// Settle the future. The first settlement wins; later ones return `false`.
    pub fn settle(&self, outcome: Settlement) -> bool {
        let (wakers, listeners) = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                FutureState::Settled(_) => return false,
                FutureState::Pending { wakers, listeners } => {
                    let wakers = std::mem::take(wakers);
                    let listeners = std::mem::take(listeners);
                    *state = FutureState::Settled(outcome.clone());
                    (wakers, listeners)
                }
            }
        };
        for listener in listeners {
            listener(&outcome);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Call `listener` once the future settles, or right away if it has.
    pub fn on_settle(&self, listener: impl FnOnce(&Settlement) + Send + 'static) {
        let settled = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                FutureState::Pending { listeners, .. } => {
                    listeners.push(Box::new(listener));
                    return;
                }
                FutureState::Settled(outcome) => outcome.clone(),
            }
        };
        listener(&settled);
    }

    pub fn try_result(&self) -> Option<Settlement> {
        match &*self.inner.state.lock() {
            FutureState::Settled(outcome) => Some(outcome.clone()),
            FutureState::Pending { .. } => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(&*self.inner.state.lock(), FutureState::Settled(_))
    }

    pub fn ptr_eq(&self, other: &JsFuture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<FutureInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<FutureInner>) -> Self {
        Self { inner }
    }
}

impl Future for JsFuture {
    type Output = Settlement;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock();
        match &mut *state {
            FutureState::Settled(outcome) => Poll::Ready(outcome.clone()),
            FutureState::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl PartialEq for JsFuture {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for JsFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsFuture")
            .field("id", &self.inner.id)
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_first_settlement_wins() {
        let future = JsFuture::new();
        assert!(future.resolve(Value::from(1.0)));
        assert!(!future.reject(Value::from("late")));
        assert_eq!(future.try_result(), Some(Ok(Value::Number(1.0))));
    }

    #[test]
    fn test_listeners_run_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let future = JsFuture::new();
        let counter = calls.clone();
        future.on_settle(move |outcome| {
            assert!(outcome.is_err());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        future.reject(Value::from("boom"));
        future.reject(Value::from("again"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // late subscribers see the settled value immediately
        let counter = calls.clone();
        future.on_settle(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_spawn_and_await() {
        let handle = Handle::current();
        let (future, task) = JsFuture::spawn(&handle, async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Value::from("ready"))
        });
        assert_eq!(future.clone().await, Ok(Value::from("ready")));
        task.await.unwrap();
        assert!(future.is_settled());
    }
}
