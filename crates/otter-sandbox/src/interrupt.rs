//! Deadline and abort state polled by the engine's interrupt handler.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Default)]
struct InterruptState {
    deadline: Mutex<Option<Instant>>,
    abort: AtomicBool,
    tripped: AtomicBool,
}

/// Shared between the session and the handler installed in the runtime.
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptState>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock. `None` clears any deadline.
    pub fn arm(&self, timeout: Option<Duration>) {
        *self.inner.deadline.lock() = timeout.map(|t| Instant::now() + t);
    }

    pub fn deadline(&self) -> Option<Instant> {
        *self.inner.deadline.lock()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.deadline().is_some_and(|d| Instant::now() >= d)
    }

    /// Interrupt the guest from now on, deadline or not.
    pub fn abort(&self) {
        self.inner.abort.store(true, Ordering::SeqCst);
    }

    /// Drop the deadline and the abort flag. Only the bridge's own helpers
    /// run after this.
    pub fn disarm(&self) {
        self.inner.abort.store(false, Ordering::SeqCst);
        *self.inner.deadline.lock() = None;
    }

    /// Whether the handler ever stopped the guest.
    pub fn tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::SeqCst)
    }

    /// The check the engine runs periodically while guest code executes.
    pub fn should_interrupt(&self) -> bool {
        let hit = self.inner.abort.load(Ordering::SeqCst) || self.expired();
        if hit {
            self.inner.tripped.store(true, Ordering::SeqCst);
        }
        hit
    }

    pub(crate) fn handler(&self) -> Box<dyn FnMut() -> bool + Send + 'static> {
        let state = self.clone();
        Box::new(move || state.should_interrupt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unarmed_never_interrupts() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.should_interrupt());
        assert!(!interrupt.tripped());
        assert_eq!(interrupt.remaining(), None);
    }

    #[test]
    fn test_deadline_trips() {
        let interrupt = Interrupt::new();
        interrupt.arm(Some(Duration::ZERO));
        assert!(interrupt.expired());
        assert!(interrupt.should_interrupt());
        assert!(interrupt.tripped());
    }

    #[test]
    fn test_abort_and_disarm() {
        let interrupt = Interrupt::new();
        interrupt.arm(Some(Duration::from_secs(60)));
        assert!(!interrupt.should_interrupt());
        interrupt.abort();
        assert!(interrupt.should_interrupt());
        interrupt.disarm();
        assert!(!interrupt.should_interrupt());
        assert!(interrupt.tripped());
    }
}
