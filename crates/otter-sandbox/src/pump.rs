//! The host loop that drives a pending guest result to completion.
//!
//! Each tick applies sync writes and host settlements, drains the job queue,
//! runs due timers, then blocks on the settlement channel until the next
//! timer, the next tick or the deadline, whichever comes first.

use crate::interrupt::Interrupt;
use crate::timers::TimerQueue;
use otter_bridge::{Arena, BridgeResult, JsFuture, Settlement};
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug)]
pub(crate) enum PumpOutcome {
    Settled(Settlement),
    TimedOut,
}

pub(crate) struct Pump<'a, 'js> {
    arena: &'a Arena<'js>,
    timers: &'a TimerQueue<'js>,
    interrupt: &'a Interrupt,
    interval: Duration,
}

impl<'a, 'js> Pump<'a, 'js> {
    pub(crate) fn new(
        arena: &'a Arena<'js>,
        timers: &'a TimerQueue<'js>,
        interrupt: &'a Interrupt,
        interval: Duration,
    ) -> Self {
        Self {
            arena,
            timers,
            interrupt,
            interval,
        }
    }

    /// Pump until `future` settles or the deadline passes. A deadline that
    /// passes wins over a settlement seen on the same tick.
    pub(crate) fn run_until(&self, future: &JsFuture) -> BridgeResult<PumpOutcome> {
        let mut ticks = 0u64;
        loop {
            if self.timed_out() {
                return Ok(PumpOutcome::TimedOut);
            }
            match self.tick() {
                Ok(_) => {}
                Err(_) if self.interrupt.tripped() => return Ok(PumpOutcome::TimedOut),
                Err(err) => return Err(err),
            }
            if self.timed_out() {
                return Ok(PumpOutcome::TimedOut);
            }
            if let Some(outcome) = future.try_result() {
                trace!(ticks, "pump settled");
                return Ok(PumpOutcome::Settled(outcome));
            }
            self.arena.wait_for_settlement(self.next_wait())?;
            ticks += 1;
        }
    }

    fn tick(&self) -> BridgeResult<usize> {
        let mut ran = self.arena.execute_pending_jobs(None)?;
        if self.timers.run_due(self.arena)? > 0 {
            ran += self.arena.execute_pending_jobs(None)?;
        }
        Ok(ran)
    }

    fn timed_out(&self) -> bool {
        self.interrupt.tripped() || self.interrupt.expired()
    }

    fn next_wait(&self) -> Duration {
        let now = Instant::now();
        let mut wait = self.interval;
        if let Some(due) = self.timers.next_deadline() {
            wait = wait.min(due.saturating_duration_since(now));
        }
        if let Some(remaining) = self.interrupt.remaining() {
            wait = wait.min(remaining);
        }
        wait
    }
}
