//! Bounded `setTimeout` / `setInterval` / `setImmediate` for the guest.
//!
//! Callbacks live in the queue as guest functions; the globals are thin guest
//! wrappers around two host functions, `schedule` and `clear`. Scheduling
//! past a ceiling throws a guest `ResourceLimitExceeded` error at the call
//! site. Timers only fire while the pump runs.

use crate::config::SandboxConfig;
use crate::result::RESOURCE_LIMIT_EXCEEDED;
use otter_bridge::{Arena, BridgeError, BridgeResult, ErrorValue, Value};
use rquickjs::{Ctx, Exception, Function};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Guest side of the timer globals. Extra arguments are bound into a thunk
/// here so the host only ever stores zero-argument callbacks.
const TIMER_INSTALLER: &str = r#"(schedule, clear) => {
  const wrap = (kind) => function (callback, delay, ...args) {
    if (typeof callback !== 'function') {
      throw new TypeError('Callback must be a function');
    }
    return schedule(kind, () => callback(...args), Number(delay) || 0);
  };
  const cancel = (id) => {
    if (id !== undefined && id !== null) clear(Number(id));
  };
  globalThis.setTimeout = wrap(0);
  globalThis.setInterval = wrap(1);
  globalThis.setImmediate = function (callback, ...args) {
    return wrap(2)(callback, 0, ...args);
  };
  globalThis.clearTimeout = cancel;
  globalThis.clearInterval = cancel;
  globalThis.clearImmediate = cancel;
}"#;

/// Intervals never repeat faster than this.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerKind {
    Timeout,
    Interval,
    Immediate,
}

impl TimerKind {
    fn from_code(code: i32) -> Self {
        match code {
            1 => TimerKind::Interval,
            2 => TimerKind::Immediate,
            _ => TimerKind::Timeout,
        }
    }

    fn global(self) -> &'static str {
        match self {
            TimerKind::Timeout => "setTimeout",
            TimerKind::Interval => "setInterval",
            TimerKind::Immediate => "setImmediate",
        }
    }
}

/// Ceilings on concurrently pending timers, per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerLimits {
    pub timeouts: usize,
    pub intervals: usize,
    pub immediates: usize,
}

impl TimerLimits {
    fn of(&self, kind: TimerKind) -> usize {
        match kind {
            TimerKind::Timeout => self.timeouts,
            TimerKind::Interval => self.intervals,
            TimerKind::Immediate => self.immediates,
        }
    }
}

impl From<&SandboxConfig> for TimerLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            timeouts: config.max_timeouts,
            intervals: config.max_intervals,
            immediates: config.max_immediates,
        }
    }
}

struct TimerEntry<'js> {
    id: u64,
    kind: TimerKind,
    callback: Function<'js>,
    when: Instant,
    interval: Option<Duration>,
}

pub(crate) struct TimerQueue<'js> {
    timers: RefCell<Vec<TimerEntry<'js>>>,
    immediates: RefCell<VecDeque<TimerEntry<'js>>>,
    next_id: Cell<u64>,
    limits: TimerLimits,
}

impl<'js> TimerQueue<'js> {
    fn new(limits: TimerLimits) -> Self {
        Self {
            timers: RefCell::new(Vec::new()),
            immediates: RefCell::new(VecDeque::new()),
            next_id: Cell::new(1),
            limits,
        }
    }

    /// Create the queue and define the timer globals in the arena's context.
    pub(crate) fn install(arena: &Arena<'js>, limits: TimerLimits) -> BridgeResult<Rc<Self>> {
        let queue = Rc::new(Self::new(limits));
        let ctx = arena.ctx().clone();

        let weak_queue = Rc::downgrade(&queue);
        let weak_arena = arena.downgrade();
        let schedule = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, kind: i32, callback: Function<'js>, delay: f64| -> rquickjs::Result<f64> {
                let (Some(queue), Some(arena)) = (weak_queue.upgrade(), weak_arena.upgrade()) else {
                    return Err(Exception::throw_internal(&ctx, "sandbox timers are shut down"));
                };
                match queue.schedule(TimerKind::from_code(kind), callback, delay) {
                    Ok(id) => Ok(id as f64),
                    Err(message) => Err(arena.throw_value(&Value::Error(ErrorValue::new(
                        RESOURCE_LIMIT_EXCEEDED,
                        message,
                    )))),
                }
            },
        )?;

        let weak_queue = Rc::downgrade(&queue);
        let clear = Function::new(ctx.clone(), move |id: f64| {
            if let Some(queue) = weak_queue.upgrade() {
                queue.clear(id as u64);
            }
        })?;

        let installer: Function<'js> = ctx.eval(TIMER_INSTALLER)?;
        installer.call::<_, ()>((schedule, clear))?;
        Ok(queue)
    }

    fn active(&self, kind: TimerKind) -> usize {
        match kind {
            TimerKind::Immediate => self.immediates.borrow().len(),
            _ => self.timers.borrow().iter().filter(|t| t.kind == kind).count(),
        }
    }

    fn schedule(&self, kind: TimerKind, callback: Function<'js>, delay_ms: f64) -> Result<u64, String> {
        let limit = self.limits.of(kind);
        if self.active(kind) >= limit {
            return Err(format!(
                "{} limit reached: at most {limit} may be pending",
                kind.global()
            ));
        }
        let delay = if delay_ms.is_finite() && delay_ms > 0.0 {
            Duration::from_millis(delay_ms as u64)
        } else {
            Duration::ZERO
        };
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let entry = TimerEntry {
            id,
            kind,
            callback,
            when: Instant::now() + delay,
            interval: (kind == TimerKind::Interval).then(|| delay.max(MIN_INTERVAL)),
        };
        trace!(id, kind = kind.global(), delay_ms = delay.as_millis() as u64, "timer scheduled");
        match kind {
            TimerKind::Immediate => self.immediates.borrow_mut().push_back(entry),
            _ => self.timers.borrow_mut().push(entry),
        }
        Ok(id)
    }

    /// Cancel a timer of any kind. Works from inside the timer's own callback.
    fn clear(&self, id: u64) -> bool {
        let mut timers = self.timers.borrow_mut();
        if let Some(pos) = timers.iter().position(|t| t.id == id) {
            timers.remove(pos);
            return true;
        }
        drop(timers);
        let mut immediates = self.immediates.borrow_mut();
        if let Some(pos) = immediates.iter().position(|t| t.id == id) {
            immediates.remove(pos);
            return true;
        }
        false
    }

    /// Run every timer that is due now and the immediates queued before this
    /// call, draining the job queue after each callback. Returns how many
    /// callbacks ran.
    pub(crate) fn run_due(&self, arena: &Arena<'js>) -> BridgeResult<usize> {
        let now = Instant::now();
        let mut due: Vec<(Instant, u64)> = self
            .timers
            .borrow()
            .iter()
            .filter(|t| t.when <= now)
            .map(|t| (t.when, t.id))
            .collect();
        due.sort();

        let mut ran = 0;
        for (_, id) in due {
            let callback = {
                let mut timers = self.timers.borrow_mut();
                // An earlier callback may have cleared it.
                let Some(pos) = timers.iter().position(|t| t.id == id) else {
                    continue;
                };
                match timers[pos].interval {
                    Some(interval) => {
                        timers[pos].when = now + interval;
                        timers[pos].callback.clone()
                    }
                    None => timers.remove(pos).callback,
                }
            };
            self.invoke(arena, id, callback)?;
            ran += 1;
        }

        let queued = self.immediates.borrow().len();
        for _ in 0..queued {
            let Some(entry) = self.immediates.borrow_mut().pop_front() else {
                break;
            };
            self.invoke(arena, entry.id, entry.callback)?;
            ran += 1;
        }
        Ok(ran)
    }

    fn invoke(&self, arena: &Arena<'js>, id: u64, callback: Function<'js>) -> BridgeResult<()> {
        if let Err(err) = callback.call::<_, ()>(()) {
            match arena.catch(BridgeError::from(err)) {
                BridgeError::Thrown(value) => {
                    warn!("Timer {} callback error: {}", id, value.display_string())
                }
                other => warn!("Timer {} callback error: {}", id, other),
            }
        }
        arena.execute_pending_jobs(None)?;
        Ok(())
    }

    /// When the next callback is due; now if immediates are queued.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        if !self.immediates.borrow().is_empty() {
            return Some(Instant::now());
        }
        self.timers.borrow().iter().map(|t| t.when).min()
    }

    pub(crate) fn pending(&self) -> usize {
        self.timers.borrow().len() + self.immediates.borrow().len()
    }

    /// Drop every pending callback.
    pub(crate) fn clear_all(&self) -> usize {
        let dropped = self.pending();
        self.timers.borrow_mut().clear();
        self.immediates.borrow_mut().clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_bridge::ArenaOptions;
    use rquickjs::{Context, Runtime};

    fn with_timers<R>(limits: TimerLimits, f: impl for<'js> FnOnce(&Arena<'js>, &TimerQueue<'js>) -> R) -> R {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let arena = Arena::new(ctx, ArenaOptions::default()).unwrap();
            let queue = TimerQueue::install(&arena, limits).unwrap();
            let result = f(&arena, &queue);
            queue.clear_all();
            drop(queue);
            arena.dispose();
            result
        })
    }

    const LIMITS: TimerLimits = TimerLimits {
        timeouts: 2,
        intervals: 2,
        immediates: 2,
    };

    #[test]
    fn test_timeouts_fire_in_due_order() {
        with_timers(LIMITS, |arena, queue| {
            arena
                .eval_code(
                    "globalThis.order = []; setTimeout(() => order.push('b'), 0); setImmediate((x) => order.push(x), 'a'); export default 0;",
                    "t.js",
                )
                .unwrap();
            assert_eq!(queue.pending(), 2);
            assert_eq!(queue.run_due(arena).unwrap(), 2);
            let order = arena.eval_code("export default order.join(',');", "o.js").unwrap();
            assert_eq!(order, Value::from("b,a"));
            assert_eq!(queue.pending(), 0);
        });
    }

    #[test]
    fn test_ceiling_throws_in_guest() {
        with_timers(LIMITS, |arena, queue| {
            let name = arena
                .eval_code(
                    r#"
                    setTimeout(() => {}, 1000);
                    setTimeout(() => {}, 1000);
                    let name;
                    try { setTimeout(() => {}, 1000); } catch (e) { name = e.name; }
                    export default name;
                    "#,
                    "limit.js",
                )
                .unwrap();
            assert_eq!(name, Value::from(RESOURCE_LIMIT_EXCEEDED));
            assert_eq!(queue.pending(), 2);
        });
    }

    #[test]
    fn test_clear_and_reschedule_interval() {
        with_timers(LIMITS, |arena, queue| {
            arena
                .eval_code(
                    "globalThis.ticks = 0; globalThis.id = setInterval(() => { ticks += 1; }, 1); const t = setTimeout(() => {}, 0); clearTimeout(t); export default 0;",
                    "i.js",
                )
                .unwrap();
            assert_eq!(queue.pending(), 1);
            std::thread::sleep(Duration::from_millis(2));
            queue.run_due(arena).unwrap();
            assert_eq!(queue.pending(), 1);
            arena.eval_code("clearInterval(id); export default 0;", "c.js").unwrap();
            assert_eq!(queue.pending(), 0);
            let ticks = arena.eval_code("export default ticks;", "n.js").unwrap();
            assert_eq!(ticks, Value::Number(1.0));
        });
    }

    #[test]
    fn test_callback_errors_do_not_stop_the_queue() {
        with_timers(LIMITS, |arena, queue| {
            arena
                .eval_code(
                    "globalThis.after = false; setTimeout(() => { throw new Error('boom'); }, 0); setTimeout(() => { after = true; }, 0); export default 0;",
                    "e.js",
                )
                .unwrap();
            assert_eq!(queue.run_due(arena).unwrap(), 2);
            let after = arena.eval_code("export default after;", "a.js").unwrap();
            assert_eq!(after, Value::Bool(true));
        });
    }

    #[test]
    fn test_non_function_callback_is_type_error() {
        with_timers(LIMITS, |arena, _| {
            let name = arena
                .eval_code(
                    "let n; try { setTimeout('code', 0); } catch (e) { n = e.name; } export default n;",
                    "f.js",
                )
                .unwrap();
            assert_eq!(name, Value::from("TypeError"));
        });
    }
}
