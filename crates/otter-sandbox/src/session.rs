//! One sandbox evaluation, from runtime creation to teardown.
//!
//! A session runs in a single `Context::with` scope: the arena is created
//! first and disposed last inside it, then the context and the runtime are
//! dropped in that order.

use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::interrupt::Interrupt;
use crate::modules::{SourceLoader, SourceResolver, Transpile};
use crate::options::SandboxOptions;
use crate::pump::{Pump, PumpOutcome};
use crate::result::{ErrorInfo, EvalResult};
use crate::timers::{TimerLimits, TimerQueue};
use otter_bridge::{pending, Arena, BridgeError, JsFunction, JsFuture, Value};
use rquickjs::{Context, Ctx, Runtime};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

const SYNTAX_ERROR: &str = "SyntaxError";

/// Lifecycle of a session's top-level evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    Running,
    Settled,
    TimedOut,
    Disposed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Running => "running",
            Phase::Settled => "settled",
            Phase::TimedOut => "timed-out",
            Phase::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

pub struct Session<'js> {
    arena: Arena<'js>,
    timers: Rc<TimerQueue<'js>>,
    interrupt: Interrupt,
    config: SandboxConfig,
    transpile: Option<Transpile>,
    phase: Phase,
}

impl<'js> Session<'js> {
    fn open(ctx: Ctx<'js>, options: &SandboxOptions, interrupt: Interrupt) -> SandboxResult<Self> {
        if options.binds_async() && options.runtime_handle().is_none() {
            return Err(SandboxError::NoTokioRuntime);
        }
        let arena = Arena::new(ctx, options.arena_options())?;
        let timers = match Self::install(&arena, options) {
            Ok(timers) => timers,
            Err(err) => {
                arena.dispose();
                return Err(err);
            }
        };
        debug!(context = %arena.id(), bindings = options.bindings.len(), "sandbox session opened");
        Ok(Self {
            arena,
            timers,
            interrupt,
            config: options.config.clone(),
            transpile: options.transpile.clone(),
            phase: Phase::Init,
        })
    }

    fn install(arena: &Arena<'js>, options: &SandboxOptions) -> SandboxResult<Rc<TimerQueue<'js>>> {
        let timers = TimerQueue::install(arena, TimerLimits::from(&options.config))?;
        arena.expose(options.bindings.iter().map(|(name, value)| (name.as_str(), value.clone())))?;
        Ok(timers)
    }

    pub fn arena(&self) -> &Arena<'js> {
        &self.arena
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Timers and immediates still queued.
    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    /// Async host calls that have not settled.
    pub fn pending_calls(&self) -> usize {
        pending::pending_count(self.arena.id())
    }

    /// Evaluate `source` as the session's module, named after
    /// `config.module_name`.
    pub fn eval(&mut self, source: &str) -> EvalResult {
        let name = self.config.module_name.clone();
        self.eval_module(source, &name)
    }

    /// Evaluate `source` as a module named `name` and wait for its default
    /// export. Only one evaluation per session gets past parsing.
    pub fn eval_module(&mut self, source: &str, name: &str) -> EvalResult {
        if self.phase != Phase::Init {
            return EvalResult::error(ErrorInfo::sandbox(format!(
                "sandbox session already evaluated its module (phase: {})",
                self.phase
            )));
        }
        let source = match &self.transpile {
            Some(transpile) => match transpile(source) {
                Ok(code) => code,
                Err(message) => return EvalResult::syntax_error(ErrorInfo::new(SYNTAX_ERROR, message)),
            },
            None => source.to_string(),
        };

        self.interrupt.arm(self.config.timeout());
        self.phase = Phase::Running;
        debug!(context = %self.arena.id(), module = name, "sandbox evaluation started");

        let outcome = match self.arena.eval_code(&source, name) {
            Ok(Value::Future(future)) => self.pump(&future),
            Ok(value) => PumpOutcome::Settled(Ok(value)),
            Err(BridgeError::Syntax(value)) => {
                self.interrupt.arm(None);
                self.phase = Phase::Init;
                return EvalResult::syntax_error(ErrorInfo::from_value(&value));
            }
            Err(err) => self.failed(err),
        };
        self.finish(outcome)
    }

    /// Call a function from the host, typically one the evaluation returned.
    /// A returned future is pumped to completion under a fresh deadline.
    pub fn call(&mut self, function: &JsFunction, args: Vec<Value>) -> EvalResult {
        if let Some(closed) = self.unusable() {
            return closed;
        }
        self.interrupt.arm(self.config.timeout());
        let outcome = match self.arena.call(function, Value::Undefined, args) {
            Ok(Value::Future(future)) => self.pump(&future),
            Ok(value) => PumpOutcome::Settled(Ok(value)),
            Err(err) => self.failed(err),
        };
        self.finish(outcome)
    }

    /// Pump until `future` settles, under a fresh deadline.
    pub fn resolve(&mut self, future: &JsFuture) -> EvalResult {
        if let Some(closed) = self.unusable() {
            return closed;
        }
        self.interrupt.arm(self.config.timeout());
        let outcome = self.pump(future);
        self.finish(outcome)
    }

    fn unusable(&self) -> Option<EvalResult> {
        match self.phase {
            Phase::TimedOut | Phase::Disposed => Some(EvalResult::error(ErrorInfo::sandbox(format!(
                "sandbox session is no longer usable (phase: {})",
                self.phase
            )))),
            _ => None,
        }
    }

    fn pump(&self, future: &JsFuture) -> PumpOutcome {
        let pump = Pump::new(
            &self.arena,
            &self.timers,
            &self.interrupt,
            self.config.pump_interval(),
        );
        match pump.run_until(future) {
            Ok(outcome) => outcome,
            Err(err) => self.failed(err),
        }
    }

    fn failed(&self, err: BridgeError) -> PumpOutcome {
        if self.interrupt.tripped() {
            return PumpOutcome::TimedOut;
        }
        match err {
            BridgeError::Thrown(value) => PumpOutcome::Settled(Err(value)),
            other => PumpOutcome::Settled(Err(other.to_value())),
        }
    }

    fn finish(&mut self, outcome: PumpOutcome) -> EvalResult {
        // A deadline that passed wins over whatever settled meanwhile.
        let settlement = match outcome {
            PumpOutcome::Settled(settlement)
                if !self.interrupt.tripped() && !self.interrupt.expired() =>
            {
                settlement
            }
            _ => {
                self.teardown();
                return EvalResult::error(ErrorInfo::timeout(
                    self.config.timeout_ms.unwrap_or_default(),
                ));
            }
        };

        self.interrupt.arm(None);
        if self.phase == Phase::Running {
            self.phase = Phase::Settled;
        }
        debug!(context = %self.arena.id(), phase = %self.phase, "sandbox evaluation settled");
        match settlement {
            Ok(value) => EvalResult::ok(value),
            Err(thrown) => EvalResult::error(ErrorInfo::from_value(&thrown)),
        }
    }

    /// Reject and abort in-flight host calls, stop the guest for good and
    /// drop everything queued for it.
    fn teardown(&mut self) {
        let context = self.arena.id();
        let rejected = pending::reject_all(context, "sandbox evaluation timed out");
        self.interrupt.abort();
        let rejected = rejected.wait(self.config.teardown_grace());
        let discarded = self.arena.discard_settlements();
        let timers = self.timers.clear_all();
        self.phase = Phase::TimedOut;
        debug!(context = %context, rejected, discarded, timers, "sandbox timed out and was torn down");
    }

    fn close(mut self) {
        let context = self.arena.id();
        let leftover = pending::reject_and_flush(
            context,
            "sandbox closed before the host call settled",
            self.config.teardown_grace(),
        );
        if leftover > 0 {
            warn!(context = %context, leftover, "sandbox closed with host calls still pending");
        }
        self.timers.clear_all();
        self.arena.discard_settlements();
        // The bridge runs guest helpers while disposing; they must not be
        // interrupted.
        self.interrupt.disarm();
        self.arena.dispose();
        self.phase = Phase::Disposed;
        debug!(context = %context, "sandbox session disposed");
    }
}

/// Create a runtime and context for `options`, open a session in it and
/// hand it to `f`. The session is disposed when `f` returns, before the
/// context and the runtime.
pub fn run_sandbox<R>(
    options: SandboxOptions,
    f: impl for<'js> FnOnce(&mut Session<'js>) -> R,
) -> SandboxResult<R> {
    let runtime = Runtime::new()?;
    if let Some(limit) = options.config.memory_limit {
        runtime.set_memory_limit(limit);
    }
    if let Some(size) = options.config.max_stack_size {
        runtime.set_max_stack_size(size);
    }
    let interrupt = Interrupt::new();
    runtime.set_interrupt_handler(Some(interrupt.handler()));
    if let Some(source) = &options.modules {
        runtime.set_loader(
            SourceResolver::new(source.clone()),
            SourceLoader::new(source.clone(), options.transpile.clone()),
        );
    }

    let context = Context::full(&runtime)?;
    let result = context.with(|ctx| -> SandboxResult<R> {
        let mut session = Session::open(ctx, &options, interrupt.clone())?;
        let output = f(&mut session);
        session.close();
        Ok(output)
    });
    drop(context);
    drop(runtime);
    result
}

/// Reusable entry point: every evaluation gets a fresh runtime.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    options: SandboxOptions,
}

impl Sandbox {
    pub fn new(options: SandboxOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Evaluate `source` on the calling thread.
    pub fn eval(&self, source: &str) -> SandboxResult<EvalResult> {
        run_sandbox(self.options.clone(), |session| session.eval(source))
    }

    /// Evaluate `source` on tokio's blocking pool. Async host functions run
    /// on the current runtime unless the options name another.
    pub async fn eval_async(&self, source: impl Into<String>) -> SandboxResult<EvalResult> {
        let mut options = self.options.clone();
        if options.tokio_handle.is_none() {
            options.tokio_handle = tokio::runtime::Handle::try_current().ok();
        }
        let source = source.into();
        tokio::task::spawn_blocking(move || run_sandbox(options, |session| session.eval(&source)))
            .await?
    }
}
