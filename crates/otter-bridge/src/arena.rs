//! The arena owns one guest context's side of the bridge.
//!
//! It holds the correlation table, the registered pairs, the three host
//! functions the guest dispatches through (host calls, sync traps, promise
//! settlement) and the queues that carry host-side events back to the guest
//! thread. Every guest-facing closure holds only a weak reference to the
//! arena, so disposing it cuts all links from the guest heap into the host.
//!
//! Disposal order: `Arena::dispose` first, then the `rquickjs::Context`,
//! then the `Runtime`. The sandbox session enforces this by creating the
//! arena inside `Context::with` and dropping it before the scope ends.

use crate::error::{BridgeError, BridgeResult};
use crate::function::{GuestCall, JsFunction};
use crate::future::{JsFuture, Settlement};
use crate::handle::Handle;
use crate::intrinsics::Intrinsics;
use crate::json::JsonFuturePolicy;
use crate::object::{JsObject, ObjectId};
use crate::pending::{self, ContextId};
use crate::serializers::{self, Serializer};
use crate::symbol::Symbol;
use crate::sync::{Mutation, SyncMode, SyncPolicy, SyncedObject};
use crate::table::CorrelationTable;
use crate::value::{ErrorValue, Value};
use crossbeam_channel::{Receiver, Sender, unbounded};
use futures::future::BoxFuture;
use rquickjs::{Array, Ctx, Exception, Function, IntoJs, Module, Object, Value as JsValue};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of the marshalability predicate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Marshalable {
    /// The guest sees `undefined`.
    Skip,
    /// Deep copy through JSON, no identity tracking.
    Json,
    #[default]
    Full,
}

pub type MarshalPredicate = Arc<dyn Fn(&Value) -> Marshalable + Send + Sync>;

/// How a registered pair's guest side is produced.
pub enum Registration<'a, 'js> {
    /// Evaluate a script expression, e.g. `"globalThis.console"`.
    Code(&'a str),
    Handle(Handle<'js>),
}

#[derive(Clone)]
pub struct ArenaOptions {
    pub marshalable: Option<MarshalPredicate>,
    pub sync_mode: SyncPolicy,
    pub json_futures: JsonFuturePolicy,
    pub serializers: Vec<Arc<dyn Serializer>>,
    /// Runtime for async host functions. Falls back to the ambient runtime.
    pub tokio: Option<tokio::runtime::Handle>,
}

impl Default for ArenaOptions {
    fn default() -> Self {
        Self {
            marshalable: None,
            sync_mode: Arc::new(|_| SyncMode::Bidirectional),
            json_futures: JsonFuturePolicy::default(),
            serializers: Vec::new(),
            tokio: None,
        }
    }
}

impl ArenaOptions {
    pub fn marshalable(mut self, f: impl Fn(&Value) -> Marshalable + Send + Sync + 'static) -> Self {
        self.marshalable = Some(Arc::new(f));
        self
    }

    pub fn sync_mode(mut self, f: impl Fn(&JsObject) -> SyncMode + Send + Sync + 'static) -> Self {
        self.sync_mode = Arc::new(f);
        self
    }

    pub fn json_futures(mut self, policy: JsonFuturePolicy) -> Self {
        self.json_futures = policy;
        self
    }

    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializers.push(Arc::new(serializer));
        self
    }

    pub fn tokio(mut self, handle: tokio::runtime::Handle) -> Self {
        self.tokio = Some(handle);
        self
    }
}

impl fmt::Debug for ArenaOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaOptions")
            .field("marshalable", &self.marshalable.is_some())
            .field("json_futures", &self.json_futures)
            .field("serializers", &self.serializers.len())
            .field("tokio", &self.tokio.is_some())
            .finish()
    }
}

pub(crate) struct Deferred<'js> {
    resolve: Function<'js>,
    reject: Function<'js>,
}

pub(crate) struct Dispatchers<'js> {
    pub host: Function<'js>,
    pub sync: Function<'js>,
    pub settle: Function<'js>,
}

pub(crate) struct SettlementMessage {
    future: u64,
    outcome: Settlement,
}

pub(crate) struct ArenaInner<'js> {
    pub ctx: Ctx<'js>,
    pub id: ContextId,
    pub intrinsics: Intrinsics<'js>,
    pub table: RefCell<CorrelationTable<'js>>,
    pub registered: RefCell<Vec<(Value, Handle<'js>)>>,
    /// Host functions handed to the guest, by function id.
    pub host_functions: RefCell<HashMap<u64, JsFunction>>,
    /// Guest deferreds waiting on host futures, by future id.
    pub deferreds: RefCell<HashMap<u64, Deferred<'js>>>,
    /// Host futures waiting on guest promises, by observer id.
    pub observed: RefCell<HashMap<u64, JsFuture>>,
    pub synced: RefCell<HashMap<ObjectId, JsObject>>,
    pub wrappers: RefCell<HashMap<ObjectId, SyncedObject>>,
    pub mutations: (Sender<Mutation>, Receiver<Mutation>),
    pub settlements: (Sender<SettlementMessage>, Receiver<SettlementMessage>),
    pub dispatchers: RefCell<Option<Dispatchers<'js>>>,
    pub serializers: Vec<Arc<dyn Serializer>>,
    pub options: ArenaOptions,
    next_observer: Cell<u64>,
    disposed: Cell<bool>,
}

#[derive(Clone)]
pub struct Arena<'js> {
    pub(crate) inner: Rc<ArenaInner<'js>>,
}

/// A non-owning reference to an arena, for closures stored in the guest.
#[derive(Clone)]
pub struct WeakArena<'js>(Weak<ArenaInner<'js>>);

impl<'js> WeakArena<'js> {
    /// The arena, unless it was dropped or disposed.
    pub fn upgrade(&self) -> Option<Arena<'js>> {
        self.0
            .upgrade()
            .filter(|inner| !inner.disposed.get())
            .map(|inner| Arena { inner })
    }
}

impl<'js> Arena<'js> {
    pub fn new(ctx: Ctx<'js>, options: ArenaOptions) -> BridgeResult<Self> {
        let intrinsics = Intrinsics::load(&ctx)?;
        let table = CorrelationTable::new(&ctx)?;
        let mut all_serializers = serializers::builtin();
        all_serializers.extend(options.serializers.iter().cloned());
        let id = ContextId::next();

        let arena = Arena {
            inner: Rc::new(ArenaInner {
                ctx,
                id,
                intrinsics,
                table: RefCell::new(table),
                registered: RefCell::new(Vec::new()),
                host_functions: RefCell::new(HashMap::new()),
                deferreds: RefCell::new(HashMap::new()),
                observed: RefCell::new(HashMap::new()),
                synced: RefCell::new(HashMap::new()),
                wrappers: RefCell::new(HashMap::new()),
                mutations: unbounded(),
                settlements: unbounded(),
                dispatchers: RefCell::new(None),
                serializers: all_serializers,
                options,
                next_observer: Cell::new(1),
                disposed: Cell::new(false),
            }),
        };
        arena.install_dispatchers()?;
        arena.register_well_known_symbols()?;
        debug!(context = %id, "arena created");
        Ok(arena)
    }

    fn upgrade(weak: &Weak<ArenaInner<'js>>, ctx: &Ctx<'js>) -> rquickjs::Result<Arena<'js>> {
        match weak.upgrade() {
            Some(inner) if !inner.disposed.get() => Ok(Arena { inner }),
            _ => Err(Exception::throw_internal(ctx, "sandbox bridge has been disposed")),
        }
    }

    fn install_dispatchers(&self) -> BridgeResult<()> {
        let ctx = self.inner.ctx.clone();

        let weak = Rc::downgrade(&self.inner);
        let host = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>,
                  id: f64,
                  is_new: bool,
                  this: JsValue<'js>,
                  args: Array<'js>|
                  -> rquickjs::Result<JsValue<'js>> {
                let arena = Arena::upgrade(&weak, &ctx)?;
                arena
                    .invoke_host(id as u64, is_new, this, args)
                    .map_err(|e| arena.throw(e))
            },
        )?;

        let weak = Rc::downgrade(&self.inner);
        let sync = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>,
                  code: f64,
                  id: f64,
                  key: JsValue<'js>,
                  value: JsValue<'js>|
                  -> rquickjs::Result<JsValue<'js>> {
                let arena = Arena::upgrade(&weak, &ctx)?;
                arena
                    .dispatch_sync(code as u8, id as ObjectId, key, value)
                    .map_err(|e| arena.throw(e))
            },
        )?;

        let weak = Rc::downgrade(&self.inner);
        let settle = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, id: f64, ok: bool, value: JsValue<'js>| -> rquickjs::Result<()> {
                let arena = Arena::upgrade(&weak, &ctx)?;
                arena
                    .settle_observed(id as u64, ok, value)
                    .map_err(|e| arena.throw(e))
            },
        )?;

        *self.inner.dispatchers.borrow_mut() = Some(Dispatchers { host, sync, settle });
        Ok(())
    }

    fn register_well_known_symbols(&self) -> BridgeResult<()> {
        let guest: Array<'js> = self.intrinsics().well_known_symbols.call(())?;
        let mut registered = self.inner.registered.borrow_mut();
        for (index, (_, host)) in Symbol::well_known().iter().enumerate() {
            let symbol: JsValue<'js> = guest.get(index)?;
            registered.push((Value::Symbol(host.clone()), Handle::new(symbol)));
        }
        Ok(())
    }

    pub fn downgrade(&self) -> WeakArena<'js> {
        WeakArena(Rc::downgrade(&self.inner))
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn ctx(&self) -> &Ctx<'js> {
        &self.inner.ctx
    }

    pub(crate) fn intrinsics(&self) -> &Intrinsics<'js> {
        &self.inner.intrinsics
    }

    pub(crate) fn dispatchers<T>(&self, pick: impl FnOnce(&Dispatchers<'js>) -> T) -> BridgeResult<T> {
        self.inner
            .dispatchers
            .borrow()
            .as_ref()
            .map(pick)
            .ok_or(BridgeError::Disposed)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub(crate) fn ensure_alive(&self) -> BridgeResult<()> {
        if self.is_disposed() {
            Err(BridgeError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Number of live correlation entries.
    pub fn correlated(&self) -> usize {
        self.inner.table.borrow().len()
    }

    /// Host value → guest handle.
    pub fn marshal(&self, value: &Value) -> BridgeResult<Handle<'js>> {
        self.ensure_alive()?;
        Ok(Handle::new(self.to_guest(value)?))
    }

    /// Guest handle → host value.
    pub fn unmarshal(&self, handle: &Handle<'js>) -> BridgeResult<Value> {
        self.ensure_alive()?;
        let guest = handle.value().ok_or(BridgeError::Disposed)?;
        self.from_guest(guest)
    }

    /// VM identity of two handles.
    pub fn same_value(&self, a: &Handle<'js>, b: &Handle<'js>) -> BridgeResult<bool> {
        match (a.value(), b.value()) {
            (Some(a), Some(b)) => Ok(self.intrinsics().is.call((a, b))?),
            _ => Ok(false),
        }
    }

    /// Evaluate `source` as a module and return its default export. A
    /// default export that is still pending (top-level await, or an exported
    /// promise) comes back as [`Value::Future`].
    pub fn eval_code(&self, source: &str, name: &str) -> BridgeResult<Value> {
        self.ensure_alive()?;
        self.flush_mutations()?;
        self.process_settlements()?;
        let ctx = self.inner.ctx.clone();

        let declared = match Module::declare(ctx.clone(), name, source) {
            Ok(module) => module,
            Err(err) => {
                return Err(match self.catch(err.into()) {
                    BridgeError::Thrown(value) => BridgeError::Syntax(value),
                    other => other,
                });
            }
        };
        let (module, promise) = declared.eval().map_err(|e| self.catch(e.into()))?;
        let namespace = module.namespace().map_err(|e| self.catch(e.into()))?;
        let promise = promise.into_js(&ctx)?;
        let state: Object<'js> = self
            .intrinsics()
            .module_result
            .call((promise, namespace))
            .map_err(|e| self.catch(e.into()))?;
        self.drain_jobs(None);
        self.flush_mutations()?;

        if state.get::<_, bool>("done")? {
            let value = self.from_guest(state.get("value")?)?;
            return if state.get::<_, bool>("ok")? {
                Ok(value)
            } else {
                Err(BridgeError::Thrown(value))
            };
        }
        self.from_guest(state.get("promise")?)
    }

    /// Marshal each binding onto `globalThis`. Exposed values are not synced.
    pub fn expose<K: AsRef<str>>(&self, bindings: impl IntoIterator<Item = (K, Value)>) -> BridgeResult<()> {
        self.ensure_alive()?;
        let globals = self.inner.ctx.globals();
        for (name, value) in bindings {
            let guest = self.to_guest(&value)?;
            globals.set(name.as_ref(), guest)?;
        }
        Ok(())
    }

    /// Bind `value` permanently to a guest value. Registered pairs are looked
    /// up before the table and never disposed by it.
    pub fn register(&self, value: Value, target: Registration<'_, 'js>) -> BridgeResult<()> {
        self.ensure_alive()?;
        let handle = match target {
            Registration::Code(code) => {
                let guest: JsValue<'js> = self
                    .inner
                    .ctx
                    .eval(code)
                    .map_err(|e| self.catch(e.into()))?;
                Handle::new(guest)
            }
            Registration::Handle(handle) => handle,
        };
        self.inner.registered.borrow_mut().push((value, handle));
        Ok(())
    }

    pub(crate) fn registered_guest(&self, value: &Value) -> Option<JsValue<'js>> {
        self.inner
            .registered
            .borrow()
            .iter()
            .find(|(host, _)| host == value)
            .and_then(|(_, handle)| handle.value())
    }

    pub(crate) fn registered_host(&self, guest: &JsValue<'js>) -> BridgeResult<Option<Value>> {
        let candidates: Vec<(Value, JsValue<'js>)> = self
            .inner
            .registered
            .borrow()
            .iter()
            .filter_map(|(host, handle)| handle.value().map(|g| (host.clone(), g)))
            .collect();
        for (host, candidate) in candidates {
            if self.intrinsics().is.call::<_, bool>((candidate, guest.clone()))? {
                return Ok(Some(host));
            }
        }
        Ok(None)
    }

    /// Apply queued sync writes and host settlements, then run up to `max`
    /// guest jobs (all of them for `None`). Returns how many jobs ran.
    pub fn execute_pending_jobs(&self, max: Option<usize>) -> BridgeResult<usize> {
        self.ensure_alive()?;
        self.flush_mutations()?;
        self.process_settlements()?;
        let ran = self.drain_jobs(max);
        self.flush_mutations()?;
        Ok(ran)
    }

    pub(crate) fn drain_jobs(&self, max: Option<usize>) -> usize {
        let mut ran = 0;
        while max.is_none_or(|max| ran < max) && self.inner.ctx.execute_pending_job() {
            ran += 1;
        }
        ran
    }

    /// Block up to `timeout` for one host future to settle and deliver it.
    pub fn wait_for_settlement(&self, timeout: Duration) -> BridgeResult<bool> {
        self.ensure_alive()?;
        match self.inner.settlements.1.recv_timeout(timeout) {
            Ok(message) => {
                self.deliver(message)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Drop settlements that arrived but were not delivered. Used by
    /// teardown, after which the guest must not run again.
    pub fn discard_settlements(&self) -> usize {
        self.inner.settlements.1.try_iter().count()
    }

    pub(crate) fn process_settlements(&self) -> BridgeResult<usize> {
        let mut delivered = 0;
        while let Ok(message) = self.inner.settlements.1.try_recv() {
            self.deliver(message)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Settle the guest deferred of a host future, then drain the job queue
    /// fully so continuations resume in settlement order.
    fn deliver(&self, message: SettlementMessage) -> BridgeResult<()> {
        let deferred = self.inner.deferreds.borrow_mut().remove(&message.future);
        let Some(deferred) = deferred else {
            return Ok(());
        };
        let (callback, value) = match message.outcome {
            Ok(value) => (deferred.resolve, value),
            Err(reason) => (deferred.reject, reason),
        };
        let value = self.to_guest(&value)?;
        callback.call::<_, ()>((value,))?;
        self.drain_jobs(None);
        Ok(())
    }

    pub(crate) fn track_future(&self, future: &JsFuture, promise: &Object<'js>) -> BridgeResult<()> {
        let resolve: Function<'js> = promise.get("resolve")?;
        let reject: Function<'js> = promise.get("reject")?;
        self.inner
            .deferreds
            .borrow_mut()
            .insert(future.id(), Deferred { resolve, reject });
        let sender = self.inner.settlements.0.clone();
        let future_id = future.id();
        future.on_settle(move |outcome| {
            let _ = sender.send(SettlementMessage {
                future: future_id,
                outcome: outcome.clone(),
            });
        });
        Ok(())
    }

    /// Subscribe `future` to a guest promise.
    pub(crate) fn observe_promise(&self, promise: JsValue<'js>, future: &JsFuture) -> BridgeResult<()> {
        let id = self.inner.next_observer.get();
        self.inner.next_observer.set(id + 1);
        self.inner.observed.borrow_mut().insert(id, future.clone());
        let settle = self.dispatchers(|d| d.settle.clone())?;
        self.intrinsics()
            .observe
            .call::<_, ()>((promise, id as f64, settle))?;
        Ok(())
    }

    fn settle_observed(&self, id: u64, ok: bool, value: JsValue<'js>) -> BridgeResult<()> {
        let future = self.inner.observed.borrow_mut().remove(&id);
        if let Some(future) = future {
            let value = self.from_guest(value)?;
            future.settle(if ok { Ok(value) } else { Err(value) });
        }
        Ok(())
    }

    /// Guest call into a host function.
    fn invoke_host(
        &self,
        id: u64,
        is_new: bool,
        this: JsValue<'js>,
        args: Array<'js>,
    ) -> BridgeResult<JsValue<'js>> {
        let function = self
            .inner
            .host_functions
            .borrow()
            .get(&id)
            .cloned()
            .ok_or(BridgeError::UnknownFunction(id))?;
        let mut host_args = Vec::with_capacity(args.len());
        for index in 0..args.len() {
            host_args.push(self.from_guest(args.get(index)?)?);
        }

        let outcome = if is_new {
            match function.construct(self, host_args) {
                Ok(Value::Object(instance)) if function.is_class() => {
                    self.adopt_instance(&instance, this)?;
                    Ok(Value::Undefined)
                }
                other => other,
            }
        } else {
            let this = self.from_guest(this)?;
            function.call(self, this, host_args)
        };
        self.flush_mutations()?;
        match outcome {
            Ok(value) => self.to_guest(&value),
            Err(reason) => Err(BridgeError::Thrown(reason)),
        }
    }

    /// Copy a host-built instance's own properties onto the guest `this` of
    /// a `new` call and correlate the two.
    fn adopt_instance(&self, instance: &JsObject, this: JsValue<'js>) -> BridgeResult<()> {
        for (key, property) in instance.properties() {
            self.define_on_guest(&this, &key, &property)?;
        }
        let host = Value::Object(instance.clone());
        self.inner
            .table
            .borrow_mut()
            .set(&host, Handle::new(this), None, None)?;
        Ok(())
    }

    /// Call a function from the host. Guest-backed functions run in the
    /// guest; host functions run directly.
    pub fn call(&self, function: &JsFunction, this: Value, args: Vec<Value>) -> BridgeResult<Value> {
        self.ensure_alive()?;
        if !function.is_guest() {
            return function.call(self, this, args).map_err(BridgeError::Thrown);
        }
        let callee = self.guest_function(function)?;
        let this = self.to_guest(&this)?;
        let args = self.guest_args(&args)?;
        let result = self.intrinsics().apply.call::<_, JsValue<'js>>((callee, this, args));
        match result {
            Ok(value) => self.from_guest(value),
            Err(err) => Err(self.catch(err.into())),
        }
    }

    /// `new function(...args)`. With `this`, the constructed object's own
    /// properties are copied onto it as well.
    pub fn construct(
        &self,
        function: &JsFunction,
        args: Vec<Value>,
        this: Option<&JsObject>,
    ) -> BridgeResult<Value> {
        self.ensure_alive()?;
        let constructed = if function.is_guest() {
            let callee = self.guest_function(function)?;
            let args = self.guest_args(&args)?;
            match self
                .intrinsics()
                .construct
                .call::<_, JsValue<'js>>((callee, args))
            {
                Ok(value) => self.from_guest(value)?,
                Err(err) => return Err(self.catch(err.into())),
            }
        } else {
            function.construct(self, args).map_err(BridgeError::Thrown)?
        };
        if let (Some(this), Value::Object(instance)) = (this, &constructed) {
            for (key, property) in instance.properties() {
                this.define(key, property);
            }
        }
        Ok(constructed)
    }

    fn guest_function(&self, function: &JsFunction) -> BridgeResult<JsValue<'js>> {
        let handle = self
            .inner
            .table
            .borrow_mut()
            .get(&Value::Function(function.clone()))?;
        handle
            .and_then(|h| h.value())
            .ok_or(BridgeError::UnknownFunction(function.id()))
    }

    fn guest_args(&self, args: &[Value]) -> BridgeResult<JsValue<'js>> {
        let items = args
            .iter()
            .map(|arg| self.to_guest(arg))
            .collect::<BridgeResult<Vec<_>>>()?;
        self.guest_array(items)
    }

    pub fn guest_array(&self, items: Vec<JsValue<'js>>) -> BridgeResult<JsValue<'js>> {
        let array = Array::new(self.inner.ctx.clone())?;
        for (index, item) in items.into_iter().enumerate() {
            array.set(index, item)?;
        }
        Ok(array.into_value())
    }

    /// Run a host future for the guest and track it as a pending call until
    /// it settles.
    fn spawn_host(&self, future: BoxFuture<'static, Settlement>) -> JsFuture {
        let runtime = self
            .inner
            .options
            .tokio
            .clone()
            .or_else(|| tokio::runtime::Handle::try_current().ok());
        let Some(runtime) = runtime else {
            warn!(context = %self.id(), "async host function called without a tokio runtime");
            return JsFuture::rejected(Value::Error(ErrorValue::new(
                "Error",
                "no async runtime available for host call",
            )));
        };
        let js_future = JsFuture::new();
        let context = self.id();
        let future_id = js_future.id();
        pending::register(context, &js_future);
        js_future.on_settle(move |_| pending::unregister(context, future_id));
        let task = JsFuture::spawn_into(&runtime, js_future.clone(), future);
        pending::attach_task(context, &js_future, task.abort_handle());
        js_future
    }

    /// Turn a pending guest exception into [`BridgeError::Thrown`]. Other
    /// errors pass through.
    pub fn catch(&self, err: BridgeError) -> BridgeError {
        match err {
            BridgeError::Engine(rquickjs::Error::Exception) => {
                let thrown = self.inner.ctx.catch();
                match self.from_guest(thrown) {
                    Ok(value) => BridgeError::Thrown(value),
                    Err(_) => {
                        // Unmarshaling itself was interrupted; keep the ctx clean.
                        let _ = self.inner.ctx.catch();
                        BridgeError::Thrown(Value::Error(ErrorValue::new(
                            "InternalError",
                            "guest exception could not be read",
                        )))
                    }
                }
            }
            other => other,
        }
    }

    /// Turn a host-side failure into a guest exception.
    pub fn throw(&self, err: BridgeError) -> rquickjs::Error {
        match err {
            BridgeError::Engine(engine) => engine,
            other => {
                let message = other.to_string();
                match self.to_guest(&other.to_value()) {
                    Ok(value) => self.inner.ctx.throw(value),
                    Err(BridgeError::Engine(engine)) => engine,
                    Err(_) => Exception::throw_internal(&self.inner.ctx, &message),
                }
            }
        }
    }

    /// Throw a host value into the guest.
    pub fn throw_value(&self, value: &Value) -> rquickjs::Error {
        self.throw(BridgeError::Thrown(value.clone()))
    }

    /// Release everything the arena owns. The guest context must outlive
    /// this call. Disposing twice is a no-op.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.inner.dispatchers.borrow_mut().take();
        if let Err(err) = self.inner.table.borrow_mut().clear() {
            warn!(context = %self.id(), error = %err, "failed to clear correlation table");
        }
        for (_, handle) in self.inner.registered.borrow_mut().drain(..) {
            handle.release();
        }
        self.inner.host_functions.borrow_mut().clear();
        self.inner.deferreds.borrow_mut().clear();
        let observed: Vec<JsFuture> = self
            .inner
            .observed
            .borrow_mut()
            .drain()
            .map(|(_, future)| future)
            .collect();
        for future in observed {
            future.reject(Value::Error(ErrorValue::new(
                "Error",
                "sandbox disposed before the guest promise settled",
            )));
        }
        self.inner.synced.borrow_mut().clear();
        self.inner.wrappers.borrow_mut().clear();
        let dropped_mutations = self.inner.mutations.1.try_iter().count();
        let dropped_settlements = self.discard_settlements();
        debug!(
            context = %self.id(),
            dropped_mutations,
            dropped_settlements,
            "arena disposed"
        );
    }
}

impl<'js> GuestCall for Arena<'js> {
    fn call_guest(&self, function: &JsFunction, this: Value, args: Vec<Value>) -> Result<Value, Value> {
        self.call(function, this, args).map_err(|e| e.to_value())
    }

    fn construct_guest(&self, function: &JsFunction, args: Vec<Value>) -> Result<Value, Value> {
        self.construct(function, args, None).map_err(|e| e.to_value())
    }

    fn spawn(&self, future: BoxFuture<'static, Settlement>) -> JsFuture {
        self.spawn_host(future)
    }
}
