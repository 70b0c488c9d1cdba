//! Host-side functions.
//!
//! A [`JsFunction`] is either implemented in Rust (sync, async or
//! class-shaped) or backed by a guest function that can only be invoked
//! through the arena that produced it. Calls that need the guest go through
//! the [`GuestCall`] trait, so host code never holds guest handles directly.

use crate::future::JsFuture;
use crate::value::{ErrorValue, Value};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

pub type NativeFn = dyn Fn(&Invocation, &dyn GuestCall) -> Result<Value, Value> + Send + Sync;
pub type AsyncFn = dyn Fn(Invocation) -> BoxFuture<'static, Result<Value, Value>> + Send + Sync;

/// Arguments of one call.
#[derive(Clone, Debug, Default)]
pub struct Invocation {
    pub this: Value,
    pub args: Vec<Value>,
    pub is_construct: bool,
}

impl Invocation {
    pub fn new(this: Value, args: Vec<Value>) -> Self {
        Self {
            this,
            args,
            is_construct: false,
        }
    }

    /// Argument `index`, `undefined` when missing.
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }
}

/// Access to the guest from inside a host call.
pub trait GuestCall {
    fn call_guest(&self, function: &JsFunction, this: Value, args: Vec<Value>)
    -> Result<Value, Value>;

    fn construct_guest(&self, function: &JsFunction, args: Vec<Value>) -> Result<Value, Value>;

    /// Run a host future and hand back the future's host-side value.
    fn spawn(&self, future: BoxFuture<'static, Result<Value, Value>>) -> JsFuture;
}

/// Used when no guest is reachable: guest-backed functions fail, async
/// functions run on the ambient tokio runtime if there is one.
pub struct NoGuest;

impl GuestCall for NoGuest {
    fn call_guest(&self, function: &JsFunction, _: Value, _: Vec<Value>) -> Result<Value, Value> {
        Err(detached(function))
    }

    fn construct_guest(&self, function: &JsFunction, _: Vec<Value>) -> Result<Value, Value> {
        Err(detached(function))
    }

    fn spawn(&self, future: BoxFuture<'static, Result<Value, Value>>) -> JsFuture {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => JsFuture::spawn(&handle, future).0,
            Err(_) => JsFuture::rejected(Value::Error(ErrorValue::new(
                "Error",
                "no async runtime available to run host future",
            ))),
        }
    }
}

fn detached(function: &JsFunction) -> Value {
    Value::Error(ErrorValue::type_error(format!(
        "guest function '{}' is not reachable from here",
        function.name()
    )))
}

enum FunctionKind {
    Native(Arc<NativeFn>),
    Async(Arc<AsyncFn>),
    Class(Arc<NativeFn>),
    Guest { is_class: bool },
}

pub(crate) struct FunctionInner {
    id: u64,
    name: String,
    kind: FunctionKind,
}

#[derive(Clone)]
pub struct JsFunction {
    inner: Arc<FunctionInner>,
}

impl JsFunction {
    fn with_kind(name: impl Into<String>, kind: FunctionKind) -> Self {
        Self {
            inner: Arc::new(FunctionInner {
                id: NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                kind,
            }),
        }
    }

    pub fn native<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Invocation, &dyn GuestCall) -> Result<Value, Value> + Send + Sync + 'static,
    {
        Self::with_kind(name, FunctionKind::Native(Arc::new(f)))
    }

    /// A host function returning a future. The guest sees a promise.
    pub fn asynchronous<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Value>> + Send + 'static,
    {
        let f: Arc<AsyncFn> = Arc::new(move |inv| Box::pin(f(inv)));
        Self::with_kind(name, FunctionKind::Async(f))
    }

    /// A class-shaped host function. `ctor` produces the instance; it only
    /// runs for `new` calls, plain calls throw a `TypeError`.
    pub fn class<F>(name: impl Into<String>, ctor: F) -> Self
    where
        F: Fn(&Invocation, &dyn GuestCall) -> Result<Value, Value> + Send + Sync + 'static,
    {
        Self::with_kind(name, FunctionKind::Class(Arc::new(ctor)))
    }

    pub(crate) fn guest(name: impl Into<String>, is_class: bool) -> Self {
        Self::with_kind(name, FunctionKind::Guest { is_class })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_class(&self) -> bool {
        matches!(
            self.inner.kind,
            FunctionKind::Class(_) | FunctionKind::Guest { is_class: true }
        )
    }

    pub fn is_async(&self) -> bool {
        matches!(self.inner.kind, FunctionKind::Async(_))
    }

    /// Whether this function is backed by a guest function.
    pub fn is_guest(&self) -> bool {
        matches!(self.inner.kind, FunctionKind::Guest { .. })
    }

    pub fn ptr_eq(&self, other: &JsFunction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn downgrade(&self) -> Weak<FunctionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<FunctionInner>) -> Self {
        Self { inner }
    }

    pub fn call(&self, guest: &dyn GuestCall, this: Value, args: Vec<Value>) -> Result<Value, Value> {
        match &self.inner.kind {
            FunctionKind::Native(f) => f(&Invocation::new(this, args), guest),
            FunctionKind::Async(f) => Ok(Value::Future(guest.spawn(f(Invocation::new(this, args))))),
            FunctionKind::Class(_) => Err(Value::Error(ErrorValue::type_error(format!(
                "Class constructor {} cannot be invoked without 'new'",
                self.name()
            )))),
            FunctionKind::Guest { .. } => guest.call_guest(self, this, args),
        }
    }

    pub fn construct(&self, guest: &dyn GuestCall, args: Vec<Value>) -> Result<Value, Value> {
        let invocation = Invocation {
            this: Value::Undefined,
            args,
            is_construct: true,
        };
        match &self.inner.kind {
            FunctionKind::Class(f) | FunctionKind::Native(f) => f(&invocation, guest),
            FunctionKind::Async(_) => Err(Value::Error(ErrorValue::type_error(format!(
                "{} is not a constructor",
                self.name()
            )))),
            FunctionKind::Guest { .. } => guest.construct_guest(self, invocation.args),
        }
    }
}

impl PartialEq for JsFunction {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner.kind {
            FunctionKind::Native(_) => "native",
            FunctionKind::Async(_) => "async",
            FunctionKind::Class(_) => "class",
            FunctionKind::Guest { .. } => "guest",
        };
        f.debug_struct("JsFunction")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &kind)
            .finish()
    }
}
