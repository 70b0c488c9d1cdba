//! Live two-way synchronization.
//!
//! An object opted into sync is represented in the guest by a `Proxy` whose
//! `set`/`deleteProperty` traps report back through one dispatch function,
//! and on the host by a [`SyncedObject`] that queues its writes for the guest.
//! The arena drains that queue before control re-enters the guest.
//!
//! | mode                 | host write           | guest write          |
//! |----------------------|----------------------|----------------------|
//! | `HostAuthoritative`  | host only            | guest, then host     |
//! | `GuestAuthoritative` | guest only           | guest only           |
//! | `Bidirectional`      | host and guest       | guest, then host     |
//!
//! The mode is asked for on every mutation. Writes to `__proto__` are
//! ignored on both sides.

use crate::arena::Arena;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::object::{JsObject, ObjectId, Property, PropertyKey};
use crate::value::Value;
use crossbeam_channel::Sender;
use rquickjs::Value as JsValue;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) const PROTO_KEY: &str = "__proto__";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    HostAuthoritative,
    GuestAuthoritative,
    #[default]
    Bidirectional,
}

impl SyncMode {
    fn code(self) -> &'static str {
        match self {
            SyncMode::HostAuthoritative => "host",
            SyncMode::GuestAuthoritative => "guest",
            SyncMode::Bidirectional => "both",
        }
    }

    /// Whether a write made on the host reaches the guest.
    pub fn host_writes_reach_guest(self) -> bool {
        self != SyncMode::HostAuthoritative
    }

    /// Whether a write made on the host lands on the host object.
    pub fn host_writes_stay_on_host(self) -> bool {
        self != SyncMode::GuestAuthoritative
    }

    /// Whether a write made in the guest reaches the host.
    pub fn guest_writes_reach_host(self) -> bool {
        self != SyncMode::GuestAuthoritative
    }
}

pub type SyncPolicy = Arc<dyn Fn(&JsObject) -> SyncMode + Send + Sync>;

pub(crate) enum Mutation {
    Set {
        target: JsObject,
        key: PropertyKey,
        value: Value,
    },
    Delete {
        target: JsObject,
        key: PropertyKey,
    },
}

struct SyncedInner {
    target: JsObject,
    sink: Sender<Mutation>,
    policy: SyncPolicy,
}

/// Host-side live wrapper. Clones share one wrapper.
#[derive(Clone)]
pub struct SyncedObject {
    inner: Arc<SyncedInner>,
}

fn is_proto_key(key: &PropertyKey) -> bool {
    key.as_str() == Some(PROTO_KEY)
}

impl SyncedObject {
    pub(crate) fn new(target: JsObject, sink: Sender<Mutation>, policy: SyncPolicy) -> Self {
        Self {
            inner: Arc::new(SyncedInner {
                target,
                sink,
                policy,
            }),
        }
    }

    /// The wrapped host object.
    pub fn target(&self) -> &JsObject {
        &self.inner.target
    }

    pub fn mode(&self) -> SyncMode {
        (self.inner.policy)(&self.inner.target)
    }

    pub fn get(&self, key: impl Into<PropertyKey>) -> Value {
        self.inner.target.get(key)
    }

    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> bool {
        let key = key.into();
        if is_proto_key(&key) {
            return false;
        }
        let value = value.into();
        let mode = self.mode();
        let applied = if mode.host_writes_stay_on_host() {
            self.inner.target.set(key.clone(), value.clone())
        } else {
            true
        };
        if applied && mode.host_writes_reach_guest() {
            // The receiver only goes away with the arena; writes after that
            // have nowhere to go.
            let _ = self.inner.sink.send(Mutation::Set {
                target: self.inner.target.clone(),
                key,
                value,
            });
        }
        applied
    }

    pub fn delete(&self, key: impl Into<PropertyKey>) -> bool {
        let key = key.into();
        if is_proto_key(&key) {
            return false;
        }
        let mode = self.mode();
        let applied = if mode.host_writes_stay_on_host() {
            self.inner.target.delete(key.clone())
        } else {
            true
        };
        if applied && mode.host_writes_reach_guest() {
            let _ = self.inner.sink.send(Mutation::Delete {
                target: self.inner.target.clone(),
                key,
            });
        }
        applied
    }

    pub fn ptr_eq(&self, other: &SyncedObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SyncedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedObject")
            .field("target", &self.inner.target)
            .field("mode", &self.mode())
            .finish()
    }
}

/// Dispatch codes shared with the proxy traps in `intrinsics.js`.
const DISPATCH_MODE: u8 = 0;
const DISPATCH_SET: u8 = 1;
const DISPATCH_DELETE: u8 = 2;

impl<'js> Arena<'js> {
    /// Opt the object graph reachable from `value` into live sync and return
    /// the host wrapper of its root. Every reachable object is marked before
    /// any wrapper exists, so nested objects marshal as proxies too.
    pub fn sync(&self, value: &Value) -> BridgeResult<SyncedObject> {
        self.ensure_alive()?;
        let root = match value {
            Value::Object(object) => object.clone(),
            other => return Err(BridgeError::NotSyncable(other.type_name())),
        };
        let mut seen = HashSet::new();
        let mut stack = vec![root.clone()];
        while let Some(object) = stack.pop() {
            if !seen.insert(object.id()) {
                continue;
            }
            for (_, property) in object.properties() {
                if let Property::Data {
                    value: Value::Object(child),
                    ..
                } = property
                {
                    stack.push(child);
                }
            }
            if let Some(proto) = object.proto() {
                stack.push(proto);
            }
            self.mark_synced(&object)?;
        }
        debug!(context = %self.id(), objects = seen.len(), "object graph opted into sync");
        self.wrap(&root)
    }

    /// Host-side wrapper for `object`. Wrapping again returns the same
    /// wrapper.
    pub fn wrap(&self, object: &JsObject) -> BridgeResult<SyncedObject> {
        self.ensure_alive()?;
        if let Some(existing) = self.inner.wrappers.borrow().get(&object.id()) {
            return Ok(existing.clone());
        }
        self.mark_synced(object)?;
        let wrapper = SyncedObject::new(
            object.clone(),
            self.inner.mutations.0.clone(),
            self.inner.options.sync_mode.clone(),
        );
        self.inner
            .wrappers
            .borrow_mut()
            .insert(object.id(), wrapper.clone());
        Ok(wrapper)
    }

    /// Guest-side wrapper: a proxy around `handle` that reports mutations to
    /// `object`. Returns the existing proxy when `object` already has one.
    pub fn wrap_handle(&self, object: &JsObject, handle: &Handle<'js>) -> BridgeResult<Handle<'js>> {
        self.ensure_alive()?;
        let host = Value::Object(object.clone());
        let existing_proxy = {
            let mut table = self.inner.table.borrow_mut();
            match table.get_alternate(&host)? {
                Some(_) => table.get(&host)?,
                None => None,
            }
        };
        if let Some(proxy) = existing_proxy {
            return proxy.dup().ok_or(BridgeError::Disposed);
        }
        let target = handle.value().ok_or(BridgeError::Disposed)?;
        self.inner
            .synced
            .borrow_mut()
            .insert(object.id(), object.clone());
        let proxy = self.make_proxy(target, object.id())?;
        let proxy_handle = Handle::new(proxy);
        {
            let mut table = self.inner.table.borrow_mut();
            table.delete(&host, false)?;
            table.set(&host, proxy_handle.clone(), None, Some(handle.clone()))?;
        }
        proxy_handle.dup().ok_or(BridgeError::Disposed)
    }

    pub(crate) fn is_synced(&self, object: &JsObject) -> bool {
        self.inner.synced.borrow().contains_key(&object.id())
    }

    pub(crate) fn make_proxy(&self, target: JsValue<'js>, id: ObjectId) -> BridgeResult<JsValue<'js>> {
        let dispatch = self.dispatchers(|d| d.sync.clone())?;
        Ok(self
            .intrinsics()
            .make_proxy
            .call((target, id as f64, dispatch))?)
    }

    /// Mark one object as synced. If it was already marshaled as a plain
    /// guest object, that object becomes the target of a new proxy.
    fn mark_synced(&self, object: &JsObject) -> BridgeResult<()> {
        let newly_marked = self
            .inner
            .synced
            .borrow_mut()
            .insert(object.id(), object.clone())
            .is_none();
        if !newly_marked {
            return Ok(());
        }
        let host = Value::Object(object.clone());
        let plain = {
            let mut table = self.inner.table.borrow_mut();
            match table.get_alternate(&host)? {
                Some(_) => None,
                None => table.get(&host)?,
            }
        };
        if let Some(plain) = plain {
            let target = plain.value().ok_or(BridgeError::Disposed)?;
            let proxy = self.make_proxy(target, object.id())?;
            let mut table = self.inner.table.borrow_mut();
            table.delete(&host, false)?;
            table.set(&host, Handle::new(proxy), None, Some(plain))?;
        }
        Ok(())
    }

    /// Apply queued host-side writes to the guest. Writes go to the raw
    /// proxy target so the traps do not echo them back.
    pub(crate) fn flush_mutations(&self) -> BridgeResult<usize> {
        let mut applied = 0;
        while let Ok(mutation) = self.inner.mutations.1.try_recv() {
            let (target, key) = match &mutation {
                Mutation::Set { target, key, .. } | Mutation::Delete { target, key } => {
                    (target.clone(), key.clone())
                }
            };
            let host = Value::Object(target);
            let raw = {
                let mut table = self.inner.table.borrow_mut();
                match table.get_alternate(&host)? {
                    Some(raw) => Some(raw),
                    None => table.get(&host)?,
                }
            };
            let Some(raw) = raw.and_then(|h| h.value()) else {
                trace!("dropping mutation for an object the guest has not seen");
                continue;
            };
            let guest_key = self.key_to_guest(&key)?;
            match mutation {
                Mutation::Set { value, .. } => {
                    let value = self.to_guest(&value)?;
                    self.intrinsics()
                        .set
                        .call::<_, bool>((raw, guest_key, value))?;
                }
                Mutation::Delete { .. } => {
                    self.intrinsics()
                        .remove
                        .call::<_, bool>((raw, guest_key))?;
                }
            }
            applied += 1;
        }
        Ok(applied)
    }

    /// Entry point for the proxy traps.
    pub(crate) fn dispatch_sync(
        &self,
        code: u8,
        id: ObjectId,
        key: JsValue<'js>,
        value: JsValue<'js>,
    ) -> BridgeResult<JsValue<'js>> {
        let target = self.inner.synced.borrow().get(&id).cloned();
        let Some(target) = target else {
            return self.to_guest(&Value::from(SyncMode::GuestAuthoritative.code()));
        };
        let mode = (self.inner.options.sync_mode)(&target);
        match code {
            DISPATCH_MODE => self.to_guest(&Value::from(mode.code())),
            DISPATCH_SET | DISPATCH_DELETE if mode.guest_writes_reach_host() => {
                let key = self.key_from_guest(key)?;
                if !is_proto_key(&key) {
                    if code == DISPATCH_SET {
                        let value = self.from_guest(value)?;
                        target.set_with(key, value, self).map_err(BridgeError::Thrown)?;
                    } else {
                        target.delete(key);
                    }
                }
                self.to_guest(&Value::Undefined)
            }
            _ => self.to_guest(&Value::Undefined),
        }
    }
}
