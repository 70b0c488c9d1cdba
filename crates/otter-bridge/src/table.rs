//! Correlation table: host identity ↔ guest handle.
//!
//! Host keys are held weakly (symbols excepted), so a lookup never keeps a
//! host object alive. The reverse index lives in the guest as a `WeakMap`
//! (plus a `Map` for symbols) from guest value to entry id. Nothing sweeps the
//! table: an entry whose host key died or whose handle was disposed is pruned
//! by the next lookup that reaches it.

use crate::error::BridgeResult;
use crate::function::{FunctionInner, JsFunction};
use crate::future::{FutureInner, JsFuture};
use crate::handle::Handle;
use crate::object::{JsObject, ObjectInner};
use crate::symbol::Symbol;
use crate::value::Value;
use rquickjs::{Ctx, Function, Object, Value as JsValue};
use std::collections::HashMap;
use std::sync::Weak;
use tracing::trace;

pub type EntryId = u64;

const INDEX_SOURCE: &str = r#"(() => {
  const objects = new WeakMap();
  const symbols = new Map();
  const pick = (v) => (typeof v === 'symbol' ? symbols : objects);
  return {
    get: (v) => pick(v).get(v),
    set: (v, id) => { pick(v).set(v, id); },
    remove: (v) => { pick(v).delete(v); },
    is: (a, b) => Object.is(a, b),
  };
})()"#;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum KeyKind {
    Object,
    Function,
    Future,
    Symbol,
}

#[derive(Clone)]
enum HostKey {
    Object(Weak<ObjectInner>),
    Function(Weak<FunctionInner>),
    Future(Weak<FutureInner>),
    Symbol(Symbol),
}

impl HostKey {
    fn of(value: &Value) -> Option<(KeyKind, usize, HostKey)> {
        match value {
            Value::Object(o) => Some((KeyKind::Object, o.addr(), HostKey::Object(o.downgrade()))),
            Value::Function(f) => Some((
                KeyKind::Function,
                f.addr(),
                HostKey::Function(f.downgrade()),
            )),
            Value::Future(f) => Some((KeyKind::Future, f.addr(), HostKey::Future(f.downgrade()))),
            Value::Symbol(s) => Some((KeyKind::Symbol, s.addr(), HostKey::Symbol(s.clone()))),
            _ => None,
        }
    }

    fn upgrade(&self) -> Option<Value> {
        match self {
            HostKey::Object(w) => w.upgrade().map(|inner| Value::Object(JsObject::from_inner(inner))),
            HostKey::Function(w) => w
                .upgrade()
                .map(|inner| Value::Function(JsFunction::from_inner(inner))),
            HostKey::Future(w) => w
                .upgrade()
                .map(|inner| Value::Future(JsFuture::from_inner(inner))),
            HostKey::Symbol(s) => Some(Value::Symbol(s.clone())),
        }
    }

    fn kind(&self) -> KeyKind {
        match self {
            HostKey::Object(_) => KeyKind::Object,
            HostKey::Function(_) => KeyKind::Function,
            HostKey::Future(_) => KeyKind::Future,
            HostKey::Symbol(_) => KeyKind::Symbol,
        }
    }

    /// Whether this key still refers to exactly `value`.
    fn matches(&self, value: &Value) -> bool {
        self.upgrade().is_some_and(|current| current == *value)
    }
}

struct Entry<'js> {
    host: HostKey,
    host_addr: usize,
    handle: Handle<'js>,
    host2: Option<(HostKey, usize)>,
    handle2: Option<Handle<'js>>,
}

/// Which side of an entry a lookup matched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Primary,
    Alternate,
}

pub struct CorrelationTable<'js> {
    next_id: EntryId,
    entries: HashMap<EntryId, Entry<'js>>,
    objects: HashMap<usize, EntryId>,
    functions: HashMap<usize, EntryId>,
    futures: HashMap<usize, EntryId>,
    symbols: HashMap<usize, EntryId>,
    alternates: HashMap<usize, EntryId>,
    index_get: Function<'js>,
    index_set: Function<'js>,
    index_remove: Function<'js>,
    same_value: Function<'js>,
}

impl<'js> CorrelationTable<'js> {
    pub fn new(ctx: &Ctx<'js>) -> BridgeResult<Self> {
        let index: Object<'js> = ctx.eval(INDEX_SOURCE)?;
        Ok(Self {
            next_id: 1,
            entries: HashMap::new(),
            objects: HashMap::new(),
            functions: HashMap::new(),
            futures: HashMap::new(),
            symbols: HashMap::new(),
            alternates: HashMap::new(),
            index_get: index.get("get")?,
            index_set: index.get("set")?,
            index_remove: index.get("remove")?,
            same_value: index.get("is")?,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn keys_mut(&mut self, kind: KeyKind) -> &mut HashMap<usize, EntryId> {
        match kind {
            KeyKind::Object => &mut self.objects,
            KeyKind::Function => &mut self.functions,
            KeyKind::Future => &mut self.futures,
            KeyKind::Symbol => &mut self.symbols,
        }
    }

    fn keys(&self, kind: KeyKind) -> &HashMap<usize, EntryId> {
        match kind {
            KeyKind::Object => &self.objects,
            KeyKind::Function => &self.functions,
            KeyKind::Future => &self.futures,
            KeyKind::Symbol => &self.symbols,
        }
    }

    /// Register `host` ↔ `handle`, plus an optional alternate host key and
    /// alternate handle resolving to the same entry. Returns `false` without
    /// taking ownership when `handle` is dead, `host` is not a reference
    /// value, or `host` already has a live entry; the caller then disposes
    /// its handles.
    pub fn set(
        &mut self,
        host: &Value,
        handle: Handle<'js>,
        host2: Option<&Value>,
        handle2: Option<Handle<'js>>,
    ) -> BridgeResult<bool> {
        let Some(guest) = handle.value() else {
            return Ok(false);
        };
        let Some((kind, addr, key)) = HostKey::of(host) else {
            return Ok(false);
        };
        if self.lookup(host)?.is_some() {
            return Ok(false);
        }
        let mut alternate = None;
        if let Some(host2) = host2 {
            if let Some((_, addr2, key2)) = HostKey::of(host2) {
                if self.lookup(host2)?.is_some() {
                    return Ok(false);
                }
                alternate = Some((key2, addr2));
            }
        }

        let id = self.next_id;
        self.next_id += 1;

        self.index_set.call::<_, ()>((guest, id as f64))?;
        if let Some(guest2) = handle2.as_ref().and_then(Handle::value) {
            self.index_set.call::<_, ()>((guest2, id as f64))?;
        }
        self.keys_mut(kind).insert(addr, id);
        if let Some((_, addr2)) = &alternate {
            self.alternates.insert(*addr2, id);
        }
        self.entries.insert(
            id,
            Entry {
                host: key,
                host_addr: addr,
                handle,
                host2: alternate,
                handle2,
            },
        );
        Ok(true)
    }

    /// Find the live entry for `host`, pruning whatever stale entry the
    /// lookup lands on.
    fn lookup(&mut self, host: &Value) -> BridgeResult<Option<(EntryId, Slot)>> {
        let Some((kind, addr, _)) = HostKey::of(host) else {
            return Ok(None);
        };
        let candidates = [
            self.keys(kind).get(&addr).copied(),
            self.alternates.get(&addr).copied(),
        ];
        for id in candidates.into_iter().flatten() {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            let slot = if entry.host_addr == addr && entry.host.kind() == kind {
                Slot::Primary
            } else {
                Slot::Alternate
            };
            let key_matches = match slot {
                Slot::Primary => entry.host.matches(host),
                Slot::Alternate => entry.host2.as_ref().is_some_and(|(k, _)| k.matches(host)),
            };
            if !key_matches || !self.entry_alive(id) {
                trace!(entry = id, "pruning stale correlation entry");
                self.remove_entry(id, true)?;
                continue;
            }
            return Ok(Some((id, slot)));
        }
        Ok(None)
    }

    fn entry_alive(&self, id: EntryId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|e| e.handle.alive() && e.host.upgrade().is_some())
    }

    /// The guest handle for `host`. The handle stays owned by the table;
    /// `dup` it to keep a reference beyond the next table mutation.
    pub fn get(&mut self, host: &Value) -> BridgeResult<Option<Handle<'js>>> {
        Ok(self.get_with_slot(host)?.map(|(handle, _)| handle))
    }

    pub fn get_with_slot(&mut self, host: &Value) -> BridgeResult<Option<(Handle<'js>, Slot)>> {
        let Some((id, slot)) = self.lookup(host)? else {
            return Ok(None);
        };
        let entry = &self.entries[&id];
        let handle = match slot {
            Slot::Primary => entry.handle.clone(),
            Slot::Alternate => entry.handle2.clone().unwrap_or_else(|| entry.handle.clone()),
        };
        Ok(Some((handle, slot)))
    }

    /// The alternate handle registered for `host`, if any.
    pub fn get_alternate(&mut self, host: &Value) -> BridgeResult<Option<Handle<'js>>> {
        let Some((id, _)) = self.lookup(host)? else {
            return Ok(None);
        };
        Ok(self.entries[&id].handle2.clone().filter(Handle::alive))
    }

    /// The host value registered for `handle`. When `handle` is the
    /// alternate handle of its entry, the alternate host key wins if set.
    pub fn get_by_handle(&mut self, handle: &Handle<'js>) -> BridgeResult<Option<Value>> {
        Ok(self.get_by_guest(handle)?.map(|(value, _)| value))
    }

    pub fn get_by_guest(&mut self, handle: &Handle<'js>) -> BridgeResult<Option<(Value, Slot)>> {
        let Some(guest) = handle.value() else {
            return Ok(None);
        };
        self.find_guest(guest)
    }

    pub(crate) fn find_guest(&mut self, guest: JsValue<'js>) -> BridgeResult<Option<(Value, Slot)>> {
        if !(guest.is_object() || guest.is_symbol()) {
            return Ok(None);
        }
        let Some(id) = self.index_get.call::<_, Option<f64>>((guest.clone(),))? else {
            return Ok(None);
        };
        let id = id as EntryId;
        if !self.entries.contains_key(&id) {
            self.index_remove.call::<_, ()>((guest,))?;
            return Ok(None);
        }
        if !self.entry_alive(id) {
            trace!(entry = id, "pruning stale correlation entry");
            self.remove_entry(id, true)?;
            return Ok(None);
        }
        let entry = &self.entries[&id];
        let is_alternate = match entry.handle2.as_ref().and_then(Handle::value) {
            Some(alt) => self.same_value.call::<_, bool>((alt, guest))?,
            None => false,
        };
        let host = if is_alternate {
            entry
                .host2
                .as_ref()
                .and_then(|(k, _)| k.upgrade())
                .or_else(|| entry.host.upgrade())
        } else {
            entry.host.upgrade()
        };
        let slot = if is_alternate { Slot::Alternate } else { Slot::Primary };
        Ok(host.map(|h| (h, slot)))
    }

    /// Remove the entry for `host`. With `dispose`, the entry's handles are
    /// released; otherwise ownership passes back to whoever holds clones.
    pub fn delete(&mut self, host: &Value, dispose: bool) -> BridgeResult<bool> {
        match self.lookup(host)? {
            Some((id, _)) => {
                self.remove_entry(id, dispose)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn delete_by_handle(&mut self, handle: &Handle<'js>, dispose: bool) -> BridgeResult<bool> {
        let Some(guest) = handle.value() else {
            return Ok(false);
        };
        if !(guest.is_object() || guest.is_symbol()) {
            return Ok(false);
        }
        match self.index_get.call::<_, Option<f64>>((guest,))? {
            Some(id) if self.entries.contains_key(&(id as EntryId)) => {
                self.remove_entry(id as EntryId, dispose)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove_entry(&mut self, id: EntryId, dispose: bool) -> BridgeResult<()> {
        let Some(entry) = self.entries.remove(&id) else {
            return Ok(());
        };
        let kind = entry.host.kind();
        if self.keys(kind).get(&entry.host_addr) == Some(&id) {
            self.keys_mut(kind).remove(&entry.host_addr);
        }
        if let Some((_, addr2)) = &entry.host2 {
            if self.alternates.get(addr2) == Some(&id) {
                self.alternates.remove(addr2);
            }
        }
        for handle in std::iter::once(&entry.handle).chain(entry.handle2.as_ref()) {
            if let Some(guest) = handle.value() {
                self.index_remove.call::<_, ()>((guest,))?;
            }
            if dispose {
                handle.release();
            }
        }
        Ok(())
    }

    /// Move every live entry of `other` into this table. Entries whose host
    /// key is already known here are dropped and their handles released.
    pub fn merge(&mut self, mut other: CorrelationTable<'js>) -> BridgeResult<usize> {
        let mut moved = 0;
        let ids: Vec<EntryId> = other.entries.keys().copied().collect();
        for id in ids {
            let Some(entry) = other.entries.get(&id) else {
                continue;
            };
            let host = entry.host.upgrade();
            let host2 = entry.host2.as_ref().and_then(|(k, _)| k.upgrade());
            let handle = entry.handle.clone();
            let handle2 = entry.handle2.clone();
            other.remove_entry(id, false)?;
            let Some(host) = host else {
                handle.release();
                if let Some(h) = handle2 {
                    h.release();
                }
                continue;
            };
            if self.set(&host, handle.clone(), host2.as_ref(), handle2.clone())? {
                moved += 1;
            } else {
                handle.release();
                if let Some(h) = handle2 {
                    h.release();
                }
            }
        }
        Ok(moved)
    }

    /// Drop every entry and release its handles.
    pub fn clear(&mut self) -> BridgeResult<()> {
        let ids: Vec<EntryId> = self.entries.keys().copied().collect();
        for id in ids {
            self.remove_entry(id, true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    fn with_table<R>(f: impl for<'js> FnOnce(&Ctx<'js>, &mut CorrelationTable<'js>) -> R) -> R {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let mut table = CorrelationTable::new(&ctx).unwrap();
            f(&ctx, &mut table)
        })
    }

    fn guest_object<'js>(ctx: &Ctx<'js>) -> JsValue<'js> {
        Object::new(ctx.clone()).unwrap().into_value()
    }

    #[test]
    fn test_lookup_both_ways() {
        with_table(|ctx, table| {
            let host = Value::Object(JsObject::new());
            let guest = guest_object(ctx);
            assert!(table.set(&host, Handle::new(guest.clone()), None, None).unwrap());
            assert_eq!(table.len(), 1);

            let handle = table.get(&host).unwrap().unwrap();
            let same: bool = table
                .same_value
                .call((handle.value().unwrap(), guest.clone()))
                .unwrap();
            assert!(same);
            let back = table.get_by_handle(&Handle::new(guest)).unwrap();
            assert_eq!(back, Some(host));
        });
    }

    #[test]
    fn test_refuses_dead_handles_primitives_and_duplicates() {
        with_table(|ctx, table| {
            let host = Value::Object(JsObject::new());
            let dead = Handle::new(guest_object(ctx));
            dead.dispose();
            assert!(!table.set(&host, dead, None, None).unwrap());
            assert!(!table.set(&Value::from(1), Handle::new(guest_object(ctx)), None, None).unwrap());

            assert!(table.set(&host, Handle::new(guest_object(ctx)), None, None).unwrap());
            assert!(!table.set(&host, Handle::new(guest_object(ctx)), None, None).unwrap());
            assert_eq!(table.len(), 1);
        });
    }

    #[test]
    fn test_dropped_host_key_is_pruned() {
        with_table(|ctx, table| {
            let guest = guest_object(ctx);
            let handle = Handle::new(guest.clone());
            {
                let host = Value::Object(JsObject::new());
                assert!(table.set(&host, handle.clone(), None, None).unwrap());
            }
            assert_eq!(table.get_by_handle(&Handle::new(guest)).unwrap(), None);
            assert!(table.is_empty());
            assert!(!handle.alive());
        });
    }

    #[test]
    fn test_disposed_handle_is_pruned() {
        with_table(|ctx, table| {
            let host = Value::Object(JsObject::new());
            let handle = Handle::new(guest_object(ctx));
            assert!(table.set(&host, handle.clone(), None, None).unwrap());
            handle.dispose();
            assert!(table.get(&host).unwrap().is_none());
            assert!(table.is_empty());
        });
    }

    #[test]
    fn test_alternate_slot() {
        with_table(|ctx, table| {
            let primary = Value::Object(JsObject::new());
            let alternate = Value::Object(JsObject::new());
            let proxy = guest_object(ctx);
            let target = guest_object(ctx);
            assert!(table
                .set(
                    &primary,
                    Handle::new(proxy),
                    Some(&alternate),
                    Some(Handle::new(target.clone())),
                )
                .unwrap());

            let (_, slot) = table.get_with_slot(&alternate).unwrap().unwrap();
            assert_eq!(slot, Slot::Alternate);
            let (host, slot) = table.get_by_guest(&Handle::new(target)).unwrap().unwrap();
            assert_eq!(slot, Slot::Alternate);
            assert_eq!(host, alternate);
            assert_eq!(table.get_with_slot(&primary).unwrap().unwrap().1, Slot::Primary);
        });
    }

    #[test]
    fn test_merge_moves_live_entries() {
        with_table(|ctx, table| {
            let shared = Value::Object(JsObject::new());
            let only_other = Value::Object(JsObject::new());
            assert!(table.set(&shared, Handle::new(guest_object(ctx)), None, None).unwrap());

            let mut other = CorrelationTable::new(ctx).unwrap();
            let conflicting = Handle::new(guest_object(ctx));
            assert!(other.set(&shared, conflicting.clone(), None, None).unwrap());
            assert!(other.set(&only_other, Handle::new(guest_object(ctx)), None, None).unwrap());

            assert_eq!(table.merge(other).unwrap(), 1);
            assert_eq!(table.len(), 2);
            assert!(table.get(&only_other).unwrap().is_some());
            assert!(!conflicting.alive());
        });
    }

    #[test]
    fn test_delete_and_clear_release_handles() {
        with_table(|ctx, table| {
            let a = Value::Object(JsObject::new());
            let b = Value::Function(JsFunction::native("b", |_, _| Ok(Value::Undefined)));
            let guest_a = guest_object(ctx);
            let handle_a = Handle::new(guest_a.clone());
            let handle_b = Handle::new(guest_object(ctx));
            assert!(table.set(&a, handle_a.clone(), None, None).unwrap());
            assert!(table.set(&b, handle_b.clone(), None, None).unwrap());

            assert!(table.delete_by_handle(&Handle::new(guest_a), true).unwrap());
            assert!(!handle_a.alive());
            assert!(!table.delete(&a, true).unwrap());

            table.clear().unwrap();
            assert!(!handle_b.alive());
            assert!(table.is_empty());
        });
    }
}
