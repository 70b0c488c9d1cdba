//! Guest handles.
//!
//! A [`Handle`] is a disposable slot around a guest value. Clones share the
//! slot, so disposing one clone kills all of them; [`Handle::dup`] makes an
//! independent handle to the same guest value. Handle identity never decides
//! value identity: two handles are the same guest value only if the VM says
//! so (`Object.is`), see `Arena::same_value`.

use rquickjs::Value as JsValue;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub struct Handle<'js> {
    slot: Rc<RefCell<Option<JsValue<'js>>>>,
}

impl<'js> Handle<'js> {
    pub fn new(value: JsValue<'js>) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Some(value))),
        }
    }

    pub fn alive(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The guest value, or `None` once disposed.
    pub fn value(&self) -> Option<JsValue<'js>> {
        self.slot.borrow().clone()
    }

    /// A new handle with its own reference to the same guest value.
    pub fn dup(&self) -> Option<Handle<'js>> {
        self.value().map(Handle::new)
    }

    /// Release the guest reference. Disposing twice is a bug in the caller.
    pub fn dispose(&self) {
        let released = self.slot.borrow_mut().take();
        if released.is_none() {
            tracing::error!("guest handle disposed twice");
            debug_assert!(false, "guest handle disposed twice");
        }
    }

    /// Dispose if still alive. Used by owners that may race with an explicit
    /// dispose through a shared clone.
    pub(crate) fn release(&self) {
        self.slot.borrow_mut().take();
    }
}

impl fmt::Debug for Handle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.slot.borrow().as_ref() {
            Some(value) => format!("{:?}", value.type_of()),
            None => "disposed".to_string(),
        };
        f.debug_tuple("Handle").field(&state).finish()
    }
}
