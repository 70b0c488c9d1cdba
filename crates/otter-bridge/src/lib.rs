//! otter-bridge - value exchange between a host and a QuickJS guest.
//!
//! The host works with [`Value`]s; the guest works with engine values wrapped
//! in disposable [`Handle`]s. An [`Arena`] moves values across the boundary
//! and keeps identity stable in both directions:
//!
//! - a host object marshaled twice yields the same guest object, and the
//!   reverse holds for guest objects
//! - cyclic graphs are preserved
//! - host functions are callable from the guest and guest functions from
//!   the host, with exceptions mapped both ways
//! - host futures become guest promises and guest promises become
//!   [`JsFuture`]s
//! - objects opted into [`SyncMode`] sync propagate writes across the
//!   boundary
//!
//! # Example
//!
//! ```no_run
//! use otter_bridge::{Arena, ArenaOptions, JsObject, Value};
//! use rquickjs::{Context, Runtime};
//!
//! let runtime = Runtime::new().unwrap();
//! let context = Context::full(&runtime).unwrap();
//! context.with(|ctx| {
//!     let arena = Arena::new(ctx, ArenaOptions::default()).unwrap();
//!     let config = JsObject::from_entries([("retries", Value::from(3))]);
//!     arena.expose([("config", Value::Object(config))]).unwrap();
//!     let result = arena
//!         .eval_code("export default config.retries + 1;", "main.js")
//!         .unwrap();
//!     assert_eq!(result, Value::Number(4.0));
//!     arena.dispose();
//! });
//! ```

pub mod arena;
pub mod error;
pub mod function;
pub mod future;
pub mod handle;
mod intrinsics;
pub mod json;
mod marshal;
pub mod object;
pub mod pending;
pub mod serializers;
pub mod symbol;
pub mod sync;
pub mod table;
mod unmarshal;
pub mod value;

pub use arena::{Arena, ArenaOptions, MarshalPredicate, Marshalable, Registration, WeakArena};
pub use error::{BridgeError, BridgeResult};
pub use function::{GuestCall, Invocation, JsFunction, NoGuest};
pub use future::{JsFuture, Settlement};
pub use handle::Handle;
pub use json::JsonFuturePolicy;
pub use object::{JsObject, ObjectId, ObjectKind, Property, PropertyKey};
pub use pending::{ContextId, HOST_CALL_REJECTED};
pub use serializers::{GuestObject, Serializer};
pub use symbol::Symbol;
pub use sync::{SyncMode, SyncPolicy, SyncedObject};
pub use table::{CorrelationTable, Slot};
pub use value::{ErrorValue, Value};
