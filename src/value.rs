//! Values carried by promises.
//!
//! A value is either a promise of this engine, a foreign completion source
//! wrapped as a [`Thenable`], or an opaque payload. Only the first two make a
//! resolved promise follow instead of fulfilling.
use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use crate::{Deferred, Error, Promise};

/// A foreign completion source that can settle a promise of this engine.
///
/// `subscribe` is called at most once per resolution, on a scheduler turn.
/// The implementation keeps `deferred` and settles it whenever its own
/// computation completes; only its first settlement counts.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use promise_core::{Deferred, QueueScheduler, Runtime, Thenable, Value};
///
/// struct Ready(i32);
///
/// impl Thenable for Ready {
///     fn subscribe(&self, deferred: Deferred) {
///         deferred.resolve(Value::new(self.0));
///     }
/// }
///
/// let scheduler = QueueScheduler::new();
/// let runtime = Runtime::new(scheduler.clone());
/// let promise = runtime.resolved(Value::Thenable(Arc::new(Ready(7))));
/// scheduler.run_until_idle();
/// assert_eq!(promise.value().downcast_ref::<i32>(), Some(&7));
/// ```
pub trait Thenable: Send + Sync {
    fn subscribe(&self, deferred: Deferred);
}

#[derive(Clone)]
pub enum Value {
    Promise(Promise),
    Thenable(Arc<dyn Thenable>),
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Wraps an arbitrary payload.
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Value::Opaque(Arc::new(payload))
    }

    pub fn unit() -> Self {
        Value::new(())
    }

    /// Borrows the payload if this is an opaque value of type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(payload) => payload.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Borrows the payload as a crate [`Error`], as produced for cyclic
    /// resolution and panicking handlers.
    pub fn as_error(&self) -> Option<&Error> {
        self.downcast_ref::<Error>()
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(promise) => Some(promise),
            _ => None,
        }
    }

    /// Whether resolving with this value makes the target follow it.
    pub fn is_thenable(&self) -> bool {
        matches!(self, Value::Promise(_) | Value::Thenable(_))
    }

    /// Identity comparison: true when both sides refer to the same promise,
    /// thenable or payload allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Promise(a), Value::Promise(b)) => a.id() == b.id(),
            (Value::Thenable(a), Value::Thenable(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Value::Opaque(a), Value::Opaque(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        Value::Promise(promise)
    }
}

impl From<Error> for Value {
    fn from(error: Error) -> Self {
        Value::new(error)
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Promise(promise) => f.debug_tuple("Promise").field(&promise.id()).finish(),
            Value::Thenable(_) => f.write_str("Thenable(<foreign>)"),
            Value::Opaque(_) => match self.as_error() {
                Some(error) => f.debug_tuple("Opaque").field(error).finish(),
                None => f.write_str("Opaque(<opaque>)"),
            },
        }
    }
}
