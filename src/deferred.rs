use crate::{Promise, Value};

/// The resolver side of a promise: `resolve`, `reject` and `progress`.
///
/// A `Deferred` may be cloned and called any number of times, but only the
/// first `resolve` or `reject` that finds the promise pending has an effect.
/// That call commits the outcome; the promise itself settles on the next
/// scheduler turn.
/// Once the promise follows another promise, every call made here is inert;
/// only the followee decides the outcome.
///
/// # Examples
///
/// ```
/// use promise_core::{QueueScheduler, Runtime, Value};
///
/// let scheduler = QueueScheduler::new();
/// let runtime = Runtime::new(scheduler.clone());
/// let deferred = runtime.pending();
///
/// deferred.resolve(Value::new("🍓"));
/// deferred.reject(Value::new("💥"));
/// assert!(deferred.promise().is_pending());
///
/// scheduler.run_until_idle();
/// assert_eq!(deferred.promise().value().downcast_ref::<&str>(), Some(&"🍓"));
/// ```
#[derive(Clone, Debug)]
pub struct Deferred {
    promise: Promise,
}

impl Deferred {
    pub(crate) fn new(promise: Promise) -> Self {
        Self { promise }
    }

    pub fn promise(&self) -> Promise {
        self.promise.clone()
    }

    /// Fulfills with `value`, or follows it if it is a promise or thenable.
    pub fn resolve(&self, value: impl Into<Value>) {
        self.promise.resolve_with(value.into());
    }

    /// Same as [`Deferred::resolve`].
    pub fn fulfill(&self, value: impl Into<Value>) {
        self.resolve(value);
    }

    /// Rejects with `reason`, stored as is even when it is a promise.
    pub fn reject(&self, reason: impl Into<Value>) {
        self.promise.reject_with(reason.into());
    }

    /// Notifies the current subscribers of progress. Ignored once the promise
    /// follows another promise or has settled.
    pub fn progress(&self, value: impl Into<Value>) {
        self.promise.notify(value.into());
    }
}
