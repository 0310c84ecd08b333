//! Construction surface. A `Runtime` carries the scheduler injected by the
//! caller; every promise it creates, and every promise derived from those,
//! defers its handlers to that scheduler.
use std::{
    fmt::{self, Debug, Formatter},
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tracing::warn;

use crate::{
    promise::Outcome, subscriber::panic_message, Deferred, Error, Promise, Scheduler, Value,
};

#[derive(Clone)]
pub struct Runtime {
    scheduler: Arc<dyn Scheduler>,
}

impl Runtime {
    pub fn new<S: Scheduler + 'static>(scheduler: S) -> Self {
        Self::with_scheduler(Arc::new(scheduler))
    }

    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// A pending promise together with its resolver.
    pub fn pending(&self) -> Deferred {
        Deferred::new(Promise::pending_on(self.scheduler.clone()))
    }

    /// Runs `executor` with the resolver of a new promise and returns the
    /// promise. If the executor returns `Err(reason)` or panics, the promise
    /// is rejected, unless the executor already resolved it.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_core::{QueueScheduler, Runtime, Value};
    ///
    /// let scheduler = QueueScheduler::new();
    /// let runtime = Runtime::new(scheduler.clone());
    /// let mut resolve_later = None;
    /// let promise = runtime.promise(|deferred| {
    ///     resolve_later = Some(deferred);
    ///     Ok(())
    /// });
    /// assert!(promise.is_pending());
    ///
    /// resolve_later.unwrap().resolve(Value::new(1));
    /// assert!(promise.is_pending());
    /// scheduler.run_until_idle();
    /// assert!(promise.is_fulfilled());
    /// ```
    pub fn promise<F>(&self, executor: F) -> Promise
    where
        F: FnOnce(Deferred) -> Result<(), Value>,
    {
        let deferred = self.pending();
        let promise = deferred.promise();
        match panic::catch_unwind(AssertUnwindSafe(|| executor(deferred.clone()))) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => deferred.reject(reason),
            Err(payload) => {
                let message = panic_message(payload);
                warn!(promise = %promise.id(), %message, "executor panicked");
                deferred.reject(Error::HandlerPanicked(message));
            }
        }
        promise
    }

    /// An already fulfilled promise.
    ///
    /// A promise argument is unwrapped through any depth of fulfilled
    /// promises, so the result is fulfilled right away with the innermost
    /// value. If the chain reaches a promise that is not fulfilled yet, the
    /// result follows that promise instead.
    pub fn fulfilled(&self, value: impl Into<Value>) -> Promise {
        match value.into() {
            Value::Promise(source) => match source.unwrap_fulfilled() {
                Ok(value) => Promise::settled_on(self.scheduler.clone(), Outcome::Fulfilled(value)),
                Err(unsettled) => self.resolved(unsettled),
            },
            thenable @ Value::Thenable(_) => self.resolved(thenable),
            value => Promise::settled_on(self.scheduler.clone(), Outcome::Fulfilled(value)),
        }
    }

    /// An already rejected promise. `reason` is never unwrapped, even when
    /// it is a promise.
    pub fn rejected(&self, reason: impl Into<Value>) -> Promise {
        Promise::settled_on(self.scheduler.clone(), Outcome::Rejected(reason.into()))
    }

    /// A promise resolved with `value` through the regular resolution
    /// procedure: promises and thenables are followed, and the outcome is
    /// adopted on a later turn.
    pub fn resolved(&self, value: impl Into<Value>) -> Promise {
        let deferred = self.pending();
        deferred.resolve(value);
        deferred.promise()
    }
}

impl Debug for Runtime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime").field("scheduler", &"<dyn Scheduler>").finish()
    }
}
