//! Subscriber registry: the handler triples attached with
//! [`Promise::then`](crate::Promise::then) and the private triples a
//! following promise attaches to its followee.
use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tracing::{trace, warn};

use crate::{
    promise::{Outcome, State},
    Error, Job, Promise, PromiseId, Scheduler, Value,
};

/// What a handler produces: `Ok` resolves the derived promise (following it
/// if it is thenable), `Err` rejects it with the given reason. Progress
/// handlers never settle the derived promise: both arms are forwarded as
/// progress.
pub type HandlerResult = Result<Value, Value>;

type SettleFn = Box<dyn FnOnce(Value) -> HandlerResult + Send>;
type ProgressFn = Arc<dyn Fn(Value) -> HandlerResult + Send + Sync>;

/// The optional handlers of one [`Promise::then`](crate::Promise::then) call.
///
/// A missing fulfillment or rejection handler passes the outcome through to
/// the derived promise; a missing progress handler forwards progress as is.
///
/// # Examples
///
/// ```
/// use promise_core::{Handlers, Value};
///
/// let handlers = Handlers::new()
///     .on_fulfilled(|value| Ok(value))
///     .on_rejected(|_reason| Ok(Value::new("recovered")))
///     .on_progress(|progress| Ok(progress));
/// # drop(handlers);
/// ```
#[derive(Default)]
pub struct Handlers {
    on_fulfilled: Option<SettleFn>,
    on_rejected: Option<SettleFn>,
    on_progress: Option<ProgressFn>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_fulfilled<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(Value) -> HandlerResult + Send + 'static,
    {
        self.on_fulfilled = Some(Box::new(handler));
        self
    }

    pub fn on_rejected<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(Value) -> HandlerResult + Send + 'static,
    {
        self.on_rejected = Some(Box::new(handler));
        self
    }

    /// May be called any number of times before the promise settles. Its
    /// result becomes the progress value seen by the derived promise's
    /// subscribers.
    pub fn on_progress<F>(mut self, handler: F) -> Self
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(handler));
        self
    }
}

impl Debug for Handlers {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("on_fulfilled", &self.on_fulfilled.is_some())
            .field("on_rejected", &self.on_rejected.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

pub(crate) enum Subscriber {
    /// Attached by `then`; owns the derived promise's resolution.
    Chain { handlers: Handlers, derived: Promise },
    /// Attached by a promise that follows the one holding this subscriber.
    Follow { follower: Promise },
}

impl Subscriber {
    pub(crate) fn on_settled(self, outcome: &Outcome, scheduler: &Arc<dyn Scheduler>) {
        let outcome = outcome.clone();
        let job: Job = match self {
            Subscriber::Chain { handlers, derived } => {
                let handler = match outcome {
                    Outcome::Fulfilled(_) => handlers.on_fulfilled,
                    Outcome::Rejected(_) => handlers.on_rejected,
                };
                Box::new(move || fire(handler, outcome, &derived))
            }
            Subscriber::Follow { follower } => Box::new(move || follower.adopt_outcome(outcome)),
        };
        scheduler.schedule(job);
    }

    pub(crate) fn on_progress(&self, progress: &Value, scheduler: &Arc<dyn Scheduler>) {
        let progress = progress.clone();
        let job: Job = match self {
            Subscriber::Chain { handlers, derived } => {
                let handler = handlers.on_progress.clone();
                let derived = derived.clone();
                Box::new(move || {
                    let forwarded = match handler {
                        Some(handler) => invoke(derived.id(), move || handler(progress)),
                        None => Ok(progress),
                    };
                    // A failing progress handler never settles `derived`; its
                    // failure travels on as the next progress value.
                    derived.forward_progress(forwarded.unwrap_or_else(|failure| failure));
                })
            }
            Subscriber::Follow { follower } => {
                let follower = follower.clone();
                Box::new(move || follower.forward_progress(progress))
            }
        };
        scheduler.schedule(job);
    }
}

fn fire(handler: Option<SettleFn>, outcome: Outcome, derived: &Promise) {
    let result = match (handler, outcome) {
        (Some(handler), outcome) => invoke(derived.id(), move || handler(outcome.into_value())),
        (None, Outcome::Fulfilled(value)) => Ok(value),
        (None, Outcome::Rejected(reason)) => Err(reason),
    };
    match result {
        Ok(value) => derived.resolve_with(value),
        Err(reason) => derived.reject_with(reason),
    }
}

/// Runs a handler, turning a panic into a rejection reason.
fn invoke<F>(derived: PromiseId, handler: F) -> HandlerResult
where
    F: FnOnce() -> HandlerResult,
{
    panic::catch_unwind(AssertUnwindSafe(handler)).unwrap_or_else(|payload| {
        let message = panic_message(payload);
        warn!(promise = %derived, %message, "handler panicked");
        Err(Error::HandlerPanicked(message).into())
    })
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => String::from("<non-string panic payload>"),
        },
    }
}

impl Promise {
    /// Appends `subscriber`, or schedules it right away against the settled
    /// outcome.
    pub(crate) fn subscribe(&self, subscriber: Subscriber) {
        let mut state = self.lock();
        match &mut *state {
            State::Pending(registry)
            | State::Following { registry, .. }
            | State::Settling { registry, .. } => {
                trace!(promise = %self.id(), position = registry.subscribers.len(), "subscribed");
                registry.subscribers.push(subscriber);
            }
            State::Fulfilled(value) => {
                subscriber.on_settled(&Outcome::Fulfilled(value.clone()), self.scheduler())
            }
            State::Rejected(reason) => {
                subscriber.on_settled(&Outcome::Rejected(reason.clone()), self.scheduler())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::{Error, Handlers, QueueScheduler, Runtime, Value};

    fn runtime() -> (QueueScheduler, Runtime) {
        let scheduler = QueueScheduler::new();
        (scheduler.clone(), Runtime::new(scheduler))
    }

    #[test]
    fn test_subscribers_fire_in_attachment_order() {
        let (scheduler, runtime) = runtime();
        let deferred = runtime.pending();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = order.clone();
            deferred.promise().then(Handlers::new().on_fulfilled(move |v| {
                order.lock().unwrap().push(i);
                Ok(v)
            }));
        }
        deferred.resolve(Value::unit());
        assert!(order.lock().unwrap().is_empty());
        scheduler.run_until_idle();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_panicking_handler_rejects_only_its_derived() {
        let (scheduler, runtime) = runtime();
        let source = runtime.fulfilled(Value::new(1));
        let broken = source.then(Handlers::new().on_fulfilled(|_| panic!("boom")));
        let sibling = source.then(Handlers::new().on_fulfilled(Ok));
        scheduler.run_until_idle();
        assert!(matches!(broken.reason().as_error(), Some(Error::HandlerPanicked(m)) if m == "boom"));
        assert!(sibling.is_fulfilled());
    }

    #[test]
    fn test_missing_handlers_pass_outcome_through() {
        let (scheduler, runtime) = runtime();
        let value = Value::new(1);
        let reason = Value::new(2);
        let fulfilled = runtime.fulfilled(value.clone()).then(Handlers::new());
        let rejected = runtime.rejected(reason.clone()).then(Handlers::new());
        scheduler.run_until_idle();
        assert!(fulfilled.value().ptr_eq(&value));
        assert!(rejected.reason().ptr_eq(&reason));
    }

    #[test]
    fn test_progress_handler_failure_is_forwarded_as_progress() {
        let (scheduler, runtime) = runtime();
        let deferred = runtime.pending();
        let reason = Value::new("bad progress");
        let expected = reason.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let derived = deferred
            .promise()
            .then(Handlers::new().on_progress(move |_| Err(reason.clone())));
        derived.progressed(move |p| {
            sink.lock().unwrap().push(p);
            Ok(Value::unit())
        });
        deferred.progress(Value::unit());
        scheduler.run_until_idle();
        assert!(derived.is_pending());
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(seen.lock().unwrap()[0].ptr_eq(&expected));

        deferred.resolve(Value::new(1));
        scheduler.run_until_idle();
        assert_eq!(derived.value().downcast_ref::<i32>(), Some(&1));
    }

    #[test]
    fn test_panicking_progress_handler_forwards_panic_error() {
        let (scheduler, runtime) = runtime();
        let deferred = runtime.pending();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        deferred
            .promise()
            .progressed(|_| panic!("progress bug"))
            .progressed(move |p| {
                let panicked = matches!(p.as_error(), Some(Error::HandlerPanicked(m)) if m == "progress bug");
                sink.lock().unwrap().push(panicked);
                Ok(p)
            });
        deferred.progress(Value::unit());
        scheduler.run_until_idle();
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_progress_fires_before_settlement_only() {
        let (scheduler, runtime) = runtime();
        let deferred = runtime.pending();
        let events = Arc::new(Mutex::new(Vec::new()));
        let (progress_log, settle_log) = (events.clone(), events.clone());
        deferred.promise().then(
            Handlers::new()
                .on_fulfilled(move |v| {
                    settle_log.lock().unwrap().push("fulfilled");
                    Ok(v)
                })
                .on_progress(move |p| {
                    progress_log.lock().unwrap().push("progress");
                    Ok(p)
                }),
        );
        deferred.progress(Value::unit());
        deferred.progress(Value::unit());
        deferred.resolve(Value::unit());
        deferred.progress(Value::unit());
        scheduler.run_until_idle();
        assert_eq!(*events.lock().unwrap(), vec!["progress", "progress", "fulfilled"]);
    }

    #[test]
    fn test_handler_debug_lists_present_handlers() {
        let handlers = Handlers::new().on_rejected(Err);
        let rendered = format!("{:?}", handlers);
        assert!(rendered.contains("on_rejected: true"));
        assert!(rendered.contains("on_fulfilled: false"));
    }
}
