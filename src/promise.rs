use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    task::Waker,
};

use crate::{
    subscriber::Subscriber, Error, HandlerResult, Handlers, Scheduler, Status, Value,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identifier of a promise, used for identity and cycle detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseId(u64);

impl PromiseId {
    fn next() -> Self {
        PromiseId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for PromiseId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Subscribers and wakers waiting on an unsettled promise.
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) subscribers: Vec<Subscriber>,
    pub(crate) wakers: Vec<Waker>,
}

pub(crate) enum State {
    Pending(Registry),
    /// Pending, with the outcome delegated to `followee`. The followee is
    /// observed, not owned.
    Following {
        followee: Weak<Inner>,
        registry: Registry,
    },
    /// A resolver call has committed the outcome; the transition itself is
    /// queued on the scheduler. Still reported as pending.
    Settling {
        outcome: Outcome,
        registry: Registry,
    },
    Fulfilled(Value),
    Rejected(Value),
}

impl State {
    fn status(&self) -> Status {
        match self {
            State::Pending(_) | State::Following { .. } | State::Settling { .. } => Status::Pending,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }
}

#[derive(Clone)]
pub(crate) enum Outcome {
    Fulfilled(Value),
    Rejected(Value),
}

impl Outcome {
    pub(crate) fn into_value(self) -> Value {
        match self {
            Outcome::Fulfilled(value) | Outcome::Rejected(value) => value,
        }
    }
}

pub(crate) struct Inner {
    id: PromiseId,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<State>,
}

/// A value that becomes available asynchronously.
///
/// Cloning a `Promise` yields another handle to the same promise. Handles are
/// obtained from a [`Runtime`](crate::Runtime), from a
/// [`Deferred`](crate::Deferred), or from chaining with [`Promise::then`].
#[derive(Clone)]
pub struct Promise {
    pub(crate) inner: Arc<Inner>,
}

impl Promise {
    pub(crate) fn pending_on(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::with_state(scheduler, State::Pending(Registry::default()))
    }

    pub(crate) fn settled_on(scheduler: Arc<dyn Scheduler>, outcome: Outcome) -> Self {
        let state = match outcome {
            Outcome::Fulfilled(value) => State::Fulfilled(value),
            Outcome::Rejected(reason) => State::Rejected(reason),
        };
        Self::with_state(scheduler, state)
    }

    fn with_state(scheduler: Arc<dyn Scheduler>, state: State) -> Self {
        Promise {
            inner: Arc::new(Inner {
                id: PromiseId::next(),
                scheduler,
                state: Mutex::new(state),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Promise { inner }
    }

    /// Locks the state. Handlers never run under this lock, so a poisoned
    /// lock still guards a consistent state.
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    pub fn id(&self) -> PromiseId {
        self.inner.id
    }

    pub fn status(&self) -> Status {
        self.lock().status()
    }

    /// True while the promise is unsettled, including while it follows
    /// another promise.
    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    pub fn is_fulfilled(&self) -> bool {
        self.status() == Status::Fulfilled
    }

    pub fn is_rejected(&self) -> bool {
        self.status() == Status::Rejected
    }

    /// True once the promise is fulfilled or rejected.
    pub fn is_resolved(&self) -> bool {
        !self.is_pending()
    }

    /// True while the promise has committed to another promise's outcome.
    pub fn is_following(&self) -> bool {
        matches!(&*self.lock(), State::Following { .. })
    }

    pub fn try_value(&self) -> Result<Value, Error> {
        match &*self.lock() {
            State::Fulfilled(value) => Ok(value.clone()),
            state => Err(Error::NotFulfilled(state.status())),
        }
    }

    pub fn try_reason(&self) -> Result<Value, Error> {
        match &*self.lock() {
            State::Rejected(reason) => Ok(reason.clone()),
            state => Err(Error::NotRejected(state.status())),
        }
    }

    /// The fulfillment value.
    ///
    /// # Panics
    ///
    /// Panics if the promise is not fulfilled. Use [`Promise::try_value`]
    /// when the state is not known.
    pub fn value(&self) -> Value {
        match self.try_value() {
            Ok(value) => value,
            Err(error) => panic!("{}", error),
        }
    }

    /// The rejection reason, exactly as it was passed to the rejecting call.
    ///
    /// # Panics
    ///
    /// Panics if the promise is not rejected.
    pub fn reason(&self) -> Value {
        match self.try_reason() {
            Ok(reason) => reason,
            Err(error) => panic!("{}", error),
        }
    }

    /// Attaches `handlers` and returns the promise for their outcome.
    ///
    /// The handlers run on a later scheduler turn, never inside this call,
    /// even if the promise is already settled.
    pub fn then(&self, handlers: Handlers) -> Promise {
        let derived = Promise::pending_on(self.scheduler().clone());
        self.subscribe(Subscriber::Chain {
            handlers,
            derived: derived.clone(),
        });
        derived
    }

    /// Attaches a rejection handler only; fulfillment passes through.
    pub fn caught<F>(&self, on_rejected: F) -> Promise
    where
        F: FnOnce(Value) -> HandlerResult + Send + 'static,
    {
        self.then(Handlers::new().on_rejected(on_rejected))
    }

    /// Attaches a progress handler only; its return value is forwarded to the
    /// returned promise's subscribers.
    pub fn progressed<F>(&self, on_progress: F) -> Promise
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.then(Handlers::new().on_progress(on_progress))
    }

    /// Runs `handler` on either outcome and then passes the outcome through.
    ///
    /// If `handler` returns a promise, the outcome is passed through once that
    /// promise fulfills. If `handler` fails, or the returned promise rejects,
    /// the returned promise rejects with that failure instead.
    pub fn lastly<F>(&self, handler: F) -> Promise
    where
        F: FnOnce() -> HandlerResult + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(handler)));
        let rejected_slot = slot.clone();
        let scheduler = self.scheduler().clone();
        let rejected_scheduler = scheduler.clone();
        self.then(
            Handlers::new()
                .on_fulfilled(move |value| run_lastly(&slot, &scheduler, Ok(value)))
                .on_rejected(move |reason| {
                    run_lastly(&rejected_slot, &rejected_scheduler, Err(reason))
                }),
        )
    }
}

fn run_lastly<F>(
    slot: &Mutex<Option<F>>,
    scheduler: &Arc<dyn Scheduler>,
    outcome: HandlerResult,
) -> HandlerResult
where
    F: FnOnce() -> HandlerResult,
{
    let handler = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    let Some(handler) = handler else {
        return outcome;
    };
    let waited = handler()?;
    if !waited.is_thenable() {
        return outcome;
    }
    let gate = Promise::pending_on(scheduler.clone());
    gate.resolve_with(waited);
    let passthrough = gate.then(Handlers::new().on_fulfilled(move |_| outcome));
    Ok(Value::Promise(passthrough))
}

impl Debug for Promise {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("following", &self.is_following())
            .finish()
    }
}
