//! The resolution procedure: how a promise commits to an outcome.
//!
//! Direct calls (through a [`Deferred`]) only act on a `Pending` promise.
//! Once a promise follows another one, only reactions delivered by its
//! followee can settle it or notify its subscribers of progress.
use std::{
    collections::HashSet,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, trace, warn};

use crate::{
    promise::{Outcome, State},
    subscriber::{panic_message, Subscriber},
    Deferred, Error, Promise, PromiseId, Thenable, Value,
};

/// Held while a following edge is checked for cycles and committed.
static FOLLOW_EDGES: Mutex<()> = Mutex::new(());

/// Which states a transition may start from.
#[derive(Clone, Copy, Debug)]
enum Gate {
    /// Direct resolver calls: first wins.
    Pending,
    /// Reactions delivered by the followee.
    Following,
    /// Progress forwarded from upstream.
    Unsettled,
}

impl Gate {
    fn admits(self, state: &State) -> bool {
        match (self, state) {
            (Gate::Pending, State::Pending(_)) => true,
            (Gate::Following, State::Following { .. }) => true,
            (Gate::Unsettled, State::Pending(_) | State::Following { .. }) => true,
            _ => false,
        }
    }
}

impl Promise {
    /// Resolves with `value`: follows it if it is thenable, otherwise
    /// fulfills. No-op unless the promise is `Pending`.
    pub(crate) fn resolve_with(&self, value: Value) {
        match value {
            Value::Promise(followee) => {
                self.follow(followee);
            }
            Value::Thenable(thenable) => self.adopt(thenable),
            value => {
                self.transition(Gate::Pending, Outcome::Fulfilled(value));
            }
        }
    }

    /// Rejects with `reason` as given; a promise reason is never followed.
    pub(crate) fn reject_with(&self, reason: Value) {
        self.transition(Gate::Pending, Outcome::Rejected(reason));
    }

    /// Settles a following promise with its followee's outcome.
    pub(crate) fn adopt_outcome(&self, outcome: Outcome) {
        self.transition(Gate::Following, outcome);
    }

    /// Progress from this promise's own resolver.
    pub(crate) fn notify(&self, progress: Value) {
        self.broadcast_progress(Gate::Pending, progress);
    }

    /// Progress from a followee or an upstream promise.
    pub(crate) fn forward_progress(&self, progress: Value) {
        self.broadcast_progress(Gate::Unsettled, progress);
    }

    /// Walks `self` towards the end of its following chain and returns the
    /// first fulfillment value found, or the first promise on the chain that
    /// is not fulfilled.
    pub(crate) fn unwrap_fulfilled(&self) -> Result<Value, Promise> {
        let mut visited = HashSet::new();
        let mut cursor = self.clone();
        loop {
            let next = match &*cursor.lock() {
                State::Fulfilled(value) => return Ok(value.clone()),
                State::Following { followee, .. } => followee.upgrade().map(Promise::from_inner),
                State::Pending(_) | State::Settling { .. } | State::Rejected(_) => None,
            };
            match next {
                Some(next) if visited.insert(cursor.id()) => cursor = next,
                _ => return Err(cursor),
            }
        }
    }

    /// Enters `Following(followee)`. Returns whether the edge was committed.
    ///
    /// The cycle walk and the commit happen under `FOLLOW_EDGES`, so two
    /// resolvers racing to link promises into a loop cannot both succeed.
    fn follow(&self, followee: Promise) -> bool {
        {
            let _edges = FOLLOW_EDGES.lock().unwrap_or_else(PoisonError::into_inner);
            if followee.leads_to(self.id()) {
                if self.transition(Gate::Pending, Outcome::Rejected(Error::CyclicResolution(self.id()).into())) {
                    debug!(promise = %self.id(), followee = %followee.id(), "rejected cyclic resolution");
                }
                return false;
            }
            let mut state = self.lock();
            let State::Pending(registry) = &mut *state else {
                return false;
            };
            let registry = mem::take(registry);
            *state = State::Following {
                followee: Arc::downgrade(&followee.inner),
                registry,
            };
        }
        trace!(promise = %self.id(), followee = %followee.id(), "following");
        followee.subscribe(Subscriber::Follow {
            follower: self.clone(),
        });
        true
    }

    /// Follows a proxy promise that the foreign thenable settles.
    fn adopt(&self, thenable: Arc<dyn Thenable>) {
        let proxy = Promise::pending_on(self.scheduler().clone());
        if !self.follow(proxy.clone()) {
            return;
        }
        let deferred = Deferred::new(proxy);
        self.scheduler().schedule(Box::new(move || {
            let subscribing = deferred.clone();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| thenable.subscribe(subscribing))) {
                let message = panic_message(payload);
                warn!(promise = %deferred.promise().id(), %message, "thenable panicked");
                deferred.reject(Error::HandlerPanicked(message));
            }
        }));
    }

    /// Whether following `self` would eventually lead to `target`. A chain
    /// that revisits a promise counts as leading back.
    fn leads_to(&self, target: PromiseId) -> bool {
        let mut visited = HashSet::new();
        let mut cursor = Some(self.clone());
        while let Some(promise) = cursor {
            if promise.id() == target || !visited.insert(promise.id()) {
                return true;
            }
            cursor = match &*promise.lock() {
                State::Following { followee, .. } => followee.upgrade().map(Promise::from_inner),
                _ => None,
            };
        }
        false
    }

    /// Applies `outcome` if `gate` admits the current state.
    ///
    /// A direct resolver call only commits the outcome (`Settling`) and
    /// queues the transition, so the promise stays pending until the next
    /// turn. Reactions from a followee already run as scheduled jobs and
    /// settle right away.
    fn transition(&self, gate: Gate, outcome: Outcome) -> bool {
        let mut state = self.lock();
        if !gate.admits(&state) {
            return false;
        }
        match gate {
            Gate::Pending => {
                let State::Pending(registry) = &mut *state else {
                    return false;
                };
                let registry = mem::take(registry);
                trace!(
                    promise = %self.id(),
                    fulfilled = matches!(outcome, Outcome::Fulfilled(_)),
                    "committed"
                );
                *state = State::Settling { outcome, registry };
                let promise = self.clone();
                self.scheduler().schedule(Box::new(move || promise.complete()));
            }
            Gate::Following | Gate::Unsettled => self.settle(state, outcome),
        }
        true
    }

    /// Finishes a transition committed by a resolver call.
    fn complete(&self) {
        let state = self.lock();
        let State::Settling { outcome, .. } = &*state else {
            return;
        };
        let outcome = outcome.clone();
        self.settle(state, outcome);
    }

    /// Settles the promise, then hands every subscriber to the scheduler in
    /// attachment order. Jobs are submitted under the state lock so they
    /// keep transition order.
    fn settle(&self, mut state: MutexGuard<'_, State>, outcome: Outcome) {
        let settled = match &outcome {
            Outcome::Fulfilled(value) => State::Fulfilled(value.clone()),
            Outcome::Rejected(reason) => State::Rejected(reason.clone()),
        };
        let registry = match mem::replace(&mut *state, settled) {
            State::Pending(registry)
            | State::Following { registry, .. }
            | State::Settling { registry, .. } => registry,
            State::Fulfilled(_) | State::Rejected(_) => Default::default(),
        };
        trace!(
            promise = %self.id(),
            fulfilled = matches!(outcome, Outcome::Fulfilled(_)),
            subscribers = registry.subscribers.len(),
            "settled"
        );
        for subscriber in registry.subscribers {
            subscriber.on_settled(&outcome, self.scheduler());
        }
        drop(state);
        for waker in registry.wakers {
            waker.wake();
        }
    }

    fn broadcast_progress(&self, gate: Gate, progress: Value) -> bool {
        let state = self.lock();
        if !gate.admits(&state) {
            return false;
        }
        if let State::Pending(registry) | State::Following { registry, .. } = &*state {
            trace!(promise = %self.id(), subscribers = registry.subscribers.len(), "progress");
            for subscriber in &registry.subscribers {
                subscriber.on_progress(&progress, self.scheduler());
            }
        }
        true
    }
}
