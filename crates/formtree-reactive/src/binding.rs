#![forbid(unsafe_code)]

//! Lifecycle helpers for groups of subscriptions.
//!
//! # Two-way bindings
//!
//! [`TwoWayBinding`] keeps two [`SyncEndpoint`]s equal. Anything that can be
//! read, written and watched is an endpoint: an [`Observable`] out of the box,
//! and form fields in `formtree-core`.
//!
//! ```ignore
//! let source = Observable::new(42);
//! let target = Observable::new(0);
//! let _binding = TwoWayBinding::new(&source, &target);
//!
//! source.set(10);
//! assert_eq!(target.get(), 10);
//! ```
//!
//! # Invariants
//!
//! 1. `TwoWayBinding` prevents update cycles via a shared re-entrancy guard.
//! 2. Dropping a `TwoWayBinding` unsubscribes both directions.
//! 3. `BindingScope` releases subscriptions in reverse registration order.
//! 4. After a scope is dropped or cleared, none of its callbacks fire.

use std::cell::Cell;
use std::rc::Rc;

use crate::observable::{Observable, Subscription};

// ---------------------------------------------------------------------------
// SyncEndpoint
// ---------------------------------------------------------------------------

/// One side of a [`TwoWayBinding`].
pub trait SyncEndpoint<T>: Clone + 'static {
    /// Current value.
    fn current(&self) -> T;

    /// Write a value coming from the other side.
    fn write(&self, value: T);

    /// Invoke `callback` after each change of this endpoint.
    fn watch(&self, callback: Box<dyn Fn(T)>) -> Subscription;
}

impl<T: Clone + PartialEq + 'static> SyncEndpoint<T> for Observable<T> {
    fn current(&self) -> T {
        self.get()
    }

    fn write(&self, value: T) {
        self.set(value);
    }

    fn watch(&self, callback: Box<dyn Fn(T)>) -> Subscription {
        self.subscribe(move |v| callback(v.clone()))
    }
}

// ---------------------------------------------------------------------------
// TwoWayBinding
// ---------------------------------------------------------------------------

/// Bidirectional sync between two endpoints.
///
/// Construction copies `a`'s current value into `b`. Drop the binding to
/// disconnect both directions.
pub struct TwoWayBinding {
    _a_to_b: Subscription,
    _b_to_a: Subscription,
}

impl TwoWayBinding {
    pub fn new<T, A, B>(a: &A, b: &B) -> Self
    where
        T: 'static,
        A: SyncEndpoint<T>,
        B: SyncEndpoint<T>,
    {
        b.write(a.current());

        let syncing = Rc::new(Cell::new(false));

        let target = b.clone();
        let guard = Rc::clone(&syncing);
        let a_to_b = a.watch(Box::new(move |value| {
            if !guard.get() {
                guard.set(true);
                target.write(value);
                guard.set(false);
            }
        }));

        let target = a.clone();
        let guard = Rc::clone(&syncing);
        let b_to_a = b.watch(Box::new(move |value| {
            if !guard.get() {
                guard.set(true);
                target.write(value);
                guard.set(false);
            }
        }));

        Self {
            _a_to_b: a_to_b,
            _b_to_a: b_to_a,
        }
    }

    /// Convert into a plain subscription guard.
    pub fn into_subscription(self) -> Subscription {
        Subscription::from_guard(self)
    }
}

impl std::fmt::Debug for TwoWayBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoWayBinding").finish()
    }
}

// ---------------------------------------------------------------------------
// BindingScope
// ---------------------------------------------------------------------------

/// Owns the subscriptions of a logical unit.
///
/// When the scope is dropped (or cleared) every held subscription is
/// released and its callbacks stop firing.
pub struct BindingScope {
    subscriptions: Vec<Subscription>,
}

impl BindingScope {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }

    /// Keep `sub` alive for the lifetime of the scope.
    pub fn hold(&mut self, sub: Subscription) {
        self.subscriptions.push(sub);
    }

    /// Subscribe to an observable within this scope.
    pub fn subscribe<T: Clone + PartialEq + 'static>(
        &mut self,
        source: &Observable<T>,
        callback: impl Fn(&T) + 'static,
    ) -> &mut Self {
        let sub = source.subscribe(callback);
        self.subscriptions.push(sub);
        self
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Release everything now; the scope stays usable.
    pub fn clear(&mut self) {
        while self.subscriptions.pop().is_some() {}
    }
}

impl Drop for BindingScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Default for BindingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingScope")
            .field("binding_count", &self.subscriptions.len())
            .finish()
    }
}
