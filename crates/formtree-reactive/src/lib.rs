#![forbid(unsafe_code)]

//! Change-tracking primitives used by the formtree node tree.
//!
//! - [`Observable`]: a shared, version-tracked value with subscriber callbacks.
//! - [`Emitter`]: a value-less event channel with the same subscriber model.
//! - [`ReadOnly`]: a read/subscribe view over an `Observable`.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`BatchScope`]: RAII guard that defers `Observable` notifications until
//!   the outermost scope exits.
//! - [`BindingScope`] and [`TwoWayBinding`]: lifecycle helpers that own
//!   subscriptions for a logical unit (a form, a behavior set).
//!
//! # Architecture
//!
//! Everything here is single-threaded: shared state lives in
//! `Rc<RefCell<..>>`, subscribers are stored as `Weak` callbacks and pruned
//! lazily after each notification cycle. No borrow is held while a callback
//! runs, so callbacks may freely read or write other observables (and the one
//! that notified them).
//!
//! # Invariants
//!
//! 1. Version increments exactly once per mutation that changes the value.
//! 2. Subscribers are notified in registration order.
//! 3. Setting a value equal to the current value is a no-op (no version bump,
//!    no notifications).
//! 4. Dropping a [`Subscription`] removes the callback before the next
//!    notification cycle.
//! 5. Within a `BatchScope`, values are updated immediately but notifications
//!    are deferred until the outermost scope exits; each observable is
//!    notified at most once per flush, with its value at flush time.
//! 6. `set_silent` updates value and version without notifying anyone.

pub mod batch;
pub mod binding;
pub mod observable;

pub use batch::BatchScope;
pub use binding::{BindingScope, SyncEndpoint, TwoWayBinding};
pub use observable::{Emitter, Observable, ReadOnly, Subscription};
