#![forbid(unsafe_code)]

//! [`Observable`], [`Emitter`] and the [`Subscription`] guard they hand out.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::batch;

// ---------------------------------------------------------------------------
// Subscriber storage
// ---------------------------------------------------------------------------

struct Callback<T>(Box<dyn Fn(&T)>);

struct SubscriberList<T> {
    entries: Vec<Weak<Callback<T>>>,
}

impl<T: 'static> SubscriberList<T> {
    const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn add(&mut self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong = Rc::new(Callback(Box::new(callback)));
        self.entries.push(Rc::downgrade(&strong));
        Subscription::from_guard(strong)
    }

    fn snapshot(&self) -> Vec<Weak<Callback<T>>> {
        self.entries.clone()
    }

    fn prune(&mut self) {
        self.entries.retain(|weak| weak.strong_count() > 0);
    }

    fn live_count(&self) -> usize {
        self.entries.iter().filter(|w| w.strong_count() > 0).count()
    }
}

/// Invoke each still-live callback in registration order.
///
/// Callbacks are upgraded one at a time, so a callback dropped by an earlier
/// callback in the same cycle is skipped.
fn dispatch<T>(targets: Vec<Weak<Callback<T>>>, value: &T) {
    for weak in targets {
        if let Some(callback) = weak.upgrade() {
            (callback.0)(value);
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// RAII guard for a subscriber callback.
///
/// Dropping the guard releases the only strong reference to the callback, so
/// the source skips it from the next notification onwards. Several guards can
/// be merged into one with [`Subscription::merge`].
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    guards: Vec<Box<dyn Any>>,
}

impl Subscription {
    /// Wrap an arbitrary value whose lifetime defines the subscription.
    pub fn from_guard(guard: impl Any) -> Self {
        Self {
            guards: vec![Box::new(guard)],
        }
    }

    /// A subscription that holds nothing.
    pub fn empty() -> Self {
        Self { guards: Vec::new() }
    }

    /// Combine several subscriptions into one guard.
    pub fn merge(parts: impl IntoIterator<Item = Subscription>) -> Self {
        Self {
            guards: parts.into_iter().flat_map(|s| s.guards).collect(),
        }
    }

    /// Number of underlying guards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("guards", &self.guards.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Observable<T>
// ---------------------------------------------------------------------------

struct ObservableInner<T> {
    value: T,
    version: u64,
    subscribers: SubscriberList<T>,
}

/// A shared, version-tracked value with change notification.
///
/// Cloning an `Observable` yields another handle to the same value.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: SubscriberList::new(),
            })),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Borrow the current value without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Number of value changes since creation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Replace the value and notify subscribers. Returns whether it changed.
    pub fn set(&self, value: T) -> bool {
        let changed = self.store(value);
        if changed {
            self.notify();
        }
        changed
    }

    /// Replace the value without notifying anyone. Returns whether it changed.
    pub fn set_silent(&self, value: T) -> bool {
        self.store(value)
    }

    /// Derive the next value from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let next = f(&self.inner.borrow().value);
        self.set(next)
    }

    /// Register a callback invoked with the new value after each change.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.inner.borrow_mut().subscribers.add(callback)
    }

    /// Live subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.live_count()
    }

    /// A view that can read and subscribe but not write.
    #[must_use]
    pub fn read_only(&self) -> ReadOnly<T> {
        ReadOnly {
            source: self.clone(),
        }
    }

    /// Whether both handles point at the same value.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn store(&self, value: T) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.value == value {
            return false;
        }
        inner.value = value;
        inner.version += 1;
        true
    }

    /// Send the current value to subscribers, honoring any active batch.
    pub fn notify(&self) {
        if batch::is_batching() {
            let key = Rc::as_ptr(&self.inner) as *const () as usize;
            let this = self.clone();
            batch::defer(key, Box::new(move || this.notify_now()));
            return;
        }
        self.notify_now();
    }

    fn notify_now(&self) {
        let (value, targets) = {
            let inner = self.inner.borrow();
            (inner.value.clone(), inner.subscribers.snapshot())
        };
        dispatch(targets, &value);
        self.inner.borrow_mut().subscribers.prune();
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ReadOnly<T>
// ---------------------------------------------------------------------------

/// Read and subscribe access to an [`Observable`] owned elsewhere.
pub struct ReadOnly<T> {
    source: Observable<T>,
}

impl<T> Clone for ReadOnly<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> ReadOnly<T> {
    #[must_use]
    pub fn get(&self) -> T {
        self.source.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.source.with(f)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.source.version()
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.source.subscribe(callback)
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadOnly<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnly").field(&self.source).finish()
    }
}

// ---------------------------------------------------------------------------
// Emitter<E>
// ---------------------------------------------------------------------------

/// A broadcast channel for transient events.
///
/// Unlike [`Observable`], an emitter stores no value and is not deferred by
/// [`BatchScope`](crate::BatchScope): every `emit` reaches subscribers
/// immediately, in registration order.
pub struct Emitter<E> {
    subscribers: Rc<RefCell<SubscriberList<E>>>,
}

impl<E> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Rc::clone(&self.subscribers),
        }
    }
}

impl<E: 'static> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Emitter<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Rc::new(RefCell::new(SubscriberList::new())),
        }
    }

    pub fn emit(&self, event: &E) {
        let targets = self.subscribers.borrow().snapshot();
        if targets.is_empty() {
            return;
        }
        dispatch(targets, event);
        self.subscribers.borrow_mut().prune();
    }

    pub fn subscribe(&self, callback: impl Fn(&E) + 'static) -> Subscription {
        self.subscribers.borrow_mut().add(callback)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().live_count()
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
