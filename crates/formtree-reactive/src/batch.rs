#![forbid(unsafe_code)]

//! Deferred notification scopes.
//!
//! While a [`BatchScope`] is alive on the current thread, observables still
//! store new values immediately but queue their notification instead of
//! running it. Nested scopes share one queue; dropping the outermost scope
//! flushes it. Each observable is queued at most once per flush and notifies
//! with whatever value it holds at flush time.

use std::cell::{Cell, RefCell};

type Deferred = Box<dyn FnOnce()>;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static PENDING: RefCell<Vec<(usize, Deferred)>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn is_batching() -> bool {
    DEPTH.with(Cell::get) > 0
}

pub(crate) fn defer(key: usize, notify: Deferred) {
    PENDING.with(|pending| {
        let mut pending = pending.borrow_mut();
        if pending.iter().all(|(k, _)| *k != key) {
            pending.push((key, notify));
        }
    });
}

/// RAII guard that batches observable notifications.
#[must_use = "the batch flushes as soon as the scope is dropped"]
pub struct BatchScope {
    _private: (),
}

impl BatchScope {
    pub fn new() -> Self {
        DEPTH.with(|d| d.set(d.get() + 1));
        Self { _private: () }
    }

    /// Current nesting depth on this thread.
    #[must_use]
    pub fn depth() -> usize {
        DEPTH.with(Cell::get)
    }

    /// Run `f` inside a batch and flush afterwards.
    pub fn run<R>(f: impl FnOnce() -> R) -> R {
        let _scope = Self::new();
        f()
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let remaining = DEPTH.with(|d| {
            let next = d.get().saturating_sub(1);
            d.set(next);
            next
        });
        if remaining > 0 {
            return;
        }
        loop {
            let queued = PENDING.with(|p| std::mem::take(&mut *p.borrow_mut()));
            if queued.is_empty() {
                break;
            }
            tracing::trace!(count = queued.len(), "flushing batched notifications");
            for (_, notify) in queued {
                notify();
            }
        }
    }
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("depth", &Self::depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Observable;
    use std::rc::Rc;

    #[test]
    fn notifications_deferred_until_scope_exit() {
        let obs = Observable::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = obs.subscribe(move |v| s.borrow_mut().push(*v));

        {
            let _batch = BatchScope::new();
            obs.set(1);
            obs.set(2);
            obs.set(3);
            assert_eq!(obs.get(), 3);
            assert!(seen.borrow().is_empty());
        }
        assert_eq!(*seen.borrow(), vec![3]);
    }

    #[test]
    fn nested_scopes_flush_once_at_outermost() {
        let obs = Observable::new(0);
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let _sub = obs.subscribe(move |_| s.set(s.get() + 1));

        let outer = BatchScope::new();
        {
            let _inner = BatchScope::new();
            obs.set(1);
            assert_eq!(BatchScope::depth(), 2);
        }
        assert_eq!(seen.get(), 0);
        obs.set(2);
        drop(outer);
        assert_eq!(seen.get(), 1);
        assert_eq!(BatchScope::depth(), 0);
    }

    #[test]
    fn writes_during_flush_notify_immediately() {
        let a = Observable::new(0);
        let b = Observable::new(0);
        let b_writer = b.clone();
        let _link = a.subscribe(move |v| {
            b_writer.set(v * 10);
        });
        let b_seen = Rc::new(Cell::new(0));
        let bs = Rc::clone(&b_seen);
        let _watch = b.subscribe(move |v| bs.set(*v));

        BatchScope::run(|| {
            a.set(4);
        });
        assert_eq!(b_seen.get(), 40);
    }
}
