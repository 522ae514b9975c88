#![forbid(unsafe_code)]

//! Thread-local stacks of registries that are being filled by schema code.
//!
//! Schema functions (`required(&p.email)`, `compute_from(..)`) do not receive
//! a registry argument; they write into whichever registry is on top of the
//! stack for their kind. A [`RegistryScope`] pushes a fresh registry and pops
//! it when finished or dropped, so an unwinding schema function can never
//! leave a stale registry behind.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::thread::LocalKey;

use crate::behavior::BehaviorRegistry;
use crate::error::FormError;
use crate::validation::ValidationRegistry;

thread_local! {
    static NEXT_SCOPE_ID: Cell<u64> = const { Cell::new(1) };
}

/// A registry type that can live on a scope stack.
pub trait ScopedRegistry: Sized + 'static {
    #[doc(hidden)]
    fn stack() -> &'static LocalKey<RefCell<Vec<Self>>>;

    #[doc(hidden)]
    fn fresh(scope_id: u64) -> Self;

    /// Record a configuration problem noticed while the schema ran.
    fn record_config_error(&mut self, err: FormError);
}

/// RAII guard for one pushed registry.
#[must_use = "dropping the scope discards the registry"]
pub struct RegistryScope<R: ScopedRegistry> {
    depth: usize,
    scope_id: u64,
    finished: bool,
    _marker: PhantomData<R>,
}

impl<R: ScopedRegistry> RegistryScope<R> {
    /// Push a fresh registry.
    pub fn push() -> Self {
        let scope_id = NEXT_SCOPE_ID.with(|id| {
            let current = id.get();
            id.set(current + 1);
            current
        });
        let depth = R::stack().with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(R::fresh(scope_id));
            stack.len()
        });
        Self {
            depth,
            scope_id,
            finished: false,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn scope_id(&self) -> u64 {
        self.scope_id
    }

    /// Pop the registry and hand it back.
    ///
    /// Any scopes pushed above this one and not yet popped are discarded.
    pub fn finish(mut self) -> R {
        self.finished = true;
        R::stack().with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.truncate(self.depth);
            stack.pop()
        })
        .unwrap_or_else(|| R::fresh(self.scope_id))
    }
}

impl<R: ScopedRegistry> Drop for RegistryScope<R> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        R::stack().with(|stack| {
            stack.borrow_mut().truncate(self.depth.saturating_sub(1));
        });
    }
}

impl<R: ScopedRegistry> std::fmt::Debug for RegistryScope<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryScope")
            .field("depth", &self.depth)
            .field("scope_id", &self.scope_id)
            .finish()
    }
}

/// Run `f` against the innermost registry of kind `R`, if any.
///
/// The stack stays borrowed while `f` runs; `f` must not push or pop scopes.
pub fn with_current<R: ScopedRegistry, T>(f: impl FnOnce(&mut R) -> T) -> Option<T> {
    R::stack().with(|stack| stack.borrow_mut().last_mut().map(f))
}

/// Number of registries of kind `R` currently pushed.
#[must_use]
pub fn depth<R: ScopedRegistry>() -> usize {
    R::stack().with(|stack| stack.borrow().len())
}

/// Route a configuration error to whichever schema is being collected.
pub(crate) fn report_config_error(err: FormError) {
    if depth::<ValidationRegistry>() > 0 {
        with_current::<ValidationRegistry, _>(|r| r.record_config_error(err));
    } else if depth::<BehaviorRegistry>() > 0 {
        with_current::<BehaviorRegistry, _>(|r| r.record_config_error(err));
    } else {
        tracing::debug!(error = %err, "path problem outside of a schema scope");
    }
}
