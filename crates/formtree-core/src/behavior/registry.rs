#![forbid(unsafe_code)]

//! Behavior registrations collected while a behavior schema runs.
//!
//! Unlike validators, behaviors are not interpreted later: each registration
//! is a closure that wires its effect once the form exists and hands back the
//! [`Subscription`] keeping that effect alive.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::LocalKey;

use formtree_reactive::Subscription;
use serde_json::Value;

use super::BehaviorContext;
use crate::error::{ErrorPolicy, FormError, FormResult, panic_message};
use crate::node::{FormNode, GroupNode, SetValueOptions};
use crate::path::FieldPath;
use crate::scheduler::Scheduler;
use crate::scope::{self, RegistryScope, ScopedRegistry};
use crate::validation::applicator::Applicator;

pub(crate) type BindFn = Box<dyn FnOnce(&BehaviorBinder) -> FormResult<Subscription>>;

// ---------------------------------------------------------------------------
// BehaviorBinder
// ---------------------------------------------------------------------------

/// What a registration can reach while it wires itself up.
pub struct BehaviorBinder {
    root: GroupNode,
    scheduler: Scheduler,
    applicator: Applicator,
    policy: ErrorPolicy,
    next_key: Cell<u64>,
}

impl BehaviorBinder {
    pub(crate) fn new(
        root: GroupNode,
        scheduler: Scheduler,
        applicator: Applicator,
        policy: ErrorPolicy,
    ) -> Self {
        Self {
            root,
            scheduler,
            applicator,
            policy,
            next_key: Cell::new(0),
        }
    }

    #[must_use]
    pub fn root(&self) -> &GroupNode {
        &self.root
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn applicator(&self) -> &Applicator {
        &self.applicator
    }

    #[must_use]
    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn resolve(&self, path: &FieldPath) -> FormResult<FormNode> {
        self.root.get_field_checked(path.path())
    }

    #[must_use]
    pub fn context(&self) -> BehaviorContext {
        BehaviorContext::new(self.root.clone())
    }

    /// A scheduler key unique to this form, e.g. `watch:amount#3`.
    pub(crate) fn timer_key(&self, kind: &str, path: &FieldPath) -> String {
        let id = self.next_key.get();
        self.next_key.set(id + 1);
        format!("{kind}:{path}#{id}")
    }
}

impl fmt::Debug for BehaviorBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorBinder")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// Run a user callback, turning a panic into `None` and an `error!` event.
pub(crate) fn guarded<T>(behavior: &'static str, target: &str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            tracing::error!(
                behavior,
                target,
                panic = %panic_message(payload.as_ref()),
                "behavior callback panicked; skipped"
            );
            None
        }
    }
}

/// Invoke `effect` after every change of any of `nodes`.
///
/// Re-entrant notifications caused by the effect itself are dropped.
pub(crate) fn on_any_change(nodes: &[FormNode], effect: impl Fn() + 'static) -> Subscription {
    let effect = std::rc::Rc::new(effect);
    let running = std::rc::Rc::new(Cell::new(false));
    Subscription::merge(nodes.iter().map(|node| {
        let effect = std::rc::Rc::clone(&effect);
        let running = std::rc::Rc::clone(&running);
        node.on_change(move || {
            if running.replace(true) {
                return;
            }
            effect();
            running.set(false);
        })
    }))
}

/// Write `value` without emitting. Failures are logged.
pub(crate) fn write_silent(behavior: &'static str, node: &FormNode, value: Value) {
    if let Err(err) = node.set_value_with(value, SetValueOptions::silent()) {
        tracing::warn!(behavior, target = %node.path(), error = %err, "behavior write rejected");
    }
}

// ---------------------------------------------------------------------------
// BehaviorRegistry
// ---------------------------------------------------------------------------

thread_local! {
    static BEHAVIOR_STACK: RefCell<Vec<BehaviorRegistry>> = const { RefCell::new(Vec::new()) };
}

/// One recorded behavior.
pub struct BehaviorRegistration {
    pub kind: &'static str,
    pub target: Option<String>,
    pub(crate) bind: BindFn,
}

impl fmt::Debug for BehaviorRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRegistration")
            .field("kind", &self.kind)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Everything one behavior schema registered.
pub struct BehaviorRegistry {
    scope_id: u64,
    root: Option<FieldPath>,
    registrations: Vec<BehaviorRegistration>,
    config_errors: Vec<FormError>,
}

impl ScopedRegistry for BehaviorRegistry {
    fn stack() -> &'static LocalKey<RefCell<Vec<Self>>> {
        &BEHAVIOR_STACK
    }

    fn fresh(scope_id: u64) -> Self {
        Self {
            scope_id,
            root: None,
            registrations: Vec::new(),
            config_errors: Vec::new(),
        }
    }

    fn record_config_error(&mut self, err: FormError) {
        self.config_errors.push(err);
    }
}

impl BehaviorRegistry {
    /// Run `schema` against `root` under a fresh registry.
    pub fn collect(root: &FieldPath, schema: impl FnOnce(&FieldPath)) -> FormResult<Self> {
        let scope = RegistryScope::<Self>::push();
        scope::with_current::<Self, _>(|registry| registry.root = Some(root.clone()));
        match catch_unwind(AssertUnwindSafe(|| schema(root))) {
            Ok(()) => {
                let registry = scope.finish();
                tracing::debug!(
                    behaviors = registry.registrations.len(),
                    config_errors = registry.config_errors.len(),
                    "behavior schema collected"
                );
                Ok(registry)
            }
            Err(payload) => Err(FormError::SchemaPanicked {
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    #[must_use]
    pub fn scope_id(&self) -> u64 {
        self.scope_id
    }

    #[must_use]
    pub fn root(&self) -> Option<&FieldPath> {
        self.root.as_ref()
    }

    pub(crate) fn register(&mut self, kind: &'static str, target: Option<&FieldPath>, bind: BindFn) {
        self.registrations.push(BehaviorRegistration {
            kind,
            target: target.map(|p| p.path().to_string()),
            bind,
        });
    }

    #[must_use]
    pub fn registrations(&self) -> &[BehaviorRegistration] {
        &self.registrations
    }

    /// Registration kinds in order, e.g. `["compute_from", "watch_field"]`.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.registrations.iter().map(|r| r.kind).collect()
    }

    #[must_use]
    pub fn config_errors(&self) -> &[FormError] {
        &self.config_errors
    }

    pub fn take_config_errors(&mut self) -> Vec<FormError> {
        std::mem::take(&mut self.config_errors)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub(crate) fn into_registrations(self) -> Vec<BehaviorRegistration> {
        self.registrations
    }
}

impl fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("scope_id", &self.scope_id)
            .field("registrations", &self.registrations)
            .field("config_errors", &self.config_errors)
            .finish()
    }
}
