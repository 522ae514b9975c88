#![forbid(unsafe_code)]

//! Leaf nodes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use formtree_reactive::{Observable, ReadOnly, Subscription, SyncEndpoint};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{GroupNode, NodeEvent, NodeEventKind, NodeState, SetValueOptions, propagate};
use crate::config::{FieldConfig, UpdateOn};
use crate::error::FormResult;
use crate::validation::{
    AsyncValidationCoordinator, ValidationError, ValidationToken, ValidationTrace,
};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// When a field's errors should be displayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowErrors {
    /// Once the user has left the field.
    #[default]
    Touched,
    /// Once the value has been edited.
    Dirty,
    Always,
}

/// Everything a renderer needs to draw one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSnapshot {
    pub path: String,
    pub value: Value,
    pub errors: Vec<ValidationError>,
    pub pending: bool,
    pub disabled: bool,
    pub visible: bool,
    pub touched: bool,
    pub dirty: bool,
    pub should_show_error: bool,
    pub component: Value,
    pub component_props: Value,
}

// ---------------------------------------------------------------------------
// FieldNode
// ---------------------------------------------------------------------------

pub(crate) struct FieldInner {
    value: Observable<Value>,
    initial: RefCell<Value>,
    pending: Observable<bool>,
    state: NodeState,
    component: Value,
    component_props: Value,
    update_on: UpdateOn,
    debounce: Option<Duration>,
    coordinator: RefCell<AsyncValidationCoordinator>,
}

/// A leaf holding one JSON value.
#[derive(Clone)]
pub struct FieldNode {
    inner: Rc<FieldInner>,
}

impl FieldNode {
    #[must_use]
    pub fn new(config: &FieldConfig) -> Self {
        Self {
            inner: Rc::new(FieldInner {
                value: Observable::new(config.value.clone()),
                initial: RefCell::new(config.value.clone()),
                pending: Observable::new(false),
                state: NodeState::new(config.disabled),
                component: config.component.clone(),
                component_props: config.component_props.clone(),
                update_on: config.update_on,
                debounce: config.debounce,
                coordinator: RefCell::new(AsyncValidationCoordinator::new()),
            }),
        }
    }

    // -- value --------------------------------------------------------------

    #[must_use]
    pub fn value(&self) -> Value {
        self.inner.value.get()
    }

    pub fn with_value<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        self.inner.value.with(f)
    }

    #[must_use]
    pub fn initial_value(&self) -> Value {
        self.inner.initial.borrow().clone()
    }

    pub fn set_value(&self, value: Value) {
        self.set_value_with(value, SetValueOptions::default());
    }

    /// Write a value.
    ///
    /// Any change invalidates in-flight async validation for this field,
    /// notifies value subscribers and bumps every ancestor's revision. An
    /// emitting write also marks the field dirty and bubbles a
    /// [`NodeEventKind::ValueChanged`] event, which is what drives change
    /// validation.
    pub fn set_value_with(&self, value: Value, options: SetValueOptions) {
        if !self.inner.value.set_silent(value) {
            return;
        }
        self.supersede_validation();
        if !options.emit_event {
            tracing::trace!(path = %self.path(), "silent write");
            self.inner.value.notify();
            self.inner.state.revision_changed();
            return;
        }
        self.inner.value.notify();
        self.inner.state.set_dirty(true);
        propagate(
            &self.inner.state,
            &NodeEvent {
                kind: NodeEventKind::ValueChanged,
                path: self.path(),
            },
        );
    }

    /// Restore the initial value and clear errors, touched, dirty and pending.
    pub fn reset(&self) {
        let initial = self.initial_value();
        let changed = self.inner.value.set_silent(initial);
        if changed {
            self.supersede_validation();
            self.inner.value.notify();
        }
        self.inner.state.set_errors(Vec::new());
        self.inner.state.set_touched(false);
        self.inner.state.set_dirty(false);
        self.set_pending(false);
        if changed {
            propagate(
                &self.inner.state,
                &NodeEvent {
                    kind: NodeEventKind::Reset,
                    path: self.path(),
                },
            );
        }
    }

    /// Make `value` the new initial value, then reset to it.
    pub fn reset_to(&self, value: Value) {
        *self.inner.initial.borrow_mut() = value;
        self.reset();
    }

    pub fn subscribe(&self, callback: impl Fn(&Value) + 'static) -> Subscription {
        self.inner.value.subscribe(callback)
    }

    #[must_use]
    pub fn value_signal(&self) -> ReadOnly<Value> {
        self.inner.value.read_only()
    }

    // -- errors -------------------------------------------------------------

    #[must_use]
    pub fn errors(&self) -> Vec<ValidationError> {
        self.inner.state.errors.get()
    }

    pub fn set_errors(&self, errors: Vec<ValidationError>) {
        self.inner.state.set_errors(errors);
    }

    pub fn append_error(&self, error: ValidationError) {
        self.inner.state.append_error(error);
    }

    pub fn clear_errors(&self) {
        self.inner.state.clear_errors_where(|_| true);
    }

    pub fn clear_errors_where(&self, filter: impl Fn(&ValidationError) -> bool) {
        self.inner.state.clear_errors_where(filter);
    }

    #[must_use]
    pub fn errors_signal(&self) -> ReadOnly<Vec<ValidationError>> {
        self.inner.state.errors.read_only()
    }

    /// No blocking errors, or disabled.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.disabled() || !self.inner.state.has_blocking_errors()
    }

    #[must_use]
    pub fn invalid(&self) -> bool {
        !self.valid()
    }

    // -- flags --------------------------------------------------------------

    #[must_use]
    pub fn pending(&self) -> bool {
        self.inner.pending.get()
    }

    pub(crate) fn set_pending(&self, pending: bool) {
        if self.inner.pending.set(pending) {
            self.inner.state.status_changed();
        }
    }

    #[must_use]
    pub fn pending_signal(&self) -> ReadOnly<bool> {
        self.inner.pending.read_only()
    }

    #[must_use]
    pub fn touched(&self) -> bool {
        self.inner.state.touched.get()
    }

    #[must_use]
    pub fn dirty(&self) -> bool {
        self.inner.state.dirty.get()
    }

    #[must_use]
    pub fn disabled(&self) -> bool {
        self.inner.state.disabled.get()
    }

    #[must_use]
    pub fn visible(&self) -> bool {
        self.inner.state.visible.get()
    }

    /// Mark touched and announce it, even when already touched, so that
    /// blur-triggered validation runs on every blur.
    pub fn mark_as_touched(&self) {
        self.inner.state.set_touched(true);
        propagate(
            &self.inner.state,
            &NodeEvent {
                kind: NodeEventKind::Touched,
                path: self.path(),
            },
        );
    }

    pub fn mark_as_untouched(&self) {
        self.inner.state.set_touched(false);
    }

    pub fn mark_as_dirty(&self) {
        self.inner.state.set_dirty(true);
    }

    pub fn mark_as_pristine(&self) {
        self.inner.state.set_dirty(false);
    }

    pub fn enable(&self) {
        self.inner.state.set_disabled(false);
    }

    pub fn disable(&self) {
        self.inner.state.set_disabled(true);
    }

    pub fn show(&self) {
        self.inner.state.set_visible(true);
    }

    pub fn hide(&self) {
        self.inner.state.set_visible(false);
    }

    // -- configuration ------------------------------------------------------

    #[must_use]
    pub fn component(&self) -> &Value {
        &self.inner.component
    }

    #[must_use]
    pub fn component_props(&self) -> &Value {
        &self.inner.component_props
    }

    #[must_use]
    pub fn update_on(&self) -> UpdateOn {
        self.inner.update_on
    }

    #[must_use]
    pub fn debounce(&self) -> Option<Duration> {
        self.inner.debounce
    }

    // -- structure ----------------------------------------------------------

    /// Run the owning form's validators for this field.
    pub async fn validate(&self) -> FormResult<bool> {
        match self.root().and_then(|root| root.form()) {
            Some(form) => form.validate_within(&self.path()).await,
            None => Ok(self.valid()),
        }
    }

    #[must_use]
    pub fn path(&self) -> String {
        self.inner.state.path()
    }

    /// The form root this field belongs to, if it is attached to one.
    #[must_use]
    pub fn root(&self) -> Option<GroupNode> {
        self.inner.state.root_group()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &FieldNode) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn state(&self) -> &NodeState {
        &self.inner.state
    }

    // -- async validation bookkeeping ----------------------------------------

    pub(crate) fn begin_validation(&self) -> ValidationToken {
        self.inner.coordinator.borrow_mut().start_validation()
    }

    /// Whether a result computed under `token` may still be applied.
    ///
    /// A stale result leaves `pending` alone: whoever superseded it owns it.
    pub(crate) fn finish_validation(&self, token: ValidationToken, is_valid: bool) -> bool {
        let applied = self.inner.coordinator.borrow_mut().try_apply(token, is_valid);
        if applied {
            self.set_pending(false);
        }
        applied
    }

    fn supersede_validation(&self) {
        let cancelled = self.inner.coordinator.borrow_mut().supersede();
        if cancelled {
            self.set_pending(false);
        }
    }

    /// Token-level history of this field's validation runs.
    #[must_use]
    pub fn validation_trace(&self) -> ValidationTrace {
        self.inner.coordinator.borrow().trace().clone()
    }

    // -- rendering ----------------------------------------------------------

    /// Monotonic counter that changes whenever anything a renderer shows
    /// changes, silent writes included.
    #[must_use]
    pub fn state_version(&self) -> u64 {
        self.inner.value.version() + self.inner.pending.version() + self.inner.state.version_sum()
    }

    #[must_use]
    pub fn snapshot(&self, show: ShowErrors) -> FieldSnapshot {
        let errors = self.errors();
        let gate = match show {
            ShowErrors::Touched => self.touched(),
            ShowErrors::Dirty => self.dirty(),
            ShowErrors::Always => true,
        };
        FieldSnapshot {
            path: self.path(),
            value: self.value(),
            should_show_error: gate && self.visible() && !errors.is_empty(),
            errors,
            pending: self.pending(),
            disabled: self.disabled(),
            visible: self.visible(),
            touched: self.touched(),
            dirty: self.dirty(),
            component: self.inner.component.clone(),
            component_props: self.inner.component_props.clone(),
        }
    }
}

impl SyncEndpoint<Value> for FieldNode {
    fn current(&self) -> Value {
        self.value()
    }

    fn write(&self, value: Value) {
        self.set_value(value);
    }

    fn watch(&self, callback: Box<dyn Fn(Value)>) -> Subscription {
        self.subscribe(move |v| callback(v.clone()))
    }
}

impl fmt::Debug for FieldNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldNode")
            .field("value", &self.value())
            .field("errors", &self.errors().len())
            .field("touched", &self.touched())
            .field("dirty", &self.dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    fn field(v: Value) -> FieldNode {
        FieldNode::new(&FieldConfig::new(v))
    }

    #[test]
    fn emitting_write_notifies_and_marks_dirty() {
        let f = field(json!(""));
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = f.subscribe(move |_| h.set(h.get() + 1));

        f.set_value(json!("a"));
        assert_eq!(f.value(), json!("a"));
        assert!(f.dirty());
        assert_eq!(hits.get(), 1);

        f.set_value(json!("a"));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn silent_write_notifies_but_stays_clean() {
        let f = field(json!(1));
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = f.subscribe(move |_| h.set(h.get() + 1));
        let signal_hits = Rc::new(Cell::new(0));
        let s = Rc::clone(&signal_hits);
        let _signal = f.value_signal().subscribe(move |_| s.set(s.get() + 1));
        let before = f.state_version();

        f.set_value_with(json!(2), SetValueOptions::silent());
        assert_eq!(f.value(), json!(2));
        assert_eq!(hits.get(), 1);
        assert_eq!(signal_hits.get(), 1);
        assert!(!f.dirty());
        assert!(f.state_version() > before);

        f.set_value_with(json!(2), SetValueOptions::silent());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn reset_restores_initial_and_clears_status() {
        let f = field(json!("start"));
        f.set_value(json!("changed"));
        f.mark_as_touched();
        f.set_errors(vec![ValidationError::new("x", "bad")]);

        f.reset();
        assert_eq!(f.value(), json!("start"));
        assert!(f.errors().is_empty());
        assert!(!f.touched());
        assert!(!f.dirty());
        assert!(f.valid());
    }

    #[test]
    fn reset_to_replaces_initial() {
        let f = field(json!(1));
        f.reset_to(json!(5));
        f.set_value(json!(6));
        f.reset();
        assert_eq!(f.value(), json!(5));
    }

    #[test]
    fn warnings_and_disabled_do_not_block() {
        let f = field(json!(""));
        f.set_errors(vec![
            ValidationError::new("weak", "weak").with_severity(crate::validation::Severity::Warning),
        ]);
        assert!(f.valid());

        f.set_errors(vec![ValidationError::new("required", "required")]);
        assert!(f.invalid());
        f.disable();
        assert!(f.valid());
    }

    #[test]
    fn snapshot_gates_error_display() {
        let f = FieldNode::new(&FieldConfig::new("").component("Input"));
        f.set_errors(vec![ValidationError::new("required", "Required")]);

        let snap = f.snapshot(ShowErrors::Touched);
        assert!(!snap.should_show_error);
        assert_eq!(snap.component, json!("Input"));

        assert!(f.snapshot(ShowErrors::Always).should_show_error);

        f.mark_as_touched();
        assert!(f.snapshot(ShowErrors::Touched).should_show_error);

        f.hide();
        assert!(!f.snapshot(ShowErrors::Touched).should_show_error);
    }

    #[test]
    fn write_supersedes_in_flight_validation() {
        let f = field(json!("a"));
        let token = f.begin_validation();
        f.set_value(json!("b"));
        assert!(!f.finish_validation(token, true));

        let fresh = f.begin_validation();
        assert!(f.finish_validation(fresh, true));
        assert!(f.validation_trace().verify_invariants().is_empty());
    }
}
