#![forbid(unsafe_code)]

//! Keyed containers.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use formtree_reactive::{BatchScope, ReadOnly, Subscription};
use serde_json::{Map, Value};

use super::{
    ContainerSignals, FieldNode, FormNode, NodeEvent, NodeEventKind, NodeState, ParentLink,
    SetValueOptions, all_errors, create_node, propagate, resolve_checked, resolve_segments,
};
use crate::config::{GroupConfig, NodeConfig};
use crate::error::{FormError, FormResult};
use crate::form::{Form, FormInner};
use crate::path::{join_key, parse_path};
use crate::registry::FieldRegistry;
use crate::validation::ValidationError;

pub(crate) struct GroupInner {
    fields: RefCell<FieldRegistry>,
    state: NodeState,
    signals: ContainerSignals,
    form: RefCell<Weak<FormInner>>,
}

/// Named children in declaration order.
///
/// The key set is fixed at construction; [`GroupNode::add_field`] and
/// [`GroupNode::remove_field`] are the only ways to change it.
#[derive(Clone)]
pub struct GroupNode {
    inner: Rc<GroupInner>,
}

impl GroupNode {
    pub(crate) fn from_inner(inner: Rc<GroupInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn new(config: &GroupConfig) -> Self {
        let group = Self {
            inner: Rc::new(GroupInner {
                fields: RefCell::new(FieldRegistry::new()),
                state: NodeState::new(false),
                signals: ContainerSignals::new(),
                form: RefCell::new(Weak::new()),
            }),
        };
        {
            let mut fields = group.inner.fields.borrow_mut();
            for (key, child) in &config.fields {
                let node = create_node(child);
                node.attach(group.link(key));
                fields.set(key.clone(), node);
            }
        }
        group
    }

    fn link(&self, key: &str) -> ParentLink {
        ParentLink::Group {
            node: Rc::downgrade(&self.inner),
            key: key.to_string(),
        }
    }

    // -- children -----------------------------------------------------------

    /// Direct child by key. Repeated calls return the same node.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<FormNode> {
        self.inner.fields.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.inner.fields.borrow().has(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.borrow().keys().map(str::to_string).collect()
    }

    #[must_use]
    pub fn children(&self) -> Vec<FormNode> {
        self.inner.fields.borrow().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.fields.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.fields.borrow().is_empty()
    }

    /// Resolve a dotted/bracketed path relative to this group.
    #[must_use]
    pub fn get_field_by_path(&self, path: &str) -> Option<FormNode> {
        let segments = parse_path(path).ok()?;
        resolve_segments(&FormNode::Group(self.clone()), &segments)
    }

    /// Like [`GroupNode::get_field_by_path`], but says what went wrong.
    pub fn get_field_checked(&self, path: &str) -> FormResult<FormNode> {
        resolve_checked(&FormNode::Group(self.clone()), path)
    }

    /// Resolve a path that must lead to a leaf.
    pub fn field_node(&self, path: &str) -> FormResult<FieldNode> {
        match self.get_field_checked(path)? {
            FormNode::Field(field) => Ok(field),
            _ => Err(FormError::NotAField {
                path: path.to_string(),
            }),
        }
    }

    /// Add a child at runtime.
    pub fn add_field(&self, key: &str, config: impl Into<NodeConfig>) -> FormResult<FormNode> {
        if self.has(key) {
            return Err(FormError::DuplicateKey {
                path: join_key(&self.path(), key),
            });
        }
        let node = create_node(&config.into());
        node.attach(self.link(key));
        self.inner.fields.borrow_mut().set(key, node.clone());
        self.structure_changed(node.path());
        Ok(node)
    }

    /// Remove a child. The removed node is detached and keeps its state.
    pub fn remove_field(&self, key: &str) -> Option<FormNode> {
        let removed = self.inner.fields.borrow_mut().delete(key)?;
        let path = removed.path();
        removed.detach();
        self.structure_changed(path);
        Some(removed)
    }

    fn structure_changed(&self, path: String) {
        let event = NodeEvent {
            kind: NodeEventKind::Structure,
            path,
        };
        self.inner.signals.local(&event);
        propagate(&self.inner.state, &event);
    }

    // -- value --------------------------------------------------------------

    /// Object assembled from the children, in key order.
    #[must_use]
    pub fn value(&self) -> Value {
        let map: Map<String, Value> = self
            .inner
            .fields
            .borrow()
            .iter()
            .map(|(key, node)| (key.to_string(), node.value()))
            .collect();
        Value::Object(map)
    }

    pub fn set_value(&self, value: Value) -> FormResult<()> {
        self.set_value_with(value, SetValueOptions::default())
    }

    /// Replace every child's value. `value` must be an object naming every
    /// key of this group and no others; nothing is written otherwise.
    pub fn set_value_with(&self, value: Value, options: SetValueOptions) -> FormResult<()> {
        let Value::Object(mut map) = value else {
            return Err(FormError::TypeMismatch {
                path: self.path(),
                expected: "an object",
            });
        };
        let children = self.inner.fields.borrow().to_vec();
        if let Some(unknown) = map.keys().find(|k| !children.iter().any(|(key, _)| key == *k)) {
            return Err(FormError::UnknownField {
                path: join_key(&self.path(), unknown),
            });
        }
        if let Some((missing, _)) = children.iter().find(|(key, _)| !map.contains_key(key)) {
            return Err(FormError::TypeMismatch {
                path: join_key(&self.path(), missing),
                expected: "a value for every key",
            });
        }

        let _batch = BatchScope::new();
        for (key, child) in children {
            if let Some(v) = map.remove(&key) {
                child.set_value_with(v, options)?;
            }
        }
        Ok(())
    }

    /// Write the keys present in `value`; others keep their value.
    pub fn patch_value(&self, value: Value) -> FormResult<()> {
        let Value::Object(map) = value else {
            return Err(FormError::TypeMismatch {
                path: self.path(),
                expected: "an object",
            });
        };
        let _batch = BatchScope::new();
        for (key, v) in map {
            match self.field(&key) {
                Some(child) => child.patch_value(v)?,
                None => tracing::debug!(group = %self.path(), key = %key, "patch skipped unknown key"),
            }
        }
        Ok(())
    }

    /// Reset every child and clear this group's own status.
    pub fn reset(&self) {
        let _batch = BatchScope::new();
        for child in self.children() {
            child.reset();
        }
        self.inner.state.set_errors(Vec::new());
        self.inner.state.set_touched(false);
        self.inner.state.set_dirty(false);
    }

    // -- status -------------------------------------------------------------

    /// Own errors followed by every descendant's, depth first.
    #[must_use]
    pub fn errors(&self) -> Vec<ValidationError> {
        all_errors(&self.inner.state, &self.children())
    }

    #[must_use]
    pub fn own_errors(&self) -> Vec<ValidationError> {
        self.inner.state.errors.get()
    }

    pub fn set_errors(&self, errors: Vec<ValidationError>) {
        self.inner.state.set_errors(errors);
    }

    pub fn append_error(&self, error: ValidationError) {
        self.inner.state.append_error(error);
    }

    pub fn clear_errors_where(&self, filter: impl Fn(&ValidationError) -> bool) {
        self.inner.state.clear_errors_where(filter);
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.disabled()
            || (!self.inner.state.has_blocking_errors()
                && self.children().iter().all(FormNode::valid))
    }

    #[must_use]
    pub fn invalid(&self) -> bool {
        !self.valid()
    }

    #[must_use]
    pub fn pending(&self) -> bool {
        self.children().iter().any(FormNode::pending)
    }

    #[must_use]
    pub fn touched(&self) -> bool {
        self.inner.state.touched.get() || self.children().iter().any(FormNode::touched)
    }

    #[must_use]
    pub fn dirty(&self) -> bool {
        self.inner.state.dirty.get() || self.children().iter().any(FormNode::dirty)
    }

    #[must_use]
    pub fn disabled(&self) -> bool {
        self.inner.state.disabled.get()
    }

    #[must_use]
    pub fn visible(&self) -> bool {
        self.inner.state.visible.get()
    }

    pub fn enable(&self) {
        let _batch = BatchScope::new();
        self.inner.state.set_disabled(false);
        for child in self.children() {
            child.enable();
        }
    }

    pub fn disable(&self) {
        let _batch = BatchScope::new();
        self.inner.state.set_disabled(true);
        for child in self.children() {
            child.disable();
        }
    }

    pub fn show(&self) {
        self.inner.state.set_visible(true);
    }

    pub fn hide(&self) {
        self.inner.state.set_visible(false);
    }

    pub fn mark_as_touched(&self) {
        self.inner.state.set_touched(true);
        for child in self.children() {
            child.mark_as_touched();
        }
    }

    pub fn mark_as_untouched(&self) {
        self.inner.state.set_touched(false);
        for child in self.children() {
            child.mark_as_untouched();
        }
    }

    pub fn mark_as_dirty(&self) {
        self.inner.state.set_dirty(true);
    }

    pub fn mark_as_pristine(&self) {
        self.inner.state.set_dirty(false);
        for child in self.children() {
            child.mark_as_pristine();
        }
    }

    // -- signals ------------------------------------------------------------

    /// Every change event raised in this subtree.
    pub fn subscribe_events(&self, callback: impl Fn(&NodeEvent) + 'static) -> Subscription {
        self.inner.signals.events.subscribe(callback)
    }

    /// Bumps on every emitting value change or structural change below.
    #[must_use]
    pub fn revision(&self) -> ReadOnly<u64> {
        self.inner.signals.revision.read_only()
    }

    /// Bumps whenever errors or flags change anywhere below.
    #[must_use]
    pub fn status(&self) -> ReadOnly<u64> {
        self.inner.signals.status.read_only()
    }

    // -- validation ---------------------------------------------------------

    /// Run the owning form's validators for this subtree.
    ///
    /// A group that does not belong to a form has nothing registered and
    /// reports its current validity.
    pub async fn validate(&self) -> FormResult<bool> {
        let root = self.root().unwrap_or_else(|| self.clone());
        match root.form() {
            Some(form) => form.validate_within(&self.path()).await,
            None => Ok(self.valid()),
        }
    }

    pub(crate) fn form(&self) -> Option<Form> {
        self.inner.form.borrow().upgrade().map(Form::from_inner)
    }

    pub(crate) fn set_form(&self, form: Weak<FormInner>) {
        *self.inner.form.borrow_mut() = form;
    }

    // -- structure ----------------------------------------------------------

    #[must_use]
    pub fn path(&self) -> String {
        self.inner.state.path()
    }

    /// The topmost group above this one, if any.
    #[must_use]
    pub fn root(&self) -> Option<GroupNode> {
        self.inner.state.root_group()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &GroupNode) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn state(&self) -> &NodeState {
        &self.inner.state
    }

    pub(crate) fn signals(&self) -> &ContainerSignals {
        &self.inner.signals
    }
}

impl fmt::Debug for GroupNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupNode")
            .field("path", &self.path())
            .field("fields", &*self.inner.fields.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;
    use crate::node::create_node_from_json;
    use serde_json::json;
    use std::cell::Cell;

    fn group(value: Value) -> GroupNode {
        match create_node_from_json(&value).unwrap() {
            FormNode::Group(g) => g,
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn value_is_assembled_in_key_order() {
        let g = group(json!({
            "b": { "value": 1 },
            "a": { "value": "x" },
            "nested": { "c": { "value": true } }
        }));
        assert_eq!(g.keys(), ["b", "a", "nested"]);
        assert_eq!(
            serde_json::to_string(&g.value()).unwrap(),
            r#"{"b":1,"a":"x","nested":{"c":true}}"#
        );
    }

    #[test]
    fn set_value_requires_the_exact_key_set() {
        let g = group(json!({ "a": { "value": 1 }, "b": { "value": 2 } }));
        assert!(matches!(
            g.set_value(json!({ "a": 5 })),
            Err(FormError::TypeMismatch { .. })
        ));
        assert!(matches!(
            g.set_value(json!({ "a": 5, "b": 6, "c": 7 })),
            Err(FormError::UnknownField { .. })
        ));
        assert!(matches!(
            g.set_value(json!(3)),
            Err(FormError::TypeMismatch { .. })
        ));
        assert_eq!(g.value(), json!({ "a": 1, "b": 2 }));

        g.set_value(json!({ "a": 5, "b": 6 })).unwrap();
        assert_eq!(g.value(), json!({ "a": 5, "b": 6 }));
        assert!(g.dirty());
    }

    #[test]
    fn patch_value_skips_unknown_keys() {
        let g = group(json!({ "a": { "value": 1 }, "b": { "value": 2 } }));
        g.patch_value(json!({ "b": 9, "zzz": 1 })).unwrap();
        assert_eq!(g.value(), json!({ "a": 1, "b": 9 }));
    }

    #[test]
    fn field_identity_is_stable() {
        let g = group(json!({ "a": { "value": 1 } }));
        let first = g.field("a").unwrap();
        let second = g.field("a").unwrap();
        assert!(first.ptr_eq(&second));
        assert!(g.field("missing").is_none());
    }

    #[test]
    fn field_node_rejects_containers() {
        let g = group(json!({ "address": { "city": { "value": "" } } }));
        assert!(g.field_node("address.city").is_ok());
        assert_eq!(
            g.field_node("address").unwrap_err(),
            FormError::NotAField {
                path: "address".into()
            }
        );
    }

    #[test]
    fn changes_bubble_to_every_ancestor() {
        let g = group(json!({ "address": { "city": { "value": "" } } }));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = g.subscribe_events(move |e| s.borrow_mut().push(e.clone()));
        let revision = g.revision().get();

        g.field_node("address.city").unwrap().set_value(json!("Oslo"));
        assert_eq!(
            *seen.borrow(),
            vec![NodeEvent {
                kind: NodeEventKind::ValueChanged,
                path: "address.city".into()
            }]
        );
        assert_eq!(g.revision().get(), revision + 1);

        g.field_node("address.city")
            .unwrap()
            .set_value_with(json!("Bergen"), SetValueOptions::silent());
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(g.revision().get(), revision + 2);
        assert!(!g.field_node("address.city").unwrap().dirty());
    }

    #[test]
    fn aggregates_follow_children() {
        let g = group(json!({ "a": { "value": "" }, "b": { "value": "" } }));
        let a = g.field_node("a").unwrap();
        assert!(g.valid());
        a.set_errors(vec![ValidationError::new("required", "Required")]);
        assert!(g.invalid());
        assert_eq!(g.errors().len(), 1);

        a.disable();
        assert!(g.valid());

        assert!(!g.touched());
        g.field_node("b").unwrap().mark_as_touched();
        assert!(g.touched());
    }

    #[test]
    fn disable_is_recursive() {
        let g = group(json!({ "inner": { "x": { "value": 1 } } }));
        g.disable();
        assert!(g.field_node("inner.x").unwrap().disabled());
        g.enable();
        assert!(!g.field_node("inner.x").unwrap().disabled());
    }

    #[test]
    fn reset_notifies_once_per_field() {
        let g = group(json!({ "a": { "value": 1 } }));
        let a = g.field_node("a").unwrap();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = a.subscribe(move |_| h.set(h.get() + 1));

        a.set_value(json!(2));
        g.reset();
        assert_eq!(a.value(), json!(1));
        assert_eq!(hits.get(), 2);
        assert!(!g.dirty());
    }

    #[test]
    fn add_and_remove_fields() {
        let g = group(json!({ "a": { "value": 1 } }));
        let added = g.add_field("b", FieldConfig::new("x")).unwrap();
        assert_eq!(added.path(), "b");
        assert_eq!(g.keys(), ["a", "b"]);
        assert!(matches!(
            g.add_field("a", FieldConfig::new(0)),
            Err(FormError::DuplicateKey { .. })
        ));

        let removed = g.remove_field("a").unwrap();
        assert_eq!(removed.path(), "");
        assert_eq!(g.keys(), ["b"]);
    }

    #[test]
    fn detached_group_validate_reports_current_validity() {
        let g = group(json!({ "a": { "value": 1 } }));
        g.field_node("a")
            .unwrap()
            .set_errors(vec![ValidationError::new("x", "x")]);
        assert_eq!(futures::executor::block_on(g.validate()), Ok(false));
    }
}
