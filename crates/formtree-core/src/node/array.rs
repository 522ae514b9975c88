#![forbid(unsafe_code)]

//! Ordered lists built from one item template.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use formtree_reactive::{BatchScope, ReadOnly, Subscription};
use serde_json::Value;

use super::{
    ContainerSignals, FormNode, GroupNode, NodeEvent, NodeEventKind, NodeState, ParentLink,
    SetValueOptions, all_errors, create_node, propagate,
};
use crate::config::{ArrayConfig, NodeConfig};
use crate::error::{FormError, FormResult};
use crate::validation::ValidationError;

pub(crate) struct ArrayInner {
    items: RefCell<Vec<FormNode>>,
    template: NodeConfig,
    initial: RefCell<Vec<Value>>,
    state: NodeState,
    signals: ContainerSignals,
}

/// An index-addressable list of nodes sharing one template.
///
/// Indices are always contiguous from 0; item paths are recomputed from the
/// live position, so `items[2].title` becomes `items[1].title` after
/// `remove_at(0)`.
#[derive(Clone)]
pub struct ArrayNode {
    inner: Rc<ArrayInner>,
}

impl ArrayNode {
    pub(crate) fn from_inner(inner: Rc<ArrayInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn new(config: &ArrayConfig) -> Self {
        let array = Self {
            inner: Rc::new(ArrayInner {
                items: RefCell::new(Vec::new()),
                template: (*config.schema).clone(),
                initial: RefCell::new(config.initial_items.clone()),
                state: NodeState::new(false),
                signals: ContainerSignals::new(),
            }),
        };
        let items: Vec<FormNode> = config
            .initial_items
            .iter()
            .map(|value| array.build_item(Some(value)))
            .collect();
        *array.inner.items.borrow_mut() = items;
        array
    }

    fn build_item(&self, value: Option<&Value>) -> FormNode {
        let config = match value {
            Some(value) => self.inner.template.with_values(value),
            None => self.inner.template.clone(),
        };
        let node = create_node(&config);
        node.attach(ParentLink::Array(Rc::downgrade(&self.inner)));
        node
    }

    /// The configuration new items are built from.
    #[must_use]
    pub fn template(&self) -> &NodeConfig {
        &self.inner.template
    }

    // -- items --------------------------------------------------------------

    #[must_use]
    pub fn at(&self, index: usize) -> Option<FormNode> {
        self.inner.items.borrow().get(index).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    #[must_use]
    pub fn items(&self) -> Vec<FormNode> {
        self.inner.items.borrow().clone()
    }

    pub fn for_each(&self, mut f: impl FnMut(usize, &FormNode)) {
        for (index, item) in self.items().iter().enumerate() {
            f(index, item);
        }
    }

    pub fn map<R>(&self, mut f: impl FnMut(usize, &FormNode) -> R) -> Vec<R> {
        self.items()
            .iter()
            .enumerate()
            .map(|(index, item)| f(index, item))
            .collect()
    }

    pub(crate) fn position_of(&self, state: &NodeState) -> Option<usize> {
        self.inner
            .items
            .borrow()
            .iter()
            .position(|item| std::ptr::eq(item.state(), state))
    }

    /// Append an item with `value` laid over the template.
    pub fn push(&self, value: Value) -> FormNode {
        let node = self.build_item(Some(&value));
        self.inner.items.borrow_mut().push(node.clone());
        self.structure_changed();
        node
    }

    /// Append an item with the template's own defaults.
    pub fn push_default(&self) -> FormNode {
        let node = self.build_item(None);
        self.inner.items.borrow_mut().push(node.clone());
        self.structure_changed();
        node
    }

    pub fn insert(&self, index: usize, value: Value) -> FormResult<FormNode> {
        let len = self.len();
        if index > len {
            return Err(FormError::IndexOutOfBounds {
                path: self.path(),
                index,
                len,
            });
        }
        let node = self.build_item(Some(&value));
        self.inner.items.borrow_mut().insert(index, node.clone());
        self.structure_changed();
        Ok(node)
    }

    /// Remove and detach the item at `index`.
    pub fn remove_at(&self, index: usize) -> Option<FormNode> {
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        removed.detach();
        self.structure_changed();
        Some(removed)
    }

    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.inner.items.borrow_mut());
        if removed.is_empty() {
            return;
        }
        for item in &removed {
            item.detach();
        }
        self.structure_changed();
    }

    /// Move the item at `from` so that it ends up at index `to`.
    pub fn move_item(&self, from: usize, to: usize) -> FormResult<()> {
        let len = self.len();
        let out_of_bounds = |index| FormError::IndexOutOfBounds {
            path: self.path(),
            index,
            len,
        };
        if from >= len {
            return Err(out_of_bounds(from));
        }
        if to >= len {
            return Err(out_of_bounds(to));
        }
        if from == to {
            return Ok(());
        }
        {
            let mut items = self.inner.items.borrow_mut();
            let item = items.remove(from);
            items.insert(to, item);
        }
        self.structure_changed();
        Ok(())
    }

    fn structure_changed(&self) {
        self.announce(NodeEventKind::Structure);
    }

    fn announce(&self, kind: NodeEventKind) {
        let event = NodeEvent {
            kind,
            path: self.path(),
        };
        self.inner.signals.local(&event);
        propagate(&self.inner.state, &event);
    }

    // -- value --------------------------------------------------------------

    #[must_use]
    pub fn value(&self) -> Value {
        Value::Array(self.items().iter().map(FormNode::value).collect())
    }

    pub fn set_value(&self, value: Value) -> FormResult<()> {
        self.set_value_with(value, SetValueOptions::default())
    }

    /// Replace the whole list. Existing items are rewritten in place; surplus
    /// items are removed and missing ones built from the template.
    pub fn set_value_with(&self, value: Value, options: SetValueOptions) -> FormResult<()> {
        let Value::Array(values) = value else {
            return Err(FormError::TypeMismatch {
                path: self.path(),
                expected: "an array",
            });
        };
        let _batch = BatchScope::new();
        let existing = self.items();
        let mut resized = false;

        for (item, v) in existing.iter().zip(values.iter()) {
            item.set_value_with(v.clone(), options)?;
        }
        if existing.len() > values.len() {
            let removed: Vec<FormNode> = self.inner.items.borrow_mut().drain(values.len()..).collect();
            for item in removed {
                item.detach();
            }
            resized = true;
        }
        for v in values.iter().skip(existing.len()) {
            let node = self.build_item(Some(v));
            self.inner.items.borrow_mut().push(node);
            resized = true;
        }

        if resized && options.emit_event {
            self.inner.state.set_dirty(true);
            self.structure_changed();
        }
        Ok(())
    }

    /// Write the leading items; entries past the end are ignored.
    pub fn patch_value(&self, value: Value) -> FormResult<()> {
        let Value::Array(values) = value else {
            return Err(FormError::TypeMismatch {
                path: self.path(),
                expected: "an array",
            });
        };
        let _batch = BatchScope::new();
        let items = self.items();
        if values.len() > items.len() {
            tracing::debug!(
                array = %self.path(),
                extra = values.len() - items.len(),
                "patch ignored items past the end"
            );
        }
        for (item, v) in items.iter().zip(values) {
            item.patch_value(v)?;
        }
        Ok(())
    }

    /// Rebuild the items from the initial values and clear own status.
    pub fn reset(&self) {
        let _batch = BatchScope::new();
        let initial = self.inner.initial.borrow().clone();
        let rebuilt: Vec<FormNode> = initial.iter().map(|v| self.build_item(Some(v))).collect();
        let old = std::mem::replace(&mut *self.inner.items.borrow_mut(), rebuilt);
        for item in &old {
            item.detach();
        }
        self.inner.state.set_errors(Vec::new());
        self.inner.state.set_touched(false);
        self.inner.state.set_dirty(false);
        self.announce(NodeEventKind::Reset);
    }

    // -- status -------------------------------------------------------------

    #[must_use]
    pub fn errors(&self) -> Vec<ValidationError> {
        all_errors(&self.inner.state, &self.items())
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
            || (!self.inner.state.has_blocking_errors() && self.items().iter().all(FormNode::valid))
    }

    #[must_use]
    pub fn invalid(&self) -> bool {
        !self.valid()
    }

    #[must_use]
    pub fn pending(&self) -> bool {
        self.items().iter().any(FormNode::pending)
    }

    #[must_use]
    pub fn touched(&self) -> bool {
        self.inner.state.touched.get() || self.items().iter().any(FormNode::touched)
    }

    #[must_use]
    pub fn dirty(&self) -> bool {
        self.inner.state.dirty.get() || self.items().iter().any(FormNode::dirty)
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
        for item in self.items() {
            item.enable();
        }
    }

    pub fn disable(&self) {
        let _batch = BatchScope::new();
        self.inner.state.set_disabled(true);
        for item in self.items() {
            item.disable();
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
        for item in self.items() {
            item.mark_as_touched();
        }
    }

    pub fn mark_as_untouched(&self) {
        self.inner.state.set_touched(false);
        for item in self.items() {
            item.mark_as_untouched();
        }
    }

    pub fn mark_as_dirty(&self) {
        self.inner.state.set_dirty(true);
    }

    pub fn mark_as_pristine(&self) {
        self.inner.state.set_dirty(false);
        for item in self.items() {
            item.mark_as_pristine();
        }
    }

    // -- signals ------------------------------------------------------------

    pub fn subscribe_events(&self, callback: impl Fn(&NodeEvent) + 'static) -> Subscription {
        self.inner.signals.events.subscribe(callback)
    }

    #[must_use]
    pub fn revision(&self) -> ReadOnly<u64> {
        self.inner.signals.revision.read_only()
    }

    #[must_use]
    pub fn status(&self) -> ReadOnly<u64> {
        self.inner.signals.status.read_only()
    }

    // -- validation ---------------------------------------------------------

    /// Run the owning form's validators for this array and its items.
    pub async fn validate(&self) -> FormResult<bool> {
        match self.root().and_then(|root| root.form()) {
            Some(form) => form.validate_within(&self.path()).await,
            None => Ok(self.valid()),
        }
    }

    // -- structure ----------------------------------------------------------

    #[must_use]
    pub fn path(&self) -> String {
        self.inner.state.path()
    }

    #[must_use]
    pub fn root(&self) -> Option<GroupNode> {
        self.inner.state.root_group()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &ArrayNode) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn state(&self) -> &NodeState {
        &self.inner.state
    }

    pub(crate) fn signals(&self) -> &ContainerSignals {
        &self.inner.signals
    }
}

impl fmt::Debug for ArrayNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayNode")
            .field("path", &self.path())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::create_node_from_json;
    use serde_json::json;

    fn form_with_items() -> GroupNode {
        match create_node_from_json(&json!({
            "items": [
                { "title": { "value": "" }, "qty": { "value": 1 } },
                { "title": "first" },
                { "title": "second", "qty": 3 }
            ]
        }))
        .unwrap()
        {
            FormNode::Group(g) => g,
            other => panic!("expected group, got {other:?}"),
        }
    }

    fn items(root: &GroupNode) -> ArrayNode {
        root.field("items").and_then(|n| n.as_array().cloned()).unwrap()
    }

    #[test]
    fn initial_items_merge_over_template() {
        let root = form_with_items();
        assert_eq!(
            items(&root).value(),
            json!([{ "title": "first", "qty": 1 }, { "title": "second", "qty": 3 }])
        );
    }

    #[test]
    fn paths_track_positions() {
        let root = form_with_items();
        let list = items(&root);
        let second = root.get_field_by_path("items[1].title").unwrap();

        list.remove_at(0).unwrap();
        assert_eq!(second.path(), "items[0].title");

        list.insert(0, json!({ "title": "new" })).unwrap();
        assert_eq!(second.path(), "items[1].title");

        list.move_item(1, 0).unwrap();
        assert_eq!(second.path(), "items[0].title");
    }

    #[test]
    fn push_and_clear_announce_structure() {
        let root = form_with_items();
        let list = items(&root);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = root.subscribe_events(move |e: &NodeEvent| s.borrow_mut().push(e.kind));

        let pushed = list.push_default();
        assert_eq!(pushed.value(), json!({ "title": "", "qty": 1 }));
        list.clear();
        assert!(list.is_empty());
        list.clear();
        assert_eq!(
            *seen.borrow(),
            vec![NodeEventKind::Structure, NodeEventKind::Structure]
        );
    }

    #[test]
    fn bounds_are_checked() {
        let root = form_with_items();
        let list = items(&root);
        assert!(matches!(
            list.insert(5, json!({})),
            Err(FormError::IndexOutOfBounds { index: 5, len: 2, .. })
        ));
        assert!(list.remove_at(2).is_none());
        assert!(list.move_item(0, 2).is_err());
    }

    #[test]
    fn set_value_resizes() {
        let root = form_with_items();
        let list = items(&root);
        list.set_value(json!([{ "title": "only", "qty": 7 }])).unwrap();
        assert_eq!(list.len(), 1);
        list.set_value(json!([
            { "title": "a", "qty": 1 },
            { "title": "b", "qty": 2 },
            { "title": "c", "qty": 3 }
        ]))
        .unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(root.get_field_by_path("items[2].qty").unwrap().value(), json!(3));
        assert!(list.dirty());
        assert!(matches!(
            list.set_value(json!({})),
            Err(FormError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn reset_rebuilds_initial_items() {
        let root = form_with_items();
        let list = items(&root);
        list.push_default();
        list.at(0)
            .unwrap()
            .as_group()
            .unwrap()
            .field_node("title")
            .unwrap()
            .set_value(json!("changed"));
        list.reset();
        assert_eq!(list.len(), 2);
        assert_eq!(root.get_field_by_path("items[0].title").unwrap().value(), json!("first"));
        assert!(!list.dirty());
    }

    #[test]
    fn map_and_for_each_visit_in_order() {
        let root = form_with_items();
        let list = items(&root);
        let titles = list.map(|_, item| item.value()["title"].clone());
        assert_eq!(titles, vec![json!("first"), json!("second")]);
        let mut indices = Vec::new();
        list.for_each(|i, _| indices.push(i));
        assert_eq!(indices, [0, 1]);
    }
}
