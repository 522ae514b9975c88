#![forbid(unsafe_code)]

//! Status shared by every node kind, parent links and change propagation.

use std::cell::RefCell;
use std::rc::Weak;

use formtree_reactive::{Emitter, Observable};

use super::{ArrayInner, ArrayNode, GroupInner, GroupNode, NodeEvent, NodeEventKind};
use crate::path::{join_index, join_key};
use crate::validation::ValidationError;

// ---------------------------------------------------------------------------
// Parent links
// ---------------------------------------------------------------------------

pub(crate) enum ParentLink {
    Group { node: Weak<GroupInner>, key: String },
    Array(Weak<ArrayInner>),
}

/// An upgraded parent link.
pub(crate) enum ParentRef {
    Group(GroupNode, String),
    Array(ArrayNode),
}

impl ParentRef {
    pub(crate) fn state(&self) -> &NodeState {
        match self {
            Self::Group(group, _) => group.state(),
            Self::Array(array) => array.state(),
        }
    }

    pub(crate) fn signals(&self) -> &ContainerSignals {
        match self {
            Self::Group(group, _) => group.signals(),
            Self::Array(array) => array.signals(),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeState
// ---------------------------------------------------------------------------

pub(crate) struct NodeState {
    pub(crate) errors: Observable<Vec<ValidationError>>,
    pub(crate) touched: Observable<bool>,
    pub(crate) dirty: Observable<bool>,
    pub(crate) disabled: Observable<bool>,
    pub(crate) visible: Observable<bool>,
    parent: RefCell<Option<ParentLink>>,
}

impl NodeState {
    pub(crate) fn new(disabled: bool) -> Self {
        Self {
            errors: Observable::new(Vec::new()),
            touched: Observable::new(false),
            dirty: Observable::new(false),
            disabled: Observable::new(disabled),
            visible: Observable::new(true),
            parent: RefCell::new(None),
        }
    }

    pub(crate) fn set_parent(&self, link: Option<ParentLink>) {
        *self.parent.borrow_mut() = link;
    }

    pub(crate) fn parent(&self) -> Option<ParentRef> {
        match self.parent.borrow().as_ref()? {
            ParentLink::Group { node, key } => node
                .upgrade()
                .map(|inner| ParentRef::Group(GroupNode::from_inner(inner), key.clone())),
            ParentLink::Array(node) => node
                .upgrade()
                .map(|inner| ParentRef::Array(ArrayNode::from_inner(inner))),
        }
    }

    pub(crate) fn path(&self) -> String {
        match self.parent() {
            None => String::new(),
            Some(ParentRef::Group(group, key)) => join_key(&group.path(), &key),
            Some(ParentRef::Array(array)) => {
                let base = array.path();
                match array.position_of(self) {
                    Some(index) => join_index(&base, index),
                    None => base,
                }
            }
        }
    }

    /// Topmost ancestor that is a group, or `None` if the chain ends in an
    /// array or this node has no parent.
    pub(crate) fn root_group(&self) -> Option<GroupNode> {
        let mut top: Option<GroupNode> = None;
        let mut next = self.parent();
        while let Some(parent) = next {
            if let ParentRef::Group(group, _) = &parent {
                top = Some(group.clone());
            } else {
                top = None;
            }
            next = parent.state().parent();
        }
        top
    }

    // -- errors -------------------------------------------------------------

    pub(crate) fn set_errors(&self, errors: Vec<ValidationError>) {
        if self.errors.set(errors) {
            self.status_changed();
        }
    }

    pub(crate) fn append_error(&self, error: ValidationError) {
        let mut errors = self.errors.get();
        errors.push(error);
        self.set_errors(errors);
    }

    pub(crate) fn clear_errors_where(&self, filter: impl Fn(&ValidationError) -> bool) {
        let kept: Vec<ValidationError> = self
            .errors
            .with(|errors| errors.iter().filter(|e| !filter(e)).cloned().collect());
        self.set_errors(kept);
    }

    pub(crate) fn has_blocking_errors(&self) -> bool {
        self.errors
            .with(|errors| errors.iter().any(ValidationError::is_blocking))
    }

    // -- flags --------------------------------------------------------------

    pub(crate) fn set_touched(&self, touched: bool) -> bool {
        self.flag(&self.touched, touched)
    }

    pub(crate) fn set_dirty(&self, dirty: bool) -> bool {
        self.flag(&self.dirty, dirty)
    }

    pub(crate) fn set_disabled(&self, disabled: bool) -> bool {
        self.flag(&self.disabled, disabled)
    }

    pub(crate) fn set_visible(&self, visible: bool) -> bool {
        self.flag(&self.visible, visible)
    }

    fn flag(&self, cell: &Observable<bool>, value: bool) -> bool {
        let changed = cell.set(value);
        if changed {
            self.status_changed();
        }
        changed
    }

    /// Bump the status revision of every ancestor.
    pub(crate) fn status_changed(&self) {
        let mut next = self.parent();
        while let Some(parent) = next {
            parent.signals().status.update(|r| r + 1);
            next = parent.state().parent();
        }
    }

    /// Bump the value revision of every ancestor without emitting events.
    pub(crate) fn revision_changed(&self) {
        let mut next = self.parent();
        while let Some(parent) = next {
            parent.signals().revision.update(|r| r + 1);
            next = parent.state().parent();
        }
    }

    pub(crate) fn version_sum(&self) -> u64 {
        self.errors.version()
            + self.touched.version()
            + self.dirty.version()
            + self.disabled.version()
            + self.visible.version()
    }
}

// ---------------------------------------------------------------------------
// ContainerSignals
// ---------------------------------------------------------------------------

/// Observables every container exposes to subscribers.
pub(crate) struct ContainerSignals {
    /// Bumped on every value change in the subtree, silent writes included.
    pub(crate) revision: Observable<u64>,
    /// Bumped on every status change (errors, flags) in the subtree.
    pub(crate) status: Observable<u64>,
    pub(crate) events: Emitter<NodeEvent>,
}

impl ContainerSignals {
    pub(crate) fn new() -> Self {
        Self {
            revision: Observable::new(0),
            status: Observable::new(0),
            events: Emitter::new(),
        }
    }

    /// Record a change that originated at this container itself.
    pub(crate) fn local(&self, event: &NodeEvent) {
        match event.kind {
            NodeEventKind::Touched => self.status.update(|r| r + 1),
            _ => self.revision.update(|r| r + 1),
        };
        self.events.emit(event);
    }
}

/// Deliver `event` to every ancestor of `from`, nearest first.
pub(crate) fn propagate(from: &NodeState, event: &NodeEvent) {
    let mut next = from.parent();
    while let Some(parent) = next {
        parent.signals().local(event);
        next = parent.state().parent();
    }
}
