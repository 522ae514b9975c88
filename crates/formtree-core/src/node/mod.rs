#![forbid(unsafe_code)]

//! The node tree.
//!
//! A form is a tree of three node kinds:
//!
//! - [`FieldNode`]: a leaf holding one JSON value.
//! - [`GroupNode`]: named children in declaration order.
//! - [`ArrayNode`]: an ordered list of nodes built from one item template.
//!
//! All three are cheap-to-clone handles over shared state; two handles are
//! the same node iff [`FormNode::ptr_eq`] says so. Every node carries its own
//! status (errors, touched, dirty, disabled, visible) as observables, and
//! containers derive their aggregate status from their children on demand.
//!
//! # Change propagation
//!
//! A value change on a field walks up the parent chain: every ancestor bumps
//! its `revision` observable and emits a [`NodeEvent`] carrying the changed
//! node's path. Silent writes ([`SetValueOptions::silent`]) notify value
//! subscribers and bump revisions but emit no event and leave `dirty` alone.
//!
//! # Invariants
//!
//! 1. A child has at most one parent; parent links are weak.
//! 2. A container's value is recomputed from its children on every read.
//! 3. `valid` ignores warnings and disabled nodes.
//! 4. Paths are computed from live parent links, so array items report their
//!    current index after insertions, removals and moves.

mod array;
mod field;
mod group;
mod state;

use formtree_reactive::Subscription;
use serde_json::Value;

pub use array::ArrayNode;
pub use field::{FieldNode, FieldSnapshot, ShowErrors};
pub use group::GroupNode;

pub(crate) use array::ArrayInner;
pub(crate) use group::GroupInner;
pub(crate) use state::{ContainerSignals, NodeState, ParentLink, propagate};

use crate::config::NodeConfig;
use crate::error::{FormError, FormResult};
use crate::path::{PathSegment, parse_path};
use crate::validation::ValidationError;

// ---------------------------------------------------------------------------
// Events and options
// ---------------------------------------------------------------------------

/// What happened at [`NodeEvent::path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeEventKind {
    /// A field's value changed through an emitting write.
    ValueChanged,
    /// A field was marked touched.
    Touched,
    /// A node was reset to its initial value.
    Reset,
    /// Items were added, removed or moved in an array, or keys in a group.
    Structure,
}

/// A change notification delivered to every ancestor of the changed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    pub path: String,
}

/// Options for `set_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetValueOptions {
    /// Mark dirty and bubble a change event. Defaults to true.
    pub emit_event: bool,
}

impl Default for SetValueOptions {
    fn default() -> Self {
        Self { emit_event: true }
    }
}

impl SetValueOptions {
    /// Write without marking dirty or emitting change events.
    #[must_use]
    pub fn silent() -> Self {
        Self { emit_event: false }
    }
}

/// The three node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Field,
    Group,
    Array,
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build a detached node tree from a configuration.
#[must_use]
pub fn create_node(config: &NodeConfig) -> FormNode {
    match config {
        NodeConfig::Field(field) => FormNode::Field(FieldNode::new(field)),
        NodeConfig::Group(group) => FormNode::Group(GroupNode::new(group)),
        NodeConfig::Array(array) => FormNode::Array(ArrayNode::new(array)),
    }
}

/// Parse a JSON description and build it.
pub fn create_node_from_json(value: &Value) -> FormResult<FormNode> {
    NodeConfig::from_json(value).map(|config| create_node(&config))
}

// ---------------------------------------------------------------------------
// FormNode
// ---------------------------------------------------------------------------

/// Any node of the tree.
#[derive(Clone)]
pub enum FormNode {
    Field(FieldNode),
    Group(GroupNode),
    Array(ArrayNode),
}

macro_rules! each_kind {
    ($self:expr, $node:ident => $body:expr) => {
        match $self {
            FormNode::Field($node) => $body,
            FormNode::Group($node) => $body,
            FormNode::Array($node) => $body,
        }
    };
}

impl FormNode {
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Field(_) => NodeKind::Field,
            Self::Group(_) => NodeKind::Group,
            Self::Array(_) => NodeKind::Array,
        }
    }

    #[must_use]
    pub fn value(&self) -> Value {
        each_kind!(self, n => n.value())
    }

    pub fn set_value(&self, value: Value) -> FormResult<()> {
        self.set_value_with(value, SetValueOptions::default())
    }

    pub fn set_value_with(&self, value: Value, options: SetValueOptions) -> FormResult<()> {
        match self {
            Self::Field(n) => {
                n.set_value_with(value, options);
                Ok(())
            }
            Self::Group(n) => n.set_value_with(value, options),
            Self::Array(n) => n.set_value_with(value, options),
        }
    }

    /// Partial update; fields take the value as-is.
    pub fn patch_value(&self, value: Value) -> FormResult<()> {
        match self {
            Self::Field(n) => {
                n.set_value(value);
                Ok(())
            }
            Self::Group(n) => n.patch_value(value),
            Self::Array(n) => n.patch_value(value),
        }
    }

    pub fn reset(&self) {
        each_kind!(self, n => n.reset())
    }

    /// Run the owning form's validators for this subtree.
    pub async fn validate(&self) -> FormResult<bool> {
        match self {
            Self::Field(n) => n.validate().await,
            Self::Group(n) => n.validate().await,
            Self::Array(n) => n.validate().await,
        }
    }

    #[must_use]
    pub fn path(&self) -> String {
        self.state().path()
    }

    /// Own errors for fields, aggregated errors for containers.
    #[must_use]
    pub fn errors(&self) -> Vec<ValidationError> {
        each_kind!(self, n => n.errors())
    }

    #[must_use]
    pub fn own_errors(&self) -> Vec<ValidationError> {
        self.state().errors.get()
    }

    pub fn set_errors(&self, errors: Vec<ValidationError>) {
        self.state().set_errors(errors);
    }

    pub fn append_error(&self, error: ValidationError) {
        self.state().append_error(error);
    }

    pub fn clear_errors(&self) {
        self.state().clear_errors_where(|_| true);
    }

    pub fn clear_errors_where(&self, filter: impl Fn(&ValidationError) -> bool) {
        self.state().clear_errors_where(filter);
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        each_kind!(self, n => n.valid())
    }

    #[must_use]
    pub fn invalid(&self) -> bool {
        !self.valid()
    }

    #[must_use]
    pub fn pending(&self) -> bool {
        each_kind!(self, n => n.pending())
    }

    #[must_use]
    pub fn touched(&self) -> bool {
        each_kind!(self, n => n.touched())
    }

    #[must_use]
    pub fn dirty(&self) -> bool {
        each_kind!(self, n => n.dirty())
    }

    #[must_use]
    pub fn disabled(&self) -> bool {
        self.state().disabled.get()
    }

    #[must_use]
    pub fn visible(&self) -> bool {
        self.state().visible.get()
    }

    pub fn enable(&self) {
        each_kind!(self, n => n.enable())
    }

    pub fn disable(&self) {
        each_kind!(self, n => n.disable())
    }

    pub fn show(&self) {
        self.state().set_visible(true);
    }

    pub fn hide(&self) {
        self.state().set_visible(false);
    }

    pub fn mark_as_touched(&self) {
        each_kind!(self, n => n.mark_as_touched())
    }

    pub fn mark_as_untouched(&self) {
        each_kind!(self, n => n.mark_as_untouched())
    }

    pub fn mark_as_dirty(&self) {
        self.state().set_dirty(true);
    }

    pub fn mark_as_pristine(&self) {
        each_kind!(self, n => n.mark_as_pristine())
    }

    /// Invoke `callback` after every emitting change of this node's value.
    pub fn on_change(&self, callback: impl Fn() + 'static) -> Subscription {
        match self {
            Self::Field(n) => n.subscribe(move |_| callback()),
            Self::Group(n) => n.signals().revision.subscribe(move |_| callback()),
            Self::Array(n) => n.signals().revision.subscribe(move |_| callback()),
        }
    }

    /// Resolve a path relative to this node.
    #[must_use]
    pub fn get_field_by_path(&self, path: &str) -> Option<FormNode> {
        let segments = parse_path(path).ok()?;
        resolve_segments(self, &segments)
    }

    #[must_use]
    pub fn as_field(&self) -> Option<&FieldNode> {
        match self {
            Self::Field(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_group(&self) -> Option<&GroupNode> {
        match self {
            Self::Group(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayNode> {
        match self {
            Self::Array(n) => Some(n),
            _ => None,
        }
    }

    /// Identity comparison.
    #[must_use]
    pub fn ptr_eq(&self, other: &FormNode) -> bool {
        std::ptr::eq(self.state(), other.state())
    }

    pub(crate) fn state(&self) -> &NodeState {
        each_kind!(self, n => n.state())
    }

    pub(crate) fn attach(&self, link: ParentLink) {
        self.state().set_parent(Some(link));
    }

    pub(crate) fn detach(&self) {
        self.state().set_parent(None);
    }
}

impl std::fmt::Debug for FormNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        each_kind!(self, n => n.fmt(f))
    }
}

impl From<FieldNode> for FormNode {
    fn from(node: FieldNode) -> Self {
        Self::Field(node)
    }
}

impl From<GroupNode> for FormNode {
    fn from(node: GroupNode) -> Self {
        Self::Group(node)
    }
}

impl From<ArrayNode> for FormNode {
    fn from(node: ArrayNode) -> Self {
        Self::Array(node)
    }
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

pub(crate) fn resolve_segments(start: &FormNode, segments: &[PathSegment]) -> Option<FormNode> {
    let mut current = start.clone();
    for segment in segments {
        current = match (&current, segment) {
            (FormNode::Group(group), PathSegment::Key(key)) => group.field(key)?,
            (FormNode::Array(array), PathSegment::Index(index)) => array.at(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Like [`resolve_segments`] but explains failures.
pub(crate) fn resolve_checked(start: &FormNode, path: &str) -> FormResult<FormNode> {
    let segments = parse_path(path)?;
    let mut current = start.clone();
    for segment in &segments {
        current = match (&current, segment) {
            (FormNode::Group(group), PathSegment::Key(key)) => {
                group.field(key).ok_or_else(|| FormError::UnknownField {
                    path: path.to_string(),
                })?
            }
            (FormNode::Array(array), PathSegment::Index(index)) => {
                let len = array.len();
                array.at(*index).ok_or_else(|| FormError::IndexOutOfBounds {
                    path: path.to_string(),
                    index: *index,
                    len,
                })?
            }
            _ => {
                return Err(FormError::UnknownField {
                    path: path.to_string(),
                });
            }
        };
    }
    Ok(current)
}

/// Aggregate helpers shared by groups and arrays.
pub(crate) fn all_errors(own: &NodeState, children: &[FormNode]) -> Vec<ValidationError> {
    let mut errors = own.errors.get();
    for child in children {
        errors.extend(child.errors());
    }
    errors
}
