#![forbid(unsafe_code)]

//! Reactive form state.
//!
//! A form is a tree of observable nodes (fields, groups and arrays) built
//! from a [`NodeConfig`]. Two kinds of schema sit on top of the tree:
//!
//! - a **validation schema** registers validators (`required`, `min_length`,
//!   `validate_async`, `validate_tree`, `apply_when`, ...) that run on
//!   [`Form::validate`] and on field changes;
//! - a **behavior schema** registers effects (`compute_from`, `enable_when`,
//!   `watch_field`, `copy_from`, ...) that are bound once and stay live.
//!
//! Both schemas are plain functions over a [`FieldPath`], the typed
//! descriptor of the form's structure; they never see live nodes.
//!
//! # Key Components
//!
//! - [`node`]: [`FieldNode`], [`GroupNode`], [`ArrayNode`] and the
//!   [`FormNode`] sum type
//! - [`config`]: node configuration and its JSON form
//! - [`path`]: path strings and [`FieldPath`]
//! - [`validation`]: validators, registries, the async coordinator
//! - [`behavior`]: reactive effects between nodes
//! - [`scheduler`]: debounce timers and the local task queue
//! - [`form`]: [`create_form`] and the [`Form`] handle
//!
//! # Threading
//!
//! Everything is single-threaded. Nodes are `Rc`-based and `!Send`; schema
//! registries live on thread-local stacks.

pub mod behavior;
pub mod config;
pub mod error;
pub mod form;
pub mod node;
pub mod path;
pub mod registry;
pub mod scheduler;
pub mod scope;
pub mod validation;

pub use config::{ArrayConfig, FieldConfig, GroupConfig, NodeConfig, UpdateOn};
pub use error::{ErrorPolicy, FormError, FormResult};
pub use form::{Form, FormConfig, FormOptions, create_form};
pub use node::{
    ArrayNode, FieldNode, FieldSnapshot, FormNode, GroupNode, NodeEvent, NodeEventKind, NodeKind,
    SetValueOptions, ShowErrors, create_node, create_node_from_json,
};
pub use path::{FieldPath, PathSegment, Shape};
pub use registry::FieldRegistry;
pub use scheduler::{Clock, ManualClock, Scheduler, TickReport};
pub use validation::{ErrorOrigin, Severity, ValidationError};

pub use formtree_reactive as reactive;
