#![forbid(unsafe_code)]

//! What validators can see of the form.

use serde_json::Value;

use crate::error::FormResult;
use crate::node::{FieldNode, GroupNode, SetValueOptions};

/// Handed to per-field validators.
///
/// Paths passed to `get_field`/`set_field` are resolved from the form root.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    root: GroupNode,
    control: FieldNode,
    field_path: String,
}

impl ValidationContext {
    pub(crate) fn new(root: GroupNode, control: FieldNode, field_path: String) -> Self {
        Self {
            root,
            control,
            field_path,
        }
    }

    /// Current value of the field being validated.
    #[must_use]
    pub fn value(&self) -> Value {
        self.control.value()
    }

    #[must_use]
    pub fn get_field(&self, path: &str) -> Option<Value> {
        self.root.get_field_by_path(path).map(|node| node.value())
    }

    /// Write another node without marking it dirty or triggering validation.
    pub fn set_field(&self, path: &str, value: Value) -> FormResult<()> {
        self.root
            .get_field_checked(path)?
            .set_value_with(value, SetValueOptions::silent())
    }

    #[must_use]
    pub fn form_value(&self) -> Value {
        self.root.value()
    }

    #[must_use]
    pub fn form(&self) -> &GroupNode {
        &self.root
    }

    #[must_use]
    pub fn control(&self) -> &FieldNode {
        &self.control
    }

    #[must_use]
    pub fn field_path(&self) -> &str {
        &self.field_path
    }
}

/// Handed to tree validators.
#[derive(Debug, Clone)]
pub struct TreeValidationContext {
    root: GroupNode,
}

impl TreeValidationContext {
    pub(crate) fn new(root: GroupNode) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn get_field(&self, path: &str) -> Option<Value> {
        self.root.get_field_by_path(path).map(|node| node.value())
    }

    pub fn set_field(&self, path: &str, value: Value) -> FormResult<()> {
        self.root
            .get_field_checked(path)?
            .set_value_with(value, SetValueOptions::silent())
    }

    #[must_use]
    pub fn form_value(&self) -> Value {
        self.root.value()
    }

    #[must_use]
    pub fn form(&self) -> &GroupNode {
        &self.root
    }
}
