#![forbid(unsafe_code)]

//! formtree public facade crate.
//!
//! Re-exports the stable surface of `formtree-core` and `formtree-reactive`
//! and offers a prelude with the schema functions most forms need.
//!
//! ```rust
//! use formtree::prelude::*;
//! use futures::executor::block_on;
//! use serde_json::json;
//!
//! let form = create_form(
//!     FormConfig::from_json(&json!({
//!         "price": { "value": 10 },
//!         "quantity": { "value": 3 },
//!         "total": { "value": 0 },
//!     }))
//!     .unwrap()
//!     .validation(|p| {
//!         min(&path!(p.quantity), 1.0);
//!     })
//!     .behavior(|p| {
//!         compute_from(&[&path!(p.price), &path!(p.quantity)], &path!(p.total), |v| {
//!             json!(v.f64("price") * v.f64("quantity"))
//!         });
//!     }),
//! )
//! .unwrap();
//!
//! assert_eq!(form.field("total").unwrap().value(), json!(30.0));
//! assert_eq!(block_on(form.validate()), Ok(true));
//! ```

// --- Node re-exports -------------------------------------------------------

pub use formtree_core::node::{
    ArrayNode, FieldNode, FieldSnapshot, FormNode, GroupNode, NodeEvent, NodeEventKind, NodeKind,
    SetValueOptions, ShowErrors, create_node, create_node_from_json,
};

// --- Configuration re-exports ----------------------------------------------

pub use formtree_core::config::{ArrayConfig, FieldConfig, GroupConfig, NodeConfig, UpdateOn};
pub use formtree_core::form::{Form, FormConfig, FormOptions, create_form};
pub use formtree_core::path::{FieldPath, PathSegment, Shape, parse_path};
pub use formtree_core::scheduler::{Clock, ManualClock, Scheduler, TickReport};

// --- Errors ----------------------------------------------------------------

pub use formtree_core::error::{ErrorPolicy, FormError, FormResult};
pub use formtree_core::validation::{ErrorOrigin, Severity, ValidationError};

// --- Macros ----------------------------------------------------------------

pub use formtree_core::path;

// --- Prelude ---------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        ArrayNode, ErrorPolicy, FieldConfig, FieldNode, FieldPath, Form, FormConfig, FormError,
        FormNode, FormOptions, FormResult, GroupConfig, GroupNode, NodeConfig, Severity,
        UpdateOn, ValidationError, create_form, path,
    };

    pub use crate::validation::{
        apply, apply_when, email, max, max_length, min, min_length, not_empty, number, pattern,
        phone, required, stop_on_first_error, url, validate, validate_async, validate_items,
        validate_tree,
    };

    pub use crate::behavior::{
        CopyOptions, EnableOptions, WatchOptions, compute_from, copy_from, disable_when,
        enable_when, hide_when, reset_when, revalidate_when, show_when, sync_fields, watch_field,
    };

    pub use crate::{behavior, reactive, validation};
}

pub use formtree_core::behavior;
pub use formtree_core::validation;
pub use formtree_reactive as reactive;
