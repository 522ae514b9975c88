#![forbid(unsafe_code)]

//! Schema-authoring functions.
//!
//! These are called from inside a validation schema, i.e. the closure passed
//! to [`FormConfig::validation`](crate::FormConfig::validation). Each one
//! appends a registration to the innermost [`ValidationRegistry`] on the
//! thread's scope stack. Called anywhere else they log a warning and return a
//! detached [`RegistrationHandle`].
//!
//! ```rust
//! use formtree_core::validation::{apply_when, email, min_length, required};
//! use formtree_core::{FieldPath, path};
//!
//! fn contact(p: &FieldPath) {
//!     required(&path!(p.email));
//!     email(&path!(p.email));
//!     apply_when(&path!(p.kind), |kind| kind == "company", |p| {
//!         min_length(&path!(p.company), 2).message("Company name is too short");
//!     });
//! }
//! ```

use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use regex::Regex;
use serde_json::Value;

use super::registry::{Condition, ValidatorKind, ValidatorOptions};
use super::validators::{
    Email, Max, MaxLength, Min, MinLength, NotEmpty, Number, Pattern, Phone, Required, Url,
    Validator,
};
use super::{
    RegistrationHandle, TreeValidationContext, ValidationContext, ValidationError,
    ValidationRegistry,
};
use crate::error::FormError;
use crate::path::FieldPath;
use crate::scope;

fn register(field_path: Option<&str>, kind: ValidatorKind) -> RegistrationHandle {
    let label = kind.kind_name();
    let handle = scope::with_current::<ValidationRegistry, _>(|registry| {
        registry.register(field_path, kind, ValidatorOptions::default())
    });
    handle.unwrap_or_else(|| {
        tracing::warn!(
            field = field_path.unwrap_or("<tree>"),
            kind = label,
            "validator registered outside of a validation schema; ignored"
        );
        RegistrationHandle::DETACHED
    })
}

fn register_validator(path: &FieldPath, validator: impl Validator + 'static) -> RegistrationHandle {
    register(
        Some(path.path()),
        ValidatorKind::Sync(Rc::new(move |value, _| validator.validate(value))),
    )
}

// ---------------------------------------------------------------------------
// Built-in validators
// ---------------------------------------------------------------------------

pub fn required(path: &FieldPath) -> RegistrationHandle {
    register_validator(path, Required::new())
}

pub fn min_length(path: &FieldPath, min: usize) -> RegistrationHandle {
    register_validator(path, MinLength::new(min))
}

pub fn max_length(path: &FieldPath, max: usize) -> RegistrationHandle {
    register_validator(path, MaxLength::new(max))
}

pub fn min(path: &FieldPath, min: f64) -> RegistrationHandle {
    register_validator(path, Min::new(min))
}

pub fn max(path: &FieldPath, max: f64) -> RegistrationHandle {
    register_validator(path, Max::new(max))
}

/// The whole value must match `regex`. An invalid expression is recorded as
/// a configuration error and nothing is registered.
pub fn pattern(path: &FieldPath, regex: &str) -> RegistrationHandle {
    match Regex::new(regex) {
        Ok(regex) => register_validator(path, Pattern::new(regex)),
        Err(err) => {
            scope::report_config_error(FormError::InvalidConfig {
                path: path.path().to_string(),
                reason: format!("invalid pattern: {err}"),
            });
            RegistrationHandle::DETACHED
        }
    }
}

pub fn email(path: &FieldPath) -> RegistrationHandle {
    register_validator(path, Email)
}

pub fn phone(path: &FieldPath) -> RegistrationHandle {
    register_validator(path, Phone)
}

pub fn url(path: &FieldPath) -> RegistrationHandle {
    register_validator(path, Url::new())
}

pub fn number(path: &FieldPath) -> RegistrationHandle {
    register_validator(path, Number)
}

// ---------------------------------------------------------------------------
// Custom validators
// ---------------------------------------------------------------------------

/// Register a closure checking one field.
pub fn validate(
    path: &FieldPath,
    check: impl Fn(&Value, &ValidationContext) -> Option<ValidationError> + 'static,
) -> RegistrationHandle {
    register(Some(path.path()), ValidatorKind::Sync(Rc::new(check)))
}

/// Register any [`Validator`] implementation.
pub fn validate_with(path: &FieldPath, validator: impl Validator + 'static) -> RegistrationHandle {
    register_validator(path, validator)
}

/// Register an async check. It runs after the field's sync validators that
/// precede it and marks the field `pending` while in flight.
pub fn validate_async<F, Fut>(path: &FieldPath, check: F) -> RegistrationHandle
where
    F: Fn(Value, ValidationContext) -> Fut + 'static,
    Fut: Future<Output = Option<ValidationError>> + 'static,
{
    register(
        Some(path.path()),
        ValidatorKind::Async(Rc::new(move |value, ctx| check(value, ctx).boxed_local())),
    )
}

/// Register a cross-field check that runs after every field validator.
/// Chain [`RegistrationHandle::target_field`] to say where its error goes.
pub fn validate_tree(
    check: impl Fn(&TreeValidationContext) -> Option<ValidationError> + 'static,
) -> RegistrationHandle {
    register(None, ValidatorKind::Tree(Rc::new(check)))
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Register everything `nested` registers under a condition on `path`'s
/// value. `nested` receives the schema's root descriptor.
pub fn apply_when(
    path: &FieldPath,
    predicate: impl Fn(&Value) -> bool + 'static,
    nested: impl FnOnce(&FieldPath),
) {
    let condition = Condition {
        field_path: path.path().to_string(),
        predicate: Rc::new(predicate),
    };
    let root = scope::with_current::<ValidationRegistry, _>(|registry| {
        registry.enter_condition(condition);
        registry.root().cloned()
    });
    let Some(root) = root else {
        tracing::warn!(field = %path, "apply_when called outside of a validation schema; ignored");
        return;
    };
    let root = root.unwrap_or_else(|| FieldPath::unchecked(""));
    nested(&root);
    scope::with_current::<ValidationRegistry, _>(ValidationRegistry::exit_condition);
}

/// Run a reusable sub-schema against a nested path.
pub fn apply(path: &FieldPath, schema: impl FnOnce(&FieldPath)) {
    schema(path);
}

/// The array at `path` must hold at least one item. Checked in the tree pass;
/// the error lands on the array itself.
pub fn not_empty(path: &FieldPath) -> RegistrationHandle {
    let target = path.path().to_string();
    let lookup = target.clone();
    register(
        None,
        ValidatorKind::Tree(Rc::new(move |ctx| {
            NotEmpty.validate(&ctx.get_field(&lookup).unwrap_or(Value::Null))
        })),
    )
    .target_field(target)
}

/// Run `item_schema` for every item of the array at `path`, each time the
/// form is validated, rooted at `path[i]`.
pub fn validate_items(path: &FieldPath, item_schema: impl Fn(&FieldPath) + 'static) -> RegistrationHandle {
    register(
        Some(path.path()),
        ValidatorKind::Items {
            array: path.clone(),
            schema: Rc::new(item_schema),
        },
    )
}

/// Whether the field at `path` stops at its first error. Overrides the
/// form-wide default.
pub fn stop_on_first_error(path: &FieldPath, stop: bool) {
    let done = scope::with_current::<ValidationRegistry, _>(|registry| {
        registry.set_stop_on_first_error(path.path(), stop);
    });
    if done.is_none() {
        tracing::warn!(field = %path, "stop_on_first_error called outside of a validation schema; ignored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldConfig, GroupConfig, NodeConfig};
    use crate::path;
    use crate::scope::depth;

    fn root() -> FieldPath {
        let config: NodeConfig = GroupConfig::new()
            .field("name", FieldConfig::new(""))
            .field("kind", FieldConfig::new("person"))
            .field("company", FieldConfig::new(""))
            .into();
        FieldPath::root(config.shape())
    }

    #[test]
    fn registrations_keep_call_order() {
        let registry = ValidationRegistry::collect(&root(), |p| {
            required(&path!(p.name));
            min_length(&path!(p.name), 2);
            email(&path!(p.company));
        })
        .unwrap();
        let fields: Vec<_> = registry
            .registrations()
            .iter()
            .map(|r| r.field_path.clone().unwrap_or_default())
            .collect();
        assert_eq!(fields, ["name", "name", "company"]);
    }

    #[test]
    fn apply_when_wraps_nested_registrations() {
        let registry = ValidationRegistry::collect(&root(), |p| {
            apply_when(&path!(p.kind), |k| k == "company", |p| {
                required(&path!(p.company));
            });
            required(&path!(p.name));
        })
        .unwrap();
        let regs = registry.registrations();
        assert_eq!(regs[0].conditions.len(), 1);
        assert_eq!(regs[0].conditions[0].field_path, "kind");
        assert!(regs[1].conditions.is_empty());
        assert_eq!(registry.condition_depth(), 0);
    }

    #[test]
    fn options_chain_onto_registrations() {
        let registry = ValidationRegistry::collect(&root(), |p| {
            min_length(&path!(p.name), 3).message("Too short").warning();
        })
        .unwrap();
        let options = &registry.registrations()[0].options;
        assert_eq!(options.message.as_deref(), Some("Too short"));
        assert_eq!(options.severity, Some(crate::validation::Severity::Warning));
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        let registry = ValidationRegistry::collect(&root(), |p| {
            pattern(&path!(p.name), "(unclosed");
        })
        .unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.config_errors(),
            [FormError::InvalidConfig { .. }]
        ));
    }

    #[test]
    fn outside_a_schema_nothing_is_registered() {
        let handle = required(&FieldPath::unchecked("x"));
        assert!(handle.is_detached());
        apply_when(&FieldPath::unchecked("x"), |_| true, |_| panic!("must not run"));
        assert_eq!(depth::<ValidationRegistry>(), 0);
    }

    #[test]
    fn not_empty_targets_the_array() {
        let registry = ValidationRegistry::collect(&root(), |p| {
            not_empty(&path!(p.name));
        })
        .unwrap();
        let reg = &registry.registrations()[0];
        assert!(reg.is_tree());
        assert_eq!(reg.options.target_field.as_deref(), Some("name"));
    }
}
