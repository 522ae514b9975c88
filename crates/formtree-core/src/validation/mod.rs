#![forbid(unsafe_code)]

//! Declarative validation.
//!
//! A validation schema is a plain function over the form's root
//! [`FieldPath`](crate::FieldPath). It calls the schema functions in
//! [`schema`] (`required`, `min_length`, `apply_when`, `validate_tree`, ...)
//! which record registrations into the innermost [`ValidationRegistry`].
//! When the form validates, the registrations run against the live tree:
//!
//! - field validators in registration order, sync and async interleaved,
//! - array item schemas expanded per current item,
//! - tree validators last, writing onto their `target_field`.
//!
//! Async results are stamped with a [`ValidationToken`]; a result whose
//! token was superseded by a later value change is discarded.
//!
//! ```rust
//! use formtree_core::validation::{Validator, Required, MinLength};
//! use serde_json::json;
//!
//! assert!(Required::new().validate(&json!("hello")).is_none());
//! assert!(MinLength::new(3).validate(&json!("ab")).is_some());
//! ```

pub(crate) mod applicator;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod schema;
pub mod validators;

pub use context::{TreeValidationContext, ValidationContext};
pub use coordinator::{
    AsyncValidationCoordinator, InFlightValidation, ValidationEvent, ValidationToken,
    ValidationTrace,
};
pub use error::{
    ERROR_CODE_CONFIG, ERROR_CODE_EMAIL, ERROR_CODE_MAX, ERROR_CODE_MAX_LENGTH, ERROR_CODE_MIN,
    ERROR_CODE_MIN_LENGTH, ERROR_CODE_NOT_EMPTY, ERROR_CODE_NUMBER, ERROR_CODE_PATTERN,
    ERROR_CODE_PHONE, ERROR_CODE_REQUIRED, ERROR_CODE_URL, ErrorOrigin, Severity,
    ValidationError,
};
pub use registry::{
    AsyncValidatorFn, Condition, ConditionFn, ItemSchemaFn, RegistrationHandle, SyncValidatorFn,
    TreeValidatorFn, ValidationRegistry, ValidatorKind, ValidatorOptions, ValidatorRegistration,
};
pub use schema::*;
pub use validators::{
    Email, Max, MaxLength, Min, MinLength, NotEmpty, Number, Pattern, Phone, Required, Url,
    Validator, is_empty_value, value_as_f64, value_length,
};
