#![forbid(unsafe_code)]

//! Validator registrations collected while a validation schema runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::thread::LocalKey;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde_json::Value;

use super::{Severity, TreeValidationContext, ValidationContext, ValidationError};
use crate::error::{FormError, FormResult, panic_message};
use crate::path::FieldPath;
use crate::scope::{self, RegistryScope, ScopedRegistry};

// ---------------------------------------------------------------------------
// Registration data
// ---------------------------------------------------------------------------

pub type SyncValidatorFn = Rc<dyn Fn(&Value, &ValidationContext) -> Option<ValidationError>>;
pub type AsyncValidatorFn =
    Rc<dyn Fn(Value, ValidationContext) -> LocalBoxFuture<'static, Option<ValidationError>>>;
pub type TreeValidatorFn = Rc<dyn Fn(&TreeValidationContext) -> Option<ValidationError>>;
pub type ItemSchemaFn = Rc<dyn Fn(&FieldPath)>;
pub type ConditionFn = Rc<dyn Fn(&Value) -> bool>;

/// What a registration runs.
#[derive(Clone)]
pub enum ValidatorKind {
    /// Checks one field's value.
    Sync(SyncValidatorFn),
    /// Checks one field's value without blocking; awaited in order.
    Async(AsyncValidatorFn),
    /// Checks the whole form after every field has been validated.
    Tree(TreeValidatorFn),
    /// Runs `schema` once per item of `array` when validation starts.
    Items { array: FieldPath, schema: ItemSchemaFn },
}

impl ValidatorKind {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Sync(_) => "sync",
            Self::Async(_) => "async",
            Self::Tree(_) => "tree",
            Self::Items { .. } => "items",
        }
    }
}

/// Per-registration overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatorOptions {
    /// Replaces the validator's message.
    pub message: Option<String>,
    /// Replaces the validator's severity.
    pub severity: Option<Severity>,
    /// Delay change-triggered runs of an async validator.
    pub debounce: Option<Duration>,
    /// Node a tree validator's error is attached to.
    pub target_field: Option<String>,
}

/// A gate established by `apply_when`.
#[derive(Clone)]
pub struct Condition {
    pub field_path: String,
    pub predicate: ConditionFn,
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("field_path", &self.field_path)
            .finish_non_exhaustive()
    }
}

/// One registered validator together with every enclosing condition.
#[derive(Clone)]
pub struct ValidatorRegistration {
    /// `None` for tree validators.
    pub field_path: Option<String>,
    pub kind: ValidatorKind,
    pub options: ValidatorOptions,
    pub conditions: Vec<Condition>,
}

impl ValidatorRegistration {
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self.kind, ValidatorKind::Async(_))
    }

    #[must_use]
    pub fn is_tree(&self) -> bool {
        matches!(self.kind, ValidatorKind::Tree(_))
    }
}

impl fmt::Debug for ValidatorRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistration")
            .field("field_path", &self.field_path)
            .field("kind", &self.kind.kind_name())
            .field("options", &self.options)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ValidationRegistry
// ---------------------------------------------------------------------------

thread_local! {
    static VALIDATION_STACK: RefCell<Vec<ValidationRegistry>> = const { RefCell::new(Vec::new()) };
}

/// Everything one validation schema registered.
pub struct ValidationRegistry {
    scope_id: u64,
    root: Option<FieldPath>,
    registrations: Vec<ValidatorRegistration>,
    condition_stack: Vec<Condition>,
    stop_on_first_error: HashMap<String, bool>,
    config_errors: Vec<FormError>,
}

impl ScopedRegistry for ValidationRegistry {
    fn stack() -> &'static LocalKey<RefCell<Vec<Self>>> {
        &VALIDATION_STACK
    }

    fn fresh(scope_id: u64) -> Self {
        Self {
            scope_id,
            root: None,
            registrations: Vec::new(),
            condition_stack: Vec::new(),
            stop_on_first_error: HashMap::new(),
            config_errors: Vec::new(),
        }
    }

    fn record_config_error(&mut self, err: FormError) {
        self.config_errors.push(err);
    }
}

impl ValidationRegistry {
    /// Run `schema` against `root` under a fresh registry and return what it
    /// registered. A panicking schema yields [`FormError::SchemaPanicked`].
    pub fn collect(root: &FieldPath, schema: impl FnOnce(&FieldPath)) -> FormResult<Self> {
        let scope = RegistryScope::<Self>::push();
        scope::with_current::<Self, _>(|registry| registry.root = Some(root.clone()));
        match catch_unwind(AssertUnwindSafe(|| schema(root))) {
            Ok(()) => {
                let registry = scope.finish();
                tracing::debug!(
                    registrations = registry.registrations.len(),
                    config_errors = registry.config_errors.len(),
                    "validation schema collected"
                );
                Ok(registry)
            }
            Err(payload) => Err(FormError::SchemaPanicked {
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    #[must_use]
    pub fn scope_id(&self) -> u64 {
        self.scope_id
    }

    /// Root descriptor the schema was invoked with.
    #[must_use]
    pub fn root(&self) -> Option<&FieldPath> {
        self.root.as_ref()
    }

    /// Record a validator under every condition currently entered.
    pub fn register(
        &mut self,
        field_path: Option<&str>,
        kind: ValidatorKind,
        options: ValidatorOptions,
    ) -> RegistrationHandle {
        let index = self.registrations.len();
        self.registrations.push(ValidatorRegistration {
            field_path: field_path.map(str::to_string),
            kind,
            options,
            conditions: self.condition_stack.clone(),
        });
        RegistrationHandle {
            scope_id: self.scope_id,
            index,
        }
    }

    pub fn enter_condition(&mut self, condition: Condition) {
        self.condition_stack.push(condition);
    }

    pub fn exit_condition(&mut self) {
        if self.condition_stack.pop().is_none() {
            tracing::warn!("exit_condition without a matching enter_condition");
        }
    }

    #[must_use]
    pub fn condition_depth(&self) -> usize {
        self.condition_stack.len()
    }

    pub fn set_stop_on_first_error(&mut self, field_path: &str, stop: bool) {
        self.stop_on_first_error.insert(field_path.to_string(), stop);
    }

    #[must_use]
    pub fn stop_on_first_error(&self, field_path: &str) -> Option<bool> {
        self.stop_on_first_error.get(field_path).copied()
    }

    #[must_use]
    pub fn stop_overrides(&self) -> &HashMap<String, bool> {
        &self.stop_on_first_error
    }

    #[must_use]
    pub fn registrations(&self) -> &[ValidatorRegistration] {
        &self.registrations
    }

    #[must_use]
    pub fn config_errors(&self) -> &[FormError] {
        &self.config_errors
    }

    pub fn take_config_errors(&mut self) -> Vec<FormError> {
        std::mem::take(&mut self.config_errors)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    fn registration_mut(&mut self, handle: RegistrationHandle) -> Option<&mut ValidatorRegistration> {
        if handle.scope_id != self.scope_id {
            return None;
        }
        self.registrations.get_mut(handle.index)
    }
}

impl fmt::Debug for ValidationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRegistry")
            .field("scope_id", &self.scope_id)
            .field("registrations", &self.registrations)
            .field("config_errors", &self.config_errors)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RegistrationHandle
// ---------------------------------------------------------------------------

/// Refers to a registration while its schema is still running, so options
/// can be chained: `min_length(&p.name, 2).message("Too short")`.
///
/// A handle returned outside of a schema scope is detached and ignores
/// every option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationHandle {
    scope_id: u64,
    index: usize,
}

impl RegistrationHandle {
    pub(crate) const DETACHED: Self = Self {
        scope_id: 0,
        index: 0,
    };

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.scope_id == 0
    }

    fn edit(self, f: impl FnOnce(&mut ValidatorOptions)) -> Self {
        if self.is_detached() {
            return self;
        }
        let found = scope::with_current::<ValidationRegistry, _>(|registry| {
            registry
                .registration_mut(self)
                .map(|registration| f(&mut registration.options))
                .is_some()
        });
        if found != Some(true) {
            tracing::warn!(
                scope_id = self.scope_id,
                "validator option set after its schema finished; ignored"
            );
        }
        self
    }

    pub fn message(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.edit(|options| options.message = Some(message))
    }

    pub fn severity(self, severity: Severity) -> Self {
        self.edit(|options| options.severity = Some(severity))
    }

    /// Shorthand for `severity(Severity::Warning)`.
    pub fn warning(self) -> Self {
        self.severity(Severity::Warning)
    }

    pub fn debounce(self, delay: Duration) -> Self {
        self.edit(|options| options.debounce = Some(delay))
    }

    pub fn target_field(self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.edit(|options| options.target_field = Some(path))
    }
}
