#![forbid(unsafe_code)]

//! Runs registered validators against the live tree.
//!
//! # Order
//!
//! 1. `validate_items` registrations are expanded against the current array
//!    lengths, in place, so the item registrations keep the position of the
//!    registration that produced them.
//! 2. Per-field registrations are grouped by path in order of first
//!    registration. Fields are processed one after another; within a field,
//!    validators run in registration order and async validators are awaited
//!    in turn.
//! 3. Tree validators run after every field, in registration order.
//!
//! # Errors written back
//!
//! A field pass that found errors replaces the field's error list with them.
//! A pass that found none only clears errors of validation origin, so errors
//! set by application code survive a clean run. Tree passes first clear the
//! tree-origin errors on every target, then append fresh ones.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use indexmap::IndexMap;
use tracing::Instrument;

use super::error::ERROR_CODE_CONFIG;
use super::registry::{
    Condition, ItemSchemaFn, ValidatorKind, ValidatorOptions, ValidatorRegistration,
};
use super::{ErrorOrigin, TreeValidationContext, ValidationContext, ValidationError, ValidationRegistry};
use crate::error::{ErrorPolicy, FormError, FormResult, panic_message};
use crate::node::{FieldNode, FormNode, GroupNode};
use crate::path::{FieldPath, is_within};

// ---------------------------------------------------------------------------
// Error policy
// ---------------------------------------------------------------------------

/// Route a configuration problem through `policy`.
fn apply_policy(policy: ErrorPolicy, root: &GroupNode, err: FormError) -> FormResult<()> {
    match policy {
        ErrorPolicy::Throw => Err(err),
        ErrorPolicy::LogAndSkip => {
            tracing::warn!(error = %err, "configuration problem skipped");
            Ok(())
        }
        ErrorPolicy::Convert => {
            let error = ValidationError::new(ERROR_CODE_CONFIG, err.to_string())
                .with_origin(ErrorOrigin::Config);
            if !root.own_errors().contains(&error) {
                root.append_error(error);
            }
            Ok(())
        }
    }
}

/// Run `f`, turning a panic into `None` and an `error!` event.
fn guarded<T>(field: &str, what: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            tracing::error!(
                field,
                kind = what,
                panic = %panic_message(payload.as_ref()),
                "validator panicked; treated as passing"
            );
            None
        }
    }
}

fn decorate(error: ValidationError, options: &ValidatorOptions, origin: ErrorOrigin) -> ValidationError {
    let mut error = error.with_origin(origin);
    if let Some(message) = &options.message {
        error = error.with_message(message.clone());
    }
    if let Some(severity) = options.severity {
        error = error.with_severity(severity);
    }
    error
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Registrations after `validate_items` expansion.
#[derive(Default)]
pub(crate) struct Plan {
    pub(crate) fields: IndexMap<String, Vec<ValidatorRegistration>>,
    pub(crate) trees: Vec<ValidatorRegistration>,
    stop_overrides: HashMap<String, bool>,
}

impl Plan {
    fn stop_for(&self, path: &str, default: bool) -> bool {
        self.stop_overrides.get(path).copied().unwrap_or(default)
    }
}

// ---------------------------------------------------------------------------
// Applicator
// ---------------------------------------------------------------------------

/// Everything a validation pass needs; cheap to clone into tasks.
#[derive(Clone)]
pub(crate) struct Applicator {
    root: GroupNode,
    registry: Rc<ValidationRegistry>,
    policy: ErrorPolicy,
    stop_default: bool,
    /// Problems found while the form was built; re-surfaced on every full pass.
    standing: Rc<RefCell<Vec<FormError>>>,
}

impl Applicator {
    pub(crate) fn new(
        root: GroupNode,
        registry: Rc<ValidationRegistry>,
        policy: ErrorPolicy,
        stop_default: bool,
    ) -> Self {
        Self {
            root,
            registry,
            policy,
            stop_default,
            standing: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Route a build-time problem through the policy and remember it, so a
    /// converted error survives the clearing at the start of a full pass.
    pub(crate) fn report_standing(&self, err: FormError) -> FormResult<()> {
        self.config_error(err.clone())?;
        if self.policy == ErrorPolicy::Convert {
            self.standing.borrow_mut().push(err);
        }
        Ok(())
    }

    /// Longest debounce requested by an async validator registered directly
    /// on `path`.
    pub(crate) fn async_debounce(&self, path: &str) -> Option<Duration> {
        self.registry
            .registrations()
            .iter()
            .filter(|r| r.is_async() && r.field_path.as_deref() == Some(path))
            .filter_map(|r| r.options.debounce)
            .max()
    }

    pub(crate) fn registry(&self) -> &ValidationRegistry {
        &self.registry
    }

    fn config_error(&self, err: FormError) -> FormResult<()> {
        apply_policy(self.policy, &self.root, err)
    }

    pub(crate) fn plan(&self) -> FormResult<Plan> {
        let mut plan = Plan {
            stop_overrides: self.registry.stop_overrides().clone(),
            ..Plan::default()
        };
        self.expand_into(self.registry.registrations(), &[], &mut plan)?;
        Ok(plan)
    }

    fn expand_into(
        &self,
        registrations: &[ValidatorRegistration],
        outer: &[Condition],
        plan: &mut Plan,
    ) -> FormResult<()> {
        for registration in registrations {
            let mut registration = registration.clone();
            if !outer.is_empty() {
                registration.conditions = outer
                    .iter()
                    .cloned()
                    .chain(registration.conditions)
                    .collect();
            }
            if let ValidatorKind::Items { array, schema } = &registration.kind {
                self.expand_items(array, schema, &registration.conditions, plan)?;
            } else if registration.is_tree() {
                plan.trees.push(registration);
            } else if let Some(path) = registration.field_path.clone() {
                plan.fields.entry(path).or_default().push(registration);
            }
        }
        Ok(())
    }

    fn expand_items(
        &self,
        array: &FieldPath,
        schema: &ItemSchemaFn,
        conditions: &[Condition],
        plan: &mut Plan,
    ) -> FormResult<()> {
        let len = match self.root.get_field_checked(array.path()) {
            Ok(FormNode::Array(node)) => node.len(),
            Ok(other) => {
                return self.config_error(FormError::InvalidConfig {
                    path: array.path().to_string(),
                    reason: format!("validate_items needs an array, found a {:?}", other.kind()),
                });
            }
            Err(err) => return self.config_error(err),
        };
        for index in 0..len {
            let item = array.item(index);
            let mut nested = match ValidationRegistry::collect(&item, |p| schema(p)) {
                Ok(nested) => nested,
                Err(err) => {
                    self.config_error(err)?;
                    continue;
                }
            };
            for err in nested.take_config_errors() {
                self.config_error(err)?;
            }
            plan.stop_overrides.extend(
                nested
                    .stop_overrides()
                    .iter()
                    .map(|(k, v)| (k.clone(), *v)),
            );
            self.expand_into(nested.registrations(), conditions, plan)?;
        }
        Ok(())
    }

    fn conditions_hold(&self, conditions: &[Condition]) -> FormResult<bool> {
        for condition in conditions {
            let value = match self.root.get_field_checked(&condition.field_path) {
                Ok(node) => node.value(),
                Err(err) => {
                    self.config_error(err)?;
                    return Ok(false);
                }
            };
            let holds = guarded(&condition.field_path, "condition", || {
                (condition.predicate)(&value)
            })
            .unwrap_or(false);
            if !holds {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // -- passes -------------------------------------------------------------

    /// Validate every field and tree registration at or below `prefix`
    /// (`""` for the whole form) and report the validity of that node.
    pub(crate) async fn validate_within(&self, prefix: &str) -> FormResult<bool> {
        let span = tracing::debug_span!("validate", scope = %prefix);
        async move {
            if prefix.is_empty() {
                self.root
                    .clear_errors_where(|e| e.origin == ErrorOrigin::Config);
                let standing = self.standing.borrow().clone();
                for err in standing {
                    self.config_error(err)?;
                }
            }
            let plan = self.plan()?;
            for (path, registrations) in &plan.fields {
                if is_within(path, prefix) {
                    let stop = plan.stop_for(path, self.stop_default);
                    self.run_field(path, registrations, stop).await?;
                }
            }
            let trees: Vec<ValidatorRegistration> = plan
                .trees
                .iter()
                .filter(|r| {
                    prefix.is_empty()
                        || r.options
                            .target_field
                            .as_deref()
                            .is_some_and(|target| is_within(target, prefix))
                })
                .cloned()
                .collect();
            self.run_trees(&trees)?;

            let valid = if prefix.is_empty() {
                self.root.valid()
            } else {
                self.root.get_field_checked(prefix)?.valid()
            };
            tracing::debug!(valid, fields = plan.fields.len(), trees = trees.len(), "validation finished");
            Ok(valid)
        }
        .instrument(span)
        .await
    }

    /// Run only the registrations of the field at `path`.
    pub(crate) async fn validate_field(&self, path: &str) -> FormResult<bool> {
        let plan = self.plan()?;
        if let Some(registrations) = plan.fields.get(path) {
            let stop = plan.stop_for(path, self.stop_default);
            self.run_field(path, registrations, stop).await?;
        }
        Ok(self.root.get_field_checked(path)?.valid())
    }

    async fn run_field(
        &self,
        path: &str,
        registrations: &[ValidatorRegistration],
        stop_on_first_error: bool,
    ) -> FormResult<()> {
        let node = match self.root.get_field_checked(path) {
            Ok(node) => node,
            Err(err) => return self.config_error(err),
        };
        let FormNode::Field(field) = node else {
            tracing::warn!(field = %path, "validators registered on a container; skipped");
            return Ok(());
        };
        if field.disabled() {
            field.clear_errors_where(|e| e.origin == ErrorOrigin::Field);
            return Ok(());
        }

        let token = field.begin_validation();
        if registrations.iter().any(ValidatorRegistration::is_async) {
            field.set_pending(true);
        }
        let collected = self
            .collect_field_errors(&field, path, registrations, stop_on_first_error)
            .await;
        let errors = match collected {
            Ok(errors) => errors,
            Err(err) => {
                field.finish_validation(token, false);
                return Err(err);
            }
        };

        let blocking = errors.iter().any(ValidationError::is_blocking);
        if !field.finish_validation(token, !blocking) {
            tracing::debug!(field = %path, %token, "validation result superseded; discarded");
            return Ok(());
        }
        tracing::trace!(field = %path, errors = errors.len(), "field validated");
        if errors.is_empty() {
            field.clear_errors_where(|e| e.origin.is_validation());
        } else {
            field.set_errors(errors);
        }
        Ok(())
    }

    async fn collect_field_errors(
        &self,
        field: &FieldNode,
        path: &str,
        registrations: &[ValidatorRegistration],
        stop_on_first_error: bool,
    ) -> FormResult<Vec<ValidationError>> {
        let ctx = ValidationContext::new(self.root.clone(), field.clone(), path.to_string());
        let mut errors = Vec::new();
        for registration in registrations {
            if !self.conditions_hold(&registration.conditions)? {
                continue;
            }
            let value = field.value();
            let outcome = match &registration.kind {
                ValidatorKind::Sync(check) => guarded(path, "sync", || check(&value, &ctx)).flatten(),
                ValidatorKind::Async(check) => {
                    match guarded(path, "async", || check(value, ctx.clone())) {
                        Some(pending) => match AssertUnwindSafe(pending).catch_unwind().await {
                            Ok(outcome) => outcome,
                            Err(payload) => {
                                tracing::error!(
                                    field = %path,
                                    kind = "async",
                                    panic = %panic_message(payload.as_ref()),
                                    "validator panicked; treated as passing"
                                );
                                None
                            }
                        },
                        None => None,
                    }
                }
                ValidatorKind::Tree(_) | ValidatorKind::Items { .. } => None,
            };
            if let Some(error) = outcome {
                errors.push(decorate(error, &registration.options, ErrorOrigin::Field));
                if stop_on_first_error {
                    break;
                }
            }
        }
        Ok(errors)
    }

    fn run_trees(&self, trees: &[ValidatorRegistration]) -> FormResult<()> {
        for registration in trees {
            if let Some(target) = registration.options.target_field.as_deref()
                && let Some(node) = self.root.get_field_by_path(target)
            {
                node.clear_errors_where(|e| e.origin == ErrorOrigin::Tree);
            }
        }

        let ctx = TreeValidationContext::new(self.root.clone());
        for registration in trees {
            if !self.conditions_hold(&registration.conditions)? {
                continue;
            }
            let ValidatorKind::Tree(check) = &registration.kind else {
                continue;
            };
            let target = registration.options.target_field.as_deref();
            let Some(error) = guarded(target.unwrap_or("<tree>"), "tree", || check(&ctx)).flatten()
            else {
                continue;
            };
            let error = decorate(error, &registration.options, ErrorOrigin::Tree);
            match target {
                Some(target) => match self.root.get_field_checked(target) {
                    Ok(node) => node.append_error(error),
                    Err(err) => self.config_error(err)?,
                },
                None => {
                    tracing::debug!(code = %error.code, "tree validator error has no target_field; dropped");
                }
            }
        }
        Ok(())
    }
}
