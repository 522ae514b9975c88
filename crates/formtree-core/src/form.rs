#![forbid(unsafe_code)]

//! The assembled form: node tree, validation pipeline, behaviors and
//! scheduler behind one handle.
//!
//! ```rust
//! use formtree_core::{FormConfig, create_form, path};
//! use formtree_core::validation::{min_length, required};
//! use futures::executor::block_on;
//! use serde_json::json;
//!
//! let config = FormConfig::from_json(&json!({
//!     "name": { "value": "" },
//!     "address": { "city": { "value": "Oslo" } },
//! }))
//! .unwrap()
//! .validation(|p| {
//!     required(&path!(p.name));
//!     min_length(&path!(p.address.city), 2);
//! });
//!
//! let form = create_form(config).unwrap();
//! assert_eq!(block_on(form.validate()), Ok(false));
//! assert_eq!(form.field_node("name").unwrap().errors()[0].code, "required");
//! ```
//!
//! # Change-driven validation
//!
//! Besides explicit [`Form::validate`], every field re-runs its own
//! validators according to its [`UpdateOn`]: after each emitting value
//! change (`Change`), after each `mark_as_touched` (`Blur`), or never
//! (`Submit`). The run is spawned on the form's [`Scheduler`]; sync-only
//! fields finish before `set_value` returns. A field `debounce`, or the
//! longest `debounce` of its async validators, delays the run until the
//! value has been stable that long; drive time with [`Form::tick`].

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use formtree_reactive::BindingScope;
use serde_json::Value;

use crate::behavior::{BehaviorBinder, BehaviorRegistry};
use crate::config::{NodeConfig, UpdateOn};
use crate::error::{ErrorPolicy, FormError, FormResult};
use crate::node::{FieldSnapshot, FormNode, GroupNode, NodeEvent, NodeEventKind, ShowErrors};
use crate::path::{FieldPath, Shape};
use crate::scheduler::{Clock, Scheduler, TickReport};
use crate::scope::ScopedRegistry;
use crate::validation::ValidationRegistry;
use crate::validation::applicator::Applicator;

type SchemaFn = Box<dyn FnOnce(&FieldPath)>;

// ---------------------------------------------------------------------------
// FormOptions
// ---------------------------------------------------------------------------

/// Form-wide settings.
#[derive(Debug, Clone, Default)]
pub struct FormOptions {
    /// What to do with configuration problems.
    pub error_policy: ErrorPolicy,
    /// Stop each field at its first error unless the schema overrides it.
    pub stop_on_first_error: bool,
    /// Time source for debounce timers and validation traces.
    pub clock: Clock,
    /// When [`Form::snapshot`] reports errors as showable.
    pub show_errors_when: ShowErrors,
}

impl FormOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    #[must_use]
    pub fn stop_on_first_error(mut self, stop: bool) -> Self {
        self.stop_on_first_error = stop;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn show_errors_when(mut self, show: ShowErrors) -> Self {
        self.show_errors_when = show;
        self
    }
}

// ---------------------------------------------------------------------------
// FormConfig
// ---------------------------------------------------------------------------

/// Input to [`create_form`].
pub struct FormConfig {
    schema: NodeConfig,
    validation: Option<SchemaFn>,
    behavior: Option<SchemaFn>,
    options: FormOptions,
}

impl FormConfig {
    pub fn new(schema: impl Into<NodeConfig>) -> Self {
        Self {
            schema: schema.into(),
            validation: None,
            behavior: None,
            options: FormOptions::default(),
        }
    }

    /// Parse the node schema from JSON.
    pub fn from_json(schema: &Value) -> FormResult<Self> {
        NodeConfig::from_json(schema).map(Self::new)
    }

    #[must_use]
    pub fn validation(mut self, schema: impl FnOnce(&FieldPath) + 'static) -> Self {
        self.validation = Some(Box::new(schema));
        self
    }

    #[must_use]
    pub fn behavior(mut self, schema: impl FnOnce(&FieldPath) + 'static) -> Self {
        self.behavior = Some(Box::new(schema));
        self
    }

    #[must_use]
    pub fn options(mut self, options: FormOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn schema(&self) -> &NodeConfig {
        &self.schema
    }
}

impl fmt::Debug for FormConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormConfig")
            .field("schema", &self.schema)
            .field("validation", &self.validation.is_some())
            .field("behavior", &self.behavior.is_some())
            .field("options", &self.options)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Form
// ---------------------------------------------------------------------------

pub(crate) struct FormInner {
    root: GroupNode,
    shape: Rc<Shape>,
    options: FormOptions,
    applicator: Applicator,
    scheduler: Scheduler,
    behaviors: RefCell<BindingScope>,
    hooks: RefCell<BindingScope>,
}

impl Drop for FormInner {
    fn drop(&mut self) {
        let dropped = self.scheduler.cancel_all();
        if dropped > 0 {
            tracing::trace!(timers = dropped, "form dropped with pending timers");
        }
    }
}

/// A built form. Derefs to its root [`GroupNode`].
#[derive(Clone)]
pub struct Form {
    inner: Rc<FormInner>,
}

/// Build a form: construct the tree, collect the validation schema, bind
/// the behavior schema and install change-driven validation.
///
/// Configuration problems (a non-group root, unknown paths in schemas, a
/// panicking schema) are handled by the configured [`ErrorPolicy`].
pub fn create_form(config: FormConfig) -> FormResult<Form> {
    let FormConfig {
        schema,
        validation,
        behavior,
        options,
    } = config;
    let policy = options.error_policy;

    let NodeConfig::Group(group) = &schema else {
        return Err(FormError::InvalidConfig {
            path: String::new(),
            reason: format!("the form root must be a group, found a {}", schema.kind_name()),
        });
    };
    let root = GroupNode::new(group);
    let shape = schema.shape();
    let root_path = FieldPath::root(Rc::clone(&shape));

    let mut startup = Vec::new();
    let registry = match validation.map(|schema| ValidationRegistry::collect(&root_path, schema)) {
        Some(Ok(mut registry)) => {
            startup.extend(registry.take_config_errors());
            registry
        }
        Some(Err(err)) => {
            startup.push(err);
            ValidationRegistry::fresh(0)
        }
        None => ValidationRegistry::fresh(0),
    };
    tracing::debug!(validators = registry.len(), "validation schema ready");

    let applicator = Applicator::new(
        root.clone(),
        Rc::new(registry),
        policy,
        options.stop_on_first_error,
    );
    for err in startup {
        applicator.report_standing(err)?;
    }
    let scheduler = Scheduler::new(options.clock.clone());

    let inner = Rc::new_cyclic(|weak: &Weak<FormInner>| {
        root.set_form(weak.clone());
        FormInner {
            root: root.clone(),
            shape,
            options,
            applicator,
            scheduler,
            behaviors: RefCell::new(BindingScope::new()),
            hooks: RefCell::new(BindingScope::new()),
        }
    });
    let form = Form { inner };

    if let Some(schema) = behavior {
        form.bind_behaviors(schema)?;
    }
    form.install_validation_hooks();
    Ok(form)
}

impl Form {
    pub(crate) fn from_inner(inner: Rc<FormInner>) -> Self {
        Self { inner }
    }

    fn bind_behaviors(&self, schema: SchemaFn) -> FormResult<()> {
        let inner = &self.inner;
        let policy = inner.options.error_policy;
        let root_path = FieldPath::root(Rc::clone(&inner.shape));
        let applicator = &inner.applicator;
        let mut registry = match BehaviorRegistry::collect(&root_path, schema) {
            Ok(registry) => registry,
            Err(err) => return applicator.report_standing(err),
        };
        for err in registry.take_config_errors() {
            applicator.report_standing(err)?;
        }

        let binder = BehaviorBinder::new(
            inner.root.clone(),
            inner.scheduler.clone(),
            inner.applicator.clone(),
            policy,
        );
        let mut bound = 0usize;
        for registration in registry.into_registrations() {
            let kind = registration.kind;
            match (registration.bind)(&binder) {
                Ok(subscription) => {
                    inner.behaviors.borrow_mut().hold(subscription);
                    bound += 1;
                }
                Err(err) => {
                    tracing::debug!(behavior = kind, error = %err, "behavior could not be bound");
                    applicator.report_standing(err)?;
                }
            }
        }
        tracing::debug!(behaviors = bound, "behaviors bound");
        Ok(())
    }

    fn install_validation_hooks(&self) {
        let root = self.inner.root.clone();
        let applicator = self.inner.applicator.clone();
        let scheduler = self.inner.scheduler.clone();
        let hook = self.inner.root.subscribe_events(move |event: &NodeEvent| {
            let trigger = match event.kind {
                NodeEventKind::ValueChanged => UpdateOn::Change,
                NodeEventKind::Touched => UpdateOn::Blur,
                NodeEventKind::Reset | NodeEventKind::Structure => return,
            };
            let Some(FormNode::Field(field)) = root.get_field_by_path(&event.path) else {
                return;
            };
            if field.update_on() != trigger {
                return;
            }
            let delay = field
                .debounce()
                .into_iter()
                .chain(applicator.async_debounce(&event.path))
                .max()
                .filter(|delay| !delay.is_zero());
            let task = validation_task(applicator.clone(), event.path.clone());
            match delay {
                Some(delay) => {
                    let spawner = scheduler.clone();
                    scheduler.debounce(format!("validate:{}", event.path), delay, move || {
                        spawner.spawn(task);
                    });
                }
                None => scheduler.spawn(task),
            }
        });
        self.inner.hooks.borrow_mut().hold(hook);
    }

    // -- access -------------------------------------------------------------

    #[must_use]
    pub fn root(&self) -> &GroupNode {
        &self.inner.root
    }

    /// Resolve `path` against the live tree.
    pub fn field(&self, path: &str) -> FormResult<FormNode> {
        self.inner.root.get_field_checked(path)
    }

    /// A fresh root descriptor for addressing fields with [`path!`](crate::path!).
    #[must_use]
    pub fn paths(&self) -> FieldPath {
        FieldPath::root(Rc::clone(&self.inner.shape))
    }

    #[must_use]
    pub fn options(&self) -> &FormOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Number of validators the validation schema registered.
    #[must_use]
    pub fn validator_count(&self) -> usize {
        self.inner.applicator.registry().len()
    }

    #[must_use]
    pub fn behavior_count(&self) -> usize {
        self.inner.behaviors.borrow().binding_count()
    }

    /// Tear down every behavior. Change-driven validation stays installed.
    pub fn unbind_behaviors(&self) {
        let count = self.behavior_count();
        self.inner.behaviors.borrow_mut().clear();
        tracing::debug!(behaviors = count, "behaviors unbound");
    }

    /// Render state of the field at `path`, gated by
    /// [`FormOptions::show_errors_when`].
    pub fn snapshot(&self, path: &str) -> FormResult<FieldSnapshot> {
        Ok(self
            .inner
            .root
            .field_node(path)?
            .snapshot(self.inner.options.show_errors_when))
    }

    // -- validation ---------------------------------------------------------

    /// Run every registration against the current tree.
    pub async fn validate(&self) -> FormResult<bool> {
        self.inner.applicator.validate_within("").await
    }

    /// Run only the registrations of the field at `path`.
    pub async fn validate_field(&self, path: &str) -> FormResult<bool> {
        self.inner.applicator.validate_field(path).await
    }

    pub(crate) async fn validate_within(&self, prefix: &str) -> FormResult<bool> {
        self.inner.applicator.validate_within(prefix).await
    }

    /// Touch every field, validate, and hand the value to `on_valid` when the
    /// form is valid.
    pub async fn submit<R>(&self, on_valid: impl FnOnce(Value) -> R) -> FormResult<Option<R>> {
        self.inner.root.mark_as_touched();
        if self.validate().await? {
            Ok(Some(on_valid(self.inner.root.value())))
        } else {
            tracing::debug!(
                errors = self.inner.root.errors().len(),
                "submit rejected by validation"
            );
            Ok(None)
        }
    }

    // -- time ---------------------------------------------------------------

    /// Fire due debounce timers and poll pending validation tasks.
    pub fn tick(&self) -> TickReport {
        self.inner.scheduler.tick()
    }

    /// Poll pending tasks without firing timers.
    pub fn run_until_stalled(&self) -> usize {
        self.inner.scheduler.run_until_stalled()
    }
}

async fn validation_task(applicator: Applicator, path: String) {
    if let Err(err) = applicator.validate_field(&path).await {
        tracing::warn!(field = %path, error = %err, "change-driven validation failed");
    }
}

impl Deref for Form {
    type Target = GroupNode;

    fn deref(&self) -> &GroupNode {
        &self.inner.root
    }
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Form")
            .field("root", &self.inner.root)
            .field("validators", &self.validator_count())
            .field("behaviors", &self.behavior_count())
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::compute_from;
    use crate::path;
    use crate::scheduler::ManualClock;
    use crate::validation::{min_length, required, validate_async};
    use crate::ValidationError;
    use futures::executor::block_on;
    use serde_json::json;
    use std::time::Duration;

    fn config(schema: Value) -> FormConfig {
        FormConfig::from_json(&schema).unwrap()
    }

    #[test]
    fn root_must_be_a_group() {
        let err = create_form(FormConfig::new(NodeConfig::field(1))).unwrap_err();
        assert!(matches!(err, FormError::InvalidConfig { .. }));
    }

    #[test]
    fn nodes_reach_their_form() {
        let form = create_form(config(json!({ "a": { "b": { "value": "" } } })).validation(|p| {
            required(&path!(p.a.b));
        }))
        .unwrap();
        let field = form.field("a.b").unwrap();
        assert_eq!(block_on(field.validate()), Ok(false));
        assert_eq!(block_on(form.field("a").unwrap().validate()), Ok(false));
    }

    #[test]
    fn change_runs_sync_validators_immediately() {
        let form = create_form(config(json!({ "name": { "value": "abc" } })).validation(|p| {
            min_length(&path!(p.name), 2);
        }))
        .unwrap();
        let name = form.field_node("name").unwrap();
        name.set_value(json!("a"));
        assert_eq!(name.errors()[0].code, "too_short");
        name.set_value(json!("ab"));
        assert!(name.errors().is_empty());
    }

    #[test]
    fn submit_fields_wait_for_validate() {
        let form = create_form(
            config(json!({ "name": { "value": "x", "updateOn": "submit" } })).validation(|p| {
                min_length(&path!(p.name), 2);
            }),
        )
        .unwrap();
        let name = form.field_node("name").unwrap();
        name.set_value(json!("y"));
        assert!(name.errors().is_empty());
        assert_eq!(block_on(form.validate()), Ok(false));
    }

    #[test]
    fn debounced_async_validation_fires_after_quiet_period() {
        let clock = ManualClock::new();
        let form = create_form(
            config(json!({ "user": { "value": "" } }))
                .validation(|p| {
                    validate_async(&path!(p.user), |value, _| async move {
                        (value == "taken").then(|| ValidationError::new("taken", "Taken"))
                    })
                    .debounce(Duration::from_millis(300));
                })
                .options(FormOptions::new().clock(Clock::manual(&clock))),
        )
        .unwrap();
        let user = form.field_node("user").unwrap();
        user.set_value(json!("taken"));
        assert!(user.errors().is_empty());
        clock.advance(Duration::from_millis(299));
        form.tick();
        assert!(user.errors().is_empty());
        clock.advance(Duration::from_millis(1));
        form.tick();
        assert_eq!(user.errors()[0].code, "taken");
        assert!(!user.pending());
    }

    #[test]
    fn unbinding_stops_behaviors() {
        let form = create_form(
            config(json!({ "a": { "value": 1 }, "b": { "value": 0 } })).behavior(|p| {
                compute_from(&[&path!(p.a)], &path!(p.b), |v| json!(v.f64("a") * 2.0));
            }),
        )
        .unwrap();
        assert_eq!(form.behavior_count(), 1);
        assert_eq!(form.field("b").unwrap().value(), json!(2.0));
        form.unbind_behaviors();
        form.field_node("a").unwrap().set_value(json!(5));
        assert_eq!(form.field("b").unwrap().value(), json!(2.0));
    }

    #[test]
    fn submit_touches_and_gates_on_validity() {
        let form = create_form(config(json!({ "name": { "value": "" } })).validation(|p| {
            required(&path!(p.name));
        }))
        .unwrap();
        assert_eq!(block_on(form.submit(|v| v)), Ok(None));
        assert!(form.field_node("name").unwrap().touched());
        assert!(form.snapshot("name").unwrap().should_show_error);

        form.field_node("name").unwrap().set_value(json!("Ada"));
        let submitted = block_on(form.submit(|v| v["name"].clone())).unwrap();
        assert_eq!(submitted, Some(json!("Ada")));
    }

    #[test]
    fn behavior_errors_follow_policy() {
        let schema = json!({ "a": { "value": 1 } });
        let bad = |p: &FieldPath| {
            compute_from(&[&FieldPath::unchecked("ghost")], &path!(p.a), |_| Value::Null);
        };
        assert!(matches!(
            create_form(config(schema.clone()).behavior(bad)),
            Err(FormError::UnknownField { .. })
        ));
        let form = create_form(
            config(schema)
                .behavior(bad)
                .options(FormOptions::new().error_policy(ErrorPolicy::LogAndSkip)),
        )
        .unwrap();
        assert_eq!(form.behavior_count(), 0);
    }
}
