#![forbid(unsafe_code)]

//! Behaviors: reactive effects between nodes.
//!
//! A behavior schema is a function over the form's root
//! [`FieldPath`](crate::FieldPath), like a validation schema. Each call below
//! records a registration; the form binds them right after it is built and
//! keeps the resulting subscriptions until it is dropped or
//! [`Form::unbind_behaviors`](crate::Form::unbind_behaviors) is called.
//!
//! ```rust
//! use formtree_core::behavior::{compute_from, enable_when};
//! use formtree_core::{FieldPath, path};
//! use serde_json::json;
//!
//! fn loan(p: &FieldPath) {
//!     compute_from(&[&path!(p.price), &path!(p.quantity)], &path!(p.total), |v| {
//!         json!(v.f64("price") * v.f64("quantity"))
//!     });
//!     enable_when(&path!(p.company), |form| form["kind"] == "business");
//! }
//! ```
//!
//! Writes made by behaviors are silent. Subscribers of the target and
//! behaviors reading it still see the new value, so computed fields chain,
//! but the target is not marked dirty, change validation does not run and
//! the writing behavior is never re-entered by its own write.

pub mod registry;

use std::rc::Rc;
use std::time::Duration;

use formtree_reactive::{Subscription, TwoWayBinding};
use serde_json::Value;

pub use registry::{BehaviorBinder, BehaviorRegistration, BehaviorRegistry};

use crate::error::{FormError, FormResult};
use crate::node::{FieldNode, FormNode, GroupNode, SetValueOptions};
use crate::path::FieldPath;
use crate::scope;
use crate::validation::value_as_f64;
use registry::{BindFn, guarded, on_any_change, write_silent};

// ---------------------------------------------------------------------------
// BehaviorContext
// ---------------------------------------------------------------------------

/// Handed to `watch_field` callbacks.
#[derive(Debug, Clone)]
pub struct BehaviorContext {
    root: GroupNode,
}

impl BehaviorContext {
    pub(crate) fn new(root: GroupNode) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn get_field(&self, path: &str) -> Option<Value> {
        self.root.get_field_by_path(path).map(|node| node.value())
    }

    /// Write a node without marking it dirty or triggering validation.
    pub fn set_field(&self, path: &str, value: Value) -> FormResult<()> {
        self.root
            .get_field_checked(path)?
            .set_value_with(value, SetValueOptions::silent())
    }

    #[must_use]
    pub fn field(&self, path: &str) -> Option<FormNode> {
        self.root.get_field_by_path(path)
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

// ---------------------------------------------------------------------------
// SourceValues
// ---------------------------------------------------------------------------

/// Current values of a `compute_from` call's sources, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceValues {
    entries: Vec<(String, Value)>,
}

impl SourceValues {
    fn read(paths: &[String], nodes: &[FormNode]) -> Self {
        Self {
            entries: paths
                .iter()
                .cloned()
                .zip(nodes.iter().map(FormNode::value))
                .collect(),
        }
    }

    /// Look up by full path (`"loan.amount"`) or by last key (`"amount"`).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(path, _)| path == key)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(path, _)| last_key(path) == key)
            })
            .map(|(_, value)| value)
    }

    /// Numeric value of `key`, `0.0` when missing or not numeric.
    #[must_use]
    pub fn f64(&self, key: &str) -> f64 {
        self.get(key).and_then(value_as_f64).unwrap_or(0.0)
    }

    #[must_use]
    pub fn try_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(value_as_f64)
    }

    #[must_use]
    pub fn at(&self, index: usize) -> Option<&Value> {
        self.entries.get(index).map(|(_, value)| value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(path, value)| (path.as_str(), value))
    }
}

fn last_key(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnableOptions {
    /// Reset the target to its initial value whenever it gets disabled.
    pub reset_on_disable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Wait this long after the last change before calling back.
    pub debounce: Option<Duration>,
    /// Call back once at bind time with the current value.
    pub immediate: bool,
}

impl WatchOptions {
    #[must_use]
    pub fn debounce(mut self, delay: Duration) -> Self {
        self.debounce = Some(delay);
        self
    }

    #[must_use]
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

/// Options for [`copy_from`].
#[derive(Clone, Default)]
pub struct CopyOptions {
    /// Copy only while this holds for the whole form value.
    pub when: Option<Rc<dyn Fn(&Value) -> bool>>,
    /// Map the source value before writing it.
    pub transform: Option<Rc<dyn Fn(&Value) -> Value>>,
}

impl CopyOptions {
    #[must_use]
    pub fn when(mut self, predicate: impl Fn(&Value) -> bool + 'static) -> Self {
        self.when = Some(Rc::new(predicate));
        self
    }

    #[must_use]
    pub fn transform(mut self, map: impl Fn(&Value) -> Value + 'static) -> Self {
        self.transform = Some(Rc::new(map));
        self
    }
}

impl std::fmt::Debug for CopyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyOptions")
            .field("when", &self.when.is_some())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

fn register(kind: &'static str, target: Option<&FieldPath>, bind: BindFn) {
    let done = scope::with_current::<BehaviorRegistry, _>(|registry| {
        registry.register(kind, target, bind);
    });
    if done.is_none() {
        tracing::warn!(
            behavior = kind,
            target = target.map_or("<none>", FieldPath::path),
            "behavior registered outside of a behavior schema; ignored"
        );
    }
}

fn resolve_all(binder: &BehaviorBinder, paths: &[FieldPath]) -> FormResult<Vec<FormNode>> {
    paths.iter().map(|path| binder.resolve(path)).collect()
}

fn owned(paths: &[&FieldPath]) -> Vec<FieldPath> {
    paths.iter().map(|&p| p.clone()).collect()
}

/// Re-evaluate a predicate over the form value after every emitting change
/// below the root, and once at bind time.
fn on_form_change(
    binder: &BehaviorBinder,
    kind: &'static str,
    target: &FormNode,
    predicate: Rc<dyn Fn(&Value) -> bool>,
    apply: impl Fn(&FormNode, bool) + 'static,
) -> Subscription {
    let root = binder.root().clone();
    let target = target.clone();
    let label = target.path();
    let evaluate = move || {
        let form = root.value();
        if let Some(holds) = guarded(kind, &label, || predicate(&form)) {
            apply(&target, holds);
        }
    };
    evaluate();
    on_any_change(&[FormNode::Group(binder.root().clone())], evaluate)
}

// ---------------------------------------------------------------------------
// Behaviors
// ---------------------------------------------------------------------------

/// Keep `target` equal to `compute(sources)`.
///
/// Runs once at bind time and again after every change of a source,
/// including silent writes made by other behaviors. The write into `target`
/// is silent.
pub fn compute_from(
    sources: &[&FieldPath],
    target: &FieldPath,
    compute: impl Fn(&SourceValues) -> Value + 'static,
) {
    let source_paths = owned(sources);
    let target_path = target.clone();
    register(
        "compute_from",
        Some(target),
        Box::new(move |binder| {
            let nodes = resolve_all(binder, &source_paths)?;
            let target = binder.resolve(&target_path)?;
            let keys: Vec<String> = source_paths.iter().map(|p| p.path().to_string()).collect();
            let label = target.path();
            let watched = nodes.clone();
            let recompute = move || {
                let values = SourceValues::read(&keys, &nodes);
                if let Some(value) = guarded("compute_from", &label, || compute(&values)) {
                    write_silent("compute_from", &target, value);
                }
            };
            recompute();
            Ok(on_any_change(&watched, recompute))
        }),
    );
}

/// Enable `target` while `predicate(form_value)` holds, disable otherwise.
pub fn enable_when(target: &FieldPath, predicate: impl Fn(&Value) -> bool + 'static) {
    enable_when_with(target, predicate, EnableOptions::default());
}

pub fn enable_when_with(
    target: &FieldPath,
    predicate: impl Fn(&Value) -> bool + 'static,
    options: EnableOptions,
) {
    toggle_disabled("enable_when", target, Rc::new(predicate), true, options);
}

/// Disable `target` while `predicate(form_value)` holds.
pub fn disable_when(target: &FieldPath, predicate: impl Fn(&Value) -> bool + 'static) {
    disable_when_with(target, predicate, EnableOptions::default());
}

pub fn disable_when_with(
    target: &FieldPath,
    predicate: impl Fn(&Value) -> bool + 'static,
    options: EnableOptions,
) {
    toggle_disabled("disable_when", target, Rc::new(predicate), false, options);
}

fn toggle_disabled(
    kind: &'static str,
    target: &FieldPath,
    predicate: Rc<dyn Fn(&Value) -> bool>,
    enable_when_true: bool,
    options: EnableOptions,
) {
    let target_path = target.clone();
    register(
        kind,
        Some(target),
        Box::new(move |binder| {
            let node = binder.resolve(&target_path)?;
            Ok(on_form_change(binder, kind, &node, predicate, move |node, holds| {
                let enabled = holds == enable_when_true;
                if enabled {
                    node.enable();
                } else if !node.disabled() {
                    node.disable();
                    if options.reset_on_disable {
                        node.reset();
                    }
                }
            }))
        }),
    );
}

/// Show `target` while `predicate(form_value)` holds, hide otherwise.
pub fn show_when(target: &FieldPath, predicate: impl Fn(&Value) -> bool + 'static) {
    toggle_visible("show_when", target, Rc::new(predicate), true);
}

/// Hide `target` while `predicate(form_value)` holds.
pub fn hide_when(target: &FieldPath, predicate: impl Fn(&Value) -> bool + 'static) {
    toggle_visible("hide_when", target, Rc::new(predicate), false);
}

fn toggle_visible(
    kind: &'static str,
    target: &FieldPath,
    predicate: Rc<dyn Fn(&Value) -> bool>,
    show_when_true: bool,
) {
    let target_path = target.clone();
    register(
        kind,
        Some(target),
        Box::new(move |binder| {
            let node = binder.resolve(&target_path)?;
            Ok(on_form_change(binder, kind, &node, predicate, move |node, holds| {
                if holds == show_when_true {
                    node.show();
                } else {
                    node.hide();
                }
            }))
        }),
    );
}

/// Call `callback` with the value of `path` after it changes.
///
/// With a debounce, bursts of changes collapse into one call carrying the
/// value current when the timer fires. `immediate` adds exactly one call at
/// bind time.
pub fn watch_field(
    path: &FieldPath,
    callback: impl Fn(&Value, &BehaviorContext) + 'static,
    options: WatchOptions,
) {
    let watched = path.clone();
    register(
        "watch_field",
        Some(path),
        Box::new(move |binder| {
            let node = binder.resolve(&watched)?;
            let ctx = binder.context();
            let label = node.path();
            let callback = Rc::new(callback);

            let fire: Rc<dyn Fn()> = {
                let node = node.clone();
                let callback = Rc::clone(&callback);
                Rc::new(move || {
                    let value = node.value();
                    guarded("watch_field", &label, || callback(&value, &ctx));
                })
            };
            if options.immediate {
                fire();
            }

            let subscription = match options.debounce {
                Some(delay) => {
                    let scheduler = binder.scheduler().clone();
                    let key = binder.timer_key("watch", &watched);
                    on_any_change(&[node], move || {
                        let fire = Rc::clone(&fire);
                        scheduler.debounce(key.clone(), delay, move || fire());
                    })
                }
                None => on_any_change(&[node], move || fire()),
            };
            Ok(subscription)
        }),
    );
}

/// Copy `source` into `target` after every change of `source`.
pub fn copy_from(source: &FieldPath, target: &FieldPath, options: CopyOptions) {
    let source_path = source.clone();
    let target_path = target.clone();
    register(
        "copy_from",
        Some(target),
        Box::new(move |binder| {
            let source = binder.resolve(&source_path)?;
            let target = binder.resolve(&target_path)?;
            let root = binder.root().clone();
            let label = target.path();
            let watched = source.clone();
            Ok(on_any_change(&[watched], move || {
                if let Some(when) = &options.when {
                    let form = root.value();
                    if guarded("copy_from", &label, || when(&form)) != Some(true) {
                        return;
                    }
                }
                let value = source.value();
                let value = match &options.transform {
                    Some(map) => match guarded("copy_from", &label, || map(&value)) {
                        Some(mapped) => mapped,
                        None => return,
                    },
                    None => value,
                };
                write_silent("copy_from", &target, value);
            }))
        }),
    );
}

/// Re-run `target`'s validators whenever one of `dependencies` changes.
pub fn revalidate_when(target: &FieldPath, dependencies: &[&FieldPath]) {
    let target_path = target.clone();
    let dependency_paths = owned(dependencies);
    register(
        "revalidate_when",
        Some(target),
        Box::new(move |binder| {
            let nodes = resolve_all(binder, &dependency_paths)?;
            binder.resolve(&target_path)?;
            let scheduler = binder.scheduler().clone();
            let applicator = binder.applicator().clone();
            let target = target_path.path().to_string();
            Ok(on_any_change(&nodes, move || {
                let applicator = applicator.clone();
                let target = target.clone();
                scheduler.spawn(async move {
                    if let Err(err) = applicator.validate_within(&target).await {
                        tracing::warn!(target = %target, error = %err, "revalidation failed");
                    }
                });
            }))
        }),
    );
}

/// Reset `target` whenever a dependency changes and `predicate(form_value)`
/// holds.
pub fn reset_when(
    target: &FieldPath,
    dependencies: &[&FieldPath],
    predicate: impl Fn(&Value) -> bool + 'static,
) {
    let target_path = target.clone();
    let dependency_paths = owned(dependencies);
    register(
        "reset_when",
        Some(target),
        Box::new(move |binder| {
            let nodes = resolve_all(binder, &dependency_paths)?;
            let target = binder.resolve(&target_path)?;
            let root = binder.root().clone();
            let label = target.path();
            Ok(on_any_change(&nodes, move || {
                let form = root.value();
                if guarded("reset_when", &label, || predicate(&form)) == Some(true) {
                    target.reset();
                }
            }))
        }),
    );
}

/// Keep two fields equal in both directions. `b` takes `a`'s value at bind
/// time.
pub fn sync_fields(a: &FieldPath, b: &FieldPath) {
    let a_path = a.clone();
    let b_path = b.clone();
    register(
        "sync_fields",
        Some(b),
        Box::new(move |binder| {
            let field = |path: &FieldPath| -> FormResult<FieldNode> {
                match binder.resolve(path)? {
                    FormNode::Field(field) => Ok(field),
                    _ => Err(FormError::NotAField {
                        path: path.path().to_string(),
                    }),
                }
            };
            let (a, b) = (field(&a_path)?, field(&b_path)?);
            Ok(TwoWayBinding::new(&a, &b).into_subscription())
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;

    fn values() -> SourceValues {
        SourceValues::read(
            &["loan.amount".to_string(), "term".to_string()],
            &[
                FormNode::Field(FieldNode::new(&FieldConfig::new(100))),
                FormNode::Field(FieldNode::new(&FieldConfig::new("12"))),
            ],
        )
    }

    #[test]
    fn source_values_resolve_full_path_and_last_key() {
        let v = values();
        assert_eq!(v.get("loan.amount"), Some(&Value::from(100)));
        assert_eq!(v.get("amount"), Some(&Value::from(100)));
        assert_eq!(v.f64("term"), 12.0);
        assert_eq!(v.f64("missing"), 0.0);
        assert_eq!(v.try_f64("missing"), None);
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn registering_outside_a_schema_is_ignored() {
        compute_from(&[], &FieldPath::unchecked("x"), |_| Value::Null);
        assert_eq!(scope::depth::<BehaviorRegistry>(), 0);
    }

    #[test]
    fn watch_options_builders() {
        let options = WatchOptions::default()
            .debounce(Duration::from_millis(300))
            .immediate();
        assert_eq!(options.debounce, Some(Duration::from_millis(300)));
        assert!(options.immediate);
    }
}
