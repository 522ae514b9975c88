#![forbid(unsafe_code)]

//! Structured log output: configuration problems, validator panics and the
//! validation span.

use std::sync::{Arc, Mutex};

use formtree_core::validation::{required, validate};
use formtree_core::{
    ErrorPolicy, FieldPath, FormConfig, FormOptions, create_form, path,
};
use futures::executor::block_on;
use serde_json::json;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

// ---------------------------------------------------------------------------
// Capture layer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Captured {
    level: Level,
    message: String,
    fields: Vec<(String, String)>,
}

impl Captured {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Default)]
struct CaptureVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for CaptureVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.push((field.name().to_string(), value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }
}

#[derive(Default, Clone)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<Captured>>>,
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        self.spans
            .lock()
            .unwrap()
            .push(attrs.metadata().name().to_string());
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = CaptureVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(Captured {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

fn capture<R>(f: impl FnOnce() -> R) -> (R, CaptureLayer) {
    let layer = CaptureLayer::default();
    let subscriber = tracing_subscriber::registry().with(layer.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, layer)
}

impl CaptureLayer {
    fn at(&self, level: Level) -> Vec<Captured> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.level == level)
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn skipped_configuration_problems_are_logged_at_warn() {
    let (valid, logs) = capture(|| {
        let form = create_form(
            FormConfig::from_json(&json!({ "name": { "value": "" } }))
                .unwrap()
                .validation(|p| {
                    required(&p.field("nmae"));
                })
                .options(FormOptions::new().error_policy(ErrorPolicy::LogAndSkip)),
        )
        .unwrap();
        block_on(form.validate())
    });

    assert_eq!(valid, Ok(true));
    let warnings = logs.at(Level::WARN);
    assert!(
        warnings
            .iter()
            .any(|event| event.message == "configuration problem skipped"),
        "{warnings:?}"
    );
}

#[test]
fn panicking_validator_is_logged_at_error() {
    let (valid, logs) = capture(|| {
        let form = create_form(
            FormConfig::from_json(&json!({ "name": { "value": "Ann" } }))
                .unwrap()
                .validation(|p| {
                    validate(&path!(p.name), |_, _| panic!("lookup table missing"));
                }),
        )
        .unwrap();
        block_on(form.validate())
    });

    assert_eq!(valid, Ok(true));
    let errors = logs.at(Level::ERROR);
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].message, "validator panicked; treated as passing");
    assert_eq!(errors[0].field("field"), Some("name"));
    assert!(errors[0].field("panic").is_some_and(|p| p.contains("lookup table missing")));
}

#[test]
fn validation_runs_inside_a_span() {
    let (_, logs) = capture(|| {
        let form = create_form(FormConfig::from_json(&json!({ "a": { "value": 1 } })).unwrap())
            .unwrap();
        block_on(form.validate())
    });
    assert!(logs.spans.lock().unwrap().iter().any(|name| name == "validate"));
}

#[test]
fn registering_outside_a_schema_warns() {
    let ((), logs) = capture(|| {
        required(&FieldPath::unchecked("name"));
    });
    assert_eq!(logs.at(Level::WARN).len(), 1);
}
