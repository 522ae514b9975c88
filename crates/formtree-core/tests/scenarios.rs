#![forbid(unsafe_code)]

//! End-to-end form scenarios: a loan application with computed, conditional,
//! debounced and cross-field rules.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use formtree_core::behavior::{WatchOptions, compute_from, enable_when, watch_field};
use formtree_core::validation::{
    apply_when, min_length, required, stop_on_first_error, validate_async, validate_tree,
};
use formtree_core::{
    Clock, ErrorOrigin, FormConfig, FormOptions, ManualClock, ValidationError, create_form, path,
};
use futures::executor::block_on;
use serde_json::{Value, json};

fn codes(form: &formtree_core::Form, path: &str) -> Vec<String> {
    form.field(path)
        .unwrap()
        .errors()
        .into_iter()
        .map(|e| e.code)
        .collect()
}

fn annuity(amount: f64, months: f64, annual_rate: f64) -> f64 {
    let monthly = annual_rate / 100.0 / 12.0;
    if monthly == 0.0 || months == 0.0 {
        return if months == 0.0 { 0.0 } else { amount / months };
    }
    amount * monthly / (1.0 - (1.0 + monthly).powf(-months))
}

// ============================================================================
// Scenario A: computed monthly payment
// ============================================================================

#[test]
fn computed_payment_follows_its_sources() {
    let form = create_form(
        FormConfig::from_json(&json!({
            "loan": {
                "amount": { "value": 100000 },
                "term": { "value": 12 },
                "rate": { "value": 10 },
            },
            "payment": { "value": 0 },
        }))
        .unwrap()
        .behavior(|p| {
            compute_from(
                &[&path!(p.loan.amount), &path!(p.loan.term), &path!(p.loan.rate)],
                &path!(p.payment),
                |v| json!(annuity(v.f64("amount"), v.f64("term"), v.f64("rate")).round()),
            );
        }),
    )
    .unwrap();

    let payment = form.field_node("payment").unwrap();
    assert_eq!(payment.value(), json!(8792.0));

    form.field_node("loan.amount").unwrap().set_value(json!(200000));
    assert_eq!(payment.value(), json!(17583.0));
    assert!(!payment.dirty(), "computed writes are silent");
}

#[test]
fn computed_fields_chain_and_notify_subscribers() {
    let form = create_form(
        FormConfig::from_json(&json!({
            "amount": { "value": 0 },
            "payment": { "value": 0 },
            "tax": { "value": 0 },
            "extra": { "value": "" },
        }))
        .unwrap()
        .behavior(|p| {
            compute_from(&[&path!(p.amount)], &path!(p.payment), |v| json!(v.f64("amount") * 2.0));
            compute_from(&[&path!(p.payment)], &path!(p.tax), |v| json!(v.f64("payment") / 2.0));
            enable_when(&path!(p.extra), |form| form["tax"].as_f64().unwrap_or(0.0) > 100.0);
        }),
    )
    .unwrap();
    let payment = form.field_node("payment").unwrap();
    let tax = form.field_node("tax").unwrap();
    let extra = form.field_node("extra").unwrap();
    assert!(extra.disabled());

    let notified = Rc::new(Cell::new(0u32));
    let count = Rc::clone(&notified);
    let _sub = payment.value_signal().subscribe(move |_| count.set(count.get() + 1));

    form.field_node("amount").unwrap().set_value(json!(500));
    assert_eq!(payment.value(), json!(1000.0));
    assert_eq!(tax.value(), json!(500.0));
    assert!(notified.get() >= 1);
    assert!(!payment.dirty());
    assert!(!tax.dirty());
    assert!(!extra.disabled(), "predicates see values written by behaviors");
}

// ============================================================================
// Scenario B: stop_on_first_error
// ============================================================================

#[test]
fn stop_on_first_error_pins_the_first_failure() {
    let build = |stop: bool| {
        create_form(
            FormConfig::from_json(&json!({ "name": { "value": "" } }))
                .unwrap()
                .validation(move |p| {
                    required(&path!(p.name));
                    min_length(&path!(p.name), 2);
                    stop_on_first_error(&path!(p.name), stop);
                }),
        )
        .unwrap()
    };

    let stopping = build(true);
    assert_eq!(block_on(stopping.validate()), Ok(false));
    assert_eq!(codes(&stopping, "name"), ["required"]);

    let independent = build(false);
    block_on(independent.validate()).unwrap();
    assert_eq!(codes(&independent, "name"), ["required", "too_short"]);
}

#[test]
fn form_wide_stop_default_is_overridable() {
    let form = create_form(
        FormConfig::from_json(&json!({ "a": { "value": "" }, "b": { "value": "" } }))
            .unwrap()
            .validation(|p| {
                required(&path!(p.a));
                min_length(&path!(p.a), 2);
                required(&path!(p.b));
                min_length(&path!(p.b), 2);
                stop_on_first_error(&path!(p.b), false);
            })
            .options(FormOptions::new().stop_on_first_error(true)),
    )
    .unwrap();
    block_on(form.validate()).unwrap();
    assert_eq!(codes(&form, "a"), ["required"]);
    assert_eq!(codes(&form, "b"), ["required", "too_short"]);
}

// ============================================================================
// Scenario C: conditional validation
// ============================================================================

#[test]
fn mortgage_requires_property_value() {
    let form = create_form(
        FormConfig::from_json(&json!({
            "loanType": { "value": "consumer" },
            "propertyValue": { "value": null },
        }))
        .unwrap()
        .validation(|p| {
            apply_when(&path!(p.loanType), |t| t == "mortgage", |p| {
                required(&path!(p.propertyValue)).message("Property value is required for mortgages");
            });
        }),
    )
    .unwrap();

    assert_eq!(block_on(form.validate()), Ok(true));

    form.field_node("loanType").unwrap().set_value(json!("mortgage"));
    assert_eq!(block_on(form.validate()), Ok(false));
    let errors = form.field("propertyValue").unwrap().errors();
    assert_eq!(errors[0].message, "Property value is required for mortgages");

    form.field_node("propertyValue").unwrap().set_value(json!(500000));
    assert!(form.field("propertyValue").unwrap().errors().is_empty());
    assert_eq!(block_on(form.validate()), Ok(true));
}

// ============================================================================
// Scenario D: debounced watcher
// ============================================================================

#[test]
fn debounced_watch_fires_once_with_last_value() {
    let clock = ManualClock::new();
    let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let form = create_form(
        FormConfig::from_json(&json!({ "query": { "value": "" } }))
            .unwrap()
            .behavior(move |p| {
                watch_field(
                    &path!(p.query),
                    move |value, _| log.borrow_mut().push(value.clone()),
                    WatchOptions::default().debounce(Duration::from_millis(300)),
                );
            })
            .options(FormOptions::new().clock(Clock::manual(&clock))),
    )
    .unwrap();
    let query = form.field_node("query").unwrap();

    query.set_value(json!("a"));
    clock.advance(Duration::from_millis(100));
    form.tick();
    query.set_value(json!("ab"));
    clock.advance(Duration::from_millis(100));
    form.tick();
    query.set_value(json!("abc"));

    clock.advance(Duration::from_millis(299));
    form.tick();
    assert!(seen.borrow().is_empty());

    clock.advance(Duration::from_millis(1));
    let report = form.tick();
    assert_eq!(report.timers_fired, 1);
    assert_eq!(*seen.borrow(), [json!("abc")]);

    clock.advance(Duration::from_secs(5));
    form.tick();
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn debounced_async_validator_runs_once_with_last_value() {
    let clock = ManualClock::new();
    let calls: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&calls);
    let form = create_form(
        FormConfig::from_json(&json!({ "login": { "value": "" } }))
            .unwrap()
            .validation(move |p| {
                validate_async(&path!(p.login), move |value, _| {
                    log.borrow_mut().push(value.clone());
                    async move { (value == "abc").then(|| ValidationError::new("taken", "Taken")) }
                })
                .debounce(Duration::from_millis(300));
            })
            .options(FormOptions::new().clock(Clock::manual(&clock))),
    )
    .unwrap();
    let login = form.field_node("login").unwrap();

    login.set_value(json!("a"));
    clock.advance(Duration::from_millis(100));
    form.tick();
    login.set_value(json!("ab"));
    clock.advance(Duration::from_millis(100));
    form.tick();
    login.set_value(json!("abc"));

    clock.advance(Duration::from_millis(299));
    form.tick();
    assert!(calls.borrow().is_empty());

    clock.advance(Duration::from_millis(1));
    form.tick();
    assert_eq!(*calls.borrow(), [json!("abc")]);
    assert_eq!(login.errors()[0].code, "taken");
    assert!(!login.pending());

    clock.advance(Duration::from_secs(5));
    form.tick();
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn immediate_watch_fires_exactly_once_at_bind() {
    let calls = Rc::new(RefCell::new(0u32));
    let counter = Rc::clone(&calls);
    let _form = create_form(
        FormConfig::from_json(&json!({ "query": { "value": "x" } }))
            .unwrap()
            .behavior(move |p| {
                watch_field(
                    &path!(p.query),
                    move |_, _| *counter.borrow_mut() += 1,
                    WatchOptions::default().immediate(),
                );
            }),
    )
    .unwrap();
    assert_eq!(*calls.borrow(), 1);
}

// ============================================================================
// Scenario E: cross-field tree validator
// ============================================================================

fn down_payment_rules(p: &formtree_core::FieldPath) {
    required(&path!(p.initialPayment));
    validate_tree(|ctx| {
        let property = ctx.get_field("propertyValue")?.as_f64()?;
        let initial = ctx.get_field("initialPayment")?.as_f64()?;
        (initial > property).then(|| {
            ValidationError::new(
                "initial_payment_exceeds_property",
                "Initial payment cannot exceed {max}",
            )
            .with_param("max", property)
        })
    })
    .target_field("initialPayment");
}

#[test]
fn tree_validator_appends_after_a_clean_field_pass() {
    let form = create_form(
        FormConfig::from_json(&json!({
            "propertyValue": { "value": 500000 },
            "initialPayment": { "value": 600000 },
        }))
        .unwrap()
        .validation(down_payment_rules),
    )
    .unwrap();
    let initial = form.field_node("initialPayment").unwrap();

    assert_eq!(block_on(form.validate()), Ok(false));
    let errors = initial.errors();
    assert_eq!(errors.len(), 1, "required passed, so only the tree error is present");
    assert_eq!(errors[0].code, "initial_payment_exceeds_property");
    assert_eq!(errors[0].origin, ErrorOrigin::Tree);
    assert_eq!(errors[0].format_message(), "Initial payment cannot exceed 500000");

    initial.set_value(json!(100000));
    assert_eq!(block_on(form.validate()), Ok(true));
    assert!(initial.errors().is_empty());

    initial.set_value(Value::Null);
    assert_eq!(block_on(form.validate()), Ok(false));
    assert_eq!(codes(&form, "initialPayment"), ["required"]);
}

#[test]
fn tree_error_is_appended_after_external_errors() {
    let form = create_form(
        FormConfig::from_json(&json!({
            "propertyValue": { "value": 500000 },
            "initialPayment": { "value": 600000 },
        }))
        .unwrap()
        .validation(down_payment_rules),
    )
    .unwrap();
    let initial = form.field_node("initialPayment").unwrap();
    initial.append_error(ValidationError::external("bank", "Rejected by the bank"));

    block_on(form.validate()).unwrap();
    assert_eq!(codes(&form, "initialPayment"), ["bank", "initial_payment_exceeds_property"]);

    initial.set_value(json!(250000));
    block_on(form.validate()).unwrap();
    assert_eq!(codes(&form, "initialPayment"), ["bank"]);
}
