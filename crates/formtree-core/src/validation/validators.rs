#![forbid(unsafe_code)]

//! Built-in validators over JSON field values.
//!
//! Each validator looks at one value and returns `None` when it passes.
//! Only [`Required`] and the length checks treat an empty value as a
//! failure; every other validator skips empty input so that "optional but
//! well-formed" fields compose as `email(&p)` without `required(&p)`.

use regex::Regex;
use serde_json::Value;
use unicode_segmentation::UnicodeSegmentation;

use super::error::{
    ERROR_CODE_EMAIL, ERROR_CODE_MAX, ERROR_CODE_MAX_LENGTH, ERROR_CODE_MIN,
    ERROR_CODE_MIN_LENGTH, ERROR_CODE_NOT_EMPTY, ERROR_CODE_NUMBER, ERROR_CODE_PATTERN,
    ERROR_CODE_PHONE, ERROR_CODE_REQUIRED, ERROR_CODE_URL, ValidationError,
};

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// `null`, a blank string or an empty array.
///
/// `false` and `0` are values, not absence.
#[must_use]
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Length in user-perceived characters for strings, item count for arrays.
#[must_use]
pub fn value_length(value: &Value) -> Option<usize> {
    match value {
        Value::Null => Some(0),
        Value::String(s) => Some(s.graphemes(true).count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

/// Numeric reading of a value; numeric strings count.
#[must_use]
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Validator trait
// ---------------------------------------------------------------------------

/// A reusable single-value check.
///
/// Register any implementation with
/// [`validate_with`](crate::validation::validate_with).
///
/// ```rust
/// use formtree_core::validation::Validator;
/// use formtree_core::ValidationError;
/// use serde_json::Value;
///
/// struct NoSpaces;
///
/// impl Validator for NoSpaces {
///     fn validate(&self, value: &Value) -> Option<ValidationError> {
///         let text = value.as_str()?;
///         text.contains(' ')
///             .then(|| ValidationError::new("no_spaces", self.error_message()))
///     }
///
///     fn error_message(&self) -> &str {
///         "Value must not contain spaces"
///     }
/// }
/// ```
pub trait Validator {
    fn validate(&self, value: &Value) -> Option<ValidationError>;

    /// Default message template.
    fn error_message(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Required
// ---------------------------------------------------------------------------

/// Fails on `null`, blank strings and empty arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct Required {
    /// Accept whitespace-only strings.
    pub allow_whitespace: bool,
}

impl Required {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn allow_whitespace(mut self) -> Self {
        self.allow_whitespace = true;
        self
    }
}

impl Validator for Required {
    fn validate(&self, value: &Value) -> Option<ValidationError> {
        let empty = match value {
            Value::String(s) if self.allow_whitespace => s.is_empty(),
            other => is_empty_value(other),
        };
        empty.then(|| ValidationError::new(ERROR_CODE_REQUIRED, self.error_message()))
    }

    fn error_message(&self) -> &str {
        "This field is required"
    }
}

// ---------------------------------------------------------------------------
// Length
// ---------------------------------------------------------------------------

/// At least `min` characters (or items). Empty strings fail.
#[derive(Debug, Clone, Copy)]
pub struct MinLength {
    pub min: usize,
}

impl MinLength {
    #[must_use]
    pub fn new(min: usize) -> Self {
        Self { min }
    }
}

impl Validator for MinLength {
    fn validate(&self, value: &Value) -> Option<ValidationError> {
        let len = value_length(value)?;
        (len < self.min).then(|| {
            ValidationError::new(ERROR_CODE_MIN_LENGTH, self.error_message())
                .with_param("min", self.min)
                .with_param("actual", len)
        })
    }

    fn error_message(&self) -> &str {
        "Must be at least {min} characters"
    }
}

/// At most `max` characters (or items).
#[derive(Debug, Clone, Copy)]
pub struct MaxLength {
    pub max: usize,
}

impl MaxLength {
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self { max }
    }
}

impl Validator for MaxLength {
    fn validate(&self, value: &Value) -> Option<ValidationError> {
        let len = value_length(value)?;
        (len > self.max).then(|| {
            ValidationError::new(ERROR_CODE_MAX_LENGTH, self.error_message())
                .with_param("max", self.max)
                .with_param("actual", len)
        })
    }

    fn error_message(&self) -> &str {
        "Must be at most {max} characters"
    }
}

// ---------------------------------------------------------------------------
// Numeric bounds
// ---------------------------------------------------------------------------

/// Numeric lower bound (inclusive). Non-numeric input is left to [`Number`].
#[derive(Debug, Clone, Copy)]
pub struct Min {
    pub min: f64,
}

impl Min {
    #[must_use]
    pub fn new(min: f64) -> Self {
        Self { min }
    }
}

impl Validator for Min {
    fn validate(&self, value: &Value) -> Option<ValidationError> {
        if is_empty_value(value) {
            return None;
        }
        let n = value_as_f64(value)?;
        (n < self.min).then(|| {
            ValidationError::new(ERROR_CODE_MIN, self.error_message())
                .with_param("min", self.min)
                .with_param("actual", n)
        })
    }

    fn error_message(&self) -> &str {
        "Must be at least {min}"
    }
}

/// Numeric upper bound (inclusive).
#[derive(Debug, Clone, Copy)]
pub struct Max {
    pub max: f64,
}

impl Max {
    #[must_use]
    pub fn new(max: f64) -> Self {
        Self { max }
    }
}

impl Validator for Max {
    fn validate(&self, value: &Value) -> Option<ValidationError> {
        if is_empty_value(value) {
            return None;
        }
        let n = value_as_f64(value)?;
        (n > self.max).then(|| {
            ValidationError::new(ERROR_CODE_MAX, self.error_message())
                .with_param("max", self.max)
                .with_param("actual", n)
        })
    }

    fn error_message(&self) -> &str {
        "Must be at most {max}"
    }
}

/// Value must read as a finite number.
#[derive(Debug, Clone, Copy, Default)]
pub struct Number;

impl Validator for Number {
    fn validate(&self, value: &Value) -> Option<ValidationError> {
        if is_empty_value(value) || value_as_f64(value).is_some() {
            None
        } else {
            Some(ValidationError::new(ERROR_CODE_NUMBER, self.error_message()))
        }
    }

    fn error_message(&self) -> &str {
        "Must be a number"
    }
}

// ---------------------------------------------------------------------------
// Pattern
// ---------------------------------------------------------------------------

/// String must match a regular expression (unanchored unless the pattern
/// anchors itself).
#[derive(Debug, Clone)]
pub struct Pattern {
    pub regex: Regex,
    pub message: String,
}

impl Pattern {
    #[must_use]
    pub fn new(regex: Regex) -> Self {
        Self {
            regex,
            message: "Invalid format".to_string(),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl Validator for Pattern {
    fn validate(&self, value: &Value) -> Option<ValidationError> {
        if is_empty_value(value) {
            return None;
        }
        let matches = match value {
            Value::String(s) => self.regex.is_match(s),
            other => self.regex.is_match(&other.to_string()),
        };
        (!matches).then(|| {
            ValidationError::new(ERROR_CODE_PATTERN, &self.message)
                .with_param("pattern", self.regex.as_str())
        })
    }

    fn error_message(&self) -> &str {
        &self.message
    }
}

// ---------------------------------------------------------------------------
// Email / Phone / Url
// ---------------------------------------------------------------------------

/// Heuristic address check: `local@domain.tld`, non-empty labels, TLD of at
/// least two characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Email;

impl Email {
    fn accepts(text: &str) -> bool {
        let Some((local, domain)) = text.split_once('@') else {
            return false;
        };
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return false;
        }
        if text.chars().any(char::is_whitespace) || !domain.contains('.') {
            return false;
        }
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.iter().any(|label| label.is_empty()) {
            return false;
        }
        labels.last().is_some_and(|tld| tld.len() >= 2)
    }
}

impl Validator for Email {
    fn validate(&self, value: &Value) -> Option<ValidationError> {
        if is_empty_value(value) {
            return None;
        }
        let ok = value.as_str().is_some_and(|s| Self::accepts(s.trim()));
        (!ok).then(|| ValidationError::new(ERROR_CODE_EMAIL, self.error_message()))
    }

    fn error_message(&self) -> &str {
        "Invalid email address"
    }
}

/// Heuristic phone check: optional leading `+`, then 10 to 15 digits once
/// spaces, dashes, dots and parentheses are removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Phone;

impl Phone {
    fn accepts(text: &str) -> bool {
        let body = text.strip_prefix('+').unwrap_or(text);
        let mut digits = 0usize;
        for c in body.chars() {
            match c {
                '0'..='9' => digits += 1,
                ' ' | '-' | '.' | '(' | ')' => {}
                _ => return false,
            }
        }
        (10..=15).contains(&digits)
    }
}

impl Validator for Phone {
    fn validate(&self, value: &Value) -> Option<ValidationError> {
        if is_empty_value(value) {
            return None;
        }
        let ok = value.as_str().is_some_and(|s| Self::accepts(s.trim()));
        (!ok).then(|| ValidationError::new(ERROR_CODE_PHONE, self.error_message()))
    }

    fn error_message(&self) -> &str {
        "Invalid phone number"
    }
}

/// `http://` or `https://` followed by something.
#[derive(Debug, Clone, Copy, Default)]
pub struct Url {
    pub require_https: bool,
}

impl Url {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn require_https(mut self) -> Self {
        self.require_https = true;
        self
    }
}

impl Validator for Url {
    fn validate(&self, value: &Value) -> Option<ValidationError> {
        if is_empty_value(value) {
            return None;
        }
        let text = value.as_str().map(str::trim).unwrap_or_default();
        let https = text.len() > 8 && text.starts_with("https://");
        let http = text.len() > 7 && text.starts_with("http://");
        let ok = if self.require_https { https } else { https || http };
        (!ok).then(|| {
            let message = if self.require_https {
                "Invalid URL (must use HTTPS)"
            } else {
                self.error_message()
            };
            ValidationError::new(ERROR_CODE_URL, message)
        })
    }

    fn error_message(&self) -> &str {
        "Invalid URL"
    }
}

// ---------------------------------------------------------------------------
// NotEmpty
// ---------------------------------------------------------------------------

/// An array must hold at least one item.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotEmpty;

impl Validator for NotEmpty {
    fn validate(&self, value: &Value) -> Option<ValidationError> {
        let empty = match value {
            Value::Array(items) => items.is_empty(),
            Value::Null => true,
            _ => false,
        };
        empty.then(|| ValidationError::new(ERROR_CODE_NOT_EMPTY, self.error_message()))
    }

    fn error_message(&self) -> &str {
        "Add at least one item"
    }
}
