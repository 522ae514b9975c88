#![forbid(unsafe_code)]

//! Validation error values.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error Codes
// ---------------------------------------------------------------------------

pub const ERROR_CODE_REQUIRED: &str = "required";
pub const ERROR_CODE_MIN_LENGTH: &str = "too_short";
pub const ERROR_CODE_MAX_LENGTH: &str = "too_long";
pub const ERROR_CODE_MIN: &str = "min";
pub const ERROR_CODE_MAX: &str = "max";
pub const ERROR_CODE_PATTERN: &str = "pattern";
pub const ERROR_CODE_EMAIL: &str = "email";
pub const ERROR_CODE_PHONE: &str = "phone";
pub const ERROR_CODE_URL: &str = "url";
pub const ERROR_CODE_NUMBER: &str = "number";
pub const ERROR_CODE_NOT_EMPTY: &str = "not_empty";
/// Configuration problems surfaced under [`ErrorPolicy::Convert`](crate::ErrorPolicy::Convert).
pub const ERROR_CODE_CONFIG: &str = "config";

// ---------------------------------------------------------------------------
// Severity / ErrorOrigin
// ---------------------------------------------------------------------------

/// Whether an error blocks validity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Error,
    /// Shown to the user but ignored by `valid`.
    Warning,
}

/// Who put an error on a node.
///
/// Re-validation replaces errors it produced itself and leaves the rest
/// alone, so errors set by application code (a server rejecting a username,
/// say) survive until cleared explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    /// Produced by a field-level validator.
    #[default]
    Field,
    /// Produced by a cross-field (tree) validator.
    Tree,
    /// A wiring problem converted under `ErrorPolicy::Convert`.
    Config,
    /// Set by application code.
    External,
}

impl ErrorOrigin {
    /// Errors that a validation pass owns and may replace.
    #[must_use]
    pub fn is_validation(self) -> bool {
        matches!(self, Self::Field | Self::Tree)
    }
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// A validation error with code, message template and interpolation params.
///
/// `code` is a stable identifier for programmatic handling and translation.
/// `message` may contain `{key}` placeholders filled from `params`.
///
/// ```rust
/// use formtree_core::ValidationError;
///
/// let error = ValidationError::new("too_short", "Must be at least {min} characters")
///     .with_param("min", 8);
///
/// assert_eq!(error.format_message(), "Must be at least 8 characters");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub origin: ErrorOrigin,
}

impl ValidationError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            params: HashMap::new(),
            severity: Severity::Error,
            origin: ErrorOrigin::Field,
        }
    }

    /// An error set by application code rather than a validator.
    #[must_use]
    pub fn external(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message).with_origin(ErrorOrigin::External)
    }

    /// Add a parameter for `{key}` interpolation.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: ErrorOrigin) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Message with `{key}` placeholders substituted.
    #[must_use]
    pub fn format_message(&self) -> String {
        let mut result = self.message.clone();
        for (key, value) in &self.params {
            result = result.replace(&format!("{{{key}}}"), value);
        }
        result
    }

    #[must_use]
    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }

    /// Whether this error makes its node invalid.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_message())
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_params() {
        let err = ValidationError::new(ERROR_CODE_MIN_LENGTH, "Need {min}, got {actual}")
            .with_param("min", 3)
            .with_param("actual", 1);
        assert_eq!(err.to_string(), "Need 3, got 1");
        assert_eq!(err.message, "Need {min}, got {actual}");
    }

    #[test]
    fn defaults_are_blocking_field_errors() {
        let err = ValidationError::new("x", "y");
        assert!(err.is_blocking());
        assert_eq!(err.origin, ErrorOrigin::Field);
        assert!(err.origin.is_validation());

        let ext = ValidationError::external("taken", "Username taken");
        assert_eq!(ext.origin, ErrorOrigin::External);
        assert!(!ext.origin.is_validation());
    }

    #[test]
    fn warnings_do_not_block() {
        let warn = ValidationError::new("weak", "Weak password").with_severity(Severity::Warning);
        assert!(warn.is_warning());
        assert!(!warn.is_blocking());
    }

    #[test]
    fn serializes_compactly() {
        let err = ValidationError::new("required", "Required");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "code": "required",
                "message": "Required",
                "severity": "error",
                "origin": "field"
            })
        );
        let back: ValidationError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
