#![forbid(unsafe_code)]

//! Configuration and lookup errors, plus the policy that decides what to do
//! with them.
//!
//! Validation failures are *data* ([`ValidationError`](crate::ValidationError))
//! and never travel through this type. `FormError` is reserved for problems
//! with how a form was put together: malformed node configs, schema functions
//! that reference paths that do not exist, schema code that panicked.

use std::fmt;

/// Errors raised while building or addressing a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    /// A node configuration could not be interpreted.
    InvalidConfig { path: String, reason: String },
    /// A path names a node that does not exist.
    UnknownField { path: String },
    /// A path resolved to a container where a field was required.
    NotAField { path: String },
    /// A path string could not be parsed.
    InvalidPath { path: String },
    /// An array index is past the end of the array.
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },
    /// A value of the wrong JSON type was written to a container.
    TypeMismatch {
        path: String,
        expected: &'static str,
    },
    /// A key was added twice to the same group.
    DuplicateKey { path: String },
    /// A validator, behavior or schema function panicked.
    SchemaPanicked { message: String },
}

impl FormError {
    /// The path the error refers to, when there is one.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::InvalidConfig { path, .. }
            | Self::UnknownField { path }
            | Self::NotAField { path }
            | Self::InvalidPath { path }
            | Self::IndexOutOfBounds { path, .. }
            | Self::TypeMismatch { path, .. }
            | Self::DuplicateKey { path } => Some(path),
            Self::SchemaPanicked { .. } => None,
        }
    }
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { path, reason } => {
                write!(f, "invalid node config at `{path}`: {reason}")
            }
            Self::UnknownField { path } => write!(f, "no node at `{path}`"),
            Self::NotAField { path } => write!(f, "`{path}` is a container, not a field"),
            Self::InvalidPath { path } => write!(f, "malformed path `{path}`"),
            Self::IndexOutOfBounds { path, index, len } => {
                write!(f, "index {index} out of bounds for `{path}` (len {len})")
            }
            Self::TypeMismatch { path, expected } => {
                write!(f, "`{path}` expects {expected}")
            }
            Self::DuplicateKey { path } => write!(f, "`{path}` already exists"),
            Self::SchemaPanicked { message } => write!(f, "schema code panicked: {message}"),
        }
    }
}

impl std::error::Error for FormError {}

/// Convenience alias used throughout the crate.
pub type FormResult<T> = Result<T, FormError>;

// ---------------------------------------------------------------------------
// ErrorPolicy
// ---------------------------------------------------------------------------

/// What to do when schema or behavior wiring hits a [`FormError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Return the error to the caller.
    Throw,
    /// Log at `warn` and carry on without the offending registration.
    LogAndSkip,
    /// Turn the error into a `config` validation error on the form root.
    Convert,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Throw
        } else {
            Self::LogAndSkip
        }
    }
}

/// Render a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path() {
        let err = FormError::UnknownField {
            path: "address.zip".into(),
        };
        assert_eq!(err.to_string(), "no node at `address.zip`");
        assert_eq!(err.path(), Some("address.zip"));
    }

    #[test]
    fn panic_message_handles_both_payload_kinds() {
        let a: Box<dyn std::any::Any + Send> = Box::new("boom");
        let b: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        let c: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(a.as_ref()), "boom");
        assert_eq!(panic_message(b.as_ref()), "bang");
        assert_eq!(panic_message(c.as_ref()), "non-string panic payload");
    }

    #[test]
    fn default_policy_follows_build_profile() {
        let expected = if cfg!(debug_assertions) {
            ErrorPolicy::Throw
        } else {
            ErrorPolicy::LogAndSkip
        };
        assert_eq!(ErrorPolicy::default(), expected);
    }
}
