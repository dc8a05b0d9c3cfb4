//! Error types for the form manager.
//!
//! Validation errors are data and live in `meta.error`. The variants here are
//! the few failures that reach a caller.

use thiserror::Error;

/// Result type for manager operations
pub type Result<T> = std::result::Result<T, FormError>;

/// Errors surfaced by manager operations
#[derive(Debug, Error)]
pub enum FormError {
    /// A validator faulted while `change` ran. The field was left untouched.
    #[error("validator for field '{name}' faulted: {source}")]
    Validator {
        /// Field whose validator faulted.
        name: String,
        /// The fault itself.
        #[source]
        source: ValidatorFault,
    },

    /// The form-level validator faulted while `change` or `validate_form`
    /// ran. No field was touched.
    #[error("form validator faulted: {source}")]
    FormValidator {
        /// The fault itself.
        #[source]
        source: ValidatorFault,
    },

    /// Form options could not be parsed
    #[error("invalid form options: {0}")]
    Options(#[from] serde_json::Error),
}

/// A defect inside a caller-supplied validator, as opposed to a validation
/// error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidatorFault {
    message: String,
}

impl ValidatorFault {
    /// Fault with a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The fault message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_error_names_the_field() {
        let err = FormError::Validator {
            name: "email".into(),
            source: ValidatorFault::new("regex failed to compile"),
        };
        assert_eq!(
            err.to_string(),
            "validator for field 'email' faulted: regex failed to compile"
        );

        let err = FormError::FormValidator {
            source: ValidatorFault::new("schema missing"),
        };
        assert_eq!(err.to_string(), "form validator faulted: schema missing");
    }

    #[test]
    fn options_error_wraps_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = FormError::from(json_err);
        assert!(err.to_string().starts_with("invalid form options"));
    }
}
