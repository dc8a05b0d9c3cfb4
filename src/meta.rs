use serde::Serialize;
use serde_json::Value;

use crate::arena::InternalId;
use crate::keys::Keys;

/// The non-value status bundle of a field.
///
/// Serializes to exactly `{error, valid, invalid, validating, active, touched,
/// visited}`. `invalid` is always `!valid`; the two are only ever written
/// together when a validation result is recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldMeta {
    error: Option<String>,
    valid: bool,
    invalid: bool,
    validating: bool,
    active: bool,
    touched: bool,
    visited: bool,
}

impl FieldMeta {
    /// Meta of a freshly registered field.
    pub fn initial() -> Self {
        Self {
            error: None,
            valid: true,
            invalid: false,
            validating: false,
            active: false,
            touched: false,
            visited: false,
        }
    }

    /// Current validation error, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Last validation passed.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Always `!valid()`.
    pub fn invalid(&self) -> bool {
        self.invalid
    }

    /// An asynchronous validation is outstanding.
    pub fn validating(&self) -> bool {
        self.validating
    }

    /// The field currently has focus.
    pub fn active(&self) -> bool {
        self.active
    }

    /// The field has been blurred at least once.
    pub fn touched(&self) -> bool {
        self.touched
    }

    /// The field has been focused at least once.
    pub fn visited(&self) -> bool {
        self.visited
    }

    /// Record a finished validation and clear `validating`.
    pub(crate) fn set_result(&mut self, error: Option<String>) {
        self.set_error(error);
        self.validating = false;
    }

    /// Replace the error and its `valid`/`invalid` pair; `validating` is kept.
    pub(crate) fn set_error(&mut self, error: Option<String>) {
        self.valid = error.is_none();
        self.invalid = !self.valid;
        self.error = error;
    }

    /// Back to initial validity. `touched` and `visited` never revert, and
    /// `active` follows the widget, so all three are kept.
    pub(crate) fn reset_validity(&mut self) {
        self.set_result(None);
    }

    pub(crate) fn set_validating(&mut self) {
        self.validating = true;
    }

    pub(crate) fn focus(&mut self) {
        self.active = true;
        self.visited = true;
    }

    pub(crate) fn blur(&mut self) {
        self.active = false;
        self.touched = true;
    }

    /// Keys whose value differs between `self` and `next`.
    pub(crate) fn diff(&self, next: &FieldMeta) -> Keys {
        let mut changed = Keys::empty();
        changed.set(Keys::ERROR, self.error != next.error);
        changed.set(Keys::VALID, self.valid != next.valid);
        changed.set(Keys::INVALID, self.invalid != next.invalid);
        changed.set(Keys::VALIDATING, self.validating != next.validating);
        changed.set(Keys::ACTIVE, self.active != next.active);
        changed.set(Keys::TOUCHED, self.touched != next.touched);
        changed.set(Keys::VISITED, self.visited != next.visited);
        changed
    }
}

impl Default for FieldMeta {
    fn default() -> Self {
        Self::initial()
    }
}

/// A consistent read of one field: identity, value and meta.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldState {
    /// Field name.
    pub name: String,
    /// Registration id.
    pub internal_id: InternalId,
    /// Current value.
    pub value: Value,
    /// Value the field was registered with.
    pub initial_value: Value,
    /// Validity and interaction flags.
    pub meta: FieldMeta,
}

impl FieldState {
    /// Value still equals the value captured at registration.
    pub fn is_pristine(&self) -> bool {
        self.value == self.initial_value
    }

    /// Value differs from the initial value.
    pub fn is_dirty(&self) -> bool {
        !self.is_pristine()
    }
}
