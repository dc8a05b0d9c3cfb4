#![deny(missing_docs)]

//! Field-level reactive form state.
//!
//! A [`FormManager`] owns the state of every registered field: its value, its
//! initial value and its meta flags (`valid`, `touched`, `validating`, ...).
//! Observers register a field, subscribe to the state keys they care about,
//! and are re-rendered only when one of those keys actually changes.
//!
//! # Quick Start
//!
//! ```ignore
//! use fieldwatch::{FieldDescriptor, FormManager, Keys, Validation};
//! use std::sync::Arc;
//!
//! let manager = FormManager::default();
//!
//! let name = manager.register_field(
//!     FieldDescriptor::new("name")
//!         .subscription(Keys::VALUES | Keys::ERROR)
//!         .validate(Arc::new(|value: &serde_json::Value| {
//!             Validation::from_error(value.is_null().then(|| "required".to_owned()))
//!         }))
//!         .render(|state, keys| println!("{} changed: {keys}", state.name)),
//! );
//!
//! manager.change(&name, "Ada")?;  // renders once with {values, error}
//! manager.blur("name");           // touched changed, but not subscribed: no render
//! ```
//!
//! # Core Types
//!
//! - [`FormManager`] - The form. Every mutation goes through it.
//! - [`FieldHandle`] - `(name, internal id)` pair identifying one registration.
//! - [`Keys`] / [`Subscription`] - Which state keys an observer re-renders on.
//! - [`ValidationTask`] - An in-flight asynchronous validation.
//! - [`FieldBinding`] - A mounted widget: registers on mount, unregisters on drop.
//! - [`Transaction`] - Coalesce several mutations into one render per observer.
//!
//! # Asynchronous validation
//!
//! A validator may return [`Validation::Pending`]. `change` then hands back a
//! [`ValidationTask`]; poll it on any executor. Each write opens a new epoch on
//! the field, and a result only lands if the field is still at the epoch it
//! was issued under, so the last write always wins.
//!
//! ```ignore
//! if let Some(task) = manager.change(&email, "ada@example.com")? {
//!     tokio::spawn(task);
//! }
//! ```
//!
//! # Form-level validation
//!
//! [`FormManager::with_validator`] adds a [`FormValidator`] that sees every
//! value at once and answers with errors keyed by field name. It runs after
//! each `change` through the same epoch check as field validators, against a
//! form-level epoch. A field's own error is shown in preference to the form's.
//!
//! # Batching
//!
//! ```ignore
//! Transaction::run(&manager, || {
//!     manager.change(&first, "Ada")?;
//!     manager.change(&last, "Lovelace")?;
//!     Ok::<_, FormError>(())
//! })?;
//! ```

// Internal modules
pub(crate) mod arena;
mod binding;
mod broker;
mod error;
mod hash;
mod input;
mod keys;
mod manager;
mod meta;
mod options;
mod scheduler;
mod transaction;
mod validate;

// Core types
pub use arena::{Epoch, FieldDescriptor, FieldHandle, InternalId, RenderFn};
pub use binding::{FieldBinding, FieldProps};
pub use keys::{Keys, Subscription};
pub use manager::{FormManager, WeakFormManager};
pub use meta::{FieldMeta, FieldState};
pub use options::FormOptions;
pub use transaction::Transaction;

// Validation
pub use scheduler::{Resolution, Settlement, ValidationTask, resolve};
pub use validate::{
    ArrayMode, ArrayValidator, Composed, Fallible, FormErrors, FormValidation,
    FormValidationFuture, FormValidator, SharedFormValidator, SharedValidator, Validation,
    ValidationFuture, Validator, compose, fallible,
};

// Input and errors
pub use error::{FormError, Result, ValidatorFault};
pub use input::{ChangeEvent, ChangeInput, EventTarget};
