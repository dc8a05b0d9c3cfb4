//! Validators and how they are composed.
//!
//! A validator answers synchronously ([`Validation::Valid`] /
//! [`Validation::Invalid`]) or hands back a future ([`Validation::Pending`]).
//! How the answer is raced against later changes is the scheduler's business,
//! not the validator's.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::error::ValidatorFault;

/// Future of an asynchronous validation. `Ok` resolves valid, `Err` carries
/// the error.
pub type ValidationFuture = BoxFuture<'static, Result<(), String>>;

/// Outcome of invoking a validator.
pub enum Validation {
    /// The value is valid.
    Valid,
    /// The value is invalid, with the error to show.
    Invalid(String),
    /// The answer comes from a future.
    Pending(ValidationFuture),
}

impl Validation {
    /// `None` is valid, `Some(error)` is invalid.
    pub fn from_error(error: Option<String>) -> Self {
        match error {
            None => Validation::Valid,
            Some(error) => Validation::Invalid(error),
        }
    }

    /// Wrap an asynchronous check.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        Validation::Pending(Box::pin(future))
    }

    /// Whether the answer is still to come.
    pub fn is_pending(&self) -> bool {
        matches!(self, Validation::Pending(_))
    }
}

impl std::fmt::Debug for Validation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Validation::Valid => f.write_str("Valid"),
            Validation::Invalid(error) => f.debug_tuple("Invalid").field(error).finish(),
            Validation::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Something that can validate a field value.
///
/// Closures `Fn(&Value) -> Validation` implement this directly. Closures that
/// can fault go through [`fallible`].
pub trait Validator: Send + Sync {
    /// Check `value`. An `Err` is a defect in the validator, not a
    /// validation error.
    fn validate(&self, value: &Value) -> Result<Validation, ValidatorFault>;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Validation + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<Validation, ValidatorFault> {
        Ok(self(value))
    }
}

/// Shared, type-erased validator.
pub type SharedValidator = Arc<dyn Validator>;

/// Adapter for validators that may fault.
pub struct Fallible<F>(F);

/// Use a closure returning `Result<Validation, ValidatorFault>` as a validator.
pub fn fallible<F>(f: F) -> Fallible<F>
where
    F: Fn(&Value) -> Result<Validation, ValidatorFault> + Send + Sync,
{
    Fallible(f)
}

impl<F> Validator for Fallible<F>
where
    F: Fn(&Value) -> Result<Validation, ValidatorFault> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<Validation, ValidatorFault> {
        (self.0)(value)
    }
}

/// Validators run in order; the first error wins.
#[derive(Clone)]
pub struct Composed {
    validators: Arc<[SharedValidator]>,
}

/// Compose a list of validators into one.
pub fn compose(validators: impl IntoIterator<Item = SharedValidator>) -> Composed {
    Composed {
        validators: validators.into_iter().collect(),
    }
}

impl Composed {
    /// Number of composed validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// No validators composed; always valid.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Run every validator against every subject, subject-major.
    ///
    /// Synchronous steps run inline. The first pending step turns the rest of
    /// the chain into one future that resumes after it.
    fn run(&self, subjects: Vec<Value>) -> Result<Validation, ValidatorFault> {
        let width = self.validators.len();
        let total = subjects.len() * width;

        for step in 0..total {
            let (subject, validator) = (step / width, step % width);
            let outcome = self.validators[validator].validate(&subjects[subject])?;
            match outcome {
                Validation::Valid => {}
                invalid @ Validation::Invalid(_) => return Ok(invalid),
                Validation::Pending(first) => {
                    let validators = Arc::clone(&self.validators);
                    return Ok(Validation::pending(async move {
                        first.await?;
                        for step in step + 1..total {
                            let (subject, validator) = (step / width, step % width);
                            match validators[validator].validate(&subjects[subject]) {
                                Ok(Validation::Valid) => {}
                                Ok(Validation::Invalid(error)) => return Err(error),
                                Ok(Validation::Pending(next)) => next.await?,
                                Err(fault) => {
                                    // Too late to fail the change; surface it as the field error.
                                    tracing::error!(%fault, "validator faulted inside an async chain");
                                    return Err(fault.message().to_owned());
                                }
                            }
                        }
                        Ok(())
                    }));
                }
            }
        }

        Ok(Validation::Valid)
    }
}

impl Validator for Composed {
    fn validate(&self, value: &Value) -> Result<Validation, ValidatorFault> {
        self.run(vec![value.clone()])
    }
}

/// How an [`ArrayValidator`] applies its validators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArrayMode {
    /// Validate the collection as a whole. An empty array counts as absent.
    #[default]
    Whole,
    /// Validate each element in order.
    Each,
}

/// Validator list for array-typed fields.
///
/// Follows the same sync/async contract as scalar validators. Values that are
/// not arrays are valid.
#[derive(Clone)]
pub struct ArrayValidator {
    inner: Composed,
    mode: ArrayMode,
}

impl ArrayValidator {
    /// Compose `validators` and apply them per `mode`.
    pub fn new(validators: impl IntoIterator<Item = SharedValidator>, mode: ArrayMode) -> Self {
        Self {
            inner: compose(validators),
            mode,
        }
    }

    /// How the validators are applied.
    pub fn mode(&self) -> ArrayMode {
        self.mode
    }
}

impl Validator for ArrayValidator {
    fn validate(&self, value: &Value) -> Result<Validation, ValidatorFault> {
        let Value::Array(items) = value else {
            return Ok(Validation::Valid);
        };
        match self.mode {
            ArrayMode::Whole if items.is_empty() => self.inner.run(vec![Value::Null]),
            ArrayMode::Whole => self.inner.run(vec![value.clone()]),
            ArrayMode::Each => self.inner.run(items.clone()),
        }
    }
}

/// Errors of a form-level validation, by field name. Empty means valid.
pub type FormErrors = BTreeMap<String, String>;

/// Future of an asynchronous form-level validation.
pub type FormValidationFuture = BoxFuture<'static, FormErrors>;

/// Outcome of invoking a form-level validator.
pub enum FormValidation {
    /// Errors known now.
    Ready(FormErrors),
    /// Errors come from a future.
    Pending(FormValidationFuture),
}

impl FormValidation {
    /// Wrap an asynchronous check.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = FormErrors> + Send + 'static,
    {
        FormValidation::Pending(Box::pin(future))
    }
}

impl std::fmt::Debug for FormValidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormValidation::Ready(errors) => f.debug_tuple("Ready").field(errors).finish(),
            FormValidation::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Validator over every value of the form at once.
///
/// It sees the newest registration of each name and answers with errors
/// keyed by field name. A field's own validator error wins over the form's.
pub trait FormValidator: Send + Sync {
    /// Check `values`. An `Err` is a defect in the validator.
    fn validate(&self, values: &Map<String, Value>) -> Result<FormValidation, ValidatorFault>;
}

impl<F> FormValidator for F
where
    F: Fn(&Map<String, Value>) -> FormValidation + Send + Sync,
{
    fn validate(&self, values: &Map<String, Value>) -> Result<FormValidation, ValidatorFault> {
        Ok(self(values))
    }
}

/// Shared, type-erased form-level validator.
pub type SharedFormValidator = Arc<dyn FormValidator>;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn required() -> SharedValidator {
        Arc::new(|value: &Value| match value {
            Value::Null => Validation::Invalid("required".into()),
            Value::String(s) if s.is_empty() => Validation::Invalid("required".into()),
            _ => Validation::Valid,
        })
    }

    fn not_foo() -> SharedValidator {
        Arc::new(|value: &Value| {
            Validation::from_error((value == "foo").then(|| "error".to_owned()))
        })
    }

    fn async_not_foo() -> SharedValidator {
        Arc::new(|value: &Value| {
            let bad = value == "foo";
            Validation::pending(async move { if bad { Err("async error".into()) } else { Ok(()) } })
        })
    }

    fn unwrap_invalid(validation: Validation) -> String {
        match validation {
            Validation::Invalid(error) => error,
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn first_error_wins() {
        let composed = compose([required(), not_foo()]);
        assert_eq!(unwrap_invalid(composed.validate(&json!("")).unwrap()), "required");
        assert_eq!(unwrap_invalid(composed.validate(&json!("foo")).unwrap()), "error");
        assert!(matches!(composed.validate(&json!("bar")).unwrap(), Validation::Valid));
    }

    #[test]
    fn pending_step_defers_the_rest_of_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let counting: SharedValidator = Arc::new(move |_: &Value| {
            calls_clone.fetch_add(1, Ordering::Relaxed);
            Validation::Invalid("late".into())
        });

        let composed = compose([async_not_foo(), counting]);
        let Validation::Pending(future) = composed.validate(&json!("bar")).unwrap() else {
            panic!("expected a pending validation");
        };
        // Nothing after the async step has run yet.
        assert_eq!(calls.load(Ordering::Relaxed), 0);

        assert_eq!(block_on(future), Err("late".into()));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn async_error_short_circuits() {
        let composed = compose([async_not_foo(), not_foo()]);
        let Validation::Pending(future) = composed.validate(&json!("foo")).unwrap() else {
            panic!("expected a pending validation");
        };
        assert_eq!(block_on(future), Err("async error".into()));
    }

    #[test]
    fn fault_propagates_from_sync_step() {
        let faulty: SharedValidator =
            Arc::new(fallible(|_: &Value| Err(ValidatorFault::new("boom"))));
        let composed = compose([required(), faulty]);
        let fault = composed.validate(&json!("x")).unwrap_err();
        assert_eq!(fault.message(), "boom");
    }

    #[test]
    fn array_whole_treats_empty_as_absent() {
        let validator = ArrayValidator::new([required()], ArrayMode::Whole);
        assert_eq!(unwrap_invalid(validator.validate(&json!([])).unwrap()), "required");
        assert!(matches!(validator.validate(&json!([1])).unwrap(), Validation::Valid));
        assert!(matches!(validator.validate(&json!("scalar")).unwrap(), Validation::Valid));
    }

    #[test]
    fn array_each_checks_every_element() {
        let validator = ArrayValidator::new([not_foo()], ArrayMode::Each);
        assert!(matches!(
            validator.validate(&json!(["a", "b"])).unwrap(),
            Validation::Valid
        ));
        assert_eq!(
            unwrap_invalid(validator.validate(&json!(["a", "foo", "b"])).unwrap()),
            "error"
        );
    }

    #[test]
    fn array_each_with_async_elements() {
        let validator = ArrayValidator::new([async_not_foo()], ArrayMode::Each);
        let Validation::Pending(future) = validator.validate(&json!(["ok", "foo"])).unwrap() else {
            panic!("expected a pending validation");
        };
        assert_eq!(block_on(future), Err("async error".into()));
    }
}
