//! Validation scheduling.
//!
//! Every value write opens a new [`Epoch`] on the field. Synchronous results
//! are applied under the same lock as the write. Asynchronous ones come back
//! later through a [`ValidationTask`], and [`resolve`] decides whether they may
//! still touch the field. Outstanding validator futures are never cancelled;
//! a superseded result is computed and then dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture};
use serde_json::{Map, Value};

use crate::arena::{Epoch, FieldHandle};
use crate::error::ValidatorFault;
use crate::manager::ManagerInner;
use crate::validate::{
    FormErrors, FormValidation, FormValidationFuture, SharedFormValidator, SharedValidator,
    Validation, ValidationFuture,
};

/// Invoke a field's validator, if it has one.
pub(crate) fn dispatch(
    validator: Option<&SharedValidator>,
    value: &Value,
) -> Result<Validation, ValidatorFault> {
    match validator {
        Some(validator) => validator.validate(value),
        None => Ok(Validation::Valid),
    }
}

/// Invoke the form-level validator, if there is one.
pub(crate) fn dispatch_form(
    validator: Option<&SharedFormValidator>,
    values: &Map<String, Value>,
) -> Result<Option<FormValidation>, ValidatorFault> {
    validator.map(|validator| validator.validate(values)).transpose()
}

/// Decision taken when an asynchronous result comes back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The field is still at the issuing epoch; apply the result.
    Apply,
    /// A newer write superseded the validation; drop the result.
    Stale,
    /// The field was unregistered in the meantime.
    Gone,
}

/// Pure continuation rule: `current` is the field's epoch now (`None` when the
/// field is gone), `issued` the epoch the validation was started under.
pub fn resolve(current: Option<Epoch>, issued: Epoch) -> Resolution {
    match current {
        None => Resolution::Gone,
        Some(current) if current == issued => Resolution::Apply,
        Some(_) => Resolution::Stale,
    }
}

/// What happened to an asynchronous validation result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// Result written to the field's meta and observers notified.
    Applied,
    /// Superseded by a newer value; meta untouched, nobody notified.
    Stale,
    /// Field or manager no longer exists.
    Unregistered,
}

#[derive(Clone, Debug)]
enum Scope {
    Field(FieldHandle),
    Form,
}

/// An in-flight asynchronous validation, tagged with its issuing epoch.
///
/// Drive it on whatever executor the host uses. Completion applies the result
/// through the manager, which is held weakly. A field task is tagged with the
/// field's epoch, a form task with the form-level epoch.
#[must_use = "an async validation only settles when the task is polled"]
pub struct ValidationTask {
    scope: Scope,
    epoch: Epoch,
    future: BoxFuture<'static, Settlement>,
}

impl ValidationTask {
    pub(crate) fn field(
        manager: Weak<ManagerInner>,
        handle: FieldHandle,
        epoch: Epoch,
        validation: ValidationFuture,
    ) -> Self {
        let target = handle.clone();
        let future = Box::pin(async move {
            let error = validation.await.err();
            match manager.upgrade() {
                Some(inner) => inner.settle(&target, epoch, error),
                None => Settlement::Unregistered,
            }
        });
        Self {
            scope: Scope::Field(handle),
            epoch,
            future,
        }
    }

    pub(crate) fn form(
        manager: Weak<ManagerInner>,
        epoch: Epoch,
        validation: FormValidationFuture,
    ) -> Self {
        let future = Box::pin(async move {
            let errors: FormErrors = validation.await;
            match manager.upgrade() {
                Some(inner) => inner.settle_form(epoch, errors),
                None => Settlement::Unregistered,
            }
        });
        Self {
            scope: Scope::Form,
            epoch,
            future,
        }
    }

    /// Drive `other` alongside this task. The joined task keeps this task's
    /// scope, epoch and settlement.
    pub(crate) fn join(self, other: ValidationTask) -> Self {
        let Self {
            scope,
            epoch,
            future: own,
        } = self;
        Self {
            scope,
            epoch,
            future: Box::pin(async move { future::join(own, other.future).await.0 }),
        }
    }

    /// Field the validation belongs to; `None` for the form-level validator.
    pub fn handle(&self) -> Option<&FieldHandle> {
        match &self.scope {
            Scope::Field(handle) => Some(handle),
            Scope::Form => None,
        }
    }

    /// Whether this is a form-level validation.
    pub fn is_form(&self) -> bool {
        matches!(self.scope, Scope::Form)
    }

    /// Epoch the validation was issued under.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }
}

impl Future for ValidationTask {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Settlement> {
        self.future.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for ValidationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationTask")
            .field("scope", &self.scope)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
