//! The manager facade: the only way field state is mutated.
//!
//! Every operation follows the same shape: resolve the input, mutate the
//! arena under its write lock, diff the meta to get the changed keys, ask the
//! broker who is affected, release the lock, deliver.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::arena::{Epoch, FieldArena, FieldDescriptor, FieldHandle, InternalId};
use crate::broker::{Deliveries, SubscriptionBroker};
use crate::error::{FormError, Result};
use crate::input::ChangeInput;
use crate::keys::Keys;
use crate::meta::{FieldMeta, FieldState};
use crate::options::FormOptions;
use crate::scheduler::{self, Resolution, Settlement, ValidationTask};
use crate::transaction::{Transaction, TransactionDepth};
use crate::validate::{FormErrors, FormValidation, SharedFormValidator, Validation};

/// State of one form instance, shared by the facade and its validation tasks.
pub(crate) struct ManagerInner {
    arena: RwLock<FieldArena>,
    options: FormOptions,
    form_validator: Option<SharedFormValidator>,
    broker: SubscriptionBroker,
    pub(crate) depth: TransactionDepth,
}

impl ManagerInner {
    fn publish(&self, deliveries: Deliveries) {
        self.broker.queue(deliveries);
        if !self.depth.is_active() {
            self.flush();
        }
    }

    pub(crate) fn flush(&self) {
        if self.broker.has_pending() {
            self.broker.flush(&self.arena);
        }
    }

    /// Apply an asynchronous validation result issued under `epoch`.
    pub(crate) fn settle(
        &self,
        handle: &FieldHandle,
        epoch: Epoch,
        error: Option<String>,
    ) -> Settlement {
        let deliveries = {
            let mut arena = self.arena.write();
            let current = arena.get(handle).map(|field| field.epoch);
            match scheduler::resolve(current, epoch) {
                Resolution::Gone => {
                    cov_mark::hit!(validation_settled_after_unregister);
                    trace!(name = handle.name(), internal_id = %handle.internal_id(), "validation settled for a removed field");
                    return Settlement::Unregistered;
                }
                Resolution::Stale => {
                    cov_mark::hit!(stale_validation_discarded);
                    trace!(
                        name = handle.name(),
                        issued = epoch.get(),
                        current = current.map(Epoch::get),
                        "discarding superseded validation result"
                    );
                    return Settlement::Stale;
                }
                Resolution::Apply => {}
            }

            let Some(field) = arena.get_mut(handle) else {
                return Settlement::Unregistered;
            };
            let before = field.meta.clone();
            field.set_field_result(error);
            let changed = before.diff(&field.meta);
            self.broker
                .compute_affected(&arena, Some(handle.internal_id()), changed)
        };
        self.publish(deliveries);
        Settlement::Applied
    }

    /// Apply an asynchronous form-level result issued under `epoch`.
    pub(crate) fn settle_form(&self, epoch: Epoch, errors: FormErrors) -> Settlement {
        let deliveries = {
            let mut arena = self.arena.write();
            if scheduler::resolve(Some(arena.form.epoch), epoch) != Resolution::Apply {
                cov_mark::hit!(stale_form_validation_discarded);
                trace!(
                    issued = epoch.get(),
                    current = arena.form.epoch.get(),
                    "discarding superseded form validation result"
                );
                return Settlement::Stale;
            }
            let changes = arena.apply_form_errors(errors);
            self.affected(&arena, changes)
        };
        self.publish(deliveries);
        Settlement::Applied
    }

    /// Issue a form-level validation on the arena being written.
    ///
    /// Returns the per-field changes of a synchronous answer, or the task of
    /// an asynchronous one.
    fn issue_form(
        self: &Arc<Self>,
        arena: &mut FieldArena,
        validation: FormValidation,
    ) -> (Vec<(InternalId, Keys)>, Option<ValidationTask>) {
        let epoch = arena.form.epoch.bump();
        match validation {
            FormValidation::Ready(errors) => (arena.apply_form_errors(errors), None),
            FormValidation::Pending(future) => {
                arena.form.validating = true;
                let task = ValidationTask::form(Arc::downgrade(self), epoch, future);
                (Vec::new(), Some(task))
            }
        }
    }

    fn affected(&self, arena: &FieldArena, changes: Vec<(InternalId, Keys)>) -> Deliveries {
        changes
            .into_iter()
            .flat_map(|(origin, changed)| self.broker.compute_affected(arena, Some(origin), changed))
            .collect()
    }

    /// Apply a meta transition to every live registration under `name`.
    fn update_named(&self, name: &str, transition: fn(&mut FieldMeta)) {
        let deliveries = {
            let mut arena = self.arena.write();
            let handles = arena.handles_named(name);
            if handles.is_empty() {
                debug!(name, "meta update for unknown field ignored");
                return;
            }

            let mut changes = Vec::with_capacity(handles.len());
            for handle in &handles {
                if let Some(field) = arena.get_mut(handle) {
                    let before = field.meta.clone();
                    transition(&mut field.meta);
                    changes.push((handle.internal_id(), before.diff(&field.meta)));
                }
            }
            self.affected(&arena, changes)
        };
        self.publish(deliveries);
    }
}

/// Field-level reactive state manager for one form.
///
/// Cloning is cheap and yields another handle to the same form.
///
/// # Example
/// ```ignore
/// let manager = FormManager::new(FormOptions::default());
/// let handle = manager.register_field(
///     FieldDescriptor::new("email")
///         .subscription(Keys::VALIDITY)
///         .render(|state, keys| println!("{} changed {keys}", state.name)),
/// );
///
/// manager.change(&handle, ChangeEvent::text("a@b.c"))?;
/// manager.blur("email");
/// manager.unregister_field(&handle);
/// ```
#[derive(Clone)]
pub struct FormManager {
    inner: Arc<ManagerInner>,
}

/// Non-owning reference to a [`FormManager`].
#[derive(Clone)]
pub struct WeakFormManager {
    inner: Weak<ManagerInner>,
}

impl WeakFormManager {
    /// The manager, if it is still alive.
    pub fn upgrade(&self) -> Option<FormManager> {
        self.inner.upgrade().map(|inner| FormManager { inner })
    }
}

impl Default for FormManager {
    fn default() -> Self {
        Self::new(FormOptions::default())
    }
}

impl FormManager {
    /// An empty form.
    pub fn new(options: FormOptions) -> Self {
        Self::build(options, None)
    }

    /// A form whose values are also checked as a whole by `validator`.
    ///
    /// The form validator runs after every `change` and on
    /// [`validate_form`](Self::validate_form). Its errors are keyed by field
    /// name and shown in `meta.error` unless the field's own validator
    /// reports one.
    pub fn with_validator(options: FormOptions, validator: SharedFormValidator) -> Self {
        Self::build(options, Some(validator))
    }

    fn build(options: FormOptions, form_validator: Option<SharedFormValidator>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                arena: RwLock::new(FieldArena::default()),
                broker: SubscriptionBroker::new(options.subscription),
                options,
                form_validator,
                depth: TransactionDepth::default(),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &ManagerInner {
        &self.inner
    }

    /// Reference that does not keep the form alive.
    pub fn downgrade(&self) -> WeakFormManager {
        WeakFormManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Manager-wide options (default subscription, clear-on-unmount policy).
    pub fn form_options(&self) -> &FormOptions {
        &self.inner.options
    }

    /// Register a field and return the handle its observer uses from now on.
    pub fn register_field(&self, descriptor: FieldDescriptor) -> FieldHandle {
        let mut arena = self.inner.arena.write();
        let handle = arena.insert(descriptor, self.inner.options.keep_value_on_remount);
        if let Some(field) = arena.get(&handle) {
            debug!(
                name = handle.name(),
                internal_id = %handle.internal_id(),
                value = %field.value,
                "registered field"
            );
        }
        handle
    }

    /// Remove a field. Unknown or already removed handles are ignored.
    pub fn unregister_field(&self, handle: &FieldHandle) {
        let removed = self
            .inner
            .arena
            .write()
            .remove(handle, self.inner.options.keep_value_on_remount);
        match removed {
            Some(_) => debug!(
                name = handle.name(),
                internal_id = %handle.internal_id(),
                "unregistered field"
            ),
            None => debug!(
                name = handle.name(),
                internal_id = %handle.internal_id(),
                "unregister of unknown field ignored"
            ),
        }
    }

    /// Write a new value and validate it.
    ///
    /// Synchronous validation results are applied and delivered before this
    /// returns. An asynchronous validator marks the field `validating` and
    /// hands back the task that will settle it. With a form-level validator,
    /// the form is validated too; when it answers asynchronously its work is
    /// joined into the returned task, whose settlement then reports the
    /// field's outcome if the field went async and the form's otherwise.
    ///
    /// A faulting validator leaves every field untouched and is the only
    /// error returned.
    pub fn change(
        &self,
        handle: &FieldHandle,
        input: impl Into<ChangeInput>,
    ) -> Result<Option<ValidationTask>> {
        let value = input.into().resolve();

        let (validator, values) = {
            let arena = self.inner.arena.read();
            let Some(field) = arena.get(handle) else {
                debug!(name = handle.name(), internal_id = %handle.internal_id(), "change on unknown field ignored");
                return Ok(None);
            };
            let validator = field.validator.clone();
            let values = self.inner.form_validator.as_ref().map(|_| {
                let mut values = arena.values();
                if arena.latest(handle.name()).map(|latest| latest.id()) == Some(field.id()) {
                    values.insert(handle.name().to_owned(), value.clone());
                }
                values
            });
            (validator, values)
        };
        let validation = scheduler::dispatch(validator.as_ref(), &value).map_err(|source| {
            FormError::Validator {
                name: handle.name().to_owned(),
                source,
            }
        })?;
        let form_validation = match &values {
            Some(values) => scheduler::dispatch_form(self.inner.form_validator.as_ref(), values)
                .map_err(|source| FormError::FormValidator { source })?,
            None => None,
        };

        let (deliveries, task) = {
            let mut arena = self.inner.arena.write();
            let Some(field) = arena.get_mut(handle) else {
                return Ok(None);
            };
            let before = field.meta.clone();
            let (mut changed, epoch) = field.write(value);
            let field_task = match validation {
                Validation::Valid => {
                    field.set_field_result(None);
                    None
                }
                Validation::Invalid(error) => {
                    field.set_field_result(Some(error));
                    None
                }
                Validation::Pending(future) => {
                    field.meta.set_validating();
                    Some(ValidationTask::field(
                        Arc::downgrade(&self.inner),
                        handle.clone(),
                        epoch,
                        future,
                    ))
                }
            };
            changed |= before.diff(&field.meta);

            let mut changes = vec![(handle.internal_id(), changed)];
            let form_task = form_validation.and_then(|validation| {
                let (form_changes, task) = self.inner.issue_form(&mut arena, validation);
                changes.extend(form_changes);
                task
            });
            let task = match (field_task, form_task) {
                (Some(field_task), Some(form_task)) => Some(field_task.join(form_task)),
                (field_task, form_task) => field_task.or(form_task),
            };
            (self.inner.affected(&arena, changes), task)
        };

        self.inner.publish(deliveries);
        Ok(task)
    }

    /// Run the form-level validator on the current values.
    ///
    /// Returns `None` without a form validator or when it answered
    /// synchronously; the errors are then already applied and delivered.
    pub fn validate_form(&self) -> Result<Option<ValidationTask>> {
        let Some(validator) = self.inner.form_validator.as_ref() else {
            return Ok(None);
        };
        let values = self.inner.arena.read().values();
        let validation = scheduler::dispatch_form(Some(validator), &values)
            .map_err(|source| FormError::FormValidator { source })?;
        let Some(validation) = validation else {
            return Ok(None);
        };

        let (deliveries, task) = {
            let mut arena = self.inner.arena.write();
            let (changes, task) = self.inner.issue_form(&mut arena, validation);
            (self.inner.affected(&arena, changes), task)
        };
        self.inner.publish(deliveries);
        Ok(task)
    }

    /// Mark every registration under `name` active and visited.
    pub fn focus(&self, name: &str) {
        self.inner.update_named(name, FieldMeta::focus);
    }

    /// Mark every registration under `name` inactive and touched.
    pub fn blur(&self, name: &str) {
        self.inner.update_named(name, FieldMeta::blur);
    }

    /// State of the newest live registration under `name`.
    pub fn get_field_state(&self, name: &str) -> Option<FieldState> {
        self.inner.arena.read().latest(name).map(|field| field.snapshot())
    }

    /// State of the registration `(name, internal_id)`, if it is still live.
    pub fn get_field(&self, name: &str, internal_id: InternalId) -> Option<FieldState> {
        self.inner
            .arena
            .read()
            .lookup(name, internal_id)
            .map(|field| field.snapshot())
    }

    /// State of the registration behind `handle`, if it is still live.
    pub fn field_state(&self, handle: &FieldHandle) -> Option<FieldState> {
        self.inner
            .arena
            .read()
            .get(handle)
            .map(|field| field.snapshot())
    }

    /// Current validation epoch of a live field.
    pub fn validation_epoch(&self, handle: &FieldHandle) -> Option<Epoch> {
        self.inner.arena.read().get(handle).map(|field| field.epoch)
    }

    /// Notify every observer whose subscription intersects `keys`, regardless
    /// of field. Used for form-wide changes such as submission state.
    pub fn rerender(&self, keys: Keys) {
        let deliveries = self
            .inner
            .broker
            .compute_affected(&self.inner.arena.read(), None, keys);
        self.inner.publish(deliveries);
    }

    /// Run `f` as one [`Transaction`].
    pub fn batch<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        Transaction::run(self, f)
    }

    /// Restore every field to its initial value and validity.
    ///
    /// Each field and the form level get a new epoch, so validations still in
    /// flight are discarded when they settle. `touched` and `visited` never
    /// revert and `active` follows the widget, so reset keeps all three.
    pub fn reset(&self) {
        let deliveries = {
            let mut arena = self.inner.arena.write();
            let changes: Vec<(InternalId, Keys)> = arena
                .iter_mut()
                .map(|field| (field.id(), field.reset()))
                .collect();
            arena.form.epoch.bump();
            arena.form.validating = false;
            arena.form.errors.clear();
            debug!(fields = changes.len(), "reset form");
            self.inner.affected(&arena, changes)
        };
        self.inner.publish(deliveries);
    }

    /// Value of the newest registration under each name.
    pub fn values(&self) -> Map<String, Value> {
        self.inner.arena.read().values()
    }

    /// Current errors by field name.
    pub fn errors(&self) -> BTreeMap<String, String> {
        self.inner
            .arena
            .read()
            .latest_per_name()
            .filter_map(|field| {
                let error = field.meta.error()?;
                Some((field.handle.name().to_owned(), error.to_owned()))
            })
            .collect()
    }

    /// No live field is invalid.
    pub fn is_valid(&self) -> bool {
        self.inner.arena.read().iter().all(|field| field.meta.valid())
    }

    /// Some asynchronous validation, field or form level, is outstanding.
    pub fn is_validating(&self) -> bool {
        let arena = self.inner.arena.read();
        arena.form.validating || arena.iter().any(|field| field.meta.validating())
    }

    /// Every live field still holds its initial value.
    pub fn is_pristine(&self) -> bool {
        self.inner
            .arena
            .read()
            .iter()
            .all(|field| field.value == field.initial_value)
    }

    /// Number of live registrations.
    pub fn field_count(&self) -> usize {
        self.inner.arena.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ChangeEvent;
    use crate::validate::{FormValidator, SharedValidator, fallible};
    use crate::ValidatorFault;
    use parking_lot::Mutex;
    use serde_json::json;

    fn foo_validator() -> SharedValidator {
        Arc::new(|value: &Value| {
            Validation::from_error((value == "foo").then(|| "error".to_owned()))
        })
    }

    #[test]
    fn change_on_removed_handle_is_a_noop() {
        let manager = FormManager::default();
        let handle = manager.register_field(FieldDescriptor::new("spy"));
        manager.unregister_field(&handle);
        manager.unregister_field(&handle);

        assert!(manager.change(&handle, "x").unwrap().is_none());
        assert!(manager.field_state(&handle).is_none());
    }

    #[test]
    fn sync_validation_applies_before_return() {
        let manager = FormManager::default();
        let handle =
            manager.register_field(FieldDescriptor::new("name").validate(foo_validator()));

        assert!(manager.change(&handle, ChangeEvent::text("foo")).unwrap().is_none());
        let meta = manager.field_state(&handle).unwrap().meta;
        assert_eq!(meta.error(), Some("error"));
        assert!(meta.invalid());
        assert!(!manager.is_valid());
        assert_eq!(manager.errors().get("name").map(String::as_str), Some("error"));
    }

    #[test]
    fn validator_fault_leaves_field_untouched() {
        let manager = FormManager::default();
        let faulty: SharedValidator =
            Arc::new(fallible(|_: &Value| Err(ValidatorFault::new("boom"))));
        let handle = manager.register_field(
            FieldDescriptor::new("name")
                .initial_value("keep")
                .validate(faulty),
        );
        let epoch = manager.validation_epoch(&handle);

        let err = manager.change(&handle, "new").unwrap_err();
        assert!(matches!(err, FormError::Validator { ref name, .. } if name == "name"));
        assert_eq!(manager.field_state(&handle).unwrap().value, json!("keep"));
        assert_eq!(manager.validation_epoch(&handle), epoch);
    }

    #[test]
    fn focus_and_blur_apply_to_every_registration_of_a_name() {
        let manager = FormManager::default();
        let a = manager.register_field(FieldDescriptor::new("shared"));
        let b = manager.register_field(FieldDescriptor::new("shared"));

        manager.focus("shared");
        assert!(manager.field_state(&a).unwrap().meta.active());
        assert!(manager.field_state(&b).unwrap().meta.visited());

        manager.blur("shared");
        let meta = manager.field_state(&b).unwrap().meta;
        assert!(!meta.active());
        assert!(meta.touched());
        assert!(meta.visited());
    }

    #[test]
    fn get_field_state_reads_newest_registration() {
        let manager = FormManager::default();
        let old = manager.register_field(FieldDescriptor::new("spy").initial_value("old"));
        let new = manager.register_field(FieldDescriptor::new("spy").initial_value("new"));

        assert_eq!(manager.get_field_state("spy").unwrap().value, json!("new"));
        assert_eq!(
            manager.get_field("spy", old.internal_id()).unwrap().value,
            json!("old")
        );
        assert!(manager.get_field("other", new.internal_id()).is_none());
        assert_eq!(manager.values().get("spy"), Some(&json!("new")));
    }

    #[test]
    fn reset_restores_initial_state() {
        let manager = FormManager::default();
        let handle = manager.register_field(
            FieldDescriptor::new("name")
                .initial_value("init")
                .validate(foo_validator()),
        );
        manager.change(&handle, "foo").unwrap();
        manager.focus("name");
        assert!(!manager.is_pristine());

        manager.reset();
        let state = manager.field_state(&handle).unwrap();
        assert_eq!(state.value, json!("init"));
        assert!(state.meta.valid());
        assert_eq!(state.meta.error(), None);
        assert!(manager.is_pristine());
    }

    #[test]
    fn reset_keeps_interaction_flags() {
        let manager = FormManager::default();
        let handle = manager.register_field(FieldDescriptor::new("name"));
        manager.focus("name");
        manager.blur("name");
        manager.focus("name");

        manager.reset();
        let meta = manager.field_state(&handle).unwrap().meta;
        assert!(meta.active());
        assert!(meta.touched());
        assert!(meta.visited());
    }

    fn passwords_match() -> SharedFormValidator {
        Arc::new(|values: &Map<String, Value>| {
            let mut errors = FormErrors::new();
            if values.get("password") != values.get("confirm") {
                errors.insert("confirm".to_owned(), "mismatch".to_owned());
            }
            FormValidation::Ready(errors)
        })
    }

    #[test]
    fn form_validator_sees_the_value_being_written() {
        let manager = FormManager::with_validator(FormOptions::default(), passwords_match());
        let password = manager.register_field(FieldDescriptor::new("password"));
        let confirm = manager.register_field(FieldDescriptor::new("confirm"));

        assert!(manager.change(&password, "secret").unwrap().is_none());
        assert_eq!(
            manager.field_state(&confirm).unwrap().meta.error(),
            Some("mismatch")
        );
        assert!(!manager.is_valid());

        manager.change(&confirm, "secret").unwrap();
        assert!(manager.field_state(&confirm).unwrap().meta.valid());
        assert!(manager.is_valid());
    }

    #[test]
    fn form_validator_fault_leaves_fields_untouched() {
        struct Faulty;
        impl FormValidator for Faulty {
            fn validate(
                &self,
                _: &Map<String, Value>,
            ) -> std::result::Result<FormValidation, ValidatorFault> {
                Err(ValidatorFault::new("boom"))
            }
        }
        let manager = FormManager::with_validator(FormOptions::default(), Arc::new(Faulty));
        let handle = manager.register_field(FieldDescriptor::new("name").initial_value("keep"));
        let epoch = manager.validation_epoch(&handle);

        let err = manager.change(&handle, "new").unwrap_err();
        assert!(matches!(err, FormError::FormValidator { .. }));
        assert_eq!(manager.field_state(&handle).unwrap().value, json!("keep"));
        assert_eq!(manager.validation_epoch(&handle), epoch);
    }

    #[test]
    fn validate_form_without_validator_is_a_noop() {
        let manager = FormManager::default();
        manager.register_field(FieldDescriptor::new("name"));
        assert!(manager.validate_form().unwrap().is_none());
    }

    #[test]
    fn reset_clears_form_errors() {
        let manager = FormManager::with_validator(FormOptions::default(), passwords_match());
        let password = manager.register_field(FieldDescriptor::new("password"));
        let confirm = manager.register_field(FieldDescriptor::new("confirm"));
        manager.change(&password, "secret").unwrap();
        assert!(!manager.is_valid());

        manager.reset();
        assert!(manager.field_state(&confirm).unwrap().meta.valid());
        assert!(manager.is_valid());
    }

    #[test]
    fn concurrent_changes_are_all_delivered() {
        const ROUNDS: u64 = 500;

        let manager = FormManager::default();
        let seen: Vec<Arc<Mutex<Value>>> = (0..2).map(|_| Arc::default()).collect();
        let handles: Vec<FieldHandle> = seen
            .iter()
            .enumerate()
            .map(|(i, seen)| {
                let seen = seen.clone();
                manager.register_field(
                    FieldDescriptor::new(format!("f{i}"))
                        .subscription(Keys::VALUES)
                        .render(move |state, _| *seen.lock() = state.value.clone()),
                )
            })
            .collect();

        std::thread::scope(|scope| {
            for handle in &handles {
                let manager = &manager;
                scope.spawn(move || {
                    for n in 1..=ROUNDS {
                        manager.change(handle, json!(n)).unwrap();
                    }
                });
            }
        });

        assert!(!manager.inner.broker.has_pending());
        for seen in &seen {
            assert_eq!(*seen.lock(), json!(ROUNDS));
        }
    }

    #[test]
    fn options_are_exposed() {
        let manager = FormManager::new(FormOptions::new().clear_on_unmount(true));
        assert!(manager.form_options().clear_on_unmount);
    }
}
