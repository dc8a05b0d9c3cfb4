//! Observer-side adapter: one mounted field widget.
//!
//! A [`FieldBinding`] registers on mount and unregisters on drop, so the
//! registration lives exactly as long as the widget holding it.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::arena::{FieldDescriptor, FieldHandle, RenderFn};
use crate::error::Result;
use crate::input::ChangeInput;
use crate::keys::{Keys, Subscription};
use crate::manager::FormManager;
use crate::meta::{FieldMeta, FieldState};
use crate::scheduler::ValidationTask;
use crate::validate::{ArrayMode, ArrayValidator, SharedValidator, compose};

/// What a widget asks for when it mounts.
pub struct FieldProps {
    name: String,
    initial_value: Option<Value>,
    validators: Vec<SharedValidator>,
    array: Option<ArrayMode>,
    subscription: Subscription,
    render: Option<RenderFn>,
    initialize_on_mount: bool,
    clear_on_unmount: Option<bool>,
    cleared_value: Option<Value>,
}

impl FieldProps {
    /// Props for a field called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_value: None,
            validators: Vec::new(),
            array: None,
            subscription: Subscription::all(),
            render: None,
            initialize_on_mount: false,
            clear_on_unmount: None,
            cleared_value: None,
        }
    }

    /// Value the field starts from.
    pub fn initial_value(mut self, value: impl Into<Value>) -> Self {
        self.initial_value = Some(value.into());
        self
    }

    /// Add a validator. Several are composed in the order given.
    pub fn validate(mut self, validator: SharedValidator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Treat the field as array-typed: validators are wrapped in an
    /// [`ArrayValidator`] with the given mode.
    pub fn array(mut self, mode: ArrayMode) -> Self {
        self.array = Some(mode);
        self
    }

    /// Keys the widget re-renders on.
    pub fn subscription(mut self, subscription: impl Into<Subscription>) -> Self {
        self.subscription = subscription.into();
        self
    }

    /// Re-render callback.
    pub fn render<F>(mut self, render: F) -> Self
    where
        F: Fn(&FieldState, Keys) + Send + Sync + 'static,
    {
        self.render = Some(Arc::new(render));
        self
    }

    /// Write the initial value through `change` right after mounting, so it
    /// is validated like any other value.
    pub fn initialize_on_mount(mut self, initialize: bool) -> Self {
        self.initialize_on_mount = initialize;
        self
    }

    /// Override the form's clear-on-unmount policy for this field.
    pub fn clear_on_unmount(mut self, clear: bool) -> Self {
        self.clear_on_unmount = Some(clear);
        self
    }

    /// Value written on unmount when clearing applies. Defaults to the
    /// form's `cleared_value`.
    pub fn cleared_value(mut self, value: impl Into<Value>) -> Self {
        self.cleared_value = Some(value.into());
        self
    }
}

/// A mounted observer of one field.
pub struct FieldBinding {
    manager: FormManager,
    handle: FieldHandle,
    clear_on_unmount: bool,
    cleared_value: Value,
    array_validator: Option<Arc<ArrayValidator>>,
    pending: Option<ValidationTask>,
}

impl FieldBinding {
    /// Register the field with `manager`.
    pub fn mount(manager: &FormManager, props: FieldProps) -> Result<Self> {
        let FieldProps {
            name,
            initial_value,
            mut validators,
            array,
            subscription,
            render,
            initialize_on_mount,
            clear_on_unmount,
            cleared_value,
        } = props;
        let options = manager.form_options();

        let (validator, array_validator) = match array {
            Some(_) if validators.is_empty() => (None, None),
            Some(mode) => {
                let array_validator = Arc::new(ArrayValidator::new(validators, mode));
                let shared: SharedValidator = array_validator.clone();
                (Some(shared), Some(array_validator))
            }
            None if validators.len() <= 1 => (validators.pop(), None),
            None => {
                let composed: SharedValidator = Arc::new(compose(validators));
                (Some(composed), None)
            }
        };

        let inherited_initial = manager
            .get_field_state(&name)
            .map(|state| state.initial_value);

        let mut descriptor = FieldDescriptor::new(name)
            .subscription(subscription)
            .render_fn(render);
        if let Some(value) = &initial_value {
            descriptor = descriptor.initial_value(value.clone());
        }
        if let Some(validator) = validator {
            descriptor = descriptor.validate(validator);
        }
        let handle = manager.register_field(descriptor);

        let mut binding = Self {
            manager: manager.clone(),
            handle,
            clear_on_unmount: (options.clear_on_unmount || clear_on_unmount == Some(true))
                && clear_on_unmount != Some(false),
            cleared_value: cleared_value.unwrap_or_else(|| options.cleared_value.clone()),
            array_validator,
            pending: None,
        };

        if initialize_on_mount {
            let value = initial_value.or(inherited_initial).unwrap_or(Value::Null);
            binding.pending = binding.on_change(value)?;
        }
        Ok(binding)
    }

    /// Registration handle.
    pub fn handle(&self) -> &FieldHandle {
        &self.handle
    }

    /// Field name.
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Current state, `None` only if the field was removed behind our back.
    pub fn state(&self) -> Option<FieldState> {
        self.manager.field_state(&self.handle)
    }

    /// Current value, `null` once the field is gone.
    pub fn value(&self) -> Value {
        self.state().map(|state| state.value).unwrap_or(Value::Null)
    }

    /// Value as a text widget shows it: absent reads as `""`.
    pub fn input_value(&self) -> Value {
        match self.value() {
            Value::Null => Value::String(String::new()),
            value => value,
        }
    }

    /// Current meta bundle.
    pub fn meta(&self) -> FieldMeta {
        self.state().map(|state| state.meta).unwrap_or_default()
    }

    /// Detached `getFieldState` accessor for this registration.
    pub fn accessor(&self) -> impl Fn() -> Option<FieldState> + Send + Sync + 'static {
        let manager = self.manager.downgrade();
        let handle = self.handle.clone();
        move || manager.upgrade()?.field_state(&handle)
    }

    /// Present for array-typed fields with validators.
    pub fn array_validator(&self) -> Option<&Arc<ArrayValidator>> {
        self.array_validator.as_ref()
    }

    /// Accepts a change event or a raw value.
    pub fn on_change(&self, input: impl Into<ChangeInput>) -> Result<Option<ValidationTask>> {
        self.manager.change(&self.handle, input)
    }

    /// Focus handler: marks the field active and visited.
    pub fn on_focus(&self) {
        self.manager.focus(self.handle.name());
    }

    /// Blur handler: marks the field inactive and touched.
    pub fn on_blur(&self) {
        self.manager.blur(self.handle.name());
    }

    /// Async validation started by `initialize_on_mount`, if any.
    pub fn take_validation(&mut self) -> Option<ValidationTask> {
        self.pending.take()
    }
}

impl Drop for FieldBinding {
    fn drop(&mut self) {
        if self.clear_on_unmount {
            // A pending clear-validation is dropped with the field.
            if let Err(err) = self.manager.change(&self.handle, self.cleared_value.clone()) {
                warn!(name = self.handle.name(), %err, "clearing field on unmount failed");
            }
        }
        self.manager.unregister_field(&self.handle);
    }
}
