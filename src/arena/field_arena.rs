// Field arena - authoritative table of registered fields
//
// Fields live in a Slab owned by one manager. Slab slots are reused, so
// observers never see them: a field is addressed by its (name, InternalId)
// pair, and `index` maps the id to whatever slot currently holds it.
//
// InternalIds come from one process-wide counter. They are never reused, so a
// handle kept after unregistration can only ever miss, never hit a newcomer.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::{Map, Value};
use slab::Slab;

use crate::hash::{FastHashMap, FastIndexMap};
use crate::keys::{Keys, Subscription};
use crate::meta::{FieldMeta, FieldState};
use crate::validate::{FormErrors, SharedValidator};

static NEXT_INTERNAL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique, strictly increasing registration id.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct InternalId(u64);

impl InternalId {
    fn next() -> Self {
        Self(NEXT_INTERNAL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-field validation counter. Bumped on every value write; a result issued
/// under an older epoch is stale.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Epoch(u64);

impl Epoch {
    pub(crate) fn bump(&mut self) -> Epoch {
        self.0 += 1;
        *self
    }

    /// Number of writes the field has seen.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// What an observer holds onto after registering: the field's name and id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldHandle {
    name: Arc<str>,
    internal_id: InternalId,
}

impl FieldHandle {
    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of this registration.
    pub fn internal_id(&self) -> InternalId {
        self.internal_id
    }
}

/// Callback that re-renders an observer. Receives the field state and the
/// keys that matched the observer's subscription.
pub type RenderFn = Arc<dyn Fn(&FieldState, Keys) + Send + Sync>;

/// Registration request.
pub struct FieldDescriptor {
    name: String,
    initial_value: Option<Value>,
    validate: Option<SharedValidator>,
    subscription: Subscription,
    render: Option<RenderFn>,
}

impl FieldDescriptor {
    /// Describe a field called `name`. It has no initial value, no validator
    /// and a subscription to every key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_value: None,
            validate: None,
            subscription: Subscription::all(),
            render: None,
        }
    }

    /// Value the field starts from. Absent means `null`.
    pub fn initial_value(mut self, value: impl Into<Value>) -> Self {
        self.initial_value = Some(value.into());
        self
    }

    /// Validator run on every change.
    pub fn validate(mut self, validator: SharedValidator) -> Self {
        self.validate = Some(validator);
        self
    }

    /// Keys the observer re-renders on.
    pub fn subscription(mut self, subscription: impl Into<Subscription>) -> Self {
        self.subscription = subscription.into();
        self
    }

    /// Callback invoked with the state and the matched keys.
    pub fn render<F>(mut self, render: F) -> Self
    where
        F: Fn(&FieldState, Keys) + Send + Sync + 'static,
    {
        self.render = Some(Arc::new(render));
        self
    }

    pub(crate) fn render_fn(mut self, render: Option<RenderFn>) -> Self {
        self.render = render;
        self
    }

    /// Name the field will be registered under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One registered field.
pub(crate) struct Field {
    pub(crate) handle: FieldHandle,
    pub(crate) value: Value,
    pub(crate) initial_value: Value,
    pub(crate) meta: FieldMeta,
    pub(crate) epoch: Epoch,
    field_error: Option<String>,
    form_error: Option<String>,
    pub(crate) validator: Option<SharedValidator>,
    pub(crate) subscription: Subscription,
    pub(crate) render: Option<RenderFn>,
}

impl Field {
    pub(crate) fn id(&self) -> InternalId {
        self.handle.internal_id
    }

    pub(crate) fn snapshot(&self) -> FieldState {
        FieldState {
            name: self.handle.name.to_string(),
            internal_id: self.handle.internal_id,
            value: self.value.clone(),
            initial_value: self.initial_value.clone(),
            meta: self.meta.clone(),
        }
    }

    /// Write a new value and open a new validation epoch.
    pub(crate) fn write(&mut self, value: Value) -> (Keys, Epoch) {
        let mut changed = Keys::empty();
        changed.set(Keys::VALUES, self.value != value);
        self.value = value;
        (changed, self.epoch.bump())
    }

    /// Record the field validator's answer and clear `validating`.
    pub(crate) fn set_field_result(&mut self, error: Option<String>) {
        self.field_error = error;
        self.meta.set_result(self.shown_error());
    }

    /// Record the form validator's answer for this field.
    pub(crate) fn set_form_error(&mut self, error: Option<String>) {
        self.form_error = error;
        self.meta.set_error(self.shown_error());
    }

    // The field's own error takes precedence.
    fn shown_error(&self) -> Option<String> {
        self.field_error.clone().or_else(|| self.form_error.clone())
    }

    /// Back to the initial value and validity. Outstanding validations
    /// become stale; interaction flags are kept.
    pub(crate) fn reset(&mut self) -> Keys {
        let before = self.meta.clone();
        let (mut changed, _) = self.write(self.initial_value.clone());
        self.field_error = None;
        self.form_error = None;
        self.meta.reset_validity();
        changed |= before.diff(&self.meta);
        changed
    }
}

/// Form-level validation state.
#[derive(Default)]
pub(crate) struct FormLevel {
    /// Bumped on every form validation issued and on reset.
    pub(crate) epoch: Epoch,
    pub(crate) validating: bool,
    /// Last applied errors, handed to fields registered later.
    pub(crate) errors: FormErrors,
}

/// Arena of fields addressed by `(name, InternalId)`.
#[derive(Default)]
pub(crate) struct FieldArena {
    slots: Slab<Field>,
    index: FastHashMap<InternalId, usize>,
    by_name: FastIndexMap<Arc<str>, Vec<InternalId>>,
    retained: FastHashMap<Arc<str>, Value>,
    pub(crate) form: FormLevel,
}

impl FieldArena {
    /// Allocate a fresh id and store the field.
    ///
    /// With `restore` set, a name seen before starts from the value retained
    /// when its last registration was removed.
    pub(crate) fn insert(&mut self, descriptor: FieldDescriptor, restore: bool) -> FieldHandle {
        let FieldDescriptor {
            name,
            initial_value,
            validate,
            subscription,
            render,
        } = descriptor;
        let name: Arc<str> = Arc::from(name);
        let handle = FieldHandle {
            name: Arc::clone(&name),
            internal_id: InternalId::next(),
        };

        let initial_value = initial_value.unwrap_or(Value::Null);
        let retained = if restore { self.retained.remove(&name) } else { None };
        let value = retained.unwrap_or_else(|| initial_value.clone());

        let mut field = Field {
            handle: handle.clone(),
            value,
            initial_value,
            meta: FieldMeta::initial(),
            epoch: Epoch::default(),
            field_error: None,
            form_error: None,
            validator: validate,
            subscription,
            render,
        };
        if let Some(error) = self.form.errors.get(&*name) {
            field.set_form_error(Some(error.clone()));
        }
        let slot = self.slots.insert(field);
        self.index.insert(handle.internal_id, slot);
        self.by_name.entry(name).or_default().push(handle.internal_id);
        handle
    }

    /// Remove a field. Missing handles are a no-op returning `None`.
    pub(crate) fn remove(&mut self, handle: &FieldHandle, retain: bool) -> Option<Field> {
        self.get(handle)?;
        let slot = self.index.remove(&handle.internal_id)?;
        let field = self.slots.remove(slot);

        if let Some(ids) = self.by_name.get_mut(handle.name()) {
            ids.retain(|id| *id != handle.internal_id);
            if ids.is_empty() {
                self.by_name.shift_remove(handle.name());
            }
        }
        if retain {
            self.retained
                .insert(Arc::clone(&field.handle.name), field.value.clone());
        }
        Some(field)
    }

    pub(crate) fn by_id(&self, id: InternalId) -> Option<&Field> {
        self.index.get(&id).and_then(|slot| self.slots.get(*slot))
    }

    /// Lookup by `(name, id)`; both must match.
    pub(crate) fn lookup(&self, name: &str, id: InternalId) -> Option<&Field> {
        self.by_id(id).filter(|field| &*field.handle.name == name)
    }

    pub(crate) fn get(&self, handle: &FieldHandle) -> Option<&Field> {
        self.lookup(handle.name(), handle.internal_id)
    }

    pub(crate) fn get_mut(&mut self, handle: &FieldHandle) -> Option<&mut Field> {
        let slot = *self.index.get(&handle.internal_id)?;
        self.slots
            .get_mut(slot)
            .filter(|field| field.handle.name == handle.name)
    }

    /// Newest live registration under `name`.
    pub(crate) fn latest(&self, name: &str) -> Option<&Field> {
        let id = *self.by_name.get(name)?.last()?;
        self.by_id(id)
    }

    /// Handles of every live registration under `name`, oldest first.
    pub(crate) fn handles_named(&self, name: &str) -> Vec<FieldHandle> {
        self.by_name
            .get(name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_id(*id))
                    .map(|field| field.handle.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Newest registration of every name, in first-registration order.
    pub(crate) fn latest_per_name(&self) -> impl Iterator<Item = &Field> {
        self.by_name
            .values()
            .filter_map(|ids| ids.last().and_then(|id| self.by_id(*id)))
    }

    /// Value of the newest registration under each name.
    pub(crate) fn values(&self) -> Map<String, Value> {
        self.latest_per_name()
            .map(|field| (field.handle.name().to_owned(), field.value.clone()))
            .collect()
    }

    /// Apply form-level errors to every live field. Returns the keys changed
    /// per field.
    pub(crate) fn apply_form_errors(&mut self, errors: FormErrors) -> Vec<(InternalId, Keys)> {
        let changes = self
            .slots
            .iter_mut()
            .map(|(_, field)| {
                let before = field.meta.clone();
                field.set_form_error(errors.get(field.handle.name()).cloned());
                (field.id(), before.diff(&field.meta))
            })
            .filter(|(_, changed)| !changed.is_empty())
            .collect();
        self.form.errors = errors;
        self.form.validating = false;
        changes
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Field> {
        self.slots.iter().map(|(_, field)| field)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Field> {
        self.slots.iter_mut().map(|(_, field)| field)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_strictly_increasing_and_never_reused() {
        let mut arena = FieldArena::default();
        let a = arena.insert(FieldDescriptor::new("spy"), false);
        arena.remove(&a, false);
        let b = arena.insert(FieldDescriptor::new("spy"), false);

        assert!(b.internal_id() > a.internal_id());
        assert!(arena.get(&a).is_none());
        assert!(arena.get(&b).is_some());
    }

    #[test]
    fn duplicate_names_are_disambiguated_by_id() {
        let mut arena = FieldArena::default();
        let first = arena.insert(FieldDescriptor::new("spy").initial_value("a"), false);
        let second = arena.insert(FieldDescriptor::new("spy").initial_value("b"), false);

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(&first).unwrap().value, json!("a"));
        assert_eq!(arena.latest("spy").unwrap().id(), second.internal_id());
        assert_eq!(arena.handles_named("spy"), vec![first.clone(), second]);
    }

    #[test]
    fn lookup_requires_matching_name() {
        let mut arena = FieldArena::default();
        let handle = arena.insert(FieldDescriptor::new("spy"), false);
        assert!(arena.lookup("spy", handle.internal_id()).is_some());
        assert!(arena.lookup("other", handle.internal_id()).is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut arena = FieldArena::default();
        let handle = arena.insert(FieldDescriptor::new("spy"), false);
        assert!(arena.remove(&handle, false).is_some());
        assert!(arena.remove(&handle, false).is_none());
        assert!(arena.latest("spy").is_none());
    }

    #[test]
    fn retained_value_restores_on_remount() {
        let mut arena = FieldArena::default();
        let handle = arena.insert(FieldDescriptor::new("spy").initial_value("init"), true);
        arena.get_mut(&handle).unwrap().write(json!("edited"));
        arena.remove(&handle, true);

        let again = arena.insert(FieldDescriptor::new("spy").initial_value("init"), true);
        let field = arena.get(&again).unwrap();
        assert_eq!(field.value, json!("edited"));
        assert_eq!(field.initial_value, json!("init"));
    }

    #[test]
    fn field_error_wins_over_form_error() {
        let mut arena = FieldArena::default();
        let handle = arena.insert(FieldDescriptor::new("email"), false);

        let errors = FormErrors::from([("email".to_owned(), "taken".to_owned())]);
        let changes = arena.apply_form_errors(errors);
        assert_eq!(changes, vec![(handle.internal_id(), Keys::VALIDITY)]);

        let field = arena.get_mut(&handle).unwrap();
        field.set_field_result(Some("required".into()));
        assert_eq!(field.meta.error(), Some("required"));
        field.set_field_result(None);
        assert_eq!(field.meta.error(), Some("taken"));
        assert!(field.meta.invalid());
    }

    #[test]
    fn late_registration_picks_up_form_errors() {
        let mut arena = FieldArena::default();
        arena.apply_form_errors(FormErrors::from([("email".to_owned(), "taken".to_owned())]));

        let handle = arena.insert(FieldDescriptor::new("email"), false);
        assert_eq!(arena.get(&handle).unwrap().meta.error(), Some("taken"));
    }

    #[test]
    fn write_bumps_epoch_and_reports_value_change() {
        let mut arena = FieldArena::default();
        let handle = arena.insert(FieldDescriptor::new("spy"), false);
        let field = arena.get_mut(&handle).unwrap();

        let (changed, first) = field.write(json!("x"));
        assert_eq!(changed, Keys::VALUES);
        let (changed, second) = field.write(json!("x"));
        assert!(changed.is_empty());
        assert!(second > first);
    }
}
