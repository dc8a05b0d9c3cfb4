//! The argument of `onChange`: either a change event or a raw value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input delivered to a field's change handler.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeInput {
    /// A DOM-style change event.
    Event(ChangeEvent),
    /// A value passed directly by a non-standard widget (arrays, objects,
    /// primitives).
    Raw(Value),
}

/// A change event. Only `target` is inspected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Element whose value changed.
    pub target: EventTarget,
}

/// The element that fired a [`ChangeEvent`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTarget {
    /// Input type, e.g. `checkbox`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    /// Value of a text-like input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Checked state of a checkbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
}

impl ChangeEvent {
    /// Event from a text-like input.
    pub fn text(value: impl Into<Value>) -> Self {
        Self {
            target: EventTarget {
                input_type: None,
                value: Some(value.into()),
                checked: None,
            },
        }
    }

    /// Event from a checkbox.
    pub fn checkbox(checked: bool) -> Self {
        Self {
            target: EventTarget {
                input_type: Some("checkbox".into()),
                value: None,
                checked: Some(checked),
            },
        }
    }

    /// Value carried by the event, by target type.
    pub fn value(self) -> Value {
        let EventTarget {
            input_type,
            value,
            checked,
        } = self.target;
        match input_type.as_deref() {
            Some("checkbox") => Value::Bool(checked.unwrap_or(false)),
            _ => value.unwrap_or(Value::Null),
        }
    }
}

impl ChangeInput {
    /// Classify an untyped JSON payload.
    ///
    /// An object whose `target` is an object carrying `value` or `checked` is
    /// an event; everything else is a raw value.
    pub fn from_json(value: Value) -> Self {
        let is_event = value
            .get("target")
            .and_then(Value::as_object)
            .is_some_and(|target| target.contains_key("value") || target.contains_key("checked"));
        if is_event {
            if let Ok(event) = serde_json::from_value::<ChangeEvent>(value.clone()) {
                return ChangeInput::Event(event);
            }
        }
        ChangeInput::Raw(value)
    }

    /// The value to store in the field.
    pub fn resolve(self) -> Value {
        match self {
            ChangeInput::Event(event) => event.value(),
            ChangeInput::Raw(value) => value,
        }
    }
}

impl From<ChangeEvent> for ChangeInput {
    fn from(event: ChangeEvent) -> Self {
        ChangeInput::Event(event)
    }
}

impl From<Value> for ChangeInput {
    fn from(value: Value) -> Self {
        ChangeInput::Raw(value)
    }
}

impl From<&str> for ChangeInput {
    fn from(value: &str) -> Self {
        ChangeInput::Raw(Value::String(value.to_owned()))
    }
}

impl From<bool> for ChangeInput {
    fn from(value: bool) -> Self {
        ChangeInput::Raw(Value::Bool(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_event_yields_its_value() {
        let input = ChangeInput::from_json(json!({"target": {"value": "foo"}}));
        assert_eq!(input.resolve(), json!("foo"));
    }

    #[test]
    fn checkbox_event_yields_boolean() {
        let input = ChangeInput::from_json(json!({"target": {"checked": true, "type": "checkbox"}}));
        assert_eq!(input.resolve(), Value::Bool(true));
        assert_eq!(ChangeInput::from(ChangeEvent::checkbox(false)).resolve(), json!(false));
    }

    #[test]
    fn non_event_object_is_raw() {
        let option = json!({"value": 1, "label": "bar"});
        let input = ChangeInput::from_json(option.clone());
        assert_eq!(input, ChangeInput::Raw(option.clone()));
        assert_eq!(input.resolve(), option);
    }

    #[test]
    fn arrays_and_target_less_objects_are_raw() {
        assert_eq!(ChangeInput::from_json(json!([])).resolve(), json!([]));
        let odd = json!({"target": "not-an-element"});
        assert_eq!(ChangeInput::from_json(odd.clone()), ChangeInput::Raw(odd));
    }
}
