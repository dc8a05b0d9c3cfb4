//! Manager-wide configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::keys::Keys;

/// Options shared by every field of one form.
///
/// Deserializes from camelCase JSON; every field is optional.
///
/// ```ignore
/// let options = FormOptions::from_json(r#"{"subscription": {"valid": true}, "clearOnUnmount": true}"#)?;
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormOptions {
    /// Default subscription unioned into every observer that declares its own.
    pub subscription: Option<Keys>,
    /// Write `cleared_value` into a field when its binding unmounts.
    pub clear_on_unmount: bool,
    /// Value written by clear-on-unmount.
    pub cleared_value: Value,
    /// Start a remounted field from the last value held under its name.
    pub keep_value_on_remount: bool,
}

impl FormOptions {
    /// Defaults: no form subscription, no clearing, fresh values on remount.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the default subscription.
    pub fn subscription(mut self, keys: Keys) -> Self {
        self.subscription = Some(keys);
        self
    }

    /// Set the clear-on-unmount policy.
    pub fn clear_on_unmount(mut self, clear: bool) -> Self {
        self.clear_on_unmount = clear;
        self
    }

    /// Set the value written by clear-on-unmount.
    pub fn cleared_value(mut self, value: Value) -> Self {
        self.cleared_value = value;
        self
    }

    /// Keep the last value of a name across unregister and register.
    pub fn keep_value_on_remount(mut self, keep: bool) -> Self {
        self.keep_value_on_remount = keep;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormError;
    use serde_json::json;

    #[test]
    fn parses_camel_case_json() {
        let options = FormOptions::from_json(
            r#"{"subscription": {"valid": true}, "clearOnUnmount": true, "clearedValue": ""}"#,
        )
        .unwrap();
        assert_eq!(options.subscription, Some(Keys::VALID));
        assert!(options.clear_on_unmount);
        assert_eq!(options.cleared_value, json!(""));
        assert!(!options.keep_value_on_remount);
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(FormOptions::from_json("{}").unwrap(), FormOptions::default());
    }

    #[test]
    fn bad_subscription_key_is_an_options_error() {
        let err = FormOptions::from_json(r#"{"subscription": ["nope"]}"#).unwrap_err();
        assert!(matches!(err, FormError::Options(_)));
    }
}
