//! State keys and observer subscriptions.
//!
//! Every mutation is classified into a [`Keys`] set. Observers declare the keys
//! they care about through a [`Subscription`]; an observer re-renders only when
//! the two intersect.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags::bitflags! {
    /// Set of state keys touched by a mutation or watched by an observer.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Keys: u16 {
        /// The field value.
        const VALUES = 1 << 0;
        /// `meta.error`
        const ERROR = 1 << 1;
        /// `meta.valid`
        const VALID = 1 << 2;
        /// `meta.invalid`
        const INVALID = 1 << 3;
        /// `meta.validating`
        const VALIDATING = 1 << 4;
        /// `meta.active`
        const ACTIVE = 1 << 5;
        /// `meta.touched`
        const TOUCHED = 1 << 6;
        /// `meta.visited`
        const VISITED = 1 << 7;
        /// Initial values were replaced.
        const INITIAL_VALUES = 1 << 8;
        /// Form-wide pristine flag.
        const PRISTINE = 1 << 9;
        /// Form-wide dirty flag.
        const DIRTY = 1 << 10;
        /// Submission started or finished.
        const SUBMITTING = 1 << 11;
        /// Last submission succeeded.
        const SUBMIT_SUCCEEDED = 1 << 12;
        /// Last submission failed.
        const SUBMIT_FAILED = 1 << 13;

        /// Keys written by a validation result.
        const VALIDITY = Self::ERROR.bits() | Self::VALID.bits() | Self::INVALID.bits();
        /// Every key of the per-field meta bundle.
        const META = Self::VALIDITY.bits()
            | Self::VALIDATING.bits()
            | Self::ACTIVE.bits()
            | Self::TOUCHED.bits()
            | Self::VISITED.bits();
    }
}

/// Wire names, in bit order. These are the names observers pattern-match on.
const KEY_NAMES: [(&str, Keys); 14] = [
    ("values", Keys::VALUES),
    ("error", Keys::ERROR),
    ("valid", Keys::VALID),
    ("invalid", Keys::INVALID),
    ("validating", Keys::VALIDATING),
    ("active", Keys::ACTIVE),
    ("touched", Keys::TOUCHED),
    ("visited", Keys::VISITED),
    ("initialValues", Keys::INITIAL_VALUES),
    ("pristine", Keys::PRISTINE),
    ("dirty", Keys::DIRTY),
    ("submitting", Keys::SUBMITTING),
    ("submitSucceeded", Keys::SUBMIT_SUCCEEDED),
    ("submitFailed", Keys::SUBMIT_FAILED),
];

impl Keys {
    /// Look up a single key by its wire name.
    pub fn from_key_name(name: &str) -> Option<Keys> {
        KEY_NAMES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, key)| *key)
    }

    /// Wire names of the keys in this set, in bit order.
    pub fn key_names(self) -> impl Iterator<Item = &'static str> {
        KEY_NAMES
            .iter()
            .filter(move |(_, key)| self.contains(*key))
            .map(|(name, _)| *name)
    }

    /// Parse a list of wire names. Unknown names are returned as the error.
    pub fn parse<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Keys, String> {
        names.into_iter().try_fold(Keys::empty(), |acc, name| {
            Keys::from_key_name(name)
                .map(|key| acc | key)
                .ok_or_else(|| name.to_owned())
        })
    }
}

impl fmt::Display for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, name) in self.key_names().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
        }
        f.write_str("}")
    }
}

impl Serialize for Keys {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.bits().count_ones() as usize))?;
        for name in self.key_names() {
            seq.serialize_element(name)?;
        }
        seq.end()
    }
}

/// Accepts `["valid", "error"]` as well as `{"valid": true, "error": false}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum KeysRepr {
    List(Vec<String>),
    Map(BTreeMap<String, bool>),
}

impl<'de> Deserialize<'de> for Keys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parsed = match KeysRepr::deserialize(deserializer)? {
            KeysRepr::List(names) => Keys::parse(names.iter().map(String::as_str)),
            KeysRepr::Map(flags) => Keys::parse(
                flags
                    .iter()
                    .filter(|(_, enabled)| **enabled)
                    .map(|(name, _)| name.as_str()),
            ),
        };
        parsed.map_err(|name| D::Error::custom(format!("unknown state key `{name}`")))
    }
}

/// An observer's declared interest.
///
/// `keys == None` subscribes to everything. By default an observer only hears
/// about mutations of its own field; [`Subscription::form_wide`] widens that to
/// every field of the form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Subscription {
    keys: Option<Keys>,
    form_wide: bool,
}

impl Subscription {
    /// Subscribe to every key of the observer's own field.
    pub fn all() -> Self {
        Self::default()
    }

    /// Subscribe to the given keys only.
    pub fn to(keys: Keys) -> Self {
        Self {
            keys: Some(keys),
            form_wide: false,
        }
    }

    /// Also receive matching mutations of every other field.
    pub fn form_wide(mut self) -> Self {
        self.form_wide = true;
        self
    }

    /// The keys the observer supplied, `None` meaning "all".
    pub fn keys(&self) -> Option<Keys> {
        self.keys
    }

    /// Whether mutations of other fields are delivered too.
    pub fn is_form_wide(&self) -> bool {
        self.form_wide
    }

    /// Filter actually applied to change sets.
    ///
    /// An observer that supplies no keys hears everything. One that does is
    /// unioned with the manager-wide default before intersecting.
    pub fn effective(&self, form_default: Option<Keys>) -> Keys {
        match self.keys {
            None => Keys::all(),
            Some(own) => own | form_default.unwrap_or_else(Keys::empty),
        }
    }
}

impl From<Keys> for Subscription {
    fn from(keys: Keys) -> Self {
        Subscription::to(keys)
    }
}
