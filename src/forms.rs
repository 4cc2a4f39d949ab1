//! Structured key-value forms.
//!
//! Forms carry both user configuration (enable requests) and cross-node
//! notification summaries. A form declares a type and a set of named fields,
//! each holding one or more string values; `parse_form` extracts typed
//! values against a field specification.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Declared type of configuration forms submitted with enable requests.
pub const CONFIG_FORM_TYPE: &str = "push-config";

/// Declared type of publish-option forms (carries the shared secret).
pub const PUBLISH_OPTIONS_FORM_TYPE: &str = "publish-options";

/// Declared type of notification summary forms exchanged between nodes.
pub const SUMMARY_FORM_TYPE: &str = "push-summary";

pub const KEY_SECRET: &str = "secret";
pub const KEY_MESSAGE_COUNT: &str = "message-count";
pub const KEY_LAST_MESSAGE_SENDER: &str = "last-message-sender";
pub const KEY_LAST_MESSAGE_BODY: &str = "last-message-body";
pub const KEY_PENDING_SUBSCRIPTION_COUNT: &str = "pending-subscription-count";
pub const KEY_LAST_SUBSCRIPTION_SENDER: &str = "last-subscription-sender";
pub const KEY_INCLUDE_SENDERS: &str = "include-senders";
pub const KEY_INCLUDE_MESSAGE_COUNT: &str = "include-message-count";
pub const KEY_INCLUDE_SUBSCRIPTION_COUNT: &str = "include-subscription-count";
pub const KEY_INCLUDE_MESSAGE_BODIES: &str = "include-message-bodies";

/// A structured key-value form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataForm {
    /// Declared form type. Forms without a type never match a parse.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub form_type: Option<String>,

    /// Field values, keyed by field name. Single-value fields carry a
    /// one-element list.
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<String>>,
}

impl DataForm {
    pub fn new(form_type: &str) -> Self {
        Self {
            form_type: Some(form_type.to_string()),
            fields: BTreeMap::new(),
        }
    }

    /// Set a single-value field, replacing any previous values.
    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), vec![value.into()]);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Typed value extracted from a form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    Texts(Vec<String>),
    Flag(bool),
    Count(u32),
}

impl FormValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u32> {
        match self {
            Self::Count(n) => Some(*n),
            _ => None,
        }
    }
}

/// Conversion applied to raw field text. Returning `None` marks the field
/// as erroring.
pub type Converter = fn(&str) -> Option<FormValue>;

/// Boolean field converter (`true`/`1` and `false`/`0`).
pub fn convert_flag(raw: &str) -> Option<FormValue> {
    match raw {
        "true" | "1" => Some(FormValue::Flag(true)),
        "false" | "0" => Some(FormValue::Flag(false)),
        _ => None,
    }
}

/// Unsigned integer field converter.
pub fn convert_count(raw: &str) -> Option<FormValue> {
    raw.parse::<u32>().ok().map(FormValue::Count)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Exactly one value expected; the first value is taken.
    Single,
    /// All values are kept.
    Multi,
}

/// Specification of one field to extract.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    pub kind: FieldKind,
    pub convert: Option<Converter>,
}

impl FieldSpec {
    pub fn single(key: &'static str) -> Self {
        Self {
            key,
            kind: FieldKind::Single,
            convert: None,
        }
    }

    pub fn multi(key: &'static str) -> Self {
        Self {
            key,
            kind: FieldKind::Multi,
            convert: None,
        }
    }

    pub fn converted(key: &'static str, convert: Converter) -> Self {
        Self {
            key,
            kind: FieldKind::Single,
            convert: Some(convert),
        }
    }
}

/// Extracted field values, keyed by spec key. Absent optional fields are
/// simply missing from the map.
pub type FormValues = HashMap<&'static str, FormValue>;

/// Outcome of a form parse.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    /// A form of the expected type matched and all specs were satisfied.
    Values(FormValues),

    /// No candidate form declares the expected type. Callers treat this as
    /// "no configuration change requested", not as a rejection.
    NotFound,

    /// A matching form was found but a required field is missing or empty,
    /// or a field failed conversion.
    Error,
}

/// Parse the first candidate form whose declared type matches
/// `expected_type`. Forms with a different (or missing) declared type are
/// skipped, not rejected.
pub fn parse_form(
    candidates: &[DataForm],
    expected_type: &str,
    required: &[FieldSpec],
    optional: &[FieldSpec],
) -> ParseResult {
    let form = candidates
        .iter()
        .find(|f| f.form_type.as_deref() == Some(expected_type));

    let Some(form) = form else {
        return ParseResult::NotFound;
    };

    let mut values = FormValues::new();

    for spec in required {
        match extract_field(form, spec) {
            Extracted::Value(v) => {
                values.insert(spec.key, v);
            }
            Extracted::Absent | Extracted::Invalid => return ParseResult::Error,
        }
    }

    for spec in optional {
        match extract_field(form, spec) {
            Extracted::Value(v) => {
                values.insert(spec.key, v);
            }
            Extracted::Absent => {}
            Extracted::Invalid => return ParseResult::Error,
        }
    }

    ParseResult::Values(values)
}

enum Extracted {
    Value(FormValue),
    Absent,
    Invalid,
}

fn extract_field(form: &DataForm, spec: &FieldSpec) -> Extracted {
    let Some(raw) = form.fields.get(spec.key) else {
        return Extracted::Absent;
    };

    match spec.kind {
        FieldKind::Single => {
            let Some(first) = raw.first() else {
                return Extracted::Absent;
            };
            if first.is_empty() {
                return Extracted::Invalid;
            }
            match spec.convert {
                Some(convert) => match convert(first) {
                    Some(v) => Extracted::Value(v),
                    None => Extracted::Invalid,
                },
                None => Extracted::Value(FormValue::Text(first.clone())),
            }
        }
        FieldKind::Multi => {
            if raw.is_empty() {
                return Extracted::Absent;
            }
            match spec.convert {
                // Converted multi fields are not needed yet; convert the
                // first value to keep the contract total.
                Some(convert) => match convert(&raw[0]) {
                    Some(v) => Extracted::Value(v),
                    None => Extracted::Invalid,
                },
                None => Extracted::Value(FormValue::Texts(raw.clone())),
            }
        }
    }
}
