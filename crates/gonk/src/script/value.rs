//! Values crossing the host/script boundary.

use std::collections::BTreeMap;
use std::fmt;

use super::CallbackHandle;

/// A compiled regular expression as the script sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSource {
    pub source: String,
    pub flags: String,
}

impl PatternSource {
    pub fn new(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: flags.into(),
        }
    }
}

impl fmt::Display for PatternSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

/// Engine-independent value model
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ScriptValue>),
    Object(BTreeMap<String, ScriptValue>),
    Pattern(PatternSource),
    Callback(CallbackHandle),
}

impl ScriptValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ScriptValue]> {
        match self {
            ScriptValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a field of an object value
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        match self {
            ScriptValue::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    /// `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, ScriptValue::Undefined | ScriptValue::Null)
    }

    /// Convert to JSON. Patterns become their literal text, callbacks null.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            ScriptValue::Undefined | ScriptValue::Null | ScriptValue::Callback(_) => Json::Null,
            ScriptValue::Bool(b) => Json::Bool(*b),
            ScriptValue::Number(n) => number_to_json(*n),
            ScriptValue::String(s) => Json::String(s.clone()),
            ScriptValue::Array(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            ScriptValue::Object(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            ScriptValue::Pattern(pattern) => Json::String(pattern.to_string()),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl From<serde_json::Value> for ScriptValue {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => ScriptValue::Null,
            Json::Bool(b) => ScriptValue::Bool(b),
            Json::Number(n) => ScriptValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => ScriptValue::String(s),
            Json::Array(items) => ScriptValue::Array(items.into_iter().map(Self::from).collect()),
            Json::Object(fields) => ScriptValue::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, ScriptValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::String(s.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        ScriptValue::String(s)
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

impl From<Option<String>> for ScriptValue {
    fn from(s: Option<String>) -> Self {
        s.map(ScriptValue::String).unwrap_or(ScriptValue::Null)
    }
}

/// Strings print raw, everything else prints as JSON
impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::String(s) => f.write_str(s),
            ScriptValue::Undefined => f.write_str("undefined"),
            ScriptValue::Pattern(pattern) => write!(f, "{}", pattern),
            ScriptValue::Callback(_) => f.write_str("[function]"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}
