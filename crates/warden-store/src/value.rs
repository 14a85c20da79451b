// value.rs - Attribute values and the entity snapshot.
//
// Boolean attributes exist only by presence. `AttributeValue` is what can be
// stored, and it has no `false` variant: an input of `false` or `Clear`
// normalises to absence before it reaches a backend.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use warden_audit::EntityRef;

/// Derived staff marker, present exactly when the user holds a role.
pub const TEAM: &str = "TEAM";
/// Marker for synced elevated-group members.
pub const DEVELOPER: &str = "DEVELOPER";
pub const BETA: &str = "BETA";
pub const PREMIUM: &str = "PREMIUM";
pub const BLACKLISTED: &str = "BLACKLISTED";
pub const VERIFIED: &str = "VERIFIED";
pub const LANG: &str = "LANG";

/// A stored attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeValue {
    /// Boolean-by-presence. Stored as JSON `true`.
    Flag,
    Text(String),
    Integer(i64),
}

impl AttributeValue {
    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::Flag => Value::Bool(true),
            AttributeValue::Text(text) => Value::String(text.clone()),
            AttributeValue::Integer(n) => Value::from(*n),
        }
    }

    /// Decode a stored JSON value. `false`, `null`, floats and containers
    /// are not valid stored values.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(true) => Some(AttributeValue::Flag),
            Value::String(text) => Some(AttributeValue::Text(text.clone())),
            Value::Number(n) => n.as_i64().map(AttributeValue::Integer),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Flag => f.write_str("true"),
            AttributeValue::Text(text) => f.write_str(text),
            AttributeValue::Integer(n) => write!(f, "{}", n),
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AttributeValue::Flag => serializer.serialize_bool(true),
            AttributeValue::Text(text) => serializer.serialize_str(text),
            AttributeValue::Integer(n) => serializer.serialize_i64(*n),
        }
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        AttributeValue::from_json(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("not a storable attribute value: {}", raw))
        })
    }
}

/// What a caller asks `set` to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeInput {
    Bool(bool),
    Text(String),
    Integer(i64),
    /// Remove the attribute.
    Clear,
}

impl AttributeInput {
    /// Map to the stored form. `Bool(false)` and `Clear` become absence.
    pub fn normalize(self) -> Option<AttributeValue> {
        match self {
            AttributeInput::Bool(true) => Some(AttributeValue::Flag),
            AttributeInput::Bool(false) | AttributeInput::Clear => None,
            AttributeInput::Text(text) => Some(AttributeValue::Text(text)),
            AttributeInput::Integer(n) => Some(AttributeValue::Integer(n)),
        }
    }

    /// Parse an operator-typed value: `true/yes/1`, `false/no/0`, digits,
    /// or free text.
    pub fn parse_cli(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => return AttributeInput::Bool(true),
            "false" | "no" | "0" => return AttributeInput::Bool(false),
            _ => {}
        }
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = trimmed.parse::<i64>() {
                return AttributeInput::Integer(n);
            }
        }
        AttributeInput::Text(trimmed.to_string())
    }
}

impl From<bool> for AttributeInput {
    fn from(value: bool) -> Self {
        AttributeInput::Bool(value)
    }
}

impl From<&str> for AttributeInput {
    fn from(value: &str) -> Self {
        AttributeInput::Text(value.to_string())
    }
}

impl From<String> for AttributeInput {
    fn from(value: String) -> Self {
        AttributeInput::Text(value)
    }
}

impl From<i64> for AttributeInput {
    fn from(value: i64) -> Self {
        AttributeInput::Integer(value)
    }
}

impl From<AttributeValue> for AttributeInput {
    fn from(value: AttributeValue) -> Self {
        match value {
            AttributeValue::Flag => AttributeInput::Bool(true),
            AttributeValue::Text(text) => AttributeInput::Text(text),
            AttributeValue::Integer(n) => AttributeInput::Integer(n),
        }
    }
}

impl<T: Into<AttributeInput>> From<Option<T>> for AttributeInput {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(AttributeInput::Clear)
    }
}

/// Upper-case and validate an attribute name.
pub fn normalize_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return None;
    }
    Some(trimmed.to_uppercase())
}

/// Snapshot of one entity row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: EntityRef,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Opaque caller data, never interpreted here.
    #[serde(default = "empty_object")]
    pub data: Value,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl Entity {
    /// A fresh row with no attributes.
    pub fn new(key: EntityRef, now: DateTime<Utc>) -> Self {
        Self {
            key,
            attributes: BTreeMap::new(),
            data: empty_object(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Store or remove one attribute. Returns the previous value.
    pub fn apply(&mut self, name: &str, value: Option<AttributeValue>) -> Option<AttributeValue> {
        match value {
            Some(value) => self.attributes.insert(name.to_string(), value),
            None => self.attributes.remove(name),
        }
    }
}
