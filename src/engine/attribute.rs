//! Scoped attribute names, attribute values and per-transaction changes.

use crate::error::PersistenceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Shared, immutable attribute value as stored by the engine.
pub type SharedValue = Arc<Value>;

/// Attribute scope. Only `Application` attributes are persisted and undoable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeScope {
    Application,
    EngineControl,
}

impl AttributeScope {
    pub fn prefix(self) -> &'static str {
        match self {
            AttributeScope::Application => "application",
            AttributeScope::EngineControl => "engine-control",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "application" => Some(AttributeScope::Application),
            "engine-control" => Some(AttributeScope::EngineControl),
            _ => None,
        }
    }
}

/// Two-part attribute name `(scope, local_name)`.
///
/// The textual form is `<scope>:<local_name>`, e.g. `application:board.width`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeName {
    scope: AttributeScope,
    local_name: String,
}

impl AttributeName {
    pub fn new(scope: AttributeScope, local_name: impl Into<String>) -> Self {
        Self {
            scope,
            local_name: local_name.into(),
        }
    }

    pub fn application(local_name: impl Into<String>) -> Self {
        Self::new(AttributeScope::Application, local_name)
    }

    pub fn engine_control(local_name: impl Into<String>) -> Self {
        Self::new(AttributeScope::EngineControl, local_name)
    }

    pub fn scope(&self) -> AttributeScope {
        self.scope
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn is_application(&self) -> bool {
        self.scope == AttributeScope::Application
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope.prefix(), self.local_name)
    }
}

impl FromStr for AttributeName {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let illegal = || PersistenceError::IllegalAttributeName(s.to_string());
        let (prefix, local_name) = s.split_once(':').ok_or_else(illegal)?;
        let scope = AttributeScope::from_prefix(prefix).ok_or_else(illegal)?;
        if local_name.is_empty() {
            return Err(illegal());
        }
        Ok(Self::new(scope, local_name))
    }
}

/// Opaque attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Identity fast path, then value equality.
pub fn values_equal(a: &SharedValue, b: &SharedValue) -> bool {
    Arc::ptr_eq(a, b) || a == b
}

/// Transition of a single attribute within one transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeChange {
    Added {
        name: AttributeName,
        new_value: SharedValue,
    },
    Removed {
        name: AttributeName,
        old_value: SharedValue,
    },
    Changed {
        name: AttributeName,
        old_value: SharedValue,
        new_value: SharedValue,
    },
}

impl AttributeChange {
    /// Classifies a transition; `None` when nothing changed.
    pub fn between(
        name: &AttributeName,
        old_value: Option<&SharedValue>,
        new_value: Option<&SharedValue>,
    ) -> Option<Self> {
        match (old_value, new_value) {
            (None, None) => None,
            (None, Some(new_value)) => Some(AttributeChange::Added {
                name: name.clone(),
                new_value: Arc::clone(new_value),
            }),
            (Some(old_value), None) => Some(AttributeChange::Removed {
                name: name.clone(),
                old_value: Arc::clone(old_value),
            }),
            (Some(old_value), Some(new_value)) if values_equal(old_value, new_value) => None,
            (Some(old_value), Some(new_value)) => Some(AttributeChange::Changed {
                name: name.clone(),
                old_value: Arc::clone(old_value),
                new_value: Arc::clone(new_value),
            }),
        }
    }

    pub fn name(&self) -> &AttributeName {
        match self {
            AttributeChange::Added { name, .. }
            | AttributeChange::Removed { name, .. }
            | AttributeChange::Changed { name, .. } => name,
        }
    }

    pub fn old_value(&self) -> Option<&SharedValue> {
        match self {
            AttributeChange::Added { .. } => None,
            AttributeChange::Removed { old_value, .. }
            | AttributeChange::Changed { old_value, .. } => Some(old_value),
        }
    }

    pub fn new_value(&self) -> Option<&SharedValue> {
        match self {
            AttributeChange::Removed { .. } => None,
            AttributeChange::Added { new_value, .. }
            | AttributeChange::Changed { new_value, .. } => Some(new_value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        let name = AttributeName::application("board.width");
        assert_eq!(name.to_string(), "application:board.width");
        assert_eq!("application:board.width".parse::<AttributeName>(), Ok(name));

        let control: AttributeName = "engine-control:history".parse().unwrap();
        assert_eq!(control.scope(), AttributeScope::EngineControl);
        assert_eq!(control.local_name(), "history");
    }

    #[test]
    fn test_illegal_names() {
        for raw in ["board", "session:x", "application:", ":x"] {
            assert_eq!(
                raw.parse::<AttributeName>(),
                Err(PersistenceError::IllegalAttributeName(raw.to_string()))
            );
        }
    }

    #[test]
    fn test_change_classification() {
        let name = AttributeName::application("x");
        let one = Arc::new(Value::Integer(1));
        let other_one = Arc::new(Value::Integer(1));
        let two = Arc::new(Value::Integer(2));

        assert!(AttributeChange::between(&name, None, None).is_none());
        assert!(AttributeChange::between(&name, Some(&one), Some(&one)).is_none());
        assert!(AttributeChange::between(&name, Some(&one), Some(&other_one)).is_none());
        assert!(matches!(
            AttributeChange::between(&name, None, Some(&one)),
            Some(AttributeChange::Added { .. })
        ));
        assert!(matches!(
            AttributeChange::between(&name, Some(&one), None),
            Some(AttributeChange::Removed { .. })
        ));
        let changed = AttributeChange::between(&name, Some(&one), Some(&two)).unwrap();
        assert_eq!(changed.old_value(), Some(&one));
        assert_eq!(changed.new_value(), Some(&two));
    }
}
