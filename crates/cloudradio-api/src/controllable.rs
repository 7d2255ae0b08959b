//! Host objects exposed through the control plane.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ControlError {
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),

    #[error("invalid value for '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("unknown callback '{0}'")]
    UnknownCall(String),

    #[error("callback '{name}' failed: {reason}")]
    CallFailed { name: String, reason: String },
}

/// A running flowgraph (or anything else) whose named attributes can be read
/// and written over HTTP.
///
/// Writes are two-phase: the control plane runs `check_attribute` for every
/// field of a request before calling `set_attribute` on any of them.
pub trait Controllable: Send + Sync {
    fn get_attribute(&self, name: &str) -> Option<Value>;

    fn check_attribute(&self, _name: &str, _value: &Value) -> Result<(), ControlError> {
        Ok(())
    }

    fn set_attribute(&self, name: &str, value: Value) -> Result<(), ControlError>;

    fn call(&self, name: &str, _args: Value) -> Result<Value, ControlError> {
        Err(ControlError::UnknownCall(name.to_string()))
    }
}

pub type Callback = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// JSON-valued attributes with optional named callbacks.
///
/// An attribute keeps the JSON kind it was created with; writing a string to
/// a numeric attribute is rejected. Writes to names that were never inserted
/// are rejected too.
#[derive(Clone, Default)]
pub struct AttributeMap {
    values: Arc<RwLock<BTreeMap<String, Value>>>,
    callbacks: Arc<RwLock<HashMap<String, Callback>>>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn with_callback<F>(self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register_callback(name, callback);
        self
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn register_callback<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(callback));
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let callbacks: Vec<String> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("AttributeMap")
            .field("values", &self.snapshot())
            .field("callbacks", &callbacks)
            .finish()
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Controllable for AttributeMap {
    fn get_attribute(&self, name: &str) -> Option<Value> {
        self.get(name)
    }

    fn check_attribute(&self, name: &str, value: &Value) -> Result<(), ControlError> {
        let current = self
            .get(name)
            .ok_or_else(|| ControlError::UnknownAttribute(name.to_string()))?;
        // A null attribute accepts any kind.
        if current.is_null() || kind(&current) == kind(value) {
            Ok(())
        } else {
            Err(ControlError::InvalidValue {
                name: name.to_string(),
                reason: format!("expected {}, got {}", kind(&current), kind(value)),
            })
        }
    }

    fn set_attribute(&self, name: &str, value: Value) -> Result<(), ControlError> {
        self.check_attribute(name, &value)?;
        self.insert(name, value);
        Ok(())
    }

    fn call(&self, name: &str, args: Value) -> Result<Value, ControlError> {
        let callback = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ControlError::UnknownCall(name.to_string()))?;
        callback(args).map_err(|reason| ControlError::CallFailed {
            name: name.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_keeps_kind() {
        let host = AttributeMap::new()
            .with("freq", 915e6)
            .with("gain", 20)
            .with("label", "rx0");

        host.set_attribute("freq", json!(433.92e6)).unwrap();
        host.set_attribute("gain", json!(31.5)).unwrap();
        assert_eq!(host.get("freq"), Some(json!(433.92e6)));

        let err = host.set_attribute("label", json!(3)).unwrap_err();
        assert!(matches!(err, ControlError::InvalidValue { .. }));
        assert_eq!(host.get("label"), Some(json!("rx0")));
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let host = AttributeMap::new();
        assert_eq!(
            host.check_attribute("missing", &json!(1)),
            Err(ControlError::UnknownAttribute("missing".to_string()))
        );
    }

    #[test]
    fn test_null_attribute_accepts_any_kind() {
        let host = AttributeMap::new().with("note", Value::Null);
        host.set_attribute("note", json!({"a": 1})).unwrap();
        assert_eq!(host.get("note"), Some(json!({"a": 1})));
    }

    #[test]
    fn test_callbacks() {
        let host = AttributeMap::new().with_callback("double", |args| {
            args.as_f64()
                .map(|x| json!(x * 2.0))
                .ok_or_else(|| "expected a number".to_string())
        });

        assert_eq!(host.call("double", json!(2.5)).unwrap(), json!(5.0));
        assert!(matches!(
            host.call("double", json!("x")),
            Err(ControlError::CallFailed { .. })
        ));
        assert_eq!(
            host.call("reset", Value::Null),
            Err(ControlError::UnknownCall("reset".to_string()))
        );
    }
}
