// Copyright 2025 Oxide Computer Company
//! Typed argument bag for commands
//!
//! [`Parameters`] wraps a JSON object.  Accessors convert loosely (a
//! `"12"` string reads as integer 12) because arguments arrive from query
//! strings and path variables as well as from JSON bodies.  Names may be
//! dotted paths into nested objects: `"dummy.key"`.

use crate::error::ApplicationError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Parameters(Map<String, Value>);

impl Parameters {
    pub fn new() -> Self {
        Parameters::default()
    }

    /// Builds parameters from `(name, value)` pairs.
    pub fn from_tuples<I, K, V>(tuples: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Parameters(tuples.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Serializes `value` into parameters.  Anything other than a JSON
    /// object (or null) is refused.
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self, ApplicationError> {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Ok(Parameters(map)),
            Ok(Value::Null) => Ok(Parameters::default()),
            Ok(other) => Err(ApplicationError::bad_request(
                "INVALID_DATA",
                format!("parameters must be an object, not {}", other),
            )),
            Err(e) => Err(ApplicationError::internal(
                "SERIALIZATION_ERROR",
                "failed to serialize parameters",
            )
            .with_cause(e)),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Returns the value at `path`, following dots into nested objects.  An
    /// exact top-level key containing dots takes precedence.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(path) {
            return Some(value);
        }
        let mut parts = path.split('.');
        let first = parts.next()?;
        parts.try_fold(self.0.get(first)?, |value, part| match value {
            Value::Object(map) => map.get(part),
            Value::Array(items) => {
                part.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            _ => None,
        })
    }

    pub fn contains_key(&self, path: &str) -> bool {
        self.get(path).is_some_and(|v| !v.is_null())
    }

    /// Sets the value at `path`, creating intermediate objects as needed.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let value = value.into();
        let mut parts: Vec<&str> = path.split('.').collect();
        let Some(last) = parts.pop() else {
            return;
        };
        let mut map = &mut self.0;
        for part in parts {
            let entry = map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(inner) = entry else {
                return;
            };
            map = inner;
        }
        map.insert(last.to_string(), value);
    }

    /// Sets top-level entry `name`, even if it contains dots.
    pub fn set_raw(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Copies every entry of `other` over this one.
    pub fn override_with(&mut self, other: &Parameters) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// String form of the value, if it has one.
    pub fn get_as_nullable_string(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn get_as_string(&self, path: &str) -> String {
        self.get_as_nullable_string(path).unwrap_or_default()
    }

    pub fn get_as_nullable_integer(&self, path: &str) -> Option<i64> {
        match self.get(path)? {
            Value::Number(n) => {
                n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            }
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
            }
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn get_as_integer(&self, path: &str) -> i64 {
        self.get_as_integer_with_default(path, 0)
    }

    pub fn get_as_integer_with_default(&self, path: &str, default: i64) -> i64 {
        self.get_as_nullable_integer(path).unwrap_or(default)
    }

    pub fn get_as_nullable_float(&self, path: &str) -> Option<f64> {
        match self.get(path)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn get_as_float(&self, path: &str) -> f64 {
        self.get_as_nullable_float(path).unwrap_or(0.0)
    }

    pub fn get_as_nullable_boolean(&self, path: &str) -> Option<bool> {
        match self.get(path)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" | "t" => Some(true),
                "false" | "0" | "no" | "n" | "f" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_as_boolean(&self, path: &str) -> bool {
        self.get_as_nullable_boolean(path).unwrap_or(false)
    }

    /// Nested object at `path` as its own parameter bag.  Missing or
    /// non-object values yield an empty bag.
    pub fn get_as_object(&self, path: &str) -> Parameters {
        match self.get(path) {
            Some(Value::Object(map)) => Parameters(map.clone()),
            _ => Parameters::default(),
        }
    }

    /// Deserializes the value at `path` into `T`.  A missing or null value is
    /// `Ok(None)`.
    pub fn get_as<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, ApplicationError> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => {
                serde_path_to_error::deserialize(value.clone()).map(Some).map_err(
                    |e| {
                        ApplicationError::bad_request(
                            "INVALID_DATA",
                            format!("parameter \"{}\" is malformed: {}", path, e),
                        )
                        .with_details("param", path)
                    },
                )
            }
        }
    }
}

impl From<Map<String, Value>> for Parameters {
    fn from(map: Map<String, Value>) -> Self {
        Parameters(map)
    }
}
