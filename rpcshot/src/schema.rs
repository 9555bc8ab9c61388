// Copyright 2025 Oxide Computer Company
//! Lightweight validation schemas for request data and command arguments.
//!
//! Values that arrive through query strings and path variables are always
//! strings, so type checks here are lenient: `"42"` satisfies an integer
//! property and `"true"` satisfies a boolean one.  JSON bodies are checked
//! the same way, which keeps a single schema usable for every argument
//! source.

use crate::error::ApplicationError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Data types understood by [`ObjectSchema`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TypeCode {
    /// anything goes
    Unknown,
    String,
    Boolean,
    Integer,
    Long,
    Float,
    Double,
    /// RFC 3339 timestamp
    DateTime,
    /// whole number of milliseconds
    Duration,
    Object,
    Map,
    Array,
    /// string or integer member of an enumeration
    Enum,
}

impl TypeCode {
    /// Returns whether `value` is acceptable for this type.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (TypeCode::Unknown, _) => true,
            (TypeCode::String, Value::String(_)) => true,
            (TypeCode::Boolean, Value::Bool(_)) => true,
            (TypeCode::Boolean, Value::String(s)) => {
                s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false")
            }
            (
                TypeCode::Integer | TypeCode::Long | TypeCode::Duration,
                Value::Number(n),
            ) => n.is_i64() || n.is_u64(),
            (
                TypeCode::Integer | TypeCode::Long | TypeCode::Duration,
                Value::String(s),
            ) => s.parse::<i64>().is_ok(),
            (TypeCode::Float | TypeCode::Double, Value::Number(_)) => true,
            (TypeCode::Float | TypeCode::Double, Value::String(s)) => {
                s.parse::<f64>().is_ok()
            }
            (TypeCode::DateTime, Value::String(s)) => {
                chrono::DateTime::parse_from_rfc3339(s).is_ok()
            }
            (TypeCode::Object | TypeCode::Map, Value::Object(_)) => true,
            (TypeCode::Array, Value::Array(_)) => true,
            (TypeCode::Enum, Value::String(_)) => true,
            (TypeCode::Enum, Value::Number(n)) => n.is_i64(),
            _ => false,
        }
    }

    /// Name of the matching OpenAPI primitive type.
    pub fn openapi_type(&self) -> &'static str {
        match self {
            TypeCode::Integer | TypeCode::Long => "integer",
            TypeCode::Float | TypeCode::Double => "number",
            TypeCode::String => "string",
            TypeCode::Boolean => "boolean",
            TypeCode::Array => "array",
            _ => "object",
        }
    }
}

/// One property of an [`ObjectSchema`].
#[derive(Clone, Debug, PartialEq)]
pub struct PropertySchema {
    pub name: String,
    pub value_type: TypeCode,
    pub required: bool,
    /// schema of a nested object value
    pub object: Option<ObjectSchema>,
    /// element type of an array value
    pub items: Option<TypeCode>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationResultType {
    /// reported, but doesn't make the value invalid
    Warning,
    Error,
}

/// A single validation finding.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ValidationResult {
    /// dotted path of the offending property ("" for the root)
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ValidationResultType,
    pub code: String,
    pub message: String,
}

/// Describes the properties expected in a JSON object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectSchema {
    properties: Vec<PropertySchema>,
    allow_undefined: bool,
}

impl ObjectSchema {
    pub fn new() -> Self {
        ObjectSchema::default()
    }

    pub fn with_required_property(self, name: &str, value_type: TypeCode) -> Self {
        self.with_property(name, value_type, true, None, None)
    }

    pub fn with_optional_property(self, name: &str, value_type: TypeCode) -> Self {
        self.with_property(name, value_type, false, None, None)
    }

    pub fn with_required_object(self, name: &str, schema: ObjectSchema) -> Self {
        self.with_property(name, TypeCode::Object, true, Some(schema), None)
    }

    pub fn with_optional_object(self, name: &str, schema: ObjectSchema) -> Self {
        self.with_property(name, TypeCode::Object, false, Some(schema), None)
    }

    pub fn with_required_array(self, name: &str, items: TypeCode) -> Self {
        self.with_property(name, TypeCode::Array, true, None, Some(items))
    }

    pub fn with_optional_array(self, name: &str, items: TypeCode) -> Self {
        self.with_property(name, TypeCode::Array, false, None, Some(items))
    }

    /// When set, properties not listed in the schema are accepted.
    pub fn allow_undefined(mut self, allow: bool) -> Self {
        self.allow_undefined = allow;
        self
    }

    fn with_property(
        mut self,
        name: &str,
        value_type: TypeCode,
        required: bool,
        object: Option<ObjectSchema>,
        items: Option<TypeCode>,
    ) -> Self {
        self.properties.push(PropertySchema {
            name: name.to_string(),
            value_type,
            required,
            object,
            items,
        });
        self
    }

    pub fn properties(&self) -> &[PropertySchema] {
        &self.properties
    }

    /// Checks `value` against this schema, returning every failure found.
    pub fn validate(&self, value: &Value) -> Vec<ValidationResult> {
        let mut results = Vec::new();
        self.validate_at("", value, &mut results);
        results
    }

    /// Like [`ObjectSchema::validate`], but folds errors into a single
    /// 400 `INVALID_DATA` error whose details list each of them.  Warnings
    /// (such as unexpected properties) don't fail validation.
    pub fn validate_and_return_error(
        &self,
        correlation_id: Option<&str>,
        value: &Value,
    ) -> Result<(), ApplicationError> {
        let results: Vec<ValidationResult> = self
            .validate(value)
            .into_iter()
            .filter(|r| r.kind == ValidationResultType::Error)
            .collect();
        if results.is_empty() {
            return Ok(());
        }

        let message = results
            .iter()
            .map(|r| r.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let errors = serde_json::to_value(&results).unwrap_or(Value::Null);
        Err(ApplicationError::bad_request(
            "INVALID_DATA",
            format!("validation failed: {}", message),
        )
        .with_correlation_id(correlation_id)
        .with_details("errors", errors))
    }

    fn validate_at(
        &self,
        path: &str,
        value: &Value,
        results: &mut Vec<ValidationResult>,
    ) {
        let object = match value {
            Value::Object(object) => object,
            Value::Null => {
                // A missing body is an empty argument set; required
                // properties still get reported below.
                self.check_missing(path, &serde_json::Map::new(), results);
                return;
            }
            _ => {
                results.push(ValidationResult {
                    path: path.to_string(),
                    kind: ValidationResultType::Error,
                    code: "VALUE_ISNOT_OBJECT".to_string(),
                    message: format!("{} must be an object", display(path)),
                });
                return;
            }
        };

        self.check_missing(path, object, results);

        for (name, property_value) in object {
            let property_path = join(path, name);
            let Some(property) =
                self.properties.iter().find(|p| p.name == *name)
            else {
                if !self.allow_undefined {
                    results.push(ValidationResult {
                        kind: ValidationResultType::Warning,
                        code: "UNEXPECTED_PROPERTY".to_string(),
                        message: format!(
                            "{} is not expected",
                            display(&property_path)
                        ),
                        path: property_path,
                    });
                }
                continue;
            };

            if property_value.is_null() {
                continue;
            }

            if !property.value_type.matches(property_value) {
                results.push(ValidationResult {
                    kind: ValidationResultType::Error,
                    code: "TYPE_MISMATCH".to_string(),
                    message: format!(
                        "{} expected to be {:?}",
                        display(&property_path),
                        property.value_type
                    ),
                    path: property_path,
                });
                continue;
            }

            if let Some(schema) = &property.object {
                schema.validate_at(&property_path, property_value, results);
            }

            if let (Some(items), Value::Array(elements)) =
                (&property.items, property_value)
            {
                for (i, element) in elements.iter().enumerate() {
                    if !element.is_null() && !items.matches(element) {
                        let element_path = format!("{}[{}]", property_path, i);
                        results.push(ValidationResult {
                            kind: ValidationResultType::Error,
                            code: "TYPE_MISMATCH".to_string(),
                            message: format!(
                                "{} expected to be {:?}",
                                element_path, items
                            ),
                            path: element_path,
                        });
                    }
                }
            }
        }
    }

    fn check_missing(
        &self,
        path: &str,
        object: &serde_json::Map<String, Value>,
        results: &mut Vec<ValidationResult>,
    ) {
        for property in self.properties.iter().filter(|p| p.required) {
            let missing = object.get(&property.name).map_or(true, Value::is_null);
            if missing {
                let property_path = join(path, &property.name);
                results.push(ValidationResult {
                    kind: ValidationResultType::Error,
                    code: "VALUE_IS_NULL".to_string(),
                    message: format!("{} must not be null", property_path),
                    path: property_path,
                });
            }
        }
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn display(path: &str) -> &str {
    if path.is_empty() {
        "value"
    } else {
        path
    }
}
