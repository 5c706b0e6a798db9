//! Typed parameter schemas for tools.
//!
//! Tools declare their parameters as [`ParameterSpec`] literals. At
//! registration those literals are checked once into a [`ParameterSchema`];
//! every invocation is then validated against it before the handler runs.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::mcp::error::{RegistryError, ToolError};

/// Semantic parameter types understood by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl SemanticType {
    /// Parse a textual type name; `None` for unsupported types
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Some(SemanticType::String),
            "integer" | "int" => Some(SemanticType::Integer),
            "number" | "float" => Some(SemanticType::Number),
            "boolean" | "bool" => Some(SemanticType::Boolean),
            "object" | "dict" => Some(SemanticType::Object),
            "array" | "list" => Some(SemanticType::Array),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SemanticType::String => "string",
            SemanticType::Integer => "integer",
            SemanticType::Number => "number",
            SemanticType::Boolean => "boolean",
            SemanticType::Object => "object",
            SemanticType::Array => "array",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, SemanticType::Integer | SemanticType::Number)
    }

    /// Strict match, no coercion between strings and numbers
    pub fn matches(self, value: &Value) -> bool {
        match self {
            SemanticType::String => value.is_string(),
            SemanticType::Integer => value.is_i64() || value.is_u64(),
            SemanticType::Number => value.is_number(),
            SemanticType::Boolean => value.is_boolean(),
            SemanticType::Object => value.is_object(),
            SemanticType::Array => value.is_array(),
        }
    }
}

/// Numeric bounds (inclusive) and enumeration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.enum_values.is_none()
    }

    fn check_value(&self, value: &Value) -> Result<(), String> {
        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min {
                if n < min {
                    return Err(format!("must be >= {min}, got {value}"));
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    return Err(format!("must be <= {max}, got {value}"));
                }
            }
        }
        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                let listed = allowed
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(format!("must be one of [{listed}], got {value}"));
            }
        }
        Ok(())
    }
}

/// Parameter declaration literal, checked at registration
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    name: String,
    type_name: String,
    required: bool,
    default: Option<Value>,
    description: String,
    constraints: Constraints,
}

impl ParameterSpec {
    /// Required parameter with a textual type name
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            required: true,
            default: None,
            description: String::new(),
            constraints: Constraints::default(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, "string")
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, "integer")
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, "number")
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, "boolean")
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, "object")
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, "array")
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Optional, absent unless supplied
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Optional, `value` inserted when absent
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.required = false;
        self.default = Some(value.into());
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.constraints.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.constraints.max = Some(max);
        self
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.constraints.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Force required-ness, used where it depends on configuration
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Checked parameter, as exposed on the declaration surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub semantic_type: SemanticType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub description: String,
    #[serde(skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
}

/// Ordered, checked schema of one tool's parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    parameters: IndexMap<String, Parameter>,
}

impl ParameterSchema {
    /// Check declaration literals; fails on anything the validator could not honour
    pub fn check(tool: &str, specs: Vec<ParameterSpec>) -> Result<Self, RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidSchema {
            tool: tool.to_string(),
            reason,
        };

        let mut parameters = IndexMap::with_capacity(specs.len());
        for spec in specs {
            if spec.name.trim().is_empty() {
                return Err(invalid("parameter name must not be empty".to_string()));
            }
            if parameters.contains_key(&spec.name) {
                return Err(invalid(format!("duplicate parameter '{}'", spec.name)));
            }

            let semantic_type =
                SemanticType::parse(&spec.type_name).ok_or_else(|| RegistryError::UnsupportedType {
                    tool: tool.to_string(),
                    parameter: spec.name.clone(),
                    type_name: spec.type_name.clone(),
                })?;

            let constraints = &spec.constraints;
            if (constraints.min.is_some() || constraints.max.is_some())
                && !semantic_type.is_numeric()
            {
                return Err(invalid(format!(
                    "parameter '{}' declares numeric bounds on a {} value",
                    spec.name,
                    semantic_type.as_str()
                )));
            }
            if let (Some(min), Some(max)) = (constraints.min, constraints.max) {
                if min > max {
                    return Err(invalid(format!(
                        "parameter '{}' has min {min} greater than max {max}",
                        spec.name
                    )));
                }
            }
            if let Some(allowed) = &constraints.enum_values {
                if matches!(
                    semantic_type,
                    SemanticType::Object | SemanticType::Array | SemanticType::Boolean
                ) {
                    return Err(invalid(format!(
                        "parameter '{}' cannot enumerate {} values",
                        spec.name,
                        semantic_type.as_str()
                    )));
                }
                if allowed.is_empty() {
                    return Err(invalid(format!(
                        "parameter '{}' has an empty enumeration",
                        spec.name
                    )));
                }
                if let Some(bad) = allowed.iter().find(|v| !semantic_type.matches(v)) {
                    return Err(invalid(format!(
                        "parameter '{}' enumeration member {bad} is not a {}",
                        spec.name,
                        semantic_type.as_str()
                    )));
                }
            }
            if let Some(default) = &spec.default {
                if spec.required {
                    return Err(invalid(format!(
                        "required parameter '{}' cannot declare a default",
                        spec.name
                    )));
                }
                if !semantic_type.matches(default) {
                    return Err(invalid(format!(
                        "parameter '{}' default {default} is not a {}",
                        spec.name,
                        semantic_type.as_str()
                    )));
                }
                constraints.check_value(default).map_err(|reason| {
                    invalid(format!("parameter '{}' default {reason}", spec.name))
                })?;
            }

            parameters.insert(
                spec.name.clone(),
                Parameter {
                    name: spec.name,
                    semantic_type,
                    required: spec.required,
                    default: spec.default,
                    description: spec.description,
                    constraints: spec.constraints,
                },
            );
        }

        Ok(Self { parameters })
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Validate raw protocol arguments, inserting defaults.
    ///
    /// Explicit `null` counts as absent. Undeclared arguments are dropped.
    pub fn validate(&self, arguments: &Value) -> Result<ToolArguments, ToolError> {
        let empty = Map::new();
        let supplied = match arguments {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(ToolError::invalid(
                    "arguments",
                    format!("expected an object, got {}", json_type_name(other)),
                ))
            }
        };

        let mut values = Map::new();
        for parameter in self.parameters.values() {
            let value = supplied.get(&parameter.name).filter(|v| !v.is_null());

            let value = match (value, &parameter.default) {
                (Some(value), _) => value,
                (None, Some(default)) => {
                    values.insert(parameter.name.clone(), default.clone());
                    continue;
                }
                (None, None) if parameter.required => {
                    return Err(ToolError::MissingArgument(parameter.name.clone()))
                }
                (None, None) => continue,
            };

            if !parameter.semantic_type.matches(value) {
                return Err(ToolError::invalid(
                    &parameter.name,
                    format!(
                        "expected {}, got {}",
                        parameter.semantic_type.as_str(),
                        json_type_name(value)
                    ),
                ));
            }
            parameter
                .constraints
                .check_value(value)
                .map_err(|reason| ToolError::invalid(&parameter.name, reason))?;

            values.insert(parameter.name.clone(), value.clone());
        }

        for name in supplied.keys().filter(|k| !self.parameters.contains_key(*k)) {
            tracing::debug!("Ignoring undeclared argument '{}'", name);
        }

        Ok(ToolArguments { values })
    }

    /// Render as a JSON Schema object for `tools/list`
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for parameter in self.parameters.values() {
            let mut property = Map::new();
            property.insert("type".into(), parameter.semantic_type.as_str().into());
            if !parameter.description.is_empty() {
                property.insert("description".into(), parameter.description.clone().into());
            }
            if let Some(default) = &parameter.default {
                property.insert("default".into(), default.clone());
            }
            if let Some(min) = parameter.constraints.min {
                property.insert("minimum".into(), bound_to_json(parameter, min));
            }
            if let Some(max) = parameter.constraints.max {
                property.insert("maximum".into(), bound_to_json(parameter, max));
            }
            if let Some(allowed) = &parameter.constraints.enum_values {
                property.insert("enum".into(), Value::Array(allowed.clone()));
            }
            if parameter.required {
                required.push(Value::String(parameter.name.clone()));
            }
            properties.insert(parameter.name.clone(), Value::Object(property));
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

fn bound_to_json(parameter: &Parameter, bound: f64) -> Value {
    if parameter.semantic_type == SemanticType::Integer && bound.fract() == 0.0 {
        Value::from(bound as i64)
    } else {
        Value::from(bound)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Arguments that passed validation, defaults included
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    values: Map<String, Value>,
}

impl ToolArguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    /// Deserialize into the tool's typed argument struct
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, ToolError> {
        serde_json::from_value(Value::Object(self.values.clone()))
            .map_err(|e| ToolError::invalid("arguments", e.to_string()))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}
