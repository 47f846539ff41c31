//! Schema - Define attribute schemas for resources
//!
//! Providers define a schema for each resource type. The schema drives
//! validation of the desired configuration, the differ (force-new attributes
//! turn an update into a replacement) and state redaction (sensitive attributes).

use std::collections::HashMap;
use std::fmt;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    String,
    Int,
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    List(Box<AttributeType>),
    Map(Box<AttributeType>),
    /// Nested block with its own attributes (single instance)
    Block(Box<ResourceSchema>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v.eq_ignore_ascii_case(s)) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { base, validate, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|message| TypeError::ValidationFailed { message })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Block(schema), Value::Map(map)) => schema
                .validate(map)
                .map_err(|errors| TypeError::BlockError { errors }),

            (AttributeType::Block(schema), Value::List(items)) if items.len() <= 1 => {
                match items.first() {
                    Some(Value::Map(map)) => schema
                        .validate(map)
                        .map_err(|errors| TypeError::BlockError { errors }),
                    Some(other) => Err(TypeError::TypeMismatch {
                        expected: self.type_name(),
                        got: other.type_name(),
                    }),
                    None => Ok(()),
                }
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Block(schema) => format!("Block({})", schema.resource_type),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Unknown attribute '{name}'")]
    UnknownAttribute { name: String },

    #[error("Attribute '{name}' is computed and cannot be set")]
    ReadOnly { name: String },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },

    #[error("Block: {}", errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    BlockError { errors: Vec<TypeError> },
}

impl TypeError {
    /// Attach the attribute name to a value-level error
    fn in_attribute(self, name: &str) -> TypeError {
        match self {
            TypeError::ValidationFailed { message } => TypeError::ValidationFailed {
                message: format!("{}: {}", name, message),
            },
            other => other,
        }
    }
}

impl Value {
    fn type_name(&self) -> String {
        match self {
            Value::String(_) => "String".to_string(),
            Value::Int(_) => "Int".to_string(),
            Value::Bool(_) => "Bool".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Map(_) => "Map".to_string(),
        }
    }
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// Set by the control plane, never by the caller
    pub computed: bool,
    /// Changing this attribute requires replacing the resource
    pub force_new: bool,
    /// Persisted but hidden from plan output
    pub sensitive: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            computed: false,
            force_new: false,
            sensitive: false,
            default: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Validate resource attributes
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        for (name, schema) in &self.attributes {
            if schema.required && !attributes.contains_key(name) && schema.default.is_none() {
                errors.push(TypeError::MissingRequired { name: name.clone() });
            }
        }

        for (name, value) in attributes {
            match self.attributes.get(name) {
                Some(schema) if schema.computed && !schema.required => {
                    errors.push(TypeError::ReadOnly { name: name.clone() });
                }
                Some(schema) => {
                    if let Err(e) = schema.attr_type.validate(value) {
                        errors.push(e.in_attribute(name));
                    }
                }
                None => errors.push(TypeError::UnknownAttribute { name: name.clone() }),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Fill in schema defaults for attributes the caller left out
    pub fn apply_defaults(&self, attributes: &mut HashMap<String, Value>) {
        for (name, schema) in &self.attributes {
            if let Some(ref default) = schema.default {
                attributes
                    .entry(name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }

    pub fn is_force_new(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.force_new)
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.sensitive)
    }

    pub fn is_computed(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.computed)
    }

    pub fn sensitive_attributes(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .attributes
            .values()
            .filter(|a| a.sensitive)
            .map(|a| a.name.clone())
            .collect();
        names.sort();
        names
    }
}

/// Validators shared by resource schemas
pub mod validators {
    use std::sync::LazyLock;

    use regex::Regex;

    use super::AttributeType;
    use crate::resource::Value;

    static NAMESPACE_NAME: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^[a-zA-Z][-a-zA-Z0-9]{4,48}[a-zA-Z0-9]$").expect("valid regex")
    });

    static RESOURCE_GROUP_NAME: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^[-\w\._\(\)]+$").expect("valid regex"));

    fn string_of(value: &Value) -> Result<&str, String> {
        value.as_str().ok_or_else(|| "Expected string".to_string())
    }

    pub fn no_empty_strings(value: &Value) -> Result<(), String> {
        if string_of(value)?.trim().is_empty() {
            Err("must not be empty or consist only of whitespace".to_string())
        } else {
            Ok(())
        }
    }

    /// A name interpolated as one segment of a resource path
    pub fn path_segment_name(value: &Value) -> Result<(), String> {
        no_empty_strings(value)?;
        let s = string_of(value)?;
        match s
            .chars()
            .find(|c| matches!(c, '/' | '?' | '#' | '%') || c.is_whitespace())
        {
            Some(c) => Err(format!("{:?} must not contain {:?}", s, c)),
            None => Ok(()),
        }
    }

    pub fn servicebus_namespace_name(value: &Value) -> Result<(), String> {
        let s = string_of(value)?;
        if NAMESPACE_NAME.is_match(s) {
            Ok(())
        } else {
            Err(format!(
                "{:?} must be 6-50 characters, start with a letter, end with a letter or number and contain only letters, numbers and hyphens",
                s
            ))
        }
    }

    pub fn resource_group_name(value: &Value) -> Result<(), String> {
        let s = string_of(value)?;
        if s.is_empty() || s.len() > 90 {
            return Err(format!("{:?} must be 1-90 characters", s));
        }
        if s.ends_with('.') {
            return Err(format!("{:?} cannot end with a period", s));
        }
        if !RESOURCE_GROUP_NAME.is_match(s) {
            return Err(format!(
                "{:?} may only contain alphanumerics, underscores, parentheses, hyphens and periods",
                s
            ));
        }
        Ok(())
    }

    pub fn arm_resource_id(value: &Value) -> Result<(), String> {
        let s = string_of(value)?;
        crate::id::ResourceId::parse(s)
            .map(|_| ())
            .map_err(|e| format!("{:?} is not a resource ID: {}", s, e))
    }

    pub fn non_empty_string() -> AttributeType {
        AttributeType::Custom {
            name: "NonEmptyString".to_string(),
            base: Box::new(AttributeType::String),
            validate: no_empty_strings,
        }
    }

    pub fn path_segment() -> AttributeType {
        AttributeType::Custom {
            name: "PathSegment".to_string(),
            base: Box::new(AttributeType::String),
            validate: path_segment_name,
        }
    }

    pub fn servicebus_namespace() -> AttributeType {
        AttributeType::Custom {
            name: "ServiceBusNamespaceName".to_string(),
            base: Box::new(AttributeType::String),
            validate: servicebus_namespace_name,
        }
    }

    pub fn resource_id() -> AttributeType {
        AttributeType::Custom {
            name: "ResourceId".to_string(),
            base: Box::new(AttributeType::String),
            validate: arm_resource_id,
        }
    }

    pub fn resource_group() -> AttributeType {
        AttributeType::Custom {
            name: "ResourceGroupName".to_string(),
            base: Box::new(AttributeType::String),
            validate: resource_group_name,
        }
    }
}
