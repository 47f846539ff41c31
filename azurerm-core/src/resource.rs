//! Resource - Representing desired configuration and remote state

use std::collections::HashMap;
use std::fmt;

/// Local address of a resource in a configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceAddress {
    /// Resource type (e.g., "azurerm_app_service_extension")
    pub resource_type: String,
    /// Resource name (identifier specified in the configuration)
    pub name: String,
}

impl ResourceAddress {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Convert a JSON value, dropping nulls
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::Int(i))
                } else {
                    n.as_f64().map(|f| Value::Int(f as i64))
                }
            }
            serde_json::Value::Array(arr) => {
                Some(Value::List(arr.iter().filter_map(Value::from_json).collect()))
            }
            serde_json::Value::Object(obj) => Some(Value::Map(
                obj.iter()
                    .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
            serde_json::Value::Null => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// Read typed attributes out of an attribute map
pub trait Attributes {
    fn attrs(&self) -> &HashMap<String, Value>;

    fn get_str(&self, key: &str) -> Option<&str> {
        self.attrs().get(key).and_then(Value::as_str)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.attrs().get(key) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.attrs().get(key) {
            Some(Value::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// A nested block: either a map, or a single-element list of maps
    fn get_block(&self, key: &str) -> Option<&HashMap<String, Value>> {
        match self.attrs().get(key) {
            Some(Value::Map(m)) => Some(m),
            Some(Value::List(items)) => items.first().and_then(Value::as_map),
            _ => None,
        }
    }
}

impl Attributes for HashMap<String, Value> {
    fn attrs(&self) -> &HashMap<String, Value> {
        self
    }
}

/// Desired configuration declared by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub address: ResourceAddress,
    pub attributes: HashMap<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: ResourceAddress::new(resource_type, name),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl Attributes for Resource {
    fn attrs(&self) -> &HashMap<String, Value> {
        &self.attributes
    }
}

/// Current state fetched from the control plane
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub address: ResourceAddress,
    /// ARM resource identifier (/subscriptions/.../resourceGroups/...)
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    /// Whether this state exists
    pub exists: bool,
}

impl State {
    pub fn not_found(address: ResourceAddress) -> Self {
        Self {
            address,
            identifier: None,
            attributes: HashMap::new(),
            exists: false,
        }
    }

    pub fn existing(address: ResourceAddress, attributes: HashMap<String, Value>) -> Self {
        Self {
            address,
            identifier: None,
            attributes,
            exists: true,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

impl Attributes for State {
    fn attrs(&self) -> &HashMap<String, Value> {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_conversion_drops_nulls() {
        let json = serde_json::json!({
            "name": "dr",
            "count": 3,
            "partner": null,
            "tags": ["a", "b"],
        });
        let value = Value::from_json(&json).unwrap();
        let map = value.as_map().unwrap();

        assert_eq!(map.get_str("name"), Some("dr"));
        assert_eq!(map.get_int("count"), Some(3));
        assert!(!map.contains_key("partner"));
        assert_eq!(
            map.get("tags"),
            Some(&Value::List(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn block_accepts_single_element_list() {
        let mut inner = HashMap::new();
        inner.insert("type".to_string(), Value::from("Avro"));
        let resource = Resource::new("t", "n")
            .with_attribute("serialization", Value::List(vec![Value::Map(inner)]));

        let block = resource.get_block("serialization").unwrap();
        assert_eq!(block.get_str("type"), Some("Avro"));
    }

    #[test]
    fn address_display() {
        let address = ResourceAddress::new("azurerm_app_service_extension", "ext");
        assert_eq!(address.to_string(), "azurerm_app_service_extension.ext");
    }
}
