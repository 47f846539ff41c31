//! State file structures for persisting managed resources

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use azurerm_core::resource::{ResourceAddress, State, Value};

/// Shown in place of sensitive values when state is displayed
pub const SENSITIVE_PLACEHOLDER: &str = "(sensitive)";

/// The main state file structure that persists to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    pub lineage: String,
    /// Version of the tool that last modified this state
    pub tool_version: String,
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Increment serial and stamp the tool version for a new state write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.tool_version = env!("CARGO_PKG_VERSION").to_string();
    }

    pub fn find_resource(&self, address: &ResourceAddress) -> Option<&ResourceState> {
        self.resources.iter().find(|r| r.matches(address))
    }

    /// Add or replace the entry for the resource's address
    pub fn upsert_resource(&mut self, resource: ResourceState) {
        let address = resource.address();
        match self.resources.iter_mut().find(|r| r.matches(&address)) {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    pub fn remove_resource(&mut self, address: &ResourceAddress) -> Option<ResourceState> {
        let pos = self.resources.iter().position(|r| r.matches(address))?;
        Some(self.resources.remove(pos))
    }

    /// Record the outcome of a read or mutation; absent resources are dropped
    pub fn record(&mut self, state: &State, sensitive_attributes: Vec<String>) {
        if state.exists && state.identifier.is_some() {
            self.upsert_resource(ResourceState::from_state(state, sensitive_attributes));
        } else {
            self.remove_resource(&state.address);
        }
    }

    /// Persisted states keyed by address, as the differ expects them
    pub fn states(&self) -> HashMap<ResourceAddress, State> {
        self.resources
            .iter()
            .map(|r| (r.address(), r.to_state()))
            .collect()
    }

    /// Copy with every sensitive value masked, for display
    pub fn redacted(&self) -> StateFile {
        StateFile {
            resources: self.resources.iter().map(ResourceState::redacted).collect(),
            ..self.clone()
        }
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "azurerm_app_service_extension")
    pub resource_type: String,
    pub name: String,
    /// ARM resource identifier
    pub identifier: String,
    /// Last-read projection of the remote resource
    pub attributes: HashMap<String, serde_json::Value>,
    /// Attributes kept in the file but masked on display
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensitive_attributes: Vec<String>,
}

impl ResourceState {
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            identifier: identifier.into(),
            attributes: HashMap::new(),
            sensitive_attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_sensitive_attributes(mut self, names: Vec<String>) -> Self {
        self.sensitive_attributes = names;
        self
    }

    pub fn address(&self) -> ResourceAddress {
        ResourceAddress::new(&self.resource_type, &self.name)
    }

    fn matches(&self, address: &ResourceAddress) -> bool {
        self.resource_type == address.resource_type && self.name == address.name
    }

    pub fn from_state(state: &State, sensitive_attributes: Vec<String>) -> Self {
        Self {
            resource_type: state.address.resource_type.clone(),
            name: state.address.name.clone(),
            identifier: state.identifier.clone().unwrap_or_default(),
            attributes: state
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
            sensitive_attributes,
        }
    }

    pub fn to_state(&self) -> State {
        let attributes = self
            .attributes
            .iter()
            .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
            .collect();
        State::existing(self.address(), attributes).with_identifier(&self.identifier)
    }

    pub fn redacted(&self) -> ResourceState {
        let mut redacted = self.clone();
        for name in &self.sensitive_attributes {
            if let Some(value) = redacted.attributes.get_mut(name) {
                *value = serde_json::Value::String(SENSITIVE_PLACEHOLDER.to_string());
            }
        }
        redacted
    }
}
