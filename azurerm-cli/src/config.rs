//! Configuration file (`azurerm.json`)
//!
//! ```json
//! {
//!   "provider": { "subscription_id": "...", "timeouts": { "create": 3600 } },
//!   "backend": { "type": "local", "path": "azurerm.state.json" },
//!   "resources": [
//!     { "type": "azurerm_app_service_extension", "name": "ext", "attributes": { ... } }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use azurerm_core::resource::{Resource, Value};
use azurerm_provider::ProviderConfig;
use azurerm_state::BackendConfig;

#[derive(Debug, Deserialize)]
pub struct Workspace {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub backend: Option<serde_json::Value>,
    #[serde(default)]
    pub resources: Vec<ResourceBlock>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceBlock {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Workspace {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::parse(&content).map_err(|e| format!("{}: {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let workspace: Workspace =
            serde_json::from_str(content).map_err(|e| format!("Parse error: {}", e))?;

        let mut seen = HashSet::new();
        for block in &workspace.resources {
            if !seen.insert((&block.resource_type, &block.name)) {
                return Err(format!(
                    "Duplicate resource {}.{}",
                    block.resource_type, block.name
                ));
            }
        }
        Ok(workspace)
    }

    /// Desired resources, in declaration order
    pub fn resources(&self) -> Vec<Resource> {
        self.resources
            .iter()
            .map(|block| {
                let mut resource = Resource::new(&block.resource_type, &block.name);
                for (key, value) in &block.attributes {
                    if let Some(value) = Value::from_json(value) {
                        resource.attributes.insert(key.clone(), value);
                    }
                }
                resource
            })
            .collect()
    }

    /// Provider block with `ARM_*` environment overrides applied
    pub fn provider_config(&self) -> ProviderConfig {
        self.provider.clone().with_env_overrides()
    }

    pub fn backend_config(&self) -> Result<BackendConfig, String> {
        match &self.backend {
            Some(value) => BackendConfig::from_json(value).map_err(|e| e.to_string()),
            None => Ok(BackendConfig::default()),
        }
    }
}
