//! Provider configuration
//!
//! Read from the `provider` block of the configuration file, then overridden
//! by `ARM_*` environment variables.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use azurerm_core::context::ImportPolicy;
use azurerm_core::error::{ProviderError, ProviderResult};

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

/// Per-operation wall-clock budgets, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub create: u64,
    pub update: u64,
    pub delete: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: 30 * 60,
            update: 30 * 60,
            delete: 30 * 60,
        }
    }
}

impl Timeouts {
    pub fn create(&self) -> Duration {
        Duration::from_secs(self.create)
    }

    pub fn update(&self) -> Duration {
        Duration::from_secs(self.update)
    }

    pub fn delete(&self) -> Duration {
        Duration::from_secs(self.delete)
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub subscription_id: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Refuse to create over resources that exist but are not managed
    pub require_import: bool,
    pub timeouts: Timeouts,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: None,
            require_import: true,
            timeouts: Timeouts::default(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("subscription_id", &self.subscription_id)
            .field("endpoint", &self.endpoint)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "(sensitive)"),
            )
            .field("require_import", &self.require_import)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl ProviderConfig {
    pub fn from_json(value: &serde_json::Value) -> ProviderResult<Self> {
        serde_json::from_value(value.clone()).map_err(|e| {
            ProviderError::validation("invalid provider configuration").with_cause(e)
        })
    }

    /// Apply `ARM_SUBSCRIPTION_ID`, `ARM_ENDPOINT` and `ARM_ACCESS_TOKEN`
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(v) = get("ARM_SUBSCRIPTION_ID") {
            self.subscription_id = v;
        }
        if let Some(v) = get("ARM_ENDPOINT") {
            self.endpoint = v;
        }
        if let Some(v) = get("ARM_ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        self
    }

    pub fn validate(&self) -> ProviderResult<()> {
        if self.subscription_id.trim().is_empty() {
            return Err(ProviderError::validation(
                "subscription_id is required (set it in the provider block or ARM_SUBSCRIPTION_ID)",
            ));
        }
        if !self.endpoint.starts_with("https://") && !self.endpoint.starts_with("http://") {
            return Err(ProviderError::validation(format!(
                "endpoint {:?} must be an http(s) URL",
                self.endpoint
            )));
        }
        Ok(())
    }

    pub fn import_policy(&self) -> ImportPolicy {
        if self.require_import {
            ImportPolicy::RequireImport
        } else {
            ImportPolicy::AllowOverwrite
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = ProviderConfig::from_json(&json!({ "subscription_id": "sub" })).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert!(config.require_import);
        assert_eq!(config.timeouts.create(), Duration::from_secs(1800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_timeouts() {
        let config =
            ProviderConfig::from_json(&json!({ "timeouts": { "delete": 60 } })).unwrap();
        assert_eq!(config.timeouts.delete(), Duration::from_secs(60));
        assert_eq!(config.timeouts.update(), Duration::from_secs(1800));
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("ARM_SUBSCRIPTION_ID", "from-env"),
            ("ARM_ACCESS_TOKEN", "secret"),
            ("ARM_ENDPOINT", ""),
        ]
        .into_iter()
        .collect();
        let config = ProviderConfig::from_json(&json!({ "subscription_id": "from-file" }))
            .unwrap()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.subscription_id, "from-env");
        assert_eq!(config.access_token.as_deref(), Some("secret"));
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn missing_subscription_is_rejected() {
        assert!(ProviderConfig::default().validate().is_err());
    }

    #[test]
    fn debug_hides_token() {
        let config = ProviderConfig {
            access_token: Some("super-secret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("super-secret"));
    }

    #[test]
    fn import_policy_follows_flag() {
        let config = ProviderConfig {
            require_import: false,
            ..Default::default()
        };
        assert_eq!(config.import_policy(), ImportPolicy::AllowOverwrite);
    }
}
