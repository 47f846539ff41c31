//! Resource type implementations
//!
//! Each resource type pairs a schema ([`ResourceType`]) with CRUD callbacks
//! ([`ResourceHandler`]) that run against an explicit [`Env`]: the control
//! plane client, the provider configuration and the operation context.

pub mod app_service_extension;
pub mod servicebus_geo_dr_configuration;
pub mod stream_analytics_output_datalake;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use azurerm_core::context::OperationContext;
use azurerm_core::error::{ProviderError, ProviderResult};
use azurerm_core::id::{ChildIdFormat, ChildKey, ResourceId};
use azurerm_core::provider::ResourceType;
use azurerm_core::resource::{Attributes, Resource, ResourceAddress, State};

use crate::client::ControlPlane;
use crate::config::ProviderConfig;

pub use app_service_extension::AppServiceExtension;
pub use servicebus_geo_dr_configuration::ServiceBusGeoDrConfiguration;
pub use stream_analytics_output_datalake::StreamAnalyticsOutputDataLake;

/// Collaborators of one resource operation
pub struct Env<'a> {
    pub client: &'a dyn ControlPlane,
    pub config: &'a ProviderConfig,
    pub ctx: &'a OperationContext,
}

impl Env<'_> {
    pub fn cancel(&self) -> &CancellationToken {
        self.ctx.cancel_token()
    }

    pub fn subscription_id(&self) -> &str {
        &self.config.subscription_id
    }
}

/// CRUD callbacks of one resource type
#[async_trait]
pub trait ResourceHandler: ResourceType {
    /// Returns `State::not_found` when the remote resource is gone
    async fn read(
        &self,
        env: &Env<'_>,
        address: &ResourceAddress,
        identifier: &str,
        previous: Option<&State>,
    ) -> ProviderResult<State>;

    async fn create(&self, env: &Env<'_>, resource: &Resource) -> ProviderResult<State>;

    async fn update(
        &self,
        env: &Env<'_>,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State>;

    /// Succeeds when the resource is already absent
    async fn delete(
        &self,
        env: &Env<'_>,
        address: &ResourceAddress,
        identifier: &str,
    ) -> ProviderResult<()>;
}

/// All resource handlers of this provider
pub fn handlers() -> Vec<Box<dyn ResourceHandler>> {
    vec![
        Box::new(ServiceBusGeoDrConfiguration),
        Box::new(AppServiceExtension),
        Box::new(StreamAnalyticsOutputDataLake),
    ]
}

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    vec![
        Box::new(ServiceBusGeoDrConfiguration),
        Box::new(AppServiceExtension),
        Box::new(StreamAnalyticsOutputDataLake),
    ]
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Parse a child identifier into its key and canonical request path
pub(crate) fn parse_child_id(
    format: &ChildIdFormat,
    identifier: &str,
) -> ProviderResult<(ChildKey, String)> {
    let key = format.parse(identifier)?;
    let subscription_id = ResourceId::parse(identifier)?.subscription_id;
    let path = format.format(&subscription_id, &key);
    Ok((key, path))
}

pub(crate) fn required_str<'r>(attrs: &'r impl Attributes, name: &str) -> ProviderResult<&'r str> {
    attrs
        .get_str(name)
        .ok_or_else(|| ProviderError::validation(format!("{:?} is required", name)))
}

/// Refuse to create over an unmanaged resource unless the run allows it
pub(crate) async fn ensure_not_exists(
    env: &Env<'_>,
    resource_type: &str,
    path: &str,
    api_version: &str,
) -> ProviderResult<()> {
    if !env.ctx.requires_import() {
        return Ok(());
    }
    let existing = env
        .client
        .get(path, api_version)
        .await
        .map_err(|e| e.while_doing("checking for presence of existing resource"))?;
    let id = existing
        .as_ref()
        .and_then(|body| body.get("id"))
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty());
    match id {
        Some(id) => Err(ProviderError::import_as_exists(resource_type, id)),
        None => Ok(()),
    }
}

/// Identifier reported by the control plane after a create
pub(crate) fn identifier_from(
    body: Option<&serde_json::Value>,
    what: &str,
) -> ProviderResult<String> {
    body.and_then(|b| b.get("id"))
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::remote(format!("cannot read ID of {}", what)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::fake::FakeControlPlane;
    use azurerm_core::context::ImportPolicy;
    use azurerm_core::error::ErrorKind;
    use azurerm_core::lock::LockRegistry;
    use serde_json::json;

    pub(crate) const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

    pub(crate) fn test_config() -> ProviderConfig {
        ProviderConfig {
            subscription_id: SUBSCRIPTION.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn test_ctx(locks: &LockRegistry) -> OperationContext {
        OperationContext::new(locks, CancellationToken::new())
    }

    #[test]
    fn every_handler_has_a_resource_type() {
        let handler_names: Vec<&str> = handlers().iter().map(|h| h.name()).collect();
        let type_names: Vec<&str> = resource_types().iter().map(|t| t.name()).collect();
        assert_eq!(handler_names, type_names);
    }

    #[test]
    fn parse_child_id_keeps_subscription_of_identifier() {
        let format = ChildIdFormat::new("Microsoft.Web", "sites", "siteextensions");
        let (key, path) = parse_child_id(
            &format,
            "/subscriptions/other/resourceGroups/rg/providers/Microsoft.Web/sites/web/siteextensions/ext",
        )
        .unwrap();
        assert_eq!(key, ChildKey::new("rg", "web", "ext"));
        assert!(path.starts_with("/subscriptions/other/"));
    }

    #[tokio::test]
    async fn ensure_not_exists_honours_import_policy() {
        let client = FakeControlPlane::new();
        client.insert("/things/a", json!({}));
        let config = test_config();
        let locks = LockRegistry::new();

        let ctx = test_ctx(&locks);
        let env = Env {
            client: &client,
            config: &config,
            ctx: &ctx,
        };
        let err = ensure_not_exists(&env, "thing", "/things/a", "v1")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert!(err.message.contains("/things/a"));
        ensure_not_exists(&env, "thing", "/things/b", "v1")
            .await
            .unwrap();

        let ctx = test_ctx(&locks).with_import_policy(ImportPolicy::AllowOverwrite);
        let env = Env {
            client: &client,
            config: &config,
            ctx: &ctx,
        };
        ensure_not_exists(&env, "thing", "/things/a", "v1")
            .await
            .unwrap();
    }
}
