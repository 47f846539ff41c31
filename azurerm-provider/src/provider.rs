//! Azure Resource Manager provider
//!
//! Dispatches core [`Provider`] calls to the resource handler registered for
//! the resource type, after validating the desired attributes against its
//! schema.

use std::sync::Arc;

use log::{debug, info};

use azurerm_core::context::OperationContext;
use azurerm_core::error::{ProviderError, ProviderResult};
use azurerm_core::provider::{BoxFuture, Provider, ResourceType};
use azurerm_core::resource::{Resource, ResourceAddress, State};

use crate::client::ControlPlane;
use crate::config::ProviderConfig;
use crate::resources::{Env, ResourceHandler, handlers, resource_types};
use crate::rest::{RestControlPlane, StaticToken};

pub struct AzureRmProvider {
    client: Arc<dyn ControlPlane>,
    config: ProviderConfig,
    handlers: Vec<Box<dyn ResourceHandler>>,
}

impl AzureRmProvider {
    pub fn new(client: Arc<dyn ControlPlane>, config: ProviderConfig) -> Self {
        Self {
            client,
            config,
            handlers: handlers(),
        }
    }

    /// Build a provider talking to the REST endpoint named in `config`
    pub fn from_config(config: ProviderConfig) -> ProviderResult<Self> {
        config.validate()?;
        let token = config.access_token.clone().ok_or_else(|| {
            ProviderError::validation(
                "access_token is required (set it in the provider block or ARM_ACCESS_TOKEN)",
            )
        })?;
        let client = RestControlPlane::new(&config.endpoint, Arc::new(StaticToken::new(token)))?;
        info!(
            "Using endpoint {} for subscription {}",
            config.endpoint, config.subscription_id
        );
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn handler(&self, resource_type: &str) -> ProviderResult<&dyn ResourceHandler> {
        self.handlers
            .iter()
            .find(|h| h.name() == resource_type)
            .map(|h| &**h)
            .ok_or_else(|| {
                ProviderError::validation(format!("unsupported resource type {:?}", resource_type))
            })
    }

    fn env<'a>(&'a self, ctx: &'a OperationContext) -> Env<'a> {
        Env {
            client: self.client.as_ref(),
            config: &self.config,
            ctx,
        }
    }

    /// Apply schema defaults and reject attributes the schema does not accept
    fn prepare(&self, handler: &dyn ResourceHandler, resource: &Resource) -> ProviderResult<Resource> {
        let schema = handler.schema();
        let mut prepared = resource.clone();
        schema.apply_defaults(&mut prepared.attributes);
        schema.validate(&prepared.attributes).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            ProviderError::validation(messages.join("; "))
        })?;
        Ok(prepared)
    }
}

impl Provider for AzureRmProvider {
    fn name(&self) -> &'static str {
        "azurerm"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resource_types()
    }

    fn read<'a>(
        &'a self,
        ctx: &'a OperationContext,
        address: &'a ResourceAddress,
        identifier: &'a str,
        previous: Option<&'a State>,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move {
            debug!("read {} ({})", address, identifier);
            let handler = self.handler(&address.resource_type)?;
            handler
                .read(&self.env(ctx), address, identifier, previous)
                .await
                .map_err(|e| e.for_resource(address.clone()))
        })
    }

    fn create<'a>(
        &'a self,
        ctx: &'a OperationContext,
        resource: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move {
            let address = &resource.address;
            let result = async {
                let handler = self.handler(&address.resource_type)?;
                let prepared = self.prepare(handler, resource)?;
                handler.create(&self.env(ctx), &prepared).await
            }
            .await;
            result.map_err(|e| e.for_resource(address.clone()))
        })
    }

    fn update<'a>(
        &'a self,
        ctx: &'a OperationContext,
        identifier: &'a str,
        from: &'a State,
        to: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move {
            let address = &to.address;
            let result = async {
                let handler = self.handler(&address.resource_type)?;
                let prepared = self.prepare(handler, to)?;
                handler
                    .update(&self.env(ctx), identifier, from, &prepared)
                    .await
            }
            .await;
            result.map_err(|e| e.for_resource(address.clone()))
        })
    }

    fn delete<'a>(
        &'a self,
        ctx: &'a OperationContext,
        address: &'a ResourceAddress,
        identifier: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let handler = self.handler(&address.resource_type)?;
            handler
                .delete(&self.env(ctx), address, identifier)
                .await
                .map_err(|e| e.for_resource(address.clone()))
        })
    }
}
