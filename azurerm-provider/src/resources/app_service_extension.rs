//! azurerm_app_service_extension
//!
//! Site extensions are installed through a long-running operation. Installs and
//! removals on the same App Service are serialised with a named lock on the site.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::json;

use azurerm_core::error::{ErrorContext, ProviderError, ProviderResult};
use azurerm_core::id::{ChildIdFormat, ChildKey};
use azurerm_core::poll::{ProvisioningState, WaitConfig};
use azurerm_core::provider::ResourceType;
use azurerm_core::resource::{Resource, ResourceAddress, State, Value};
use azurerm_core::schema::{AttributeSchema, AttributeType, ResourceSchema, validators};

use super::{Env, ResourceHandler, ensure_not_exists, identifier_from, parse_child_id, required_str};
use crate::client::{complete, complete_delete, get_as};
use crate::models::SiteExtensionInfo;

pub const RESOURCE_TYPE: &str = "azurerm_app_service_extension";
/// Lock namespace shared by everything that mutates an App Service
pub const APP_SERVICE_RESOURCE: &str = "azurerm_app_service";
const API_VERSION: &str = "2018-02-01";

pub const ID_FORMAT: ChildIdFormat = ChildIdFormat::new("Microsoft.Web", "sites", "siteextensions");

const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct AppServiceExtension;

impl ResourceType for AppServiceExtension {
    fn name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(RESOURCE_TYPE)
            .with_description("Site extension installed on an App Service")
            .attribute(
                AttributeSchema::new("name", validators::path_segment())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("resource_group_name", validators::resource_group())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("app_service_name", validators::path_segment())
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("version", AttributeType::String).computed())
    }
}

fn error_context(key: &ChildKey) -> ErrorContext {
    ErrorContext::new(
        "Extension",
        &key.child_name,
        format!(
            "App Service {:?} / Resource Group {:?}",
            key.parent_name, key.resource_group
        ),
    )
}

fn operation_wait(timeout: Duration) -> WaitConfig {
    WaitConfig::new(
        vec![ProvisioningState::Accepted],
        vec![ProvisioningState::Succeeded],
    )
    .timeout(timeout)
    .min_interval(OPERATION_POLL_INTERVAL)
}

#[async_trait]
impl ResourceHandler for AppServiceExtension {
    async fn read(
        &self,
        env: &Env<'_>,
        address: &ResourceAddress,
        identifier: &str,
        _previous: Option<&State>,
    ) -> ProviderResult<State> {
        let (key, path) = parse_child_id(&ID_FORMAT, identifier)?;

        let extension = get_as::<SiteExtensionInfo>(env.client, &path, API_VERSION)
            .await
            .map_err(|e| e.while_doing("retrieving").with_context(&error_context(&key)))?;
        let Some(extension) = extension else {
            debug!(
                "Extension {:?} (App Service {:?} / Resource Group {:?}) was not found - removing from state",
                key.child_name, key.parent_name, key.resource_group
            );
            return Ok(State::not_found(address.clone()));
        };

        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::from(key.child_name));
        attributes.insert(
            "resource_group_name".to_string(),
            Value::from(key.resource_group),
        );
        attributes.insert("app_service_name".to_string(), Value::from(key.parent_name));
        if let Some(version) = extension.properties.version {
            attributes.insert("version".to_string(), Value::from(version));
        }

        Ok(State::existing(address.clone(), attributes).with_identifier(identifier))
    }

    async fn create(&self, env: &Env<'_>, resource: &Resource) -> ProviderResult<State> {
        let key = ChildKey::new(
            required_str(resource, "resource_group_name")?,
            required_str(resource, "app_service_name")?,
            required_str(resource, "name")?,
        );
        let path = ID_FORMAT.format(env.subscription_id(), &key);

        let identifier = {
            let _lock = env
                .ctx
                .lock_by_name(APP_SERVICE_RESOURCE, &key.parent_name)
                .await?;

            async {
                ensure_not_exists(env, RESOURCE_TYPE, &path, API_VERSION).await?;

                let submission = env
                    .client
                    .put(&path, API_VERSION, json!({}))
                    .await
                    .map_err(|e| e.while_doing("creating"))?;
                complete(
                    env.client,
                    submission,
                    &operation_wait(env.config.timeouts.create()),
                    env.cancel(),
                )
                .await
                .map_err(|e| e.while_doing("waiting for creation"))?;

                let body = env
                    .client
                    .get(&path, API_VERSION)
                    .await
                    .map_err(|e| e.while_doing("retrieving"))?;
                identifier_from(body.as_ref(), "Extension")
            }
            .await
            .map_err(|e| e.with_context(&error_context(&key)))?
        };
        info!("installed extension {}", identifier);

        self.read(env, &resource.address, &identifier, None).await
    }

    async fn update(
        &self,
        _env: &Env<'_>,
        _identifier: &str,
        _from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        Err(ProviderError::validation(format!(
            "{} does not support in-place updates, delete and recreate",
            RESOURCE_TYPE
        ))
        .for_resource(to.address.clone()))
    }

    async fn delete(
        &self,
        env: &Env<'_>,
        _address: &ResourceAddress,
        identifier: &str,
    ) -> ProviderResult<()> {
        let (key, path) = parse_child_id(&ID_FORMAT, identifier)?;
        let _lock = env
            .ctx
            .lock_by_name(APP_SERVICE_RESOURCE, &key.parent_name)
            .await?;

        async {
            let outcome = env
                .client
                .delete(&path, API_VERSION)
                .await
                .map_err(|e| e.while_doing("deleting"))?;
            complete_delete(
                env.client,
                outcome,
                &operation_wait(env.config.timeouts.delete()),
                env.cancel(),
            )
            .await
        }
        .await
        .map_err(|e| e.with_context(&error_context(&key)))
    }
}
