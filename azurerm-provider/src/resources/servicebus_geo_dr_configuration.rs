//! azurerm_servicebus_geo_dr_configuration
//!
//! A Geo-DR alias pairing a primary Premium namespace with a secondary one.
//! Pairing completes asynchronously: after the PUT the alias is polled until
//! it reports `Succeeded` on several consecutive reads.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::json;
use tokio::time::Instant;

use azurerm_core::error::{ErrorContext, ProviderError, ProviderResult};
use azurerm_core::id::{ChildIdFormat, ChildKey};
use azurerm_core::poll::{ProvisioningState, Refreshed, WaitConfig, wait_for_state};
use azurerm_core::provider::ResourceType;
use azurerm_core::resource::{Attributes, Resource, ResourceAddress, State, Value};
use azurerm_core::schema::{AttributeSchema, AttributeType, ResourceSchema, validators};

use super::{Env, ResourceHandler, ensure_not_exists, identifier_from, parse_child_id, required_str};
use crate::client::{complete, complete_delete, get_as};
use crate::models::{ArmDisasterRecovery, ArmDisasterRecoveryProperties, Namespace, SkuName};

pub const RESOURCE_TYPE: &str = "azurerm_servicebus_geo_dr_configuration";
const API_VERSION: &str = "2017-04-01";

pub const ID_FORMAT: ChildIdFormat =
    ChildIdFormat::new("Microsoft.ServiceBus", "namespaces", "disasterRecoveryConfigs");

/// Consecutive `Succeeded` reads required before pairing counts as done
const PAIRING_CONFIRMATIONS: u32 = 5;
const PAIRING_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct ServiceBusGeoDrConfiguration;

impl ResourceType for ServiceBusGeoDrConfiguration {
    fn name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(RESOURCE_TYPE)
            .with_description("Geo-disaster recovery alias between two Service Bus Premium namespaces")
            .attribute(
                AttributeSchema::new("name", validators::servicebus_namespace())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("namespace_name", validators::servicebus_namespace())
                    .required()
                    .force_new()
                    .with_description("Primary namespace"),
            )
            .attribute(
                AttributeSchema::new("resource_group_name", validators::resource_group())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("partner_namespace_id", validators::resource_id())
                    .required()
                    .with_description("Resource ID of the secondary namespace"),
            )
            .attribute(AttributeSchema::new("alternate_name", AttributeType::String).force_new())
            .attribute(
                AttributeSchema::new(
                    "role",
                    AttributeType::Enum(vec![
                        "Primary".to_string(),
                        "PrimaryNotReplicating".to_string(),
                        "Secondary".to_string(),
                    ]),
                )
                .computed(),
            )
    }
}

fn error_context(key: &ChildKey) -> ErrorContext {
    ErrorContext::new(
        "ServiceBus Geo DR Configuration",
        &key.child_name,
        format!(
            "Namespace {:?} / Resource Group {:?}",
            key.parent_name, key.resource_group
        ),
    )
}

fn key_of(resource: &Resource) -> ProviderResult<ChildKey> {
    Ok(ChildKey::new(
        required_str(resource, "resource_group_name")?,
        required_str(resource, "namespace_name")?,
        required_str(resource, "name")?,
    ))
}

/// Observe the alias' provisioning state; a missing state means settled
async fn refresh(env: &Env<'_>, path: &str) -> ProviderResult<Refreshed<ArmDisasterRecovery>> {
    Ok(
        match get_as::<ArmDisasterRecovery>(env.client, path, API_VERSION).await? {
            Some(dr) => {
                let state = dr
                    .properties
                    .provisioning_state
                    .clone()
                    .unwrap_or(ProvisioningState::Succeeded);
                Refreshed::found(dr, state)
            }
            None => Refreshed::not_found(),
        },
    )
}

fn pairing_wait(deadline: Instant) -> WaitConfig {
    WaitConfig::new(
        vec![ProvisioningState::Accepted],
        vec![ProvisioningState::Succeeded],
    )
    .deadline(deadline)
    .min_interval(PAIRING_POLL_INTERVAL)
    .continuous_target_occurrence(PAIRING_CONFIRMATIONS)
}

fn operation_wait(deadline: Instant) -> WaitConfig {
    WaitConfig::new(
        vec![ProvisioningState::Accepted],
        vec![ProvisioningState::Succeeded],
    )
    .deadline(deadline)
    .min_interval(DELETE_POLL_INTERVAL)
}

impl ServiceBusGeoDrConfiguration {
    /// PUT the alias and wait until pairing settles; every wait ends by `deadline`
    async fn create_or_update(
        &self,
        env: &Env<'_>,
        key: &ChildKey,
        path: &str,
        resource: &Resource,
        deadline: Instant,
    ) -> ProviderResult<String> {
        let namespace_path = format!(
            "/subscriptions/{}{}",
            env.subscription_id(),
            ID_FORMAT.parent_path(key)
        );
        let namespace = get_as::<Namespace>(env.client, &namespace_path, API_VERSION)
            .await
            .map_err(|e| e.while_doing(format!("retrieving ServiceBus Namespace {:?}", key.parent_name)))?
            .ok_or_else(|| {
                ProviderError::not_found(format!(
                    "ServiceBus Namespace {:?} (Resource Group {:?}) was not found",
                    key.parent_name, key.resource_group
                ))
            })?;
        let sku = namespace.sku.as_ref().map(|s| &s.name);
        if sku != Some(&SkuName::Premium) {
            return Err(ProviderError::validation(
                "Geo DR Configuration is only supported for ServiceBus Premium SKU",
            ));
        }

        let parameters = ArmDisasterRecovery {
            properties: ArmDisasterRecoveryProperties {
                partner_namespace: Some(required_str(resource, "partner_namespace_id")?.to_string()),
                alternate_name: resource.get_str("alternate_name").map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        };
        let body = serde_json::to_value(&parameters)
            .map_err(|e| ProviderError::internal("failed to encode request").with_cause(e))?;

        let submission = env
            .client
            .put(path, API_VERSION, body)
            .await
            .map_err(|e| e.while_doing("creating/updating"))?;
        complete(env.client, submission, &operation_wait(deadline), env.cancel()).await?;

        let outcome = wait_for_state(&pairing_wait(deadline), env.cancel(), || refresh(env, path))
            .await
            .map_err(|e| ProviderError::from(e).while_doing("waiting to be created or updated"))?;
        debug!(
            "{}: pairing settled after {} polls",
            key.child_name, outcome.polls
        );

        let body = env
            .client
            .get(path, API_VERSION)
            .await
            .map_err(|e| e.while_doing("retrieving"))?;
        identifier_from(body.as_ref(), "ServiceBus Geo DR Configuration")
    }

    /// Stop replication so the alias can be removed
    async fn break_pairing(&self, env: &Env<'_>, path: &str, deadline: Instant) -> ProviderResult<()> {
        let submission = env
            .client
            .post(&format!("{}/breakPairing", path), API_VERSION, None)
            .await
            .map_err(|e| e.while_doing("breaking pairing"))?;
        complete(env.client, submission, &operation_wait(deadline), env.cancel()).await?;

        wait_for_state(&pairing_wait(deadline), env.cancel(), || refresh(env, path))
            .await
            .map_err(|e| ProviderError::from(e).while_doing("waiting for pairing to break"))?;
        Ok(())
    }
}

#[async_trait]
impl ResourceHandler for ServiceBusGeoDrConfiguration {
    async fn read(
        &self,
        env: &Env<'_>,
        address: &ResourceAddress,
        identifier: &str,
        _previous: Option<&State>,
    ) -> ProviderResult<State> {
        let (key, path) = parse_child_id(&ID_FORMAT, identifier)?;

        let dr = get_as::<ArmDisasterRecovery>(env.client, &path, API_VERSION)
            .await
            .map_err(|e| {
                e.while_doing("retrieving")
                    .with_context(&error_context(&key))
            })?;
        let Some(dr) = dr else {
            debug!(
                "ServiceBus Geo DR Configuration {:?} was not found - removing from state",
                key.child_name
            );
            return Ok(State::not_found(address.clone()));
        };

        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::from(key.child_name));
        attributes.insert("namespace_name".to_string(), Value::from(key.parent_name));
        attributes.insert(
            "resource_group_name".to_string(),
            Value::from(key.resource_group),
        );
        let props = dr.properties;
        if let Some(partner) = props.partner_namespace {
            attributes.insert("partner_namespace_id".to_string(), Value::from(partner));
        }
        if let Some(alternate_name) = props.alternate_name {
            attributes.insert("alternate_name".to_string(), Value::from(alternate_name));
        }
        if let Some(role) = props.role {
            attributes.insert("role".to_string(), Value::from(role.as_str()));
        }

        Ok(State::existing(address.clone(), attributes).with_identifier(identifier))
    }

    async fn create(&self, env: &Env<'_>, resource: &Resource) -> ProviderResult<State> {
        let key = key_of(resource)?;
        let context = error_context(&key);
        let path = ID_FORMAT.format(env.subscription_id(), &key);

        let deadline = Instant::now() + env.config.timeouts.create();

        let identifier = async {
            ensure_not_exists(env, RESOURCE_TYPE, &path, API_VERSION).await?;
            self.create_or_update(env, &key, &path, resource, deadline)
                .await
        }
        .await
        .map_err(|e| e.with_context(&context))?;
        info!("created ServiceBus Geo DR Configuration {}", identifier);

        self.read(env, &resource.address, &identifier, None).await
    }

    async fn update(
        &self,
        env: &Env<'_>,
        identifier: &str,
        _from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let (key, path) = parse_child_id(&ID_FORMAT, identifier)?;
        let deadline = Instant::now() + env.config.timeouts.update();
        self.create_or_update(env, &key, &path, to, deadline)
            .await
            .map_err(|e| e.with_context(&error_context(&key)))?;
        self.read(env, &to.address, identifier, None).await
    }

    async fn delete(
        &self,
        env: &Env<'_>,
        _address: &ResourceAddress,
        identifier: &str,
    ) -> ProviderResult<()> {
        let (key, path) = parse_child_id(&ID_FORMAT, identifier)?;
        let deadline = Instant::now() + env.config.timeouts.delete();

        async {
            let Some(current) = get_as::<ArmDisasterRecovery>(env.client, &path, API_VERSION).await?
            else {
                return Ok(());
            };
            if current.properties.role.as_ref().is_some_and(|r| r.is_paired()) {
                self.break_pairing(env, &path, deadline).await?;
            }

            let outcome = env
                .client
                .delete(&path, API_VERSION)
                .await
                .map_err(|e| e.while_doing("deleting"))?;
            complete_delete(env.client, outcome, &operation_wait(deadline), env.cancel()).await?;

            let gone = WaitConfig::new(
                vec![
                    ProvisioningState::Succeeded,
                    ProvisioningState::Accepted,
                    ProvisioningState::Other("Deleting".to_string()),
                ],
                vec![ProvisioningState::NotFound],
            )
            .deadline(deadline)
            .min_interval(DELETE_POLL_INTERVAL);
            wait_for_state(&gone, env.cancel(), || refresh(env, &path))
                .await
                .map_err(|e| ProviderError::from(e).while_doing("waiting for deletion"))?;
            Ok(())
        }
        .await
        .map_err(|e: ProviderError| e.with_context(&error_context(&key)))
    }
}
