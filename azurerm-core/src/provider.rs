//! Provider - Trait abstracting resource operations
//!
//! A Provider defines operations for a specific control plane.
//! It is responsible for converting Effects into actual API calls.
//! Everything an operation needs beyond the provider's own client (locks,
//! cancellation, import policy) arrives through the [`OperationContext`].

use std::future::Future;
use std::pin::Pin;

use crate::context::OperationContext;
use crate::error::ProviderResult;
use crate::resource::{Resource, ResourceAddress, State};
use crate::schema::ResourceSchema;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Definition of resource types that a Provider can handle
pub trait ResourceType: Send + Sync {
    /// Resource type name (e.g., "azurerm_app_service_extension")
    fn name(&self) -> &'static str;

    /// Attribute schema for this resource type
    fn schema(&self) -> ResourceSchema;
}

/// Main Provider trait
///
/// All operations are async and involve side effects.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "azurerm")
    fn name(&self) -> &'static str;

    /// List of resource types this Provider can handle
    fn resource_types(&self) -> Vec<Box<dyn ResourceType>>;

    /// Schema of a single resource type
    fn schema(&self, resource_type: &str) -> Option<ResourceSchema> {
        self.resource_types()
            .into_iter()
            .find(|t| t.name() == resource_type)
            .map(|t| t.schema())
    }

    /// Get the current state of a resource
    ///
    /// `previous` carries the last persisted attributes, used to keep values
    /// the control plane never returns (e.g., secrets).
    /// Returns `State::not_found()` if the resource does not exist.
    fn read<'a>(
        &'a self,
        ctx: &'a OperationContext,
        address: &'a ResourceAddress,
        identifier: &'a str,
        previous: Option<&'a State>,
    ) -> BoxFuture<'a, ProviderResult<State>>;

    /// Create a resource
    ///
    /// Returns State with identifier set to the ARM resource ID
    fn create<'a>(
        &'a self,
        ctx: &'a OperationContext,
        resource: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>>;

    /// Update a resource in place
    fn update<'a>(
        &'a self,
        ctx: &'a OperationContext,
        identifier: &'a str,
        from: &'a State,
        to: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>>;

    /// Delete a resource; deleting an absent resource succeeds
    fn delete<'a>(
        &'a self,
        ctx: &'a OperationContext,
        address: &'a ResourceAddress,
        identifier: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// Adopt an existing remote resource under `address`
    ///
    /// Fails with `ErrorKind::NotFound` if nothing lives at `identifier`.
    fn import<'a>(
        &'a self,
        ctx: &'a OperationContext,
        address: &'a ResourceAddress,
        identifier: &'a str,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move {
            let state = self.read(ctx, address, identifier, None).await?;
            if state.exists {
                Ok(state)
            } else {
                Err(crate::error::ProviderError::not_found(format!(
                    "cannot import non-existent remote object {:?}",
                    identifier
                ))
                .for_resource(address.clone()))
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::error::{ErrorKind, ProviderError};
    use crate::lock::LockRegistry;
    use crate::resource::Value;
    use crate::schema::{AttributeSchema, AttributeType};

    struct MockType;

    impl ResourceType for MockType {
        fn name(&self) -> &'static str {
            "mock_resource"
        }

        fn schema(&self) -> ResourceSchema {
            ResourceSchema::new("mock_resource")
                .attribute(AttributeSchema::new("name", AttributeType::String).force_new())
                .attribute(AttributeSchema::new("size", AttributeType::Int))
                .attribute(AttributeSchema::new("secret", AttributeType::String).sensitive())
        }
    }

    /// In-memory provider keyed by identifier; records the calls it receives
    #[derive(Default)]
    pub(crate) struct MockProvider {
        pub objects: Mutex<HashMap<String, HashMap<String, Value>>>,
        pub calls: Mutex<Vec<String>>,
        pub fail_create: bool,
    }

    impl MockProvider {
        fn identifier(address: &ResourceAddress) -> String {
            format!(
                "/subscriptions/0000/resourceGroups/rg/providers/Mock/things/{}",
                address.name
            )
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Provider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
            vec![Box::new(MockType)]
        }

        fn read<'a>(
            &'a self,
            _ctx: &'a OperationContext,
            address: &'a ResourceAddress,
            identifier: &'a str,
            _previous: Option<&'a State>,
        ) -> BoxFuture<'a, ProviderResult<State>> {
            Box::pin(async move {
                self.record(format!("read {}", address));
                let objects = self.objects.lock().unwrap();
                Ok(match objects.get(identifier) {
                    Some(attrs) => {
                        State::existing(address.clone(), attrs.clone()).with_identifier(identifier)
                    }
                    None => State::not_found(address.clone()),
                })
            })
        }

        fn create<'a>(
            &'a self,
            _ctx: &'a OperationContext,
            resource: &'a Resource,
        ) -> BoxFuture<'a, ProviderResult<State>> {
            Box::pin(async move {
                self.record(format!("create {}", resource.address));
                if self.fail_create {
                    return Err(ProviderError::validation("rejected"));
                }
                let id = Self::identifier(&resource.address);
                self.objects
                    .lock()
                    .unwrap()
                    .insert(id.clone(), resource.attributes.clone());
                Ok(State::existing(resource.address.clone(), resource.attributes.clone())
                    .with_identifier(id))
            })
        }

        fn update<'a>(
            &'a self,
            _ctx: &'a OperationContext,
            identifier: &'a str,
            _from: &'a State,
            to: &'a Resource,
        ) -> BoxFuture<'a, ProviderResult<State>> {
            Box::pin(async move {
                self.record(format!("update {}", to.address));
                self.objects
                    .lock()
                    .unwrap()
                    .insert(identifier.to_string(), to.attributes.clone());
                Ok(State::existing(to.address.clone(), to.attributes.clone())
                    .with_identifier(identifier))
            })
        }

        fn delete<'a>(
            &'a self,
            _ctx: &'a OperationContext,
            address: &'a ResourceAddress,
            identifier: &'a str,
        ) -> BoxFuture<'a, ProviderResult<()>> {
            Box::pin(async move {
                self.record(format!("delete {}", address));
                match self.objects.lock().unwrap().remove(identifier) {
                    Some(_) => Ok(()),
                    None => Err(ProviderError::not_found("gone")),
                }
            })
        }
    }

    fn ctx() -> OperationContext {
        OperationContext::new(&LockRegistry::new(), tokio_util::sync::CancellationToken::new())
    }

    #[tokio::test]
    async fn mock_provider_read_returns_not_found() {
        let provider = MockProvider::default();
        let address = ResourceAddress::new("mock_resource", "example");
        let state = provider.read(&ctx(), &address, "missing", None).await.unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn import_requires_existing_object() {
        let mock = MockProvider::default();
        let provider: &dyn Provider = &mock;
        let ctx = ctx();
        let resource = Resource::new("mock_resource", "example").with_attribute("size", 3i64);
        let created = provider.create(&ctx, &resource).await.unwrap();
        let identifier = created.identifier.unwrap();

        let imported = provider
            .import(&ctx, &resource.address, &identifier)
            .await
            .unwrap();
        assert_eq!(imported.attributes.get("size"), Some(&Value::Int(3)));

        let err = provider
            .import(&ctx, &resource.address, "/subscriptions/0/resourceGroups/rg")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn schema_lookup_by_type() {
        let provider = MockProvider::default();
        assert!(provider.schema("mock_resource").is_some());
        assert!(provider.schema("other").is_none());
    }
}
