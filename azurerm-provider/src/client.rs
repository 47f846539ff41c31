//! Control plane client seam
//!
//! Resources talk to Azure Resource Manager only through [`ControlPlane`].
//! Paths are full ARM resource paths (`/subscriptions/.../providers/...`);
//! the implementation adds the endpoint, `api-version` and authentication.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use azurerm_core::error::{ProviderError, ProviderResult};
use azurerm_core::poll::{
    OperationHandle, ProvisioningState, Submission, WaitConfig, wait_for_operation,
};

/// Result of a DELETE request
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing existed at the path
    NotFound,
    /// Deletion continues asynchronously
    Accepted(OperationHandle),
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// GET a resource; `None` when the control plane answers 404
    async fn get(&self, path: &str, api_version: &str) -> ProviderResult<Option<JsonValue>>;

    async fn put(
        &self,
        path: &str,
        api_version: &str,
        body: JsonValue,
    ) -> ProviderResult<Submission<Option<JsonValue>>>;

    async fn patch(
        &self,
        path: &str,
        api_version: &str,
        body: JsonValue,
    ) -> ProviderResult<Submission<Option<JsonValue>>>;

    /// POST an action (e.g., `.../breakPairing`)
    async fn post(
        &self,
        path: &str,
        api_version: &str,
        body: Option<JsonValue>,
    ) -> ProviderResult<Submission<Option<JsonValue>>>;

    async fn delete(&self, path: &str, api_version: &str) -> ProviderResult<DeleteOutcome>;

    /// Current status of an asynchronous operation
    async fn operation_status(&self, handle: &OperationHandle) -> ProviderResult<ProvisioningState>;
}

/// Decode a response body into an API model
pub fn decode<T: DeserializeOwned>(body: JsonValue) -> ProviderResult<T> {
    serde_json::from_value(body)
        .map_err(|e| ProviderError::remote("unexpected response body").with_cause(e))
}

/// GET and decode; `None` when the resource does not exist
pub async fn get_as<T: DeserializeOwned>(
    client: &dyn ControlPlane,
    path: &str,
    api_version: &str,
) -> ProviderResult<Option<T>> {
    client
        .get(path, api_version)
        .await?
        .map(decode)
        .transpose()
}

/// Drive a submission to completion, polling the operation handle if the
/// control plane accepted it asynchronously.
///
/// Returns the response body of a synchronous completion, `None` otherwise.
pub async fn complete(
    client: &dyn ControlPlane,
    submission: Submission<Option<JsonValue>>,
    config: &WaitConfig,
    cancel: &CancellationToken,
) -> ProviderResult<Option<JsonValue>> {
    match submission {
        Submission::Completed(body) => Ok(body),
        Submission::Accepted(handle) => {
            log::debug!("waiting for operation {}", handle.polling_url);
            wait_for_operation(handle, config, cancel, |handle| async move {
                client.operation_status(&handle).await
            })
            .await?;
            Ok(None)
        }
    }
}

/// Wait for a DELETE to finish; absent resources count as deleted
pub async fn complete_delete(
    client: &dyn ControlPlane,
    outcome: DeleteOutcome,
    config: &WaitConfig,
    cancel: &CancellationToken,
) -> ProviderResult<()> {
    match outcome {
        DeleteOutcome::Deleted | DeleteOutcome::NotFound => Ok(()),
        DeleteOutcome::Accepted(handle) => {
            complete(client, Submission::Accepted(handle), config, cancel).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted in-memory control plane

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    pub(crate) struct FakeControlPlane {
        /// Stored objects keyed by path
        pub objects: Mutex<HashMap<String, JsonValue>>,
        /// Every request, as `METHOD path`
        pub calls: Mutex<Vec<String>>,
        /// Per-path observations returned by GET before falling back to
        /// `objects`: `None` answers 404, `Some(state)` reports that
        /// provisioning state on the stored object
        pub get_script: Mutex<HashMap<String, VecDeque<Option<ProvisioningState>>>>,
        /// Mutations answer 202 with an operation handle
        pub async_operations: bool,
        /// Statuses reported for operation handles, then `Succeeded`
        pub operation_script: Mutex<VecDeque<ProvisioningState>>,
        /// Error returned by the next PUT
        pub put_error: Mutex<Option<ProviderError>>,
    }

    impl FakeControlPlane {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_async_operations(mut self) -> Self {
            self.async_operations = true;
            self
        }

        pub fn insert(&self, path: &str, object: JsonValue) {
            self.objects
                .lock()
                .unwrap()
                .insert(path.to_string(), with_identity(path, object));
        }

        pub fn object(&self, path: &str) -> Option<JsonValue> {
            self.objects.lock().unwrap().get(path).cloned()
        }

        pub fn script_get(&self, path: &str, states: Vec<Option<ProvisioningState>>) {
            self.get_script
                .lock()
                .unwrap()
                .insert(path.to_string(), states.into());
        }

        pub fn script_operation(&self, states: Vec<ProvisioningState>) {
            *self.operation_script.lock().unwrap() = states.into();
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, method: &str, path: &str) {
            self.calls.lock().unwrap().push(format!("{} {}", method, path));
        }

        fn submission(&self, path: &str, body: JsonValue) -> Submission<Option<JsonValue>> {
            if self.async_operations {
                Submission::Accepted(OperationHandle::new(format!("https://fake{}/operation", path)))
            } else {
                Submission::Completed(Some(body))
            }
        }
    }

    fn with_identity(path: &str, mut object: JsonValue) -> JsonValue {
        if let Some(map) = object.as_object_mut() {
            map.insert("id".to_string(), json!(path));
            let name = path.rsplit('/').next().unwrap_or_default();
            map.insert("name".to_string(), json!(name));
        }
        object
    }

    fn merge(target: &mut JsonValue, patch: JsonValue) {
        match (target, patch) {
            (JsonValue::Object(t), JsonValue::Object(p)) => {
                for (k, v) in p {
                    merge(t.entry(k).or_insert(JsonValue::Null), v);
                }
            }
            (t, p) => *t = p,
        }
    }

    #[async_trait]
    impl ControlPlane for FakeControlPlane {
        async fn get(&self, path: &str, _api_version: &str) -> ProviderResult<Option<JsonValue>> {
            self.record("GET", path);
            let scripted = self
                .get_script
                .lock()
                .unwrap()
                .get_mut(path)
                .and_then(|q| q.pop_front());
            match scripted {
                Some(None) => Ok(None),
                Some(Some(state)) => {
                    let mut object = self
                        .object(path)
                        .unwrap_or_else(|| with_identity(path, json!({})));
                    merge(
                        &mut object,
                        json!({ "properties": { "provisioningState": state } }),
                    );
                    Ok(Some(object))
                }
                None => Ok(self.object(path)),
            }
        }

        async fn put(
            &self,
            path: &str,
            _api_version: &str,
            body: JsonValue,
        ) -> ProviderResult<Submission<Option<JsonValue>>> {
            self.record("PUT", path);
            if let Some(err) = self.put_error.lock().unwrap().take() {
                return Err(err);
            }
            let object = with_identity(path, body);
            self.objects
                .lock()
                .unwrap()
                .insert(path.to_string(), object.clone());
            Ok(self.submission(path, object))
        }

        async fn patch(
            &self,
            path: &str,
            _api_version: &str,
            body: JsonValue,
        ) -> ProviderResult<Submission<Option<JsonValue>>> {
            self.record("PATCH", path);
            let mut objects = self.objects.lock().unwrap();
            let object = objects
                .get_mut(path)
                .ok_or_else(|| ProviderError::not_found(format!("{} not found", path)))?;
            merge(object, body);
            let object = object.clone();
            drop(objects);
            Ok(self.submission(path, object))
        }

        async fn post(
            &self,
            path: &str,
            _api_version: &str,
            _body: Option<JsonValue>,
        ) -> ProviderResult<Submission<Option<JsonValue>>> {
            self.record("POST", path);
            Ok(Submission::Completed(None))
        }

        async fn delete(&self, path: &str, _api_version: &str) -> ProviderResult<DeleteOutcome> {
            self.record("DELETE", path);
            match self.objects.lock().unwrap().remove(path) {
                None => Ok(DeleteOutcome::NotFound),
                Some(_) if self.async_operations => Ok(DeleteOutcome::Accepted(
                    OperationHandle::new(format!("https://fake{}/operation", path)),
                )),
                Some(_) => Ok(DeleteOutcome::Deleted),
            }
        }

        async fn operation_status(
            &self,
            handle: &OperationHandle,
        ) -> ProviderResult<ProvisioningState> {
            self.record("STATUS", &handle.polling_url);
            Ok(self
                .operation_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ProvisioningState::Succeeded))
        }
    }
}
