//! Azure Resource Manager REST implementation of [`ControlPlane`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use azurerm_core::error::{ErrorKind, ProviderError, ProviderResult};
use azurerm_core::poll::{OperationHandle, ProvisioningState, Submission};

use crate::client::{ControlPlane, DeleteOutcome};

const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";

/// Source of bearer tokens for the management endpoint
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn token(&self) -> ProviderResult<String>;
}

/// A pre-acquired access token
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenCredential for StaticToken {
    async fn token(&self) -> ProviderResult<String> {
        Ok(self.0.clone())
    }
}

pub struct RestControlPlane {
    http: Client,
    endpoint: String,
    credential: Arc<dyn TokenCredential>,
}

impl RestControlPlane {
    pub fn new(
        endpoint: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
    ) -> ProviderResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("azurerm/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::transport("failed to build HTTP client").with_cause(e))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credential,
        })
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, api_version)
    }

    async fn request(&self, method: Method, url: &str) -> ProviderResult<RequestBuilder> {
        let token = self.credential.token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> ProviderResult<Response> {
        request
            .send()
            .await
            .map_err(|e| ProviderError::transport("request failed").with_cause(e))
    }

    async fn submit(
        &self,
        method: Method,
        path: &str,
        api_version: &str,
        body: Option<JsonValue>,
    ) -> ProviderResult<Submission<Option<JsonValue>>> {
        let url = self.url(path, api_version);
        log::debug!("{} {}", method, url);
        let mut request = self.request(method, &url).await?;
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = self.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }
        if let Some(handle) = operation_handle(status, response.headers())? {
            return Ok(Submission::Accepted(handle));
        }
        Ok(Submission::Completed(read_body(response).await?))
    }
}

#[async_trait]
impl ControlPlane for RestControlPlane {
    async fn get(&self, path: &str, api_version: &str) -> ProviderResult<Option<JsonValue>> {
        let url = self.url(path, api_version);
        log::debug!("GET {}", url);
        let response = self.send(self.request(Method::GET, &url).await?).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => read_body(response).await,
            _ => Err(error_from_response(response).await),
        }
    }

    async fn put(
        &self,
        path: &str,
        api_version: &str,
        body: JsonValue,
    ) -> ProviderResult<Submission<Option<JsonValue>>> {
        self.submit(Method::PUT, path, api_version, Some(body)).await
    }

    async fn patch(
        &self,
        path: &str,
        api_version: &str,
        body: JsonValue,
    ) -> ProviderResult<Submission<Option<JsonValue>>> {
        self.submit(Method::PATCH, path, api_version, Some(body))
            .await
    }

    async fn post(
        &self,
        path: &str,
        api_version: &str,
        body: Option<JsonValue>,
    ) -> ProviderResult<Submission<Option<JsonValue>>> {
        self.submit(Method::POST, path, api_version, body).await
    }

    async fn delete(&self, path: &str, api_version: &str) -> ProviderResult<DeleteOutcome> {
        let url = self.url(path, api_version);
        log::debug!("DELETE {}", url);
        let response = self.send(self.request(Method::DELETE, &url).await?).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::NotFound);
        }
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(match operation_handle(status, response.headers())? {
            Some(handle) => DeleteOutcome::Accepted(handle),
            None => DeleteOutcome::Deleted,
        })
    }

    async fn operation_status(&self, handle: &OperationHandle) -> ProviderResult<ProvisioningState> {
        let response = self
            .send(self.request(Method::GET, &handle.polling_url).await?)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }
        let body = read_body(response).await?;
        Ok(operation_state(status, body.as_ref()))
    }
}

async fn read_body(response: Response) -> ProviderResult<Option<JsonValue>> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProviderError::transport("failed to read response body").with_cause(e))?;
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ProviderError::remote("response is not valid JSON").with_cause(e))
}

async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    arm_error(status, &body)
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Map a non-success ARM response to a [`ProviderError`]
fn arm_error(status: StatusCode, body: &str) -> ProviderError {
    let kind = match status {
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::CONFLICT => ErrorKind::AlreadyExists,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::Validation,
        _ => ErrorKind::Remote,
    };
    let message = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse { error }) => format!("{} ({}): {}", status, error.code, error.message),
        Err(_) if body.is_empty() => status.to_string(),
        Err(_) => format!("{}: {}", status, body),
    };
    ProviderError::new(kind, message)
}

/// Extract the polling handle of an asynchronous response, if any
fn operation_handle(
    status: StatusCode,
    headers: &HeaderMap,
) -> ProviderResult<Option<OperationHandle>> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    if let Some(url) = header(AZURE_ASYNC_OPERATION) {
        return Ok(Some(OperationHandle::new(url)));
    }
    if status == StatusCode::ACCEPTED {
        return match header(LOCATION.as_str()) {
            Some(url) => Ok(Some(OperationHandle::new(url))),
            None => Err(ProviderError::remote(
                "request accepted without an operation to poll",
            )),
        };
    }
    Ok(None)
}

/// Interpret one poll of an operation URL.
///
/// `Azure-AsyncOperation` URLs answer with `{"status": ...}`; `Location` URLs
/// answer 202 while running and 200/204 once done.
fn operation_state(status: StatusCode, body: Option<&JsonValue>) -> ProvisioningState {
    if status == StatusCode::ACCEPTED {
        return ProvisioningState::Accepted;
    }
    let reported = body
        .and_then(|b| b.get("status"))
        .and_then(JsonValue::as_str);
    match reported.map(ProvisioningState::parse) {
        None => ProvisioningState::Succeeded,
        // InProgress, Running, Deleting, ...
        Some(ProvisioningState::Other(_)) => ProvisioningState::Accepted,
        Some(state) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn url_carries_api_version() {
        let client = RestControlPlane::new(
            "https://management.azure.com/",
            Arc::new(StaticToken::new("t")),
        )
        .unwrap();
        assert_eq!(
            client.url("/subscriptions/s/resourceGroups/rg", "2017-04-01"),
            "https://management.azure.com/subscriptions/s/resourceGroups/rg?api-version=2017-04-01"
        );
    }

    #[test]
    fn arm_errors_map_to_kinds() {
        let body = r#"{"error":{"code":"BadRequest","message":"Premium SKU required"}}"#;
        let err = arm_error(StatusCode::BAD_REQUEST, body);
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("BadRequest"));
        assert!(err.message.contains("Premium SKU required"));

        assert_eq!(arm_error(StatusCode::CONFLICT, "").kind, ErrorKind::AlreadyExists);
        assert_eq!(
            arm_error(StatusCode::INTERNAL_SERVER_ERROR, "boom").kind,
            ErrorKind::Remote
        );
    }

    #[test]
    fn async_operation_header_wins_over_location() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("https://example/location"));
        headers.insert(
            AZURE_ASYNC_OPERATION,
            HeaderValue::from_static("https://example/async"),
        );
        let handle = operation_handle(StatusCode::CREATED, &headers)
            .unwrap()
            .unwrap();
        assert_eq!(handle.polling_url, "https://example/async");
    }

    #[test]
    fn accepted_without_polling_url_is_an_error() {
        assert!(operation_handle(StatusCode::ACCEPTED, &HeaderMap::new()).is_err());
        assert!(
            operation_handle(StatusCode::OK, &HeaderMap::new())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn operation_status_bodies() {
        use ProvisioningState::*;

        assert_eq!(operation_state(StatusCode::ACCEPTED, None), Accepted);
        assert_eq!(operation_state(StatusCode::NO_CONTENT, None), Succeeded);
        assert_eq!(
            operation_state(StatusCode::OK, Some(&json!({"status": "InProgress"}))),
            Accepted
        );
        assert_eq!(
            operation_state(StatusCode::OK, Some(&json!({"status": "Failed"}))),
            Failed
        );
        assert_eq!(
            operation_state(StatusCode::OK, Some(&json!({"status": "Succeeded"}))),
            Succeeded
        );
    }
}
