// ABOUTME: HTTP client for the billing provider's REST API
// ABOUTME: Classifies every failure into a RemoteError before it leaves this module

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use super::models::{ListPage, RemoteObject};
use crate::error::RemoteError;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Form parameters in the provider's bracket notation (`metadata[tier]`).
pub type Params = Vec<(String, String)>;

/// Page size used for every paginated listing.
pub const PAGE_SIZE: u32 = 100;

/// Path of a resource relative to the API base (`customers/cus_1/sources`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePath(String);

impl ResourcePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into().trim_matches('/').to_string())
    }

    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}/{}", self.0, segment.trim_matches('/')))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One request of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub starting_after: Option<String>,
    pub filters: Vec<(String, String)>,
}

impl PageRequest {
    pub fn first(limit: u32) -> Self {
        Self {
            limit,
            starting_after: None,
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    /// The next page, continuing after `cursor`.
    pub fn after(&self, cursor: &str) -> Self {
        Self {
            limit: self.limit,
            starting_after: Some(cursor.to_string()),
            filters: self.filters.clone(),
        }
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![("limit".to_string(), self.limit.to_string())];
        if let Some(cursor) = &self.starting_after {
            query.push(("starting_after".to_string(), cursor.clone()));
        }
        query.extend(self.filters.iter().cloned());
        query
    }
}

/// The provider operations the mirror depends on.
#[async_trait]
pub trait BillingApi: Send + Sync {
    async fn retrieve(&self, path: &ResourcePath) -> RemoteResult<RemoteObject>;

    /// Read an object the provider computes from query parameters, such as
    /// the upcoming invoice of a customer.
    async fn retrieve_with(
        &self,
        path: &ResourcePath,
        query: &[(String, String)],
    ) -> RemoteResult<RemoteObject>;

    async fn list(&self, path: &ResourcePath, page: &PageRequest) -> RemoteResult<ListPage>;

    async fn create(&self, path: &ResourcePath, params: &[(String, String)])
        -> RemoteResult<RemoteObject>;

    async fn update(&self, path: &ResourcePath, params: &[(String, String)])
        -> RemoteResult<RemoteObject>;

    async fn delete(&self, path: &ResourcePath) -> RemoteResult<RemoteObject>;
}

pub struct HttpBillingClient {
    client: Client,
    api_base_url: String,
    api_key: String,
    api_version: Option<String>,
}

impl HttpBillingClient {
    pub fn new(
        api_base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_version: None,
        })
    }

    /// Pin the provider API version sent with every request.
    pub fn with_api_version(mut self, version: Option<String>) -> Self {
        self.api_version = version;
        self
    }

    fn url(&self, path: &ResourcePath) -> String {
        format!("{}/{}", self.api_base_url, path.as_str())
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Value> {
        let mut request = request.bearer_auth(&self.api_key);
        if let Some(ref version) = self.api_version {
            request = request.header("Stripe-Version", version);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = RemoteError::classify(status.as_u16(), &body);
            tracing::debug!("Provider answered {}: {}", status, err);
            return Err(err);
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| RemoteError::provider(format!("Failed to parse provider response: {}", e)))
    }

    async fn send_object(&self, request: RequestBuilder) -> RemoteResult<RemoteObject> {
        let value = self.send(request).await?;
        RemoteObject::from_value(value)
            .ok_or_else(|| RemoteError::provider("Provider response was not a JSON object"))
    }
}

#[async_trait]
impl BillingApi for HttpBillingClient {
    async fn retrieve(&self, path: &ResourcePath) -> RemoteResult<RemoteObject> {
        self.send_object(self.client.get(self.url(path))).await
    }

    async fn retrieve_with(
        &self,
        path: &ResourcePath,
        query: &[(String, String)],
    ) -> RemoteResult<RemoteObject> {
        self.send_object(self.client.get(self.url(path)).query(query))
            .await
    }

    async fn list(&self, path: &ResourcePath, page: &PageRequest) -> RemoteResult<ListPage> {
        let value = self
            .send(self.client.get(self.url(path)).query(&page.to_query()))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| RemoteError::provider(format!("Failed to parse list page: {}", e)))
    }

    async fn create(
        &self,
        path: &ResourcePath,
        params: &[(String, String)],
    ) -> RemoteResult<RemoteObject> {
        self.send_object(self.client.post(self.url(path)).form(params))
            .await
    }

    async fn update(
        &self,
        path: &ResourcePath,
        params: &[(String, String)],
    ) -> RemoteResult<RemoteObject> {
        self.send_object(self.client.post(self.url(path)).form(params))
            .await
    }

    async fn delete(&self, path: &ResourcePath) -> RemoteResult<RemoteObject> {
        self.send_object(self.client.delete(self.url(path))).await
    }
}

/// Encode a JSON value as bracket-notation form parameters:
/// `{"metadata": {"tier": "gold"}}` becomes `metadata[tier]=gold`.
pub fn form_params(value: &Value) -> Params {
    let mut out = Vec::new();
    if let Value::Object(map) = value {
        for (key, value) in map {
            encode_param(key, value, &mut out);
        }
    }
    out
}

fn encode_param(prefix: &str, value: &Value, out: &mut Params) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, value) in map {
                encode_param(&format!("{}[{}]", prefix, key), value, out);
            }
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                encode_param(&format!("{}[{}]", prefix, index), value, out);
            }
        }
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}
