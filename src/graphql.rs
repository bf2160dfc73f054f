//! Minimal typed GraphQL-over-HTTP client for the Caido API.
//!
//! Only the handful of operations the bridge needs are defined here; responses are
//! deserialized straight into the caller's types.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const START_AUTHENTICATION_FLOW: &str = r#"mutation StartAuthenticationFlow {
  startAuthenticationFlow {
    request {
      id
      expiresAt
      userCode
      verificationUrl
    }
  }
}"#;

pub const REFRESH_AUTHENTICATION_TOKEN: &str = r#"mutation RefreshAuthenticationToken($refreshToken: Token!) {
  refreshAuthenticationToken(refreshToken: $refreshToken) {
    token {
      accessToken
      refreshToken
      expiresAt
    }
  }
}"#;

pub const CREATED_AUTHENTICATION_TOKEN: &str = r#"subscription CreatedAuthToken($requestId: ID!) {
  createdAuthenticationToken(requestId: $requestId) {
    token {
      expiresAt
      accessToken
      refreshToken
    }
  }
}"#;

pub const PLUGIN_PACKAGES: &str = r#"query pluginPackages {
  pluginPackages {
    id
    name
    description
    version
    installedAt
    manifestId
    plugins {
      __typename
      ... on PluginFrontend { id name enabled manifestId }
      ... on PluginBackend { id name enabled manifestId runtime state { error running } }
      ... on PluginWorkflow { id name enabled manifestId }
    }
  }
}"#;

#[derive(Debug, Error)]
pub enum GraphqlError {
    #[error("GraphQL transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("GraphQL request failed with status {0}")]
    Status(StatusCode),

    #[error("GraphQL errors: {0}")]
    Graphql(String),

    #[error("No data in GraphQL response")]
    NoData,
}

/// A single GraphQL operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlRequest<'a> {
    pub query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<&'a str>,
    pub variables: Value,
}

impl<'a> GraphqlRequest<'a> {
    pub fn new(query: &'a str) -> Self {
        Self {
            query,
            operation_name: None,
            variables: Value::Object(Default::default()),
        }
    }

    pub fn operation(mut self, name: &'a str) -> Self {
        self.operation_name = Some(name);
        self
    }

    pub fn variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<GraphqlErrorEntry>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorEntry {
    message: String,
}

#[derive(Debug, Clone)]
pub struct GraphqlClient {
    http: reqwest::Client,
    endpoint: String,
}

impl GraphqlClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Execute an operation and return its `data` payload.
    ///
    /// GraphQL-level errors take precedence over partial data.
    pub async fn execute<T>(
        &self,
        request: &GraphqlRequest<'_>,
        bearer: Option<&str>,
    ) -> Result<T, GraphqlError>
    where
        T: DeserializeOwned,
    {
        let mut builder = self.http.post(&self.endpoint).json(request);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GraphqlError::Status(status));
        }

        let body: GraphqlResponse<T> = response.json().await?;
        if let Some(errors) = body.errors.filter(|errors| !errors.is_empty()) {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            tracing::error!(endpoint = %self.endpoint, "GraphQL errors: {}", messages.join("; "));
            return Err(GraphqlError::Graphql(messages.join("; ")));
        }
        body.data.ok_or(GraphqlError::NoData)
    }
}
