//! Error taxonomy for the bridge.

use thiserror::Error;

use crate::graphql::GraphqlError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to start auth flow: {0}")]
    AuthStartFailed(String),

    #[error("Refresh failed: {0}")]
    RefreshFailed(String),

    /// The instance reported no installed plugin packages at all. Unauthenticated
    /// requests against Caido typically look like this, hence the exact wording.
    #[error("No plugin packages found")]
    PluginNotFound,

    #[error("Plugin package '{0}' not found")]
    PackageNotFound(String),

    #[error("Backend plugin not found in package '{0}'")]
    BackendNotFound(String),

    #[error("{0}")]
    RemoteCallFailed(String),

    #[error("Tool '{0}' is not registered")]
    ToolNotRegistered(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

impl From<GraphqlError> for BridgeError {
    fn from(err: GraphqlError) -> Self {
        BridgeError::RemoteCallFailed(err.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::RemoteCallFailed(err.to_string())
    }
}

/// Whether an error message looks like the remote rejected us for lack of credentials.
pub fn is_auth_error_message(message: &str) -> bool {
    message.contains("401")
        || message.contains("Unauthorized")
        || message.contains("authentication")
        || message.contains("No plugin packages found")
}
