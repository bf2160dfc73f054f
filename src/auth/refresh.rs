//! Refresh-token exchange.

use serde::Deserialize;
use serde_json::json;

use crate::auth::credential::AuthToken;
use crate::error::BridgeError;
use crate::graphql::{GraphqlClient, GraphqlRequest, REFRESH_AUTHENTICATION_TOKEN};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
    refresh_authentication_token: Option<RefreshPayload>,
}

#[derive(Debug, Deserialize)]
struct RefreshPayload {
    token: Option<AuthToken>,
}

/// Exchange `refresh_token` for a new token pair. Single attempt, no retries.
pub async fn refresh_access_token(
    client: &GraphqlClient,
    refresh_token: &str,
) -> Result<AuthToken, BridgeError> {
    tracing::info!("Attempting to refresh access token");
    let request = GraphqlRequest::new(REFRESH_AUTHENTICATION_TOKEN)
        .variables(json!({ "refreshToken": refresh_token }));

    let data: RefreshData = client
        .execute(&request, None)
        .await
        .map_err(|e| BridgeError::RefreshFailed(e.to_string()))?;

    let token = data
        .refresh_authentication_token
        .and_then(|payload| payload.token)
        .filter(|token| !token.access_token.is_empty())
        .ok_or_else(|| BridgeError::RefreshFailed("no token returned".into()))?;

    tracing::info!("Token refreshed successfully");
    Ok(token)
}
