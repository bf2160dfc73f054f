//! Device-style OAuth flow initiation.

use serde::Deserialize;

use crate::auth::credential::AuthenticationRequest;
use crate::error::BridgeError;
use crate::graphql::{GraphqlClient, GraphqlRequest, START_AUTHENTICATION_FLOW};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartFlowData {
    start_authentication_flow: Option<StartFlowPayload>,
}

#[derive(Debug, Deserialize)]
struct StartFlowPayload {
    request: Option<AuthenticationRequest>,
}

/// Ask the instance for a new verification URL. The mutation is sent without
/// credentials since it is how credentials are obtained in the first place.
pub async fn start_authentication_flow(
    client: &GraphqlClient,
) -> Result<AuthenticationRequest, BridgeError> {
    tracing::info!("Starting authentication flow via GraphQL");
    let request = GraphqlRequest::new(START_AUTHENTICATION_FLOW).operation("StartAuthenticationFlow");

    let data: StartFlowData = client
        .execute(&request, None)
        .await
        .map_err(|e| BridgeError::AuthStartFailed(e.to_string()))?;

    let request = data
        .start_authentication_flow
        .and_then(|payload| payload.request)
        .ok_or_else(|| BridgeError::AuthStartFailed("No authentication request returned".into()))?;

    tracing::info!(request_id = %request.id, "Auth flow started");
    Ok(request)
}
