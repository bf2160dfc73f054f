//! Background listener for `createdAuthenticationToken`.
//!
//! Speaks the `graphql-transport-ws` protocol on `{base}/ws/graphql`. Each listener is
//! scoped to one device-flow request and reports its progress as [`AuthEvent`]s on a
//! channel; it never touches shared state directly.
//!
//! ```text
//! Connecting ──ack──▶ Subscribed ──┬─▶ TokenReceived
//!                                  ├─▶ Failed
//!                                  └─▶ Completed
//! ```

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::auth::credential::AuthToken;
use crate::graphql::CREATED_AUTHENTICATION_TOKEN;

pub const GRAPHQL_TRANSPORT_WS: &str = "graphql-transport-ws";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What a listener needs to know about the flow it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub request_id: String,
    /// Flow generation the listener was armed for.
    pub generation: u64,
    /// Sent in the `connection_init` payload when present.
    pub bearer: Option<String>,
}

impl SubscriptionRequest {
    pub fn event(&self, kind: AuthEventKind) -> AuthEvent {
        AuthEvent {
            generation: self.generation,
            request_id: self.request_id.clone(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEventKind {
    Subscribed,
    TokenReceived(AuthToken),
    Failed(String),
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub generation: u64,
    pub request_id: String,
    pub kind: AuthEventKind,
}

/// Arms a listener for one device-flow request.
pub trait TokenSubscriber: Send + Sync {
    /// Spawn the listener and return a handle that tears it down.
    fn subscribe(
        &self,
        request: SubscriptionRequest,
        events: mpsc::UnboundedSender<AuthEvent>,
    ) -> AbortHandle;
}

/// [`TokenSubscriber`] backed by a real WebSocket connection.
#[derive(Debug, Clone)]
pub struct WsTokenSubscriber {
    ws_url: String,
}

impl WsTokenSubscriber {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

impl TokenSubscriber for WsTokenSubscriber {
    fn subscribe(
        &self,
        request: SubscriptionRequest,
        events: mpsc::UnboundedSender<AuthEvent>,
    ) -> AbortHandle {
        let ws_url = self.ws_url.clone();
        tokio::spawn(run_listener(ws_url, request, events)).abort_handle()
    }
}

async fn run_listener(
    ws_url: String,
    request: SubscriptionRequest,
    events: mpsc::UnboundedSender<AuthEvent>,
) {
    tracing::info!(
        request_id = %request.request_id,
        generation = request.generation,
        "Starting background subscription at {ws_url}"
    );

    let kind = match listen(&ws_url, &request, &events).await {
        Ok(Some(token)) => {
            tracing::info!(request_id = %request.request_id, "Token received via background subscription");
            AuthEventKind::TokenReceived(token)
        }
        Ok(None) => {
            tracing::info!(request_id = %request.request_id, "Background subscription completed");
            AuthEventKind::Completed
        }
        Err(err) => {
            tracing::error!(request_id = %request.request_id, "Background subscription error: {err}");
            AuthEventKind::Failed(err.to_string())
        }
    };
    let _ = events.send(request.event(kind));
}

async fn listen(
    ws_url: &str,
    request: &SubscriptionRequest,
    events: &mpsc::UnboundedSender<AuthEvent>,
) -> Result<Option<AuthToken>> {
    let mut client_request = ws_url.into_client_request()?;
    client_request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(GRAPHQL_TRANSPORT_WS),
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(client_request).await?;

    let outcome = drive(&mut ws, request, events).await;
    let _ = ws.close(None).await;
    outcome
}

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

async fn drive(
    ws: &mut WsStream,
    request: &SubscriptionRequest,
    events: &mpsc::UnboundedSender<AuthEvent>,
) -> Result<Option<AuthToken>> {
    ws.send(Message::text(
        connection_init(request.bearer.as_deref()).to_string(),
    ))
    .await?;

    let subscription_id = uuid::Uuid::new_v4().to_string();
    let mut subscribed = false;

    loop {
        let text = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None if subscribed => return Ok(None),
            Some(Ok(Message::Close(_))) | None => {
                return Err(anyhow!("connection closed before subscription started"))
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
        };
        let frame: Frame = serde_json::from_str(text.as_str())?;

        match frame.kind.as_str() {
            "connection_ack" => {
                ws.send(Message::text(
                    subscribe_message(&subscription_id, &request.request_id).to_string(),
                ))
                .await?;
                subscribed = true;
                let _ = events.send(request.event(AuthEventKind::Subscribed));
            }
            "ping" => {
                ws.send(Message::text(json!({ "type": "pong" }).to_string()))
                    .await?;
            }
            "next" if frame.id.as_deref() == Some(subscription_id.as_str()) => {
                let payload = frame.payload.unwrap_or(Value::Null);
                tracing::debug!(request_id = %request.request_id, "Subscription data received");
                if let Some(token) = token_from_payload(&payload) {
                    return Ok(Some(token));
                }
                if let Some(errors) = payload.get("errors") {
                    return Err(anyhow!("subscription errors: {errors}"));
                }
            }
            "error" => {
                let payload = frame.payload.unwrap_or(Value::Null);
                return Err(anyhow!("subscription error: {payload}"));
            }
            "connection_error" => {
                let payload = frame.payload.unwrap_or(Value::Null);
                return Err(anyhow!("connection rejected: {payload}"));
            }
            "complete" => return Ok(None),
            other => tracing::debug!("Ignoring graphql-ws frame '{other}'"),
        }
    }
}

fn connection_init(bearer: Option<&str>) -> Value {
    let payload = match bearer {
        Some(token) => json!({ "Authorization": format!("Bearer {token}") }),
        None => json!({}),
    };
    json!({ "type": "connection_init", "payload": payload })
}

fn subscribe_message(id: &str, request_id: &str) -> Value {
    json!({
        "id": id,
        "type": "subscribe",
        "payload": {
            "query": CREATED_AUTHENTICATION_TOKEN,
            "variables": { "requestId": request_id },
        },
    })
}

/// Extract a usable token from a `next` payload.
pub fn token_from_payload(payload: &Value) -> Option<AuthToken> {
    let token = payload.pointer("/data/createdAuthenticationToken/token")?;
    serde_json::from_value::<AuthToken>(token.clone())
        .ok()
        .filter(|token| !token.access_token.is_empty())
}
