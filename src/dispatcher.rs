//! Tool call dispatcher.
//!
//! Routes a tool call to the local control handlers or forwards it to the backend
//! plugin, and turns every outcome into the text result returned to the MCP client.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::auth::{AuthCheck, AuthSession, TokenStatus};
use crate::catalog::{ToolCatalog, AUTHENTICATE, CHECK_AUTHENTICATION, GET_PLUGIN_INFO, GET_TOOLS_VERSION};
use crate::error::{is_auth_error_message, BridgeError};
use crate::invoker::FunctionInvoker;
use crate::plugin::PluginDiscovery;

/// Text result of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

pub struct ToolDispatcher {
    session: AuthSession,
    discovery: PluginDiscovery,
    invoker: FunctionInvoker,
    catalog: Arc<ToolCatalog>,
    backend_function: String,
    // One call at a time through refresh, discovery and invoke.
    call_lock: Mutex<()>,
}

impl ToolDispatcher {
    pub fn new(
        session: AuthSession,
        discovery: PluginDiscovery,
        invoker: FunctionInvoker,
        catalog: Arc<ToolCatalog>,
        backend_function: impl Into<String>,
    ) -> Self {
        Self {
            session,
            discovery,
            invoker,
            catalog,
            backend_function: backend_function.into(),
            call_lock: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub async fn dispatch(&self, name: &str, args: Option<&Map<String, Value>>) -> ToolOutcome {
        tracing::info!(tool = %name, "Tool call requested");

        // Polling stays responsive while another call is suspended on the network.
        if name == CHECK_AUTHENTICATION {
            return self.check_authentication().await;
        }

        let _serialized = self.call_lock.lock().await;
        let result = match name {
            AUTHENTICATE => self.authenticate().await,
            GET_PLUGIN_INFO => self.plugin_info().await,
            _ => self.forward(name, args).await,
        };

        match result {
            Ok(text) => {
                tracing::info!(tool = %name, "Tool executed successfully");
                ToolOutcome::success(text)
            }
            Err(err) => self.failure(name, err).await,
        }
    }

    async fn authenticate(&self) -> Result<String, BridgeError> {
        let request = self.session.start_flow().await?;
        let user_code = request
            .user_code
            .as_deref()
            .map(|code| format!("User code: {code}\n\n"))
            .unwrap_or_default();
        Ok(format!(
            "Authentication Required\n\n\
             Please complete the authentication by visiting this URL:\n{}\n\n\
             {user_code}\
             After you've completed the verification, use the `check_authentication` tool to complete the setup.\n\n\
             Request ID: {}\n\
             Expires at: {}",
            request.verification_url,
            request.id,
            request.expires_at.to_rfc3339(),
        ))
    }

    async fn check_authentication(&self) -> ToolOutcome {
        match self.session.check_authentication_state().await {
            AuthCheck::NoPendingRequest => ToolOutcome::success(
                "No pending authentication request. Please use the `authenticate` tool first.",
            ),
            AuthCheck::Ready => {
                ToolOutcome::success("Authentication successful! You can now use Caido tools.")
            }
            AuthCheck::Waiting {
                verification_url,
                listening,
            } => {
                let mut text = format!(
                    "Authentication pending (state: WAITING). Please complete the verification at:\n\
                     {verification_url}\n\nThen run this tool again."
                );
                if !listening {
                    text.push_str(
                        "\n\nThe connection waiting for the token has closed. \
                         If this keeps happening, run `authenticate` again.",
                    );
                }
                ToolOutcome::success(text)
            }
            AuthCheck::Expired => ToolOutcome::error(
                "The authentication request has expired. Please use the `authenticate` tool to start a new one.",
            ),
        }
    }

    async fn plugin_info(&self) -> Result<String, BridgeError> {
        self.session.ensure_valid_token().await;
        let bearer = self.session.access_token().await;
        let packages = self.discovery.list_packages(bearer.as_deref()).await?;
        to_pretty(&packages)
    }

    async fn forward(&self, name: &str, args: Option<&Map<String, Value>>) -> Result<String, BridgeError> {
        let tool = self
            .catalog
            .get(name)
            .ok_or_else(|| BridgeError::ToolNotRegistered(name.to_string()))?;
        tool.validate(args)?;

        if self.session.ensure_valid_token().await == TokenStatus::Unauthenticated {
            tracing::debug!(tool = %name, "Forwarding without an access token");
        }
        let bearer = self.session.access_token().await;
        let plugin_id = self
            .discovery
            .resolve_backend_plugin_id(bearer.as_deref())
            .await?;

        let envelope = envelope_args(name, args)?;
        let mut result = self
            .invoker
            .invoke(&plugin_id, &self.backend_function, &envelope, bearer.as_deref())
            .await?;

        if name == GET_TOOLS_VERSION {
            append_tools_version(&mut result, &self.catalog.version);
        }
        to_pretty(&result)
    }

    async fn failure(&self, name: &str, err: BridgeError) -> ToolOutcome {
        let message = err.to_string();
        tracing::error!(tool = %name, "Error executing tool: {message}");

        let auth_tool = name == AUTHENTICATE || name == CHECK_AUTHENTICATION;
        if is_auth_error_message(&message) && !auth_tool && !self.session.has_access_token().await {
            return ToolOutcome::error(format!(
                "Authentication required to use Caido tools.\n\n\
                 Error: {message}\n\n\
                 Please use the `authenticate` tool to start the OAuth authentication flow."
            ));
        }
        ToolOutcome::error(format!("Error calling Caido function {name}: {message}"))
    }
}

/// Positional arguments for the backend entry point: the JSON-encoded tool name and
/// the JSON-encoded string of the JSON-encoded arguments object.
pub fn envelope_args(name: &str, args: Option<&Map<String, Value>>) -> Result<Vec<String>, BridgeError> {
    let encode = |e: serde_json::Error| BridgeError::InvalidArguments(e.to_string());
    let arguments = Value::Object(args.cloned().unwrap_or_default());
    let arguments_json = serde_json::to_string(&arguments).map_err(encode)?;
    Ok(vec![
        serde_json::to_string(name).map_err(encode)?,
        serde_json::to_string(&arguments_json).map_err(encode)?,
    ])
}

fn append_tools_version(result: &mut Value, version: &str) {
    let suffix = format!("MCP tools version: {version}");
    let Some(object) = result.as_object_mut() else {
        return;
    };
    let info = match object.get("client_info").and_then(Value::as_str) {
        Some(existing) => format!("{existing}\n{suffix}"),
        None => suffix,
    };
    object.insert("client_info".into(), Value::String(info));
}

fn to_pretty<T: serde::Serialize>(value: &T) -> Result<String, BridgeError> {
    serde_json::to_string_pretty(value).map_err(|e| BridgeError::RemoteCallFailed(e.to_string()))
}
