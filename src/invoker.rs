//! Function invoker: calls a named function exported by a backend plugin.

use serde::Serialize;
use serde_json::Value;

use crate::error::BridgeError;

#[derive(Debug, Serialize)]
struct FunctionCall<'a> {
    name: &'a str,
    args: &'a [String],
}

#[derive(Debug, Clone)]
pub struct FunctionInvoker {
    http: reqwest::Client,
    base_url: String,
}

impl FunctionInvoker {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn function_url(&self, plugin_id: &str) -> String {
        format!("{}/plugin/backend/{plugin_id}/function", self.base_url)
    }

    /// POST `{ name, args }` to the plugin's function endpoint and return the response body.
    pub async fn invoke(
        &self,
        plugin_id: &str,
        function: &str,
        args: &[String],
        bearer: Option<&str>,
    ) -> Result<Value, BridgeError> {
        let url = self.function_url(plugin_id);
        tracing::info!(plugin_id = %plugin_id, function = %function, "Calling Caido function");
        tracing::debug!(args = ?args, "Function arguments");

        let mut builder = self.http.post(&url).json(&FunctionCall { name: function, args });
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(plugin_id = %plugin_id, %status, "Function call rejected");
            return Err(BridgeError::RemoteCallFailed(format!(
                "Request to {url} failed with status {status}{}",
                if body.trim().is_empty() {
                    String::new()
                } else {
                    format!(": {}", body.trim())
                }
            )));
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        let value = serde_json::from_slice(&bytes).map_err(|e| {
            BridgeError::RemoteCallFailed(format!("Invalid response from function {function}: {e}"))
        })?;
        tracing::info!(function = %function, "Function executed successfully");
        Ok(value)
    }
}
