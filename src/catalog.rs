//! The tool catalog advertised to MCP clients.
//!
//! Three control tools are handled locally by the bridge; everything else in the
//! catalog is forwarded to the backend plugin under its own name.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::BridgeError;

pub const AUTHENTICATE: &str = "authenticate";
pub const CHECK_AUTHENTICATION: &str = "check_authentication";
pub const GET_PLUGIN_INFO: &str = "get_plugin_info";
pub const GET_TOOLS_VERSION: &str = "get_tools_version";

pub const CONTROL_TOOLS: [&str; 3] = [AUTHENTICATE, CHECK_AUTHENTICATION, GET_PLUGIN_INFO];

const BUILTIN_CATALOG: &str = include_str!("../assets/tools.json");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub input_schema: InputSchema,
}

impl ToolSpec {
    fn control(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: InputSchema::default(),
        }
    }

    /// JSON Schema object as sent in `tools/list`.
    pub fn schema_object(&self) -> Map<String, Value> {
        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert(
            "properties".into(),
            Value::Object(self.input_schema.properties.clone()),
        );
        schema.insert("required".into(), json!(self.input_schema.required));
        schema
    }

    /// Reject calls that omit a required argument. Types are left to the backend.
    pub fn validate(&self, args: Option<&Map<String, Value>>) -> Result<(), BridgeError> {
        let missing: Vec<&str> = self
            .input_schema
            .required
            .iter()
            .filter(|key| args.and_then(|a| a.get(key.as_str())).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::InvalidArguments(format!(
                "missing required argument(s) for {}: {}",
                self.name,
                missing.join(", ")
            )))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCatalog {
    pub version: String,
    pub tools: Vec<ToolSpec>,
}

impl ToolCatalog {
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_CATALOG).context("built-in tool catalog is invalid")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tool catalog {}", path.display()))?;
        Self::from_json_str(&contents)
            .with_context(|| format!("failed to parse tool catalog {}", path.display()))
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let catalog: ToolCatalog = serde_json::from_str(contents)?;
        for (i, tool) in catalog.tools.iter().enumerate() {
            if CONTROL_TOOLS.contains(&tool.name.as_str()) {
                bail!("tool '{}' shadows a built-in control tool", tool.name);
            }
            if catalog.tools[..i].iter().any(|t| t.name == tool.name) {
                bail!("tool '{}' is declared twice", tool.name);
            }
        }
        Ok(catalog)
    }

    /// Catalog file when configured, otherwise the built-in catalog.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let catalog = Self::from_file(path)?;
                tracing::info!(
                    path = %path.display(),
                    version = %catalog.version,
                    "Loaded {} tools from catalog file",
                    catalog.tools.len()
                );
                Ok(catalog)
            }
            None => Self::builtin(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Control tools first, then the forwarded catalog in declaration order.
    pub fn all_tools(&self) -> Vec<ToolSpec> {
        let mut tools = vec![
            ToolSpec::control(
                AUTHENTICATE,
                "Start OAuth authentication flow with Caido. This will provide a verification URL for the user to authorize the connection.",
            ),
            ToolSpec::control(
                CHECK_AUTHENTICATION,
                "Check the status of pending authentication request. Use this after the user has completed the verification.",
            ),
            ToolSpec::control(
                GET_PLUGIN_INFO,
                "List the plugin packages installed in the connected Caido instance.",
            ),
        ];
        tools.extend(self.tools.iter().cloned());
        tools
    }
}
