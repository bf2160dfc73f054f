//! Runtime configuration for the bridge.
//!
//! Values come from command-line flags first, then environment variables, then defaults.

use std::path::PathBuf;

use anyhow::{anyhow, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_PACKAGE_NAME: &str = "Ebka AI Assistant";
pub const DEFAULT_PACKAGE_KEYWORD: &str = "Ebka";
pub const DEFAULT_BACKEND_FUNCTION: &str = "claudeDesktop";
const TOKEN_DIR_NAME: &str = ".caido-mcp";
const TOKEN_FILE_NAME: &str = "token.json";

/// Configuration shared by every component of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Caido instance root, without trailing slash or `/graphql` suffix.
    pub base_url: String,
    /// Static personal access token. Never refreshed.
    pub auth_token: Option<String>,
    /// Where the OAuth credential is persisted.
    pub token_path: PathBuf,
    /// Exact display name of the plugin package that hosts the backend.
    pub package_name: String,
    /// Fallback substring used when the package name does not match exactly.
    pub package_keyword: String,
    /// Backend function that receives forwarded tool calls.
    pub backend_function: String,
    /// Optional JSON tool catalog replacing the built-in one.
    pub tools_file: Option<PathBuf>,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: None,
            token_path: default_token_path(),
            package_name: DEFAULT_PACKAGE_NAME.to_string(),
            package_keyword: DEFAULT_PACKAGE_KEYWORD.to_string(),
            backend_function: DEFAULT_BACKEND_FUNCTION.to_string(),
            tools_file: None,
            log_dir: None,
        }
    }
}

impl BridgeConfig {
    /// Build the configuration from process arguments and environment.
    pub fn from_env_and_args<I>(args: I) -> Result<Self>
    where
        I: Iterator<Item = String>,
    {
        Self::from_lookup(args, |key| std::env::var(key).ok())
    }

    /// Same as [`BridgeConfig::from_env_and_args`] with an injectable environment.
    pub fn from_lookup<I, F>(mut args: I, env: F) -> Result<Self>
    where
        I: Iterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = env("CAIDO_BASE_URL").filter(|v| !v.is_empty()) {
            config.base_url = url;
        }
        config.auth_token = env("CAIDO_AUTH_TOKEN")
            .or_else(|| env("CAIDO_PAT"))
            .filter(|v| !v.is_empty());
        if let Some(path) = env("CAIDO_MCP_TOKEN_FILE").filter(|v| !v.is_empty()) {
            config.token_path = PathBuf::from(path);
        }
        config.tools_file = env("CAIDO_MCP_TOOLS")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        config.log_dir = env("CAIDO_MCP_LOG_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--base-url" => config.base_url = expect_value(&arg, args.next())?,
                "--token" => config.auth_token = Some(expect_value(&arg, args.next())?),
                "--token-file" => {
                    config.token_path = PathBuf::from(expect_value(&arg, args.next())?)
                }
                "--package-name" => config.package_name = expect_value(&arg, args.next())?,
                "--tools" => config.tools_file = Some(expect_value(&arg, args.next())?.into()),
                "--log-dir" => config.log_dir = Some(expect_value(&arg, args.next())?.into()),
                _ => {
                    eprintln!("Unknown argument: {arg}");
                }
            }
        }

        config.base_url = normalize_base_url(&config.base_url);
        Ok(config)
    }

    pub fn graphql_url(&self) -> String {
        format!("{}/graphql", self.base_url)
    }

    /// WebSocket endpoint used for GraphQL subscriptions.
    pub fn ws_url(&self) -> String {
        let ws_base = if self.base_url.starts_with("https://") {
            self.base_url.replacen("https://", "wss://", 1)
        } else {
            self.base_url.replacen("http://", "ws://", 1)
        };
        format!("{ws_base}/ws/graphql")
    }
}

fn expect_value(flag: &str, value: Option<String>) -> Result<String> {
    value.ok_or_else(|| anyhow!("Missing value for {flag}"))
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/graphql")
        .unwrap_or(trimmed)
        .to_string()
}

fn default_token_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(TOKEN_DIR_NAME)
        .join(TOKEN_FILE_NAME)
}
