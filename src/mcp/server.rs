//! MCP server implementation using the official rmcp SDK.
//!
//! The tool list is data driven (control tools plus the catalog), so `list_tools` and
//! `call_tool` are implemented by hand instead of through a generated tool router.

use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::model::*;
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler};
use serde_json::{Map, Value};

use crate::auth::{AuthSession, TokenStore, WsTokenSubscriber};
use crate::catalog::ToolCatalog;
use crate::config::BridgeConfig;
use crate::dispatcher::{ToolDispatcher, ToolOutcome};
use crate::graphql::GraphqlClient;
use crate::invoker::FunctionInvoker;
use crate::plugin::PluginDiscovery;

const SERVER_INSTRUCTIONS: &str = "\
You are helping the user with security testing using Caido.

Caido has the following modules:
- **Filters** - Used for creating filters that users can later use in search using preset:alias
- **Replay** - Consists of collections. Each collection contains sessions (requests). Users typically send interesting requests, and it's very important that both requests and collections are properly named so users don't get confused later.
- **Match/Replace (Tamper)** - Consists of collections. Each collection contains rules. Needed so users can automatically modify requests or responses. Like with Replay, it's important to maintain proper naming.
- **Findings** - Consists of discovered vulnerabilities. Users can create and view security findings.
- **Scopes** - Consists of scopes. Usually bug hunters and pentesters are limited to a certain scope, on which they have the right to send requests. So sometimes it can be useful.

IMPORTANT: Before using any Caido tools, you MUST authenticate first:
1. Use the \"authenticate\" tool to start the OAuth flow - it will give the user a verification URL
2. After the user confirms they've authorized, use \"check_authentication\" to complete the setup
3. Once authenticated, all other tools will work automatically

After authenticating, check the tools version with \"get_tools_version\".";

#[derive(Clone)]
pub struct CaidoMcpServer {
    dispatcher: Arc<ToolDispatcher>,
}

impl CaidoMcpServer {
    /// Wire up the bridge from configuration. Must be called inside a Tokio runtime.
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("caido-mcp-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        let graphql = GraphqlClient::new(http.clone(), config.graphql_url());

        let store = TokenStore::new(config.token_path.clone(), config.base_url.clone());
        let session = AuthSession::new(
            graphql.clone(),
            store,
            config.auth_token.clone(),
            Arc::new(WsTokenSubscriber::new(config.ws_url())),
        );
        let discovery = PluginDiscovery::new(
            graphql,
            config.package_name.clone(),
            config.package_keyword.clone(),
        );
        let invoker = FunctionInvoker::new(http, config.base_url.clone());
        let catalog = ToolCatalog::load(config.tools_file.as_deref())?;

        Ok(Self::from_dispatcher(Arc::new(ToolDispatcher::new(
            session,
            discovery,
            invoker,
            Arc::new(catalog),
            config.backend_function.clone(),
        ))))
    }

    pub fn from_dispatcher(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Restore persisted credentials before serving requests.
    pub async fn bootstrap(&self) -> Result<()> {
        self.dispatcher.session().restore_from_disk().await;
        tracing::info!(
            tools = self.dispatcher.catalog().tools.len(),
            catalog_version = %self.dispatcher.catalog().version,
            "Caido MCP bridge ready"
        );
        Ok(())
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.dispatcher
            .catalog()
            .all_tools()
            .into_iter()
            .map(|spec| {
                let schema = Arc::new(spec.schema_object());
                Tool::new(spec.name, spec.description, schema)
            })
            .collect()
    }

    pub async fn handle_call(&self, name: &str, arguments: Option<&Map<String, Value>>) -> CallToolResult {
        let ToolOutcome { text, is_error } = self.dispatcher.dispatch(name, arguments).await;
        if is_error {
            CallToolResult::error(vec![Content::text(text)])
        } else {
            CallToolResult::success(vec![Content::text(text)])
        }
    }
}

impl ServerHandler for CaidoMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "caido-mcp-server".into(),
                version: crate::VERSION.into(),
                title: Some("Caido MCP Server".into()),
                icons: None,
                website_url: None,
            },
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(SERVER_INSTRUCTIONS.into()),
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        tracing::debug!("Listing available tools");
        std::future::ready(Ok(ListToolsResult {
            tools: self.tools(),
            ..Default::default()
        }))
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move { Ok(self.handle_call(&request.name, request.arguments.as_ref()).await) }
    }
}
