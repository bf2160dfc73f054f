//! # Caido MCP Bridge
//!
//! Exposes a running Caido instance to AI assistants over the Model Context Protocol.
//! Tool calls are forwarded to the AI assistant backend plugin installed in Caido.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  MCP client (stdio, JSON-RPC)                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │                    mcp::server (rmcp SDK)                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │                         dispatcher                            │
//! │  ┌──────────────┐  ┌───────────┐  ┌──────────┐  ┌─────────┐  │
//! │  │ auth session │──│ discovery │──│ invoker  │  │ catalog │  │
//! │  └──────┬───────┘  └─────┬─────┘  └────┬─────┘  └─────────┘  │
//! │         │ ws subscription │ GraphQL     │ HTTP                 │
//! ├─────────┴─────────────────┴─────────────┴────────────────────┤
//! │                        Caido instance                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod graphql;
pub mod invoker;
pub mod mcp;
pub mod plugin;

pub use config::BridgeConfig;
pub use error::BridgeError;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
