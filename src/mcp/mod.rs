//! MCP (Model Context Protocol) surface of the bridge, built on the rmcp SDK.

pub mod server;

pub use server::CaidoMcpServer;
