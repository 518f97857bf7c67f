//! comfymcp gateway - MCP server over HTTP and stdio

pub mod auth;
pub mod rpc;
pub mod server;
pub mod startup;
pub mod stdio;

pub use rpc::McpHandler;
pub use server::{build_router, start_gateway, GatewayState};
pub use startup::Runtime;
pub use stdio::serve_stdio;
