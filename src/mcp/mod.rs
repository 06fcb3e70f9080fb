//! In-process MCP servers reachable through `mcp_message` control requests.
//!
//! The SDK does not interpret MCP traffic. Each inbound message is handed to the
//! server registered under the request's `server_name` and the server's reply is
//! relayed back to the CLI unchanged.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Future;
use serde_json::Value;

use crate::error::SdkError;

/// Trait implemented by MCP servers hosted inside the SDK process.
#[async_trait]
pub trait SdkMcpServer: Send + Sync {
    /// Name the CLI uses to address this server.
    fn name(&self) -> &str;

    /// Handle one JSON-RPC message and return the reply.
    async fn handle_message(&self, message: Value) -> Result<Value, SdkError>;
}

/// Future type returned by closure-backed servers.
pub type McpHandlerFuture = Pin<Box<dyn Future<Output = Result<Value, SdkError>> + Send>>;

struct FnMcpServer {
    name: String,
    handler: Arc<dyn Fn(Value) -> McpHandlerFuture + Send + Sync>,
}

#[async_trait]
impl SdkMcpServer for FnMcpServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle_message(&self, message: Value) -> Result<Value, SdkError> {
        (self.handler)(message).await
    }
}

/// Build a server from an async closure, ready for
/// [`ClaudeAgentOptions::with_sdk_server`](crate::config::ClaudeAgentOptions::with_sdk_server).
pub fn create_sdk_mcp_server<F, Fut>(name: impl Into<String>, handler: F) -> Arc<dyn SdkMcpServer>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, SdkError>> + Send + 'static,
{
    Arc::new(FnMcpServer {
        name: name.into(),
        handler: Arc::new(move |message| Box::pin(handler(message))),
    })
}
