//! One-shot query helper.

use crate::client::DynTransport;
use crate::config::ClaudeAgentOptions;
use crate::error::SdkError;
use crate::internal::client::{InternalClient, MessageStream, PromptInput};

/// Execute a one-off query against Claude Code, yielding streamed messages.
///
/// A text prompt runs the CLI in `--print` mode; a stream prompt keeps stdin
/// open and enables the control protocol (permissions, hooks, SDK MCP servers).
///
/// ```no_run
/// use claude_agent_sdk::{query, ClaudeAgentOptions};
/// use futures::StreamExt;
///
/// # async fn run() -> Result<(), claude_agent_sdk::SdkError> {
/// let mut messages = query("What is 2 + 2?", Some(ClaudeAgentOptions::new()), None).await?;
/// while let Some(message) = messages.next().await {
///     println!("{:?}", message?);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn query<P>(
    prompt: P,
    options: Option<ClaudeAgentOptions>,
    transport: Option<DynTransport>,
) -> Result<MessageStream, SdkError>
where
    P: Into<PromptInput>,
{
    InternalClient::new()
        .process_query(prompt.into(), options.unwrap_or_default(), transport)
        .await
}
