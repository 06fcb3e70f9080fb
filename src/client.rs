//! Interactive client keeping one CLI session open across several queries.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;

use crate::config::ClaudeAgentOptions;
use crate::error::{CliConnectionError, SdkError};
use crate::internal::client::{
    message_stream, prepare_permission_options, spawn_prompt_writer, start_query, MessageStream,
    PromptInput,
};
use crate::internal::query::Query;
use crate::permission::PermissionMode;
use crate::transport::subprocess_cli::SubprocessCliTransport;
use crate::transport::Transport;

/// Entrypoint reported to the CLI by the interactive client.
pub const CLIENT_ENTRYPOINT: &str = "sdk-rs-client";

/// Convenience alias for trait-object transports.
pub type DynTransport = Arc<dyn Transport>;

/// Bidirectional session with Claude Code.
///
/// ```no_run
/// use claude_agent_sdk::ClaudeSdkClient;
/// use futures::StreamExt;
///
/// # async fn run() -> Result<(), claude_agent_sdk::SdkError> {
/// let mut client = ClaudeSdkClient::new(None, None);
/// client.connect(None).await?;
/// client.query("List the files here", "default").await?;
/// let mut response = client.receive_response()?;
/// while let Some(message) = response.next().await {
///     println!("{:?}", message?);
/// }
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct ClaudeSdkClient {
    options: ClaudeAgentOptions,
    custom_transport: Option<DynTransport>,
    query: Option<Query<dyn Transport>>,
    prompt_task: Option<JoinHandle<()>>,
    server_info: Option<Map<String, Value>>,
}

impl Default for ClaudeSdkClient {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl ClaudeSdkClient {
    /// Create a new client with optional configuration and transport override.
    pub fn new(options: Option<ClaudeAgentOptions>, transport: Option<DynTransport>) -> Self {
        Self {
            options: options.unwrap_or_default(),
            custom_transport: transport,
            query: None,
            prompt_task: None,
            server_info: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.query.is_some()
    }

    /// Connect to Claude Code with an optional initial prompt.
    ///
    /// Without a prompt the session starts in streaming mode with an empty
    /// input stream, ready for [`query`](Self::query).
    pub async fn connect(&mut self, prompt: Option<PromptInput>) -> Result<(), SdkError> {
        if self.query.is_some() {
            return Ok(());
        }

        let prompt =
            prompt.unwrap_or_else(|| PromptInput::from_stream(tokio_stream::empty::<Value>()));
        let is_streaming = prompt.is_streaming();
        prepare_permission_options(&mut self.options, is_streaming)?;

        let (prompt_mode, stream_source) = prompt.split();
        let transport: DynTransport = match &self.custom_transport {
            Some(custom) => Arc::clone(custom),
            None => Arc::new(
                SubprocessCliTransport::new(prompt_mode, self.options.clone())
                    .with_entrypoint(CLIENT_ENTRYPOINT),
            ),
        };

        transport.connect().await?;

        let query: Query<dyn Transport> =
            Query::from_options(transport, is_streaming, &self.options);
        if let Err(err) = start_query(&query).await {
            let _ = query.close().await;
            return Err(err);
        }
        self.server_info = query.initialization_result().await;

        if let Some(stream) = stream_source {
            self.prompt_task = Some(spawn_prompt_writer(query.clone(), stream));
        }

        self.query = Some(query);
        Ok(())
    }

    /// Every message of the session until the CLI closes its output.
    pub fn receive_messages(&self) -> Result<MessageStream, SdkError> {
        Ok(message_stream(self.active_query()?.clone(), false))
    }

    /// Messages up to and including the next result message.
    pub fn receive_response(&self) -> Result<MessageStream, SdkError> {
        Ok(message_stream(self.active_query()?.clone(), true))
    }

    /// Send a new prompt in streaming mode.
    ///
    /// Stream prompts are forwarded as-is, with `session_id` filled in when absent.
    pub async fn query<Q>(&self, prompt: Q, session_id: &str) -> Result<(), SdkError>
    where
        Q: Into<ClientPrompt>,
    {
        let query = self.active_query()?;

        match prompt.into() {
            ClientPrompt::Text(text) => {
                let message = json!({
                    "type": "user",
                    "message": { "role": "user", "content": text },
                    "parent_tool_use_id": Value::Null,
                    "session_id": session_id,
                });
                query.write_value(&message).await?;
            }
            ClientPrompt::Stream(mut stream) => {
                while let Some(mut value) = stream.next().await {
                    if let Some(object) = value.as_object_mut() {
                        object
                            .entry("session_id")
                            .or_insert_with(|| Value::String(session_id.to_string()));
                    }
                    query.write_value(&value).await?;
                }
            }
        }

        Ok(())
    }

    /// Interrupt the current turn.
    pub async fn interrupt(&self) -> Result<(), SdkError> {
        self.active_query()?.interrupt().await
    }

    /// Update the permission mode during an active session.
    pub async fn set_permission_mode(&mut self, mode: PermissionMode) -> Result<(), SdkError> {
        self.active_query()?.set_permission_mode(mode).await?;
        self.options.permission_mode = Some(mode);
        Ok(())
    }

    /// Payload returned by the CLI's `initialize` response.
    pub fn get_server_info(&self) -> Option<&Map<String, Value>> {
        self.server_info.as_ref()
    }

    /// Disconnect and release transport resources. Safe to call repeatedly.
    pub async fn disconnect(&mut self) -> Result<(), SdkError> {
        if let Some(handle) = self.prompt_task.take() {
            handle.abort();
            let _ = handle.await;
        }

        self.server_info = None;
        match self.query.take() {
            Some(query) => query.close().await,
            None => Ok(()),
        }
    }

    fn active_query(&self) -> Result<&Query<dyn Transport>, SdkError> {
        self.query
            .as_ref()
            .ok_or_else(|| CliConnectionError::new("Not connected").into())
    }
}

/// Inputs accepted by [`ClaudeSdkClient::query`].
pub enum ClientPrompt {
    Text(String),
    Stream(BoxStream<'static, Value>),
}

impl ClientPrompt {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        ClientPrompt::Stream(stream.boxed())
    }
}

impl From<&str> for ClientPrompt {
    fn from(value: &str) -> Self {
        ClientPrompt::Text(value.to_string())
    }
}

impl From<String> for ClientPrompt {
    fn from(value: String) -> Self {
        ClientPrompt::Text(value)
    }
}

impl From<BoxStream<'static, Value>> for ClientPrompt {
    fn from(stream: BoxStream<'static, Value>) -> Self {
        ClientPrompt::Stream(stream)
    }
}
