//! Wiring shared by the one-shot [`query`](crate::query::query) helper and the
//! interactive client: prompt selection, transport setup and message streams.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{stream, Stream, StreamExt};
use serde_json::Value;

use crate::config::{ClaudeAgentOptions, OptionsError};
use crate::error::{CliConnectionError, SdkError};
use crate::internal::query::Query;
use crate::message::Message;
use crate::transport::subprocess_cli::{PromptMode, SubprocessCliTransport, SDK_ENTRYPOINT};
use crate::transport::Transport;

/// Stream of messages handed to callers; errors are delivered in-band.
pub type MessageStream = BoxStream<'static, Result<Message, SdkError>>;

/// Prompt input accepted by the facades.
pub enum PromptInput {
    /// Sent once as a `--print` argument.
    Text(String),
    /// User messages written to stdin as they arrive.
    Stream(BoxStream<'static, Value>),
}

impl PromptInput {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        PromptInput::Stream(stream.boxed())
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, PromptInput::Stream(_))
    }

    pub(crate) fn split(self) -> (PromptMode, Option<BoxStream<'static, Value>>) {
        match self {
            PromptInput::Text(text) => (PromptMode::Text(text), None),
            PromptInput::Stream(stream) => (PromptMode::Streaming, Some(stream)),
        }
    }
}

impl From<String> for PromptInput {
    fn from(value: String) -> Self {
        PromptInput::Text(value)
    }
}

impl From<&str> for PromptInput {
    fn from(value: &str) -> Self {
        PromptInput::Text(value.to_string())
    }
}

impl From<BoxStream<'static, Value>> for PromptInput {
    fn from(stream: BoxStream<'static, Value>) -> Self {
        PromptInput::Stream(stream)
    }
}

#[derive(Debug, Default)]
pub struct InternalClient;

impl InternalClient {
    pub fn new() -> Self {
        Self
    }

    /// Run one query through the transport and control router.
    pub async fn process_query(
        &self,
        prompt: PromptInput,
        mut options: ClaudeAgentOptions,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<MessageStream, SdkError> {
        let is_streaming = prompt.is_streaming();
        prepare_permission_options(&mut options, is_streaming)?;

        let (prompt_mode, stream_source) = prompt.split();
        let transport: Arc<dyn Transport> = match transport {
            Some(custom) => custom,
            None => Arc::new(
                SubprocessCliTransport::new(prompt_mode, options.clone())
                    .with_entrypoint(SDK_ENTRYPOINT),
            ),
        };

        transport.connect().await?;

        let query: Query<dyn Transport> =
            Query::from_options(Arc::clone(&transport), is_streaming, &options);

        if let Err(err) = start_query(&query).await {
            let _ = query.close().await;
            return Err(err);
        }

        if let Some(stream) = stream_source {
            spawn_prompt_writer(query.clone(), stream);
        }

        Ok(message_stream(query, false))
    }
}

pub(crate) async fn start_query<T>(query: &Query<T>) -> Result<(), SdkError>
where
    T: Transport + ?Sized + 'static,
{
    query.start().await?;
    query.initialize().await?;
    Ok(())
}

/// Feed a prompt stream to the CLI in the background; a failed write closes the query.
pub(crate) fn spawn_prompt_writer<T>(
    query: Query<T>,
    stream: BoxStream<'static, Value>,
) -> tokio::task::JoinHandle<()>
where
    T: Transport + ?Sized + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = query.stream_input(stream).await {
            log::warn!("[client::stream_input] failed to stream prompt input: {err}");
            let _ = query.close().await;
        }
    })
}

/// A permission callback needs the control protocol: it requires a streaming
/// prompt and routes prompts through `stdio`.
pub(crate) fn prepare_permission_options(
    options: &mut ClaudeAgentOptions,
    is_streaming: bool,
) -> Result<(), SdkError> {
    if options.can_use_tool.is_none() {
        return Ok(());
    }

    let rejection = if !is_streaming {
        Some(OptionsError::PermissionCallbackRequiresStreaming)
    } else if options.permission_prompt_tool_name.is_some() {
        Some(OptionsError::ConflictingPermissionPrompt)
    } else {
        None
    };

    if let Some(err) = rejection {
        return Err(CliConnectionError::new("invalid options").with_cause(err).into());
    }

    options.permission_prompt_tool_name = Some("stdio".into());
    Ok(())
}

/// Messages from the router; with `until_result` the stream ends after the
/// first result message. The router is closed once its stream is exhausted.
pub(crate) fn message_stream<T>(query: Query<T>, until_result: bool) -> MessageStream
where
    T: Transport + ?Sized + 'static,
{
    stream::unfold((query, false), move |(query, finished)| async move {
        if finished {
            return None;
        }

        match query.next_message().await {
            Ok(Some(message)) => {
                let done = until_result && matches!(message, Message::Result(_));
                Some((Ok(message), (query, done)))
            }
            Ok(None) => {
                let _ = query.close().await;
                None
            }
            Err(err) => Some((Err(err), (query, false))),
        }
    })
    .boxed()
}
