//! Transport abstraction used by the SDK.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::control::{ControlRequest, ControlResponse};
use crate::error::{JsonDecodeError, SdkError};
use crate::message::Message;

pub mod framer;
pub mod subprocess_cli;

/// One decoded object read from the CLI's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Message(Message),
    ControlRequest(ControlRequest),
    ControlResponse(ControlResponse),
    ControlCancel { request_id: String },
}

/// Stream of inbound frames; errors are delivered in-band.
pub type FrameStream = BoxStream<'static, Result<InboundFrame, SdkError>>;

/// Trait representing a bidirectional channel to the Claude Code CLI.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the underlying channel.
    async fn connect(&self) -> Result<(), SdkError>;

    /// Write one JSON line; the transport appends the newline.
    async fn write(&self, line: &str) -> Result<(), SdkError>;

    /// Encode a JSON value as a single line and write it.
    async fn write_value(&self, payload: &Value) -> Result<(), SdkError> {
        let line = serde_json::to_string(payload).map_err(|err| {
            JsonDecodeError::new("Failed to encode outbound message").with_cause(err)
        })?;
        self.write(&line).await
    }

    /// Inbound frames in the order the CLI wrote them.
    ///
    /// The first call takes the stream; later calls yield an empty stream.
    fn read_messages(&self) -> FrameStream;

    /// Close stdin so the CLI observes end of input.
    async fn end_input(&self) -> Result<(), SdkError>;

    /// Tear the channel down. Safe to call more than once.
    async fn close(&self) -> Result<(), SdkError>;

    /// Whether the transport is ready for IO.
    fn is_ready(&self) -> bool;

    /// Offer an error to the transport's error channel without blocking.
    fn on_error(&self, _error: SdkError) {}
}
