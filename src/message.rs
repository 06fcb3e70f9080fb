//! Typed messages exchanged with the Claude Code CLI.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MESSAGE_TYPE_USER: &str = "user";
pub const MESSAGE_TYPE_ASSISTANT: &str = "assistant";
pub const MESSAGE_TYPE_SYSTEM: &str = "system";
pub const MESSAGE_TYPE_RESULT: &str = "result";
pub const MESSAGE_TYPE_STREAM_EVENT: &str = "stream_event";

pub const CONTENT_TYPE_TEXT: &str = "text";
pub const CONTENT_TYPE_THINKING: &str = "thinking";
pub const CONTENT_TYPE_TOOL_USE: &str = "tool_use";
pub const CONTENT_TYPE_TOOL_RESULT: &str = "tool_result";

/// Text content block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextBlock {
    pub text: String,
}

/// Thinking content block produced by Claude.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThinkingBlock {
    pub thinking: String,
    pub signature: String,
}

/// Tool use content block describing a requested tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: Map<String, Value>,
}

/// Tool result block returned from a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Union of all content blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text(TextBlock),
    #[serde(rename = "thinking")]
    Thinking(ThinkingBlock),
    #[serde(rename = "tool_use")]
    ToolUse(ToolUseBlock),
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultBlock),
}

impl ContentBlock {
    /// Wire discriminator of the block.
    pub fn block_type(&self) -> &'static str {
        match self {
            ContentBlock::Text(_) => CONTENT_TYPE_TEXT,
            ContentBlock::Thinking(_) => CONTENT_TYPE_THINKING,
            ContentBlock::ToolUse(_) => CONTENT_TYPE_TOOL_USE,
            ContentBlock::ToolResult(_) => CONTENT_TYPE_TOOL_RESULT,
        }
    }
}

/// Content for a user message.
///
/// `Raw` keeps any content that is neither a string nor a block list exactly as
/// the CLI sent it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UserMessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    Raw(Value),
}

/// User message emitted from the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMessage {
    pub content: UserMessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

/// Assistant message produced by Claude.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

/// System message containing metadata or warnings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMessage {
    pub subtype: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Result message summarising cost and usage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultMessage {
    pub subtype: String,
    pub duration_ms: i64,
    pub duration_api_ms: i64,
    pub is_error: bool,
    pub num_turns: i64,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Stream event for partial updates during streaming completions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub uuid: String,
    pub session_id: String,
    pub event: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

/// Messages emitted by the CLI.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    System(SystemMessage),
    Result(ResultMessage),
    StreamEvent(StreamEvent),
}

impl Message {
    /// Wire discriminator of the message.
    pub fn message_type(&self) -> &'static str {
        match self {
            Message::User(_) => MESSAGE_TYPE_USER,
            Message::Assistant(_) => MESSAGE_TYPE_ASSISTANT,
            Message::System(_) => MESSAGE_TYPE_SYSTEM,
            Message::Result(_) => MESSAGE_TYPE_RESULT,
            Message::StreamEvent(_) => MESSAGE_TYPE_STREAM_EVENT,
        }
    }
}

impl From<&str> for UserMessageContent {
    fn from(value: &str) -> Self {
        UserMessageContent::Text(value.to_string())
    }
}

impl From<Vec<ContentBlock>> for UserMessageContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        UserMessageContent::Blocks(blocks)
    }
}
