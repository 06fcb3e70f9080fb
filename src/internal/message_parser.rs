//! Parse raw CLI JSON into strongly typed messages and encode them back.

use serde_json::Value;

use crate::control::{
    self, CONTROL_TYPE_CANCEL_REQUEST, CONTROL_TYPE_REQUEST, CONTROL_TYPE_RESPONSE,
};
use crate::error::{JsonDecodeError, MessageParseError, SdkError};
use crate::message::{
    AssistantMessage, ContentBlock, Message, ResultMessage, StreamEvent, SystemMessage, TextBlock,
    ThinkingBlock, ToolResultBlock, ToolUseBlock, UserMessage, UserMessageContent,
    CONTENT_TYPE_TEXT, CONTENT_TYPE_THINKING, CONTENT_TYPE_TOOL_RESULT, CONTENT_TYPE_TOOL_USE,
    MESSAGE_TYPE_ASSISTANT, MESSAGE_TYPE_RESULT, MESSAGE_TYPE_STREAM_EVENT, MESSAGE_TYPE_SYSTEM,
    MESSAGE_TYPE_USER,
};
use crate::transport::InboundFrame;

/// Decode one JSON document into a typed [`Message`].
pub fn decode_message(bytes: &[u8]) -> Result<Message, SdkError> {
    parse_message(&decode_value(bytes)?)
}

/// Encode a [`Message`] as a single-line JSON document.
pub fn encode_message(message: &Message) -> Result<Vec<u8>, SdkError> {
    let value = message_to_value(message)?;
    serde_json::to_vec(&value).map_err(|err| {
        MessageParseError::new("Failed to encode message", None)
            .with_cause(err)
            .into()
    })
}

/// Decode one JSON document into a typed [`ContentBlock`].
pub fn decode_content_block(bytes: &[u8]) -> Result<ContentBlock, SdkError> {
    parse_content_block(&decode_value(bytes)?)
}

/// Encode a [`ContentBlock`] as a single-line JSON document.
pub fn encode_content_block(block: &ContentBlock) -> Result<Vec<u8>, SdkError> {
    serde_json::to_vec(block).map_err(|err| {
        MessageParseError::new("Failed to encode content block", None)
            .with_cause(err)
            .into()
    })
}

/// Convert a serde_json::Value into a strongly typed `Message` value.
pub fn parse_message(raw: &Value) -> Result<Message, SdkError> {
    match peek_type(raw)? {
        MESSAGE_TYPE_USER => parse_user_message(raw),
        MESSAGE_TYPE_ASSISTANT => parse_assistant_message(raw),
        MESSAGE_TYPE_SYSTEM => parse_system_message(raw),
        MESSAGE_TYPE_RESULT => parse_result_message(raw),
        MESSAGE_TYPE_STREAM_EVENT => parse_stream_event(raw),
        other => Err(MessageParseError::new(
            format!("Unknown message type: {other}"),
            Some(raw.clone()),
        )
        .into()),
    }
}

/// Classify a decoded stdout object as a message or a control frame.
pub fn parse_frame(raw: &Value) -> Result<InboundFrame, SdkError> {
    match peek_type(raw)? {
        CONTROL_TYPE_REQUEST => {
            control::parse_control_request(raw).map(InboundFrame::ControlRequest)
        }
        CONTROL_TYPE_RESPONSE => {
            control::parse_control_response(raw).map(InboundFrame::ControlResponse)
        }
        CONTROL_TYPE_CANCEL_REQUEST => {
            let request_id = raw
                .get("request_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(InboundFrame::ControlCancel { request_id })
        }
        _ => parse_message(raw).map(InboundFrame::Message),
    }
}

/// Render a [`Message`] as the JSON object the CLI would emit.
pub fn message_to_value(message: &Message) -> Result<Value, SdkError> {
    let encoded = match message {
        Message::User(user) => serde_json::to_value(user),
        Message::Assistant(assistant) => serde_json::to_value(assistant),
        Message::System(system) => serde_json::to_value(system),
        Message::Result(result) => serde_json::to_value(result),
        Message::StreamEvent(event) => serde_json::to_value(event),
    }
    .map_err(|err| MessageParseError::new("Failed to encode message", None).with_cause(err))?;

    let Value::Object(mut object) = encoded else {
        return Err(MessageParseError::new(
            format!("{} message did not encode to an object", message.message_type()),
            Some(encoded),
        )
        .into());
    };
    object.insert("type".into(), Value::String(message.message_type().into()));
    Ok(Value::Object(object))
}

fn decode_value(bytes: &[u8]) -> Result<Value, SdkError> {
    serde_json::from_slice(bytes).map_err(|err| {
        JsonDecodeError::new("Failed to decode JSON")
            .with_line(String::from_utf8_lossy(bytes))
            .with_cause(err)
            .into()
    })
}

fn peek_type(raw: &Value) -> Result<&str, SdkError> {
    let object = raw.as_object().ok_or_else(|| {
        JsonDecodeError::new(format!(
            "Invalid message data type (expected object, got {})",
            value_type_name(raw)
        ))
        .with_line(raw.to_string())
    })?;

    object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            JsonDecodeError::new("Message missing string 'type' field")
                .with_line(raw.to_string())
                .into()
        })
}

/// Content and model may arrive flat or nested under a `message` object.
fn message_field<'a>(raw: &'a Value, key: &str) -> Option<&'a Value> {
    raw.get("message")
        .and_then(Value::as_object)
        .and_then(|message| message.get(key))
        .or_else(|| raw.get(key))
}

fn parse_user_message(raw: &Value) -> Result<Message, SdkError> {
    let content_value = message_field(raw, "content")
        .ok_or_else(|| MessageParseError::new("User message missing content", Some(raw.clone())))?;

    let content = match content_value {
        Value::String(text) => UserMessageContent::Text(text.clone()),
        Value::Array(items) => UserMessageContent::Blocks(
            items
                .iter()
                .map(parse_content_block)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        other => UserMessageContent::Raw(other.clone()),
    };

    Ok(Message::User(UserMessage {
        content,
        parent_tool_use_id: parent_tool_use_id(raw),
    }))
}

fn parse_assistant_message(raw: &Value) -> Result<Message, SdkError> {
    let content = message_field(raw, "content")
        .ok_or_else(|| {
            MessageParseError::new("Assistant message missing content", Some(raw.clone()))
        })?
        .as_array()
        .ok_or_else(|| MessageParseError::new("Invalid assistant content", Some(raw.clone())))?
        .iter()
        .map(parse_content_block)
        .collect::<Result<Vec<_>, _>>()?;

    let model = message_field(raw, "model")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            MessageParseError::new("Assistant message missing model", Some(raw.clone()))
        })?
        .to_string();

    Ok(Message::Assistant(AssistantMessage {
        content,
        model,
        parent_tool_use_id: parent_tool_use_id(raw),
    }))
}

fn parse_system_message(raw: &Value) -> Result<Message, SdkError> {
    let subtype = required_str(raw, "subtype", "System message")?;

    // Encoded messages carry an explicit `data` object; live CLI output is flat.
    let data = match raw.get("data").and_then(Value::as_object) {
        Some(data) => data.clone(),
        None => raw.as_object().cloned().unwrap_or_default(),
    };

    Ok(Message::System(SystemMessage { subtype, data }))
}

fn parse_result_message(raw: &Value) -> Result<Message, SdkError> {
    let subtype = required_str(raw, "subtype", "Result message")?;
    let session_id = required_str(raw, "session_id", "Result message")?;

    let usage = match raw.get("usage") {
        None | Some(Value::Null) => None,
        Some(Value::Object(usage)) => Some(usage.clone()),
        Some(_) => {
            return Err(
                MessageParseError::new("Result usage must be an object", Some(raw.clone())).into(),
            )
        }
    };

    Ok(Message::Result(ResultMessage {
        subtype,
        duration_ms: int_or_zero(raw, "duration_ms")?,
        duration_api_ms: int_or_zero(raw, "duration_api_ms")?,
        is_error: bool_or_false(raw, "is_error")?,
        num_turns: int_or_zero(raw, "num_turns")?,
        session_id,
        total_cost_usd: raw.get("total_cost_usd").and_then(Value::as_f64),
        usage,
        result: raw.get("result").and_then(Value::as_str).map(str::to_string),
    }))
}

fn parse_stream_event(raw: &Value) -> Result<Message, SdkError> {
    let uuid = required_str(raw, "uuid", "Stream event")?;
    let session_id = required_str(raw, "session_id", "Stream event")?;
    let event = raw
        .get("event")
        .ok_or_else(|| {
            MessageParseError::new("Stream event missing event payload", Some(raw.clone()))
        })?
        .clone();

    Ok(Message::StreamEvent(StreamEvent {
        uuid,
        session_id,
        event,
        parent_tool_use_id: parent_tool_use_id(raw),
    }))
}

/// Convert a JSON object into a typed [`ContentBlock`].
pub fn parse_content_block(raw: &Value) -> Result<ContentBlock, SdkError> {
    let kind = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| MessageParseError::new("Content block missing type", Some(raw.clone())))?;

    match kind {
        CONTENT_TYPE_TEXT => Ok(ContentBlock::Text(TextBlock {
            text: required_str(raw, "text", "Text block")?,
        })),
        CONTENT_TYPE_THINKING => Ok(ContentBlock::Thinking(ThinkingBlock {
            thinking: required_str(raw, "thinking", "Thinking block")?,
            signature: required_str(raw, "signature", "Thinking block")?,
        })),
        CONTENT_TYPE_TOOL_USE => {
            let input = raw
                .get("input")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    MessageParseError::new("Tool use block missing input", Some(raw.clone()))
                })?
                .clone();
            Ok(ContentBlock::ToolUse(ToolUseBlock {
                id: required_str(raw, "id", "Tool use block")?,
                name: required_str(raw, "name", "Tool use block")?,
                input,
            }))
        }
        CONTENT_TYPE_TOOL_RESULT => Ok(ContentBlock::ToolResult(ToolResultBlock {
            tool_use_id: required_str(raw, "tool_use_id", "Tool result block")?,
            content: raw.get("content").cloned(),
            is_error: raw.get("is_error").and_then(Value::as_bool),
        })),
        other => Err(MessageParseError::new(
            format!("Unknown content block type: {other}"),
            Some(raw.clone()),
        )
        .into()),
    }
}

fn parent_tool_use_id(raw: &Value) -> Option<String> {
    raw.get("parent_tool_use_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn required_str(raw: &Value, key: &str, owner: &str) -> Result<String, SdkError> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            MessageParseError::new(format!("{owner} missing {key}"), Some(raw.clone())).into()
        })
}

fn int_or_zero(raw: &Value, key: &str) -> Result<i64, SdkError> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value.as_i64().ok_or_else(|| {
            MessageParseError::new(format!("Invalid integer field: {key}"), Some(raw.clone()))
                .into()
        }),
    }
}

fn bool_or_false(raw: &Value, key: &str) -> Result<bool, SdkError> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(value) => value.as_bool().ok_or_else(|| {
            MessageParseError::new(format!("Invalid boolean field: {key}"), Some(raw.clone()))
                .into()
        }),
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
