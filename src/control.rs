//! Control protocol envelopes exchanged with the CLI alongside regular messages.
//!
//! Requests travel in both directions: the SDK asks the CLI to `interrupt` or
//! `initialize`, and the CLI asks the SDK for tool permissions, hook results and
//! MCP relays. Every request carries a `request_id` that its response echoes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{JsonDecodeError, MessageParseError, SdkError};
use crate::permission::PermissionMode;

pub const CONTROL_TYPE_REQUEST: &str = "control_request";
pub const CONTROL_TYPE_RESPONSE: &str = "control_response";
pub const CONTROL_TYPE_CANCEL_REQUEST: &str = "control_cancel_request";

pub const RESPONSE_SUBTYPE_SUCCESS: &str = "success";
pub const RESPONSE_SUBTYPE_ERROR: &str = "error";

pub const SUBTYPE_INTERRUPT: &str = "interrupt";
pub const SUBTYPE_CAN_USE_TOOL: &str = "can_use_tool";
pub const SUBTYPE_INITIALIZE: &str = "initialize";
pub const SUBTYPE_SET_PERMISSION_MODE: &str = "set_permission_mode";
pub const SUBTYPE_HOOK_CALLBACK: &str = "hook_callback";
pub const SUBTYPE_MCP_MESSAGE: &str = "mcp_message";

/// Tool permission check raised by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub input: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_suggestions: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPermissionModeRequest {
    pub mode: PermissionMode,
}

/// Invocation of a hook registered during `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookCallbackRequest {
    pub callback_id: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
}

/// Opaque MCP payload addressed to an in-process server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpMessageRequest {
    pub server_name: String,
    #[serde(default)]
    pub message: Value,
}

/// Request variants selected by the nested `subtype`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequestBody {
    Interrupt,
    CanUseTool(PermissionRequest),
    Initialize(InitializeRequest),
    SetPermissionMode(SetPermissionModeRequest),
    HookCallback(HookCallbackRequest),
    McpMessage(McpMessageRequest),
}

impl ControlRequestBody {
    pub fn subtype(&self) -> &'static str {
        match self {
            ControlRequestBody::Interrupt => SUBTYPE_INTERRUPT,
            ControlRequestBody::CanUseTool(_) => SUBTYPE_CAN_USE_TOOL,
            ControlRequestBody::Initialize(_) => SUBTYPE_INITIALIZE,
            ControlRequestBody::SetPermissionMode(_) => SUBTYPE_SET_PERMISSION_MODE,
            ControlRequestBody::HookCallback(_) => SUBTYPE_HOOK_CALLBACK,
            ControlRequestBody::McpMessage(_) => SUBTYPE_MCP_MESSAGE,
        }
    }
}

/// A control request paired with its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRequest {
    pub request_id: String,
    pub body: ControlRequestBody,
}

impl ControlRequest {
    pub fn new(request_id: impl Into<String>, body: ControlRequestBody) -> Self {
        Self {
            request_id: request_id.into(),
            body,
        }
    }

    pub fn subtype(&self) -> &'static str {
        self.body.subtype()
    }

    pub fn to_value(&self) -> Result<Value, SdkError> {
        let request = serde_json::to_value(&self.body).map_err(|err| {
            MessageParseError::new(
                format!("Failed to encode {} control request", self.subtype()),
                None,
            )
            .with_cause(err)
        })?;

        Ok(json!({
            "type": CONTROL_TYPE_REQUEST,
            "request_id": self.request_id,
            "request": request,
        }))
    }
}

/// Result carried by a control response.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlOutcome {
    Success(Map<String, Value>),
    Error(String),
}

/// Reply to a control request, correlated by `request_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlResponse {
    pub request_id: String,
    pub outcome: ControlOutcome,
}

impl ControlResponse {
    pub fn success(request_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: ControlOutcome::Success(payload),
        }
    }

    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: ControlOutcome::Error(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ControlOutcome::Success(_))
    }

    pub fn to_value(&self) -> Value {
        let response = match &self.outcome {
            ControlOutcome::Success(payload) => json!({
                "subtype": RESPONSE_SUBTYPE_SUCCESS,
                "request_id": self.request_id,
                "response": payload,
            }),
            ControlOutcome::Error(message) => json!({
                "subtype": RESPONSE_SUBTYPE_ERROR,
                "request_id": self.request_id,
                "error": message,
            }),
        };

        json!({
            "type": CONTROL_TYPE_RESPONSE,
            "response": response,
        })
    }
}

/// Decode a `control_request` envelope from raw bytes.
pub fn decode_control_request(bytes: &[u8]) -> Result<ControlRequest, SdkError> {
    parse_control_request(&decode_value(bytes)?)
}

/// Encode an outbound `control_request` envelope.
pub fn encode_control_request(request: &ControlRequest) -> Result<Vec<u8>, SdkError> {
    to_bytes(&request.to_value()?)
}

/// Decode a `control_response` envelope from raw bytes.
pub fn decode_control_response(bytes: &[u8]) -> Result<ControlResponse, SdkError> {
    parse_control_response(&decode_value(bytes)?)
}

/// Encode a `control_response` envelope.
pub fn encode_control_response(response: &ControlResponse) -> Result<Vec<u8>, SdkError> {
    to_bytes(&response.to_value())
}

/// Map an already decoded envelope onto a [`ControlRequest`].
///
/// Parse errors carry the whole envelope as their data so callers can still
/// answer the `request_id`.
pub fn parse_control_request(raw: &Value) -> Result<ControlRequest, SdkError> {
    if !raw.is_object() {
        return Err(JsonDecodeError::new("Control request must be a JSON object")
            .with_line(raw.to_string())
            .into());
    }

    let request_id = raw
        .get("request_id")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            MessageParseError::new("Control request missing request_id", Some(raw.clone()))
        })?
        .to_string();

    let request = raw
        .get("request")
        .filter(|request| request.is_object())
        .ok_or_else(|| {
            MessageParseError::new("Control request missing request object", Some(raw.clone()))
        })?;

    let subtype = request
        .get("subtype")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            MessageParseError::new("Control request missing subtype", Some(raw.clone()))
        })?;

    let body = match subtype {
        SUBTYPE_INTERRUPT => ControlRequestBody::Interrupt,
        SUBTYPE_CAN_USE_TOOL => ControlRequestBody::CanUseTool(variant(raw, request, subtype)?),
        SUBTYPE_INITIALIZE => ControlRequestBody::Initialize(variant(raw, request, subtype)?),
        SUBTYPE_SET_PERMISSION_MODE => {
            ControlRequestBody::SetPermissionMode(variant(raw, request, subtype)?)
        }
        SUBTYPE_HOOK_CALLBACK => ControlRequestBody::HookCallback(variant(raw, request, subtype)?),
        SUBTYPE_MCP_MESSAGE => ControlRequestBody::McpMessage(variant(raw, request, subtype)?),
        other => {
            return Err(MessageParseError::new(
                format!("Unknown control request subtype: {other}"),
                Some(raw.clone()),
            )
            .into())
        }
    };

    Ok(ControlRequest { request_id, body })
}

/// Map an already decoded envelope onto a [`ControlResponse`].
pub fn parse_control_response(raw: &Value) -> Result<ControlResponse, SdkError> {
    let response = raw
        .get("response")
        .filter(|response| response.is_object())
        .ok_or_else(|| {
            MessageParseError::new("Control response missing response object", Some(raw.clone()))
        })?;

    let request_id = response
        .get("request_id")
        .or_else(|| raw.get("request_id"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            MessageParseError::new("Control response missing request_id", Some(raw.clone()))
        })?
        .to_string();

    match response.get("subtype").and_then(Value::as_str) {
        Some(RESPONSE_SUBTYPE_SUCCESS) => {
            let payload = match response.get("response") {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(payload)) => payload.clone(),
                Some(_) => {
                    return Err(MessageParseError::new(
                        "Control response payload must be an object",
                        Some(raw.clone()),
                    )
                    .into())
                }
            };
            Ok(ControlResponse::success(request_id, payload))
        }
        Some(RESPONSE_SUBTYPE_ERROR) => {
            let message = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown control error");
            Ok(ControlResponse::error(request_id, message))
        }
        Some(other) => Err(MessageParseError::new(
            format!("Unknown control response subtype: {other}"),
            Some(raw.clone()),
        )
        .into()),
        None => Err(
            MessageParseError::new("Control response missing subtype", Some(raw.clone())).into(),
        ),
    }
}

fn variant<T: DeserializeOwned>(
    raw: &Value,
    request: &Value,
    subtype: &str,
) -> Result<T, SdkError> {
    serde_json::from_value(request.clone()).map_err(|err| {
        MessageParseError::new(format!("Invalid {subtype} control request"), Some(raw.clone()))
            .with_cause(err)
            .into()
    })
}

fn decode_value(bytes: &[u8]) -> Result<Value, SdkError> {
    serde_json::from_slice(bytes).map_err(|err| {
        JsonDecodeError::new("Failed to decode control envelope")
            .with_line(String::from_utf8_lossy(bytes))
            .with_cause(err)
            .into()
    })
}

fn to_bytes(value: &Value) -> Result<Vec<u8>, SdkError> {
    serde_json::to_vec(value).map_err(|err| {
        MessageParseError::new("Failed to encode control envelope", None)
            .with_cause(err)
            .into()
    })
}
