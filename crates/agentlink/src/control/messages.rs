//! Control protocol message types
//!
//! The control protocol is an in-band request/response sublanguage multiplexed
//! with regular conversation messages on the same stdio streams. This module
//! defines the closed set of payloads:
//!
//! - [`OutboundControlRequest`] - requests the host sends to the CLI
//! - [`IncomingControlRequest`] - requests the CLI sends to the host
//! - [`ControlResponsePayload`] - the success/error response body, both ways
//!
//! # Wire shapes
//!
//! **Host → CLI request:**
//! ```text
//! {"type":"control_request","request_id":"<id>","request":{"subtype":"interrupt"}}
//! ```
//!
//! **Response (either direction):**
//! ```text
//! {"type":"control_response","response":{"subtype":"success","request_id":"<id>","response":{...}}}
//! ```
//!
//! The discriminator is always the inner `subtype` field.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::error::AgentLinkError;
use crate::hooks::HookMatcherConfig;

/// Control requests originated by the host
///
/// Serialized as the `request` field of a `control_request` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum OutboundControlRequest {
    /// Advertise the host's hook configuration to the CLI
    ///
    /// Sent once at session start. The `hooks` map goes from the wire event
    /// name to the ordered matcher list built by
    /// [`HookRegistry::build_hook_config`](crate::hooks::HookRegistry::build_hook_config).
    Initialize {
        /// Event name → ordered matcher configurations
        #[serde(skip_serializing_if = "HashMap::is_empty", default)]
        hooks: HashMap<String, Vec<HookMatcherConfig>>,
    },

    /// Cooperatively stop the current turn
    Interrupt,

    /// Change the permission mode for subsequent tool use
    SetPermissionMode {
        /// New mode (e.g. "default", "acceptEdits", "bypassPermissions")
        mode: String,
    },

    /// Switch the active model for subsequent turns
    SetModel {
        /// Model identifier
        model: String,
    },
}

/// Control requests originated by the CLI
///
/// The host must answer every one of these with exactly one
/// [`ControlResponsePayload`] carrying the same `request_id` - including
/// unknown subtypes, which are preserved rather than rejected so newer CLIs
/// keep working against older hosts.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingControlRequest {
    /// "May I use this tool with these arguments?"
    CanUseTool {
        /// Name of the tool the CLI wants to invoke
        tool_name: String,
        /// Tool arguments as a free-form map
        input: Value,
        /// Policy hints the CLI suggests for this decision
        permission_suggestions: Option<Vec<Value>>,
        /// Path that triggered the permission check, if any
        blocked_path: Option<String>,
    },

    /// Invoke a hook callback the host registered at initialize time
    HookCallback {
        /// Registry id of the callback to run
        callback_id: String,
        /// Event payload, parsed into a `HookInput` at dispatch
        input: Value,
        /// Tool-use id for tool-scoped events
        tool_use_id: Option<String>,
    },

    /// Forward a message to an auxiliary protocol server hosted by us
    McpMessage {
        /// Target server name
        server_name: String,
        /// Opaque nested message
        message: Value,
    },

    /// CLI-side initialize; the payload is recorded as server info
    Initialize {
        /// Opaque server-info payload
        payload: Value,
    },

    /// A subtype this host does not know; acknowledged with an empty payload
    Unknown {
        /// The unrecognized subtype string
        subtype: String,
        /// The full request payload, preserved for diagnostics
        raw: Value,
    },
}

impl IncomingControlRequest {
    /// Discriminate a raw `request` payload by its `subtype` field.
    ///
    /// Extra fields at any level are tolerated. A missing `subtype` is a
    /// parse error; an *unrecognized* one is not.
    pub fn from_value(request: &Value) -> Result<Self, AgentLinkError> {
        let subtype = request
            .get("subtype")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AgentLinkError::message_parse("missing 'subtype'", &request.to_string())
            })?;

        match subtype {
            "can_use_tool" => {
                let tool_name = required_str(request, "tool_name")?;
                let input = request.get("input").cloned().unwrap_or(json!({}));
                let permission_suggestions = request
                    .get("permission_suggestions")
                    .and_then(Value::as_array)
                    .map(|a| a.to_vec());
                let blocked_path = request
                    .get("blocked_path")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(Self::CanUseTool {
                    tool_name,
                    input,
                    permission_suggestions,
                    blocked_path,
                })
            }
            "hook_callback" => {
                let callback_id = required_str(request, "callback_id")?;
                let input = request.get("input").cloned().unwrap_or(Value::Null);
                let tool_use_id = request
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(Self::HookCallback {
                    callback_id,
                    input,
                    tool_use_id,
                })
            }
            "mcp_message" => {
                let server_name = required_str(request, "server_name")?;
                let message = request.get("message").cloned().unwrap_or(Value::Null);
                Ok(Self::McpMessage {
                    server_name,
                    message,
                })
            }
            "initialize" => Ok(Self::Initialize {
                payload: request.clone(),
            }),
            other => Ok(Self::Unknown {
                subtype: other.to_string(),
                raw: request.clone(),
            }),
        }
    }
}

fn required_str(request: &Value, field: &str) -> Result<String, AgentLinkError> {
    request
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            AgentLinkError::message_parse(format!("missing '{field}'"), &request.to_string())
        })
}

/// Response body of a `control_response` envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponsePayload {
    /// The request was handled
    Success {
        /// Id of the request being answered
        request_id: String,
        /// Free-form response body
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },

    /// The request failed
    Error {
        /// Id of the request being answered
        request_id: String,
        /// Human-readable failure description
        error: String,
    },
}

impl ControlResponsePayload {
    /// Build a success response with a body.
    pub fn success(request_id: impl Into<String>, response: Value) -> Self {
        Self::Success {
            request_id: request_id.into(),
            response: Some(response),
        }
    }

    /// Build a success response with no body (bare acknowledgement).
    pub fn ack(request_id: impl Into<String>) -> Self {
        Self::Success {
            request_id: request_id.into(),
            response: None,
        }
    }

    /// Build an error response.
    pub fn error(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Error {
            request_id: request_id.into(),
            error: error.into(),
        }
    }

    /// The request id this payload answers.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Success { request_id, .. } | Self::Error { request_id, .. } => request_id,
        }
    }
}

/// Build the outgoing user-message record.
///
/// `session_id` falls back to `"default"`, matching what the CLI expects when
/// no explicit session has been negotiated.
pub fn user_message_record(content: &str, session_id: Option<&str>) -> Value {
    json!({
        "type": "user",
        "session_id": session_id.unwrap_or("default"),
        "message": {
            "role": "user",
            "content": content,
        },
    })
}

/// Wrap an outbound control request in its envelope.
pub fn control_request_record(request_id: &str, request: &OutboundControlRequest) -> Value {
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": request,
    })
}

/// Wrap a control response payload in its envelope.
pub fn control_response_record(payload: &ControlResponsePayload) -> Value {
    json!({
        "type": "control_response",
        "response": payload,
    })
}
