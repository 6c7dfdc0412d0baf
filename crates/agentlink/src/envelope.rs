//! Envelope codec for inbound records
//!
//! Every inbound line is one JSON object. This module classifies it into one
//! of exactly three cases by the envelope `type` field:
//!
//! - `"control_request"` → [`InboundRecord::ControlRequest`]
//! - `"control_response"` → [`InboundRecord::ControlResponse`]
//! - anything else (`user`, `assistant`, `system`, `result`, ...) →
//!   [`InboundRecord::Regular`]
//!
//! Reading is unknown-fields-tolerant and case-sensitive. Body parsing of
//! regular messages is a collaborator concern; the codec hands the raw JSON
//! value through untouched.

use serde_json::Value;

use crate::control::messages::{ControlResponsePayload, IncomingControlRequest};
use crate::error::AgentLinkError;

/// A control request received from the CLI, with its correlation id
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRequestEnvelope {
    /// Correlation id the response must echo; non-empty
    pub request_id: String,
    /// Discriminated request payload
    pub request: IncomingControlRequest,
}

/// One classified inbound record
#[derive(Debug, Clone, PartialEq)]
pub enum InboundRecord {
    /// An ordinary conversation message; the body is not interpreted here
    Regular(Value),
    /// A control request the host must answer
    ControlRequest(ControlRequestEnvelope),
    /// A response to a host-originated control request
    ControlResponse(ControlResponsePayload),
}

/// Parse and classify one inbound record.
///
/// # Errors
///
/// - blank input → `MessageParse` ("null or blank record")
/// - malformed JSON → `JsonDecode`
/// - missing `type` → `MessageParse` ("missing 'type'")
/// - `control_request` without a non-empty `request_id` →
///   `MessageParse` ("missing 'request_id'")
pub fn parse_record(line: &str) -> Result<InboundRecord, AgentLinkError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(AgentLinkError::message_parse("null or blank record", line));
    }

    let value: Value = serde_json::from_str(trimmed)?;

    let record_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AgentLinkError::message_parse("missing 'type'", trimmed))?;

    match record_type {
        "control_request" => {
            let request_id = value
                .get("request_id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| AgentLinkError::message_parse("missing 'request_id'", trimmed))?
                .to_string();

            let request_value = value
                .get("request")
                .ok_or_else(|| AgentLinkError::message_parse("missing 'request'", trimmed))?;
            let request = IncomingControlRequest::from_value(request_value)?;

            Ok(InboundRecord::ControlRequest(ControlRequestEnvelope {
                request_id,
                request,
            }))
        }
        "control_response" => {
            let response_value = value
                .get("response")
                .ok_or_else(|| AgentLinkError::message_parse("missing 'response'", trimmed))?;
            let payload: ControlResponsePayload = serde_json::from_value(response_value.clone())
                .map_err(|e| {
                    AgentLinkError::message_parse(format!("bad 'response': {e}"), trimmed)
                })?;
            Ok(InboundRecord::ControlResponse(payload))
        }
        _ => Ok(InboundRecord::Regular(value)),
    }
}

/// Whether a raw line is a control request. Never fails on malformed input.
pub fn is_control_request(line: &str) -> bool {
    serde_json::from_str::<Value>(line.trim())
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
        .is_some_and(|t| t == "control_request")
}

/// Pull the `request_id` out of a raw line, if present and non-empty.
/// Never fails on malformed input.
pub fn extract_request_id(line: &str) -> Option<String> {
    serde_json::from_str::<Value>(line.trim())
        .ok()?
        .get("request_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
