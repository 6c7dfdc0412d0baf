//! Host-side dispatch of CLI-originating control requests.
//!
//! Every request the CLI sends must be answered with exactly one
//! `control_response` carrying the same request id - a missing response would
//! starve the CLI. Handler failures therefore never propagate: hook errors
//! become block-decision outputs inside the registry, policy errors become
//! error responses here, and unknown subtypes are acknowledged for forward
//! compatibility.

use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::control::messages::{ControlResponsePayload, IncomingControlRequest};
use crate::envelope::ControlRequestEnvelope;
use crate::hooks::{HookInput, HookRegistry};
use crate::permissions::{AllowAll, PermissionPolicy, ToolPermissionContext};

/// Routes incoming control requests to the hook registry and the permission
/// policy, producing the response payload to send back
pub struct ControlDispatcher {
    registry: Arc<HookRegistry>,
    policy: Option<Arc<dyn PermissionPolicy>>,
    server_info: Mutex<Option<Value>>,
}

impl ControlDispatcher {
    /// Build a dispatcher around a registry and an optional policy.
    ///
    /// With no policy installed, `can_use_tool` requests are allowed.
    pub fn new(registry: Arc<HookRegistry>, policy: Option<Arc<dyn PermissionPolicy>>) -> Self {
        Self {
            registry,
            policy,
            server_info: Mutex::new(None),
        }
    }

    /// The server-info payload from an incoming `initialize`, if the CLI
    /// sent one.
    pub fn server_info(&self) -> Option<Value> {
        self.server_info
            .lock()
            .expect("server info poisoned")
            .clone()
    }

    /// Handle one incoming request and produce its response payload.
    pub async fn dispatch(&self, envelope: ControlRequestEnvelope) -> ControlResponsePayload {
        let request_id = envelope.request_id;
        match envelope.request {
            IncomingControlRequest::HookCallback {
                callback_id,
                input,
                tool_use_id,
            } => {
                let hook_input: HookInput = match serde_json::from_value(input) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        return ControlResponsePayload::error(
                            request_id,
                            format!("malformed hook input: {e}"),
                        );
                    }
                };

                debug!(
                    callback_id = %callback_id,
                    event = %hook_input.event_kind(),
                    "dispatching hook callback"
                );

                match self
                    .registry
                    .execute_hook(&callback_id, hook_input, tool_use_id)
                    .await
                {
                    Ok(output) => match serde_json::to_value(&output) {
                        Ok(body) => ControlResponsePayload::success(request_id, body),
                        Err(e) => ControlResponsePayload::error(request_id, e.to_string()),
                    },
                    Err(e) => ControlResponsePayload::error(request_id, e.to_string()),
                }
            }

            IncomingControlRequest::CanUseTool {
                tool_name,
                input,
                permission_suggestions,
                blocked_path,
            } => {
                let context = ToolPermissionContext {
                    suggestions: permission_suggestions.unwrap_or_default(),
                    blocked_path,
                };

                debug!(tool_name = %tool_name, "dispatching permission check");

                let decision = match &self.policy {
                    Some(policy) => policy.can_use_tool(tool_name, input, context).await,
                    None => AllowAll.can_use_tool(tool_name, input, context).await,
                };

                match decision {
                    Ok(result) => ControlResponsePayload::success(request_id, result.to_wire()),
                    Err(e) => ControlResponsePayload::error(request_id, e.to_string()),
                }
            }

            IncomingControlRequest::Initialize { payload } => {
                *self.server_info.lock().expect("server info poisoned") = Some(payload);
                ControlResponsePayload::success(request_id, json!({"status": "ok"}))
            }

            IncomingControlRequest::McpMessage {
                server_name,
                message,
            } => {
                // No auxiliary protocol servers are hosted here; answer with a
                // method-not-found so the CLI can keep going.
                ControlResponsePayload::success(
                    request_id,
                    json!({
                        "jsonrpc": "2.0",
                        "id": message.get("id"),
                        "error": {
                            "code": -32601,
                            "message": format!("Server '{server_name}' not found"),
                        },
                    }),
                )
            }

            IncomingControlRequest::Unknown { subtype, .. } => {
                warn!(subtype = %subtype, "acknowledging unknown control request subtype");
                ControlResponsePayload::success(request_id, json!({}))
            }
        }
    }
}
