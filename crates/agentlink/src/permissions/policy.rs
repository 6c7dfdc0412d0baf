//! Permission results, context, and the built-in policies.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::future::Future;

use crate::error::AgentLinkError;

/// Outcome of a tool-permission decision
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionResult {
    /// Let the tool run, optionally with rewritten arguments
    Allow {
        /// Replacement tool arguments, if the policy rewrote them
        updated_input: Option<Value>,
    },
    /// Refuse the tool
    Deny {
        /// Why the tool was refused
        reason: String,
        /// Also stop the current turn
        interrupt: bool,
    },
}

impl PermissionResult {
    /// Plain allow.
    pub fn allow() -> Self {
        Self::Allow {
            updated_input: None,
        }
    }

    /// Allow with rewritten arguments.
    pub fn allow_with_input(updated_input: Value) -> Self {
        Self::Allow {
            updated_input: Some(updated_input),
        }
    }

    /// Plain deny.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
            interrupt: false,
        }
    }

    /// Deny and stop the current turn.
    pub fn deny_and_interrupt(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
            interrupt: true,
        }
    }

    /// The wire form sent back in the `can_use_tool` response.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Allow { updated_input } => {
                let mut wire = json!({"decision": "allow"});
                if let Some(input) = updated_input {
                    wire["updated_input"] = input.clone();
                }
                wire
            }
            Self::Deny { reason, interrupt } => {
                let mut wire = json!({"decision": "deny", "reason": reason});
                if *interrupt {
                    wire["interrupt"] = json!(true);
                }
                wire
            }
        }
    }
}

/// Context the CLI attaches to a `can_use_tool` request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolPermissionContext {
    /// Policy hints the CLI suggests for this decision
    pub suggestions: Vec<Value>,
    /// Path that triggered the permission check, if any
    pub blocked_path: Option<String>,
}

/// A pluggable "may I use this tool" decision function
///
/// Installed on the transport; invoked for every `can_use_tool` request the
/// CLI sends. When none is installed the transport allows everything.
///
/// Any async function with the matching signature works via the blanket
/// implementation:
///
/// ```
/// use agentlink::permissions::{PermissionResult, ToolPermissionContext};
/// use agentlink::error::AgentLinkError;
/// use serde_json::Value;
///
/// async fn read_only(
///     tool_name: String,
///     _input: Value,
///     _context: ToolPermissionContext,
/// ) -> Result<PermissionResult, AgentLinkError> {
///     if tool_name == "Read" {
///         Ok(PermissionResult::allow())
///     } else {
///         Ok(PermissionResult::deny("read-only session"))
///     }
/// }
/// ```
#[async_trait]
pub trait PermissionPolicy: Send + Sync {
    /// Decide whether the tool may run with these arguments.
    ///
    /// Errors are caught by the transport and answered as error control
    /// responses; they never starve the CLI of a reply.
    async fn can_use_tool(
        &self,
        tool_name: String,
        input: Value,
        context: ToolPermissionContext,
    ) -> Result<PermissionResult, AgentLinkError>;
}

#[async_trait]
impl<F, Fut> PermissionPolicy for F
where
    F: Fn(String, Value, ToolPermissionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PermissionResult, AgentLinkError>> + Send,
{
    async fn can_use_tool(
        &self,
        tool_name: String,
        input: Value,
        context: ToolPermissionContext,
    ) -> Result<PermissionResult, AgentLinkError> {
        self(tool_name, input, context).await
    }
}

/// Policy that allows every tool
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PermissionPolicy for AllowAll {
    async fn can_use_tool(
        &self,
        _tool_name: String,
        _input: Value,
        _context: ToolPermissionContext,
    ) -> Result<PermissionResult, AgentLinkError> {
        Ok(PermissionResult::allow())
    }
}

/// Policy that allows only the named tools
#[derive(Debug, Clone)]
pub struct AllowList {
    allowed: HashSet<String>,
}

impl AllowList {
    /// Build from any collection of tool names.
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: tools.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl PermissionPolicy for AllowList {
    async fn can_use_tool(
        &self,
        tool_name: String,
        _input: Value,
        _context: ToolPermissionContext,
    ) -> Result<PermissionResult, AgentLinkError> {
        if self.allowed.contains(&tool_name) {
            Ok(PermissionResult::allow())
        } else {
            Ok(PermissionResult::deny(format!(
                "Tool not in allowed list: {tool_name}"
            )))
        }
    }
}

/// Policy that refuses only the named tools
#[derive(Debug, Clone)]
pub struct DenyList {
    denied: HashSet<String>,
}

impl DenyList {
    /// Build from any collection of tool names.
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: tools.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl PermissionPolicy for DenyList {
    async fn can_use_tool(
        &self,
        tool_name: String,
        _input: Value,
        _context: ToolPermissionContext,
    ) -> Result<PermissionResult, AgentLinkError> {
        if self.denied.contains(&tool_name) {
            Ok(PermissionResult::deny(format!(
                "Tool is disallowed: {tool_name}"
            )))
        } else {
            Ok(PermissionResult::allow())
        }
    }
}
