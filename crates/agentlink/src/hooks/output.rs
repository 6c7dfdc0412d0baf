//! Hook output records, shaped for the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Permission decision carried in hook-specific output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    /// Let the tool run
    Allow,
    /// Refuse the tool
    Deny,
    /// Defer to the user
    Ask,
}

/// The only top-level decision a hook can force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookDecision {
    /// Block the event that triggered the hook
    Block,
}

/// Event-specific extension of a hook output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookSpecificOutput {
    /// Event this output refers to
    #[serde(rename = "hookEventName", skip_serializing_if = "Option::is_none")]
    pub hook_event_name: Option<String>,

    /// Permission decision for pre-tool-use hooks
    #[serde(rename = "permissionDecision", skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<PermissionDecision>,

    /// Why the decision was made
    #[serde(
        rename = "permissionDecisionReason",
        skip_serializing_if = "Option::is_none"
    )]
    pub permission_decision_reason: Option<String>,

    /// Replacement tool arguments
    #[serde(rename = "updatedInput", skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,

    /// Extra context injected into the conversation
    #[serde(rename = "additionalContext", skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

/// Output of a hook callback
///
/// Every field is optional and omitted from the wire when unset; an empty
/// output is a valid "no opinion" answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookOutput {
    /// Whether the CLI should continue the current turn
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_execution: Option<bool>,

    /// Hide the hook's output from the transcript
    #[serde(rename = "suppressOutput", skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,

    /// Reason shown when execution stops
    #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    /// Block the triggering event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<HookDecision>,

    /// Message surfaced to the user
    #[serde(rename = "systemMessage", skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,

    /// Why the event was blocked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Let the hook keep running after the response is sent
    #[serde(rename = "async", skip_serializing_if = "Option::is_none")]
    pub async_execution: Option<bool>,

    /// Budget for async execution, in milliseconds
    #[serde(rename = "asyncTimeout", skip_serializing_if = "Option::is_none")]
    pub async_timeout: Option<u64>,

    /// Event-specific extension
    #[serde(rename = "hookSpecificOutput", skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

impl HookOutput {
    /// An empty "no opinion" output.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Block the triggering event with a reason.
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            continue_execution: Some(false),
            decision: Some(HookDecision::Block),
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Attach a message for the user.
    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    /// Attach event-specific output.
    pub fn with_specific_output(mut self, output: HookSpecificOutput) -> Self {
        self.hook_specific_output = Some(output);
        self
    }
}

impl HookSpecificOutput {
    /// A permission decision for a pre-tool-use hook.
    pub fn permission(
        decision: PermissionDecision,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            hook_event_name: Some("PreToolUse".to_string()),
            permission_decision: Some(decision),
            permission_decision_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}
