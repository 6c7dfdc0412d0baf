//! Hook event kinds and input payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events the CLI can invoke host hooks for
///
/// The on-wire string is the variant name spelled exactly as shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEventKind {
    /// Before a tool is invoked
    PreToolUse,
    /// After a tool completed
    PostToolUse,
    /// When the user submits a prompt
    UserPromptSubmit,
    /// When the conversation stops
    Stop,
    /// When a subagent stops
    SubagentStop,
    /// Before conversation compaction
    PreCompact,
}

impl HookEventKind {
    /// The event name as it appears on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::PreCompact => "PreCompact",
        }
    }
}

impl std::fmt::Display for HookEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Fields common to every hook input variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseHookInput {
    /// Session identifier
    pub session_id: String,
    /// Path to the transcript file
    pub transcript_path: String,
    /// Current working directory of the CLI
    pub cwd: String,
    /// Permission mode in effect, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
}

/// Input for `PreToolUse`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreToolUseHookInput {
    /// Common fields
    #[serde(flatten)]
    pub base: BaseHookInput,
    /// Name of the tool about to run
    pub tool_name: String,
    /// Tool arguments
    pub tool_input: Value,
}

/// Input for `PostToolUse`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostToolUseHookInput {
    /// Common fields
    #[serde(flatten)]
    pub base: BaseHookInput,
    /// Name of the tool that ran
    pub tool_name: String,
    /// Tool arguments
    pub tool_input: Value,
    /// What the tool returned
    pub tool_response: Value,
}

/// Input for `UserPromptSubmit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPromptSubmitHookInput {
    /// Common fields
    #[serde(flatten)]
    pub base: BaseHookInput,
    /// The submitted prompt text
    pub prompt: String,
}

/// Input for `Stop`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopHookInput {
    /// Common fields
    #[serde(flatten)]
    pub base: BaseHookInput,
    /// Whether a stop hook is already active
    pub stop_hook_active: bool,
}

/// Input for `SubagentStop`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentStopHookInput {
    /// Common fields
    #[serde(flatten)]
    pub base: BaseHookInput,
    /// Whether a stop hook is already active
    pub stop_hook_active: bool,
}

/// What triggered a compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactTrigger {
    /// User ran the compact command
    Manual,
    /// Context pressure
    Auto,
}

/// Input for `PreCompact`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreCompactHookInput {
    /// Common fields
    #[serde(flatten)]
    pub base: BaseHookInput,
    /// What triggered the compaction
    pub trigger: CompactTrigger,
    /// User-provided compaction instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

/// Union of all hook inputs, discriminated by `hook_event_name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum HookInput {
    /// Pre-tool-use payload
    PreToolUse(PreToolUseHookInput),
    /// Post-tool-use payload
    PostToolUse(PostToolUseHookInput),
    /// User-prompt-submit payload
    UserPromptSubmit(UserPromptSubmitHookInput),
    /// Stop payload
    Stop(StopHookInput),
    /// Subagent-stop payload
    SubagentStop(SubagentStopHookInput),
    /// Pre-compact payload
    PreCompact(PreCompactHookInput),
}

impl HookInput {
    /// The event kind of this input.
    pub fn event_kind(&self) -> HookEventKind {
        match self {
            Self::PreToolUse(_) => HookEventKind::PreToolUse,
            Self::PostToolUse(_) => HookEventKind::PostToolUse,
            Self::UserPromptSubmit(_) => HookEventKind::UserPromptSubmit,
            Self::Stop(_) => HookEventKind::Stop,
            Self::SubagentStop(_) => HookEventKind::SubagentStop,
            Self::PreCompact(_) => HookEventKind::PreCompact,
        }
    }

    /// The tool name, for tool-scoped events.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::PreToolUse(input) => Some(&input.tool_name),
            Self::PostToolUse(input) => Some(&input.tool_name),
            _ => None,
        }
    }

    /// The common fields shared by every variant.
    pub fn base(&self) -> &BaseHookInput {
        match self {
            Self::PreToolUse(input) => &input.base,
            Self::PostToolUse(input) => &input.base,
            Self::UserPromptSubmit(input) => &input.base,
            Self::Stop(input) => &input.base,
            Self::SubagentStop(input) => &input.base,
            Self::PreCompact(input) => &input.base,
        }
    }
}
