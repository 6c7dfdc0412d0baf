//! Hook registry and the records it exchanges with the CLI.
//!
//! Hooks are host callbacks the CLI invokes through `hook_callback` control
//! requests: before and after tool use, on prompt submission, on stop, and
//! before compaction. The host registers callbacks here, advertises the
//! resulting configuration in the `initialize` request, and the transport
//! dispatches incoming callbacks through [`HookRegistry::execute_hook`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use agentlink::hooks::{HookInput, HookOutput, HookRegistry};
//! use agentlink::error::AgentLinkError;
//!
//! async fn guard(
//!     input: HookInput,
//!     _tool_use_id: Option<String>,
//! ) -> Result<HookOutput, AgentLinkError> {
//!     if input.tool_name() == Some("Bash") {
//!         return Ok(HookOutput::block("shell access is disabled"));
//!     }
//!     Ok(HookOutput::empty())
//! }
//!
//! let registry = HookRegistry::new();
//! let id = registry.register_pre_tool_use(Some("Bash"), Arc::new(guard)).unwrap();
//! assert!(registry.get_by_id(&id).is_some());
//! ```

mod callback;
mod output;
mod registry;
pub(crate) mod types;

pub use callback::HookCallback;
pub use output::{HookDecision, HookOutput, HookSpecificOutput, PermissionDecision};
pub use registry::{
    DEFAULT_HOOK_TIMEOUT_SECS, HookMatcherConfig, HookRegistration, HookRegistry,
};
pub use types::{
    BaseHookInput, CompactTrigger, HookEventKind, HookInput, PreCompactHookInput,
    PostToolUseHookInput, PreToolUseHookInput, StopHookInput, SubagentStopHookInput,
    UserPromptSubmitHookInput,
};
