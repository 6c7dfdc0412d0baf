//! Hook callback trait.

use async_trait::async_trait;
use std::future::Future;

use crate::error::AgentLinkError;
use crate::hooks::{HookInput, HookOutput};

/// A host callback the CLI can invoke through `hook_callback` requests
///
/// Implement directly, or use any async function with the matching signature
/// via the blanket implementation:
///
/// ```
/// use agentlink::hooks::{HookInput, HookOutput};
/// use agentlink::error::AgentLinkError;
///
/// async fn no_bash(
///     input: HookInput,
///     _tool_use_id: Option<String>,
/// ) -> Result<HookOutput, AgentLinkError> {
///     if input.tool_name() == Some("Bash") {
///         return Ok(HookOutput::block("Bash is off limits"));
///     }
///     Ok(HookOutput::empty())
/// }
/// ```
#[async_trait]
pub trait HookCallback: Send + Sync {
    /// Run the hook.
    ///
    /// Errors do not propagate to the CLI as failures; the registry converts
    /// them into a block-decision output so the CLI always gets a response.
    async fn call(
        &self,
        input: HookInput,
        tool_use_id: Option<String>,
    ) -> Result<HookOutput, AgentLinkError>;
}

#[async_trait]
impl<F, Fut> HookCallback for F
where
    F: Fn(HookInput, Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HookOutput, AgentLinkError>> + Send,
{
    async fn call(
        &self,
        input: HookInput,
        tool_use_id: Option<String>,
    ) -> Result<HookOutput, AgentLinkError> {
        self(input, tool_use_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::types::{BaseHookInput, StopHookInput};

    fn stop_input() -> HookInput {
        HookInput::Stop(StopHookInput {
            base: BaseHookInput {
                session_id: "s".to_string(),
                transcript_path: "t".to_string(),
                cwd: "/tmp".to_string(),
                permission_mode: None,
            },
            stop_hook_active: false,
        })
    }

    struct AlwaysBlock;

    #[async_trait]
    impl HookCallback for AlwaysBlock {
        async fn call(
            &self,
            _input: HookInput,
            _tool_use_id: Option<String>,
        ) -> Result<HookOutput, AgentLinkError> {
            Ok(HookOutput::block("no"))
        }
    }

    #[tokio::test]
    async fn test_struct_implementation() {
        let output = AlwaysBlock.call(stop_input(), None).await.unwrap();
        assert_eq!(output.reason.as_deref(), Some("no"));
    }

    #[tokio::test]
    async fn test_async_fn_implements_callback() {
        async fn pass(
            _input: HookInput,
            tool_use_id: Option<String>,
        ) -> Result<HookOutput, AgentLinkError> {
            assert_eq!(tool_use_id.as_deref(), Some("tu_1"));
            Ok(HookOutput::empty())
        }

        let callback: &dyn HookCallback = &pass;
        let output = callback
            .call(stop_input(), Some("tu_1".to_string()))
            .await
            .unwrap();
        assert_eq!(output, HookOutput::empty());
    }
}
