//! Hook registration, indexing, matching, and execution.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

use crate::control::messages::{OutboundControlRequest, control_request_record};
use crate::error::AgentLinkError;
use crate::hooks::callback::HookCallback;
use crate::hooks::types::{HookEventKind, HookInput};
use crate::hooks::output::HookOutput;

/// Timeout applied when a registration does not specify a positive one.
pub const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 60;

/// One matcher entry of the initialize hook configuration
///
/// The wire shape is `{"matcher": "<regex>", "hookCallbackIds": [...],
/// "timeout": <seconds>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookMatcherConfig {
    /// Tool-name regex; `.*` for pattern-less registrations
    pub matcher: String,
    /// Registry ids of the callbacks behind this matcher, in registration order
    #[serde(rename = "hookCallbackIds")]
    pub hook_callback_ids: Vec<String>,
    /// Maximum timeout among the grouped registrations, in seconds
    pub timeout: u64,
}

/// A registered hook callback
#[derive(Clone)]
pub struct HookRegistration {
    /// Registry-unique id
    pub id: String,
    /// Event the hook fires on
    pub event: HookEventKind,
    /// Tool-name pattern; `None` matches any tool, including none
    pub tool_pattern: Option<String>,
    /// Compiled full-string form of `tool_pattern`
    compiled: Option<Regex>,
    /// The callback itself
    pub callback: Arc<dyn HookCallback>,
    /// Per-hook timeout advertised to the CLI, in seconds
    pub timeout_seconds: u64,
}

impl std::fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistration")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("tool_pattern", &self.tool_pattern)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl HookRegistration {
    /// Build a registration, compiling the pattern as a full-string regex.
    ///
    /// A zero timeout falls back to [`DEFAULT_HOOK_TIMEOUT_SECS`].
    pub fn new(
        id: impl Into<String>,
        event: HookEventKind,
        tool_pattern: Option<&str>,
        callback: Arc<dyn HookCallback>,
        timeout_seconds: u64,
    ) -> Result<Self, AgentLinkError> {
        let compiled = tool_pattern
            .map(|p| {
                Regex::new(&format!("^(?:{p})$")).map_err(|e| {
                    AgentLinkError::IllegalState(format!("invalid tool pattern '{p}': {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            id: id.into(),
            event,
            tool_pattern: tool_pattern.map(str::to_string),
            compiled,
            callback,
            timeout_seconds: if timeout_seconds == 0 {
                DEFAULT_HOOK_TIMEOUT_SECS
            } else {
                timeout_seconds
            },
        })
    }

    /// Whether this registration fires for the given tool name.
    ///
    /// A missing tool name matches only pattern-less registrations.
    pub fn matches_tool(&self, tool_name: Option<&str>) -> bool {
        match (&self.compiled, tool_name) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(regex), Some(name)) => regex.is_match(name),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<String, Arc<HookRegistration>>,
    by_event: HashMap<HookEventKind, Vec<Arc<HookRegistration>>>,
}

/// Owns hook registrations and synthesizes the initialize configuration
///
/// Every registration is reachable through both the by-id and the by-event
/// index; `clear` empties both together.
pub struct HookRegistry {
    inner: Mutex<RegistryInner>,
    counter: AtomicU64,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            counter: AtomicU64::new(0),
        }
    }

    /// Register a hook. Fails if the id is already taken.
    pub fn register(&self, registration: HookRegistration) -> Result<(), AgentLinkError> {
        let mut inner = self.inner.lock().expect("hook registry poisoned");
        if inner.by_id.contains_key(&registration.id) {
            return Err(AgentLinkError::IllegalState(format!(
                "hook id '{}' is already registered",
                registration.id
            )));
        }

        debug!(
            id = %registration.id,
            event = %registration.event,
            pattern = registration.tool_pattern.as_deref().unwrap_or("<any>"),
            "registered hook"
        );

        let registration = Arc::new(registration);
        inner
            .by_event
            .entry(registration.event)
            .or_default()
            .push(registration.clone());
        inner.by_id.insert(registration.id.clone(), registration);
        Ok(())
    }

    fn register_generated(
        &self,
        event: HookEventKind,
        tool_pattern: Option<&str>,
        callback: Arc<dyn HookCallback>,
    ) -> Result<String, AgentLinkError> {
        let id = format!("hook_{}", self.counter.fetch_add(1, Ordering::SeqCst));
        self.register(HookRegistration::new(
            id.clone(),
            event,
            tool_pattern,
            callback,
            DEFAULT_HOOK_TIMEOUT_SECS,
        )?)?;
        Ok(id)
    }

    /// Register a `PreToolUse` hook with a generated `hook_<n>` id.
    pub fn register_pre_tool_use(
        &self,
        tool_pattern: Option<&str>,
        callback: Arc<dyn HookCallback>,
    ) -> Result<String, AgentLinkError> {
        self.register_generated(HookEventKind::PreToolUse, tool_pattern, callback)
    }

    /// Register a `PostToolUse` hook with a generated `hook_<n>` id.
    pub fn register_post_tool_use(
        &self,
        tool_pattern: Option<&str>,
        callback: Arc<dyn HookCallback>,
    ) -> Result<String, AgentLinkError> {
        self.register_generated(HookEventKind::PostToolUse, tool_pattern, callback)
    }

    /// Register a `UserPromptSubmit` hook with a generated `hook_<n>` id.
    pub fn register_user_prompt_submit(
        &self,
        callback: Arc<dyn HookCallback>,
    ) -> Result<String, AgentLinkError> {
        self.register_generated(HookEventKind::UserPromptSubmit, None, callback)
    }

    /// Register a `Stop` hook with a generated `hook_<n>` id.
    pub fn register_stop(
        &self,
        callback: Arc<dyn HookCallback>,
    ) -> Result<String, AgentLinkError> {
        self.register_generated(HookEventKind::Stop, None, callback)
    }

    /// Remove a registration from both indices. Idempotent.
    pub fn unregister(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("hook registry poisoned");
        match inner.by_id.remove(id) {
            Some(removed) => {
                if let Some(list) = inner.by_event.get_mut(&removed.event) {
                    list.retain(|r| r.id != id);
                    if list.is_empty() {
                        inner.by_event.remove(&removed.event);
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Look up a registration by id.
    pub fn get_by_id(&self, id: &str) -> Option<Arc<HookRegistration>> {
        self.inner
            .lock()
            .expect("hook registry poisoned")
            .by_id
            .get(id)
            .cloned()
    }

    /// Registrations for an event, in registration order.
    pub fn get_by_event(&self, event: HookEventKind) -> Vec<Arc<HookRegistration>> {
        self.inner
            .lock()
            .expect("hook registry poisoned")
            .by_event
            .get(&event)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every registration from both indices.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("hook registry poisoned");
        inner.by_id.clear();
        inner.by_event.clear();
    }

    /// Whether any hook is registered.
    pub fn has_hooks(&self) -> bool {
        !self
            .inner
            .lock()
            .expect("hook registry poisoned")
            .by_id
            .is_empty()
    }

    /// Run the callback behind `id`.
    ///
    /// A callback error is converted into a block-decision output; the CLI
    /// must see some response. An unknown id is an error for the dispatcher
    /// to report.
    pub async fn execute_hook(
        &self,
        id: &str,
        input: HookInput,
        tool_use_id: Option<String>,
    ) -> Result<HookOutput, AgentLinkError> {
        let registration = self.get_by_id(id).ok_or_else(|| {
            AgentLinkError::ControlError(format!("no hook registered for callback id '{id}'"))
        })?;

        match registration.callback.call(input, tool_use_id).await {
            Ok(output) => Ok(output),
            Err(e) => {
                error!(id, error = %e, "hook callback failed");
                Ok(HookOutput::block(format!("Hook execution failed: {e}")))
            }
        }
    }

    /// Build the `hooks` map of the initialize request.
    ///
    /// Registrations of one event are grouped by pattern string (`None`
    /// becomes `.*`); each group keeps its ids in registration order and
    /// advertises the maximum timeout among them.
    pub fn build_hook_config(&self) -> HashMap<String, Vec<HookMatcherConfig>> {
        let inner = self.inner.lock().expect("hook registry poisoned");
        let mut config = HashMap::new();

        for (event, registrations) in &inner.by_event {
            let mut matchers: Vec<HookMatcherConfig> = Vec::new();
            for registration in registrations {
                let pattern = registration
                    .tool_pattern
                    .clone()
                    .unwrap_or_else(|| ".*".to_string());
                match matchers.iter_mut().find(|m| m.matcher == pattern) {
                    Some(matcher) => {
                        matcher.hook_callback_ids.push(registration.id.clone());
                        matcher.timeout = matcher.timeout.max(registration.timeout_seconds);
                    }
                    None => matchers.push(HookMatcherConfig {
                        matcher: pattern,
                        hook_callback_ids: vec![registration.id.clone()],
                        timeout: registration.timeout_seconds,
                    }),
                }
            }
            if !matchers.is_empty() {
                config.insert(event.wire_name().to_string(), matchers);
            }
        }

        config
    }

    /// Wrap [`build_hook_config`](Self::build_hook_config) into a full
    /// `initialize` control-request record.
    pub fn create_initialize_request(&self, request_id: &str) -> Value {
        control_request_record(
            request_id,
            &OutboundControlRequest::Initialize {
                hooks: self.build_hook_config(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::types::{BaseHookInput, PreToolUseHookInput};
    use serde_json::json;

    fn noop() -> Arc<dyn HookCallback> {
        Arc::new(
            |_input: HookInput, _tool_use_id: Option<String>| async move {
                Ok(HookOutput::empty())
            },
        )
    }

    fn failing() -> Arc<dyn HookCallback> {
        Arc::new(
            |_input: HookInput, _tool_use_id: Option<String>| async move {
                Err(AgentLinkError::ControlError("kaboom".to_string()))
            },
        )
    }

    fn pre_tool_use(tool: &str) -> HookInput {
        HookInput::PreToolUse(PreToolUseHookInput {
            base: BaseHookInput {
                session_id: "s".to_string(),
                transcript_path: "t".to_string(),
                cwd: "/tmp".to_string(),
                permission_mode: None,
            },
            tool_name: tool.to_string(),
            tool_input: json!({}),
        })
    }

    fn registration(id: &str, pattern: Option<&str>, timeout: u64) -> HookRegistration {
        HookRegistration::new(id, HookEventKind::PreToolUse, pattern, noop(), timeout).unwrap()
    }

    #[test]
    fn test_duplicate_id_fails() {
        let registry = HookRegistry::new();
        registry.register(registration("h1", None, 60)).unwrap();
        let err = registry.register(registration("h1", None, 60)).unwrap_err();
        assert!(matches!(err, AgentLinkError::IllegalState(_)));
    }

    #[test]
    fn test_generated_ids_are_sequential() {
        let registry = HookRegistry::new();
        let a = registry.register_pre_tool_use(Some("Bash"), noop()).unwrap();
        let b = registry.register_stop(noop()).unwrap();
        assert_eq!(a, "hook_0");
        assert_eq!(b, "hook_1");
    }

    #[test]
    fn test_both_indices_reachable() {
        let registry = HookRegistry::new();
        let id = registry.register_pre_tool_use(None, noop()).unwrap();
        assert!(registry.get_by_id(&id).is_some());
        let by_event = registry.get_by_event(HookEventKind::PreToolUse);
        assert_eq!(by_event.len(), 1);
        assert_eq!(by_event[0].id, id);
    }

    #[test]
    fn test_unregister_idempotent() {
        let registry = HookRegistry::new();
        let id = registry.register_stop(noop()).unwrap();
        assert!(registry.unregister(&id));
        assert!(!registry.unregister(&id));
        assert!(registry.get_by_id(&id).is_none());
        assert!(registry.get_by_event(HookEventKind::Stop).is_empty());
    }

    #[test]
    fn test_clear_empties_both_indices() {
        let registry = HookRegistry::new();
        registry.register_pre_tool_use(Some("Bash"), noop()).unwrap();
        registry.register_stop(noop()).unwrap();
        assert!(registry.has_hooks());
        registry.clear();
        assert!(!registry.has_hooks());
        assert!(registry.get_by_event(HookEventKind::PreToolUse).is_empty());
        assert!(registry.get_by_event(HookEventKind::Stop).is_empty());
    }

    #[test]
    fn test_zero_timeout_defaults() {
        let reg = registration("h", None, 0);
        assert_eq!(reg.timeout_seconds, DEFAULT_HOOK_TIMEOUT_SECS);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = HookRegistration::new(
            "h",
            HookEventKind::PreToolUse,
            Some("(unclosed"),
            noop(),
            60,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_pattern_full_string_match() {
        let reg = registration("h", Some("Bash"), 60);
        assert!(reg.matches_tool(Some("Bash")));
        assert!(!reg.matches_tool(Some("Bash2")));
        assert!(!reg.matches_tool(Some("NotBash")));

        let alt = registration("h2", Some("Write|Edit"), 60);
        assert!(alt.matches_tool(Some("Write")));
        assert!(alt.matches_tool(Some("Edit")));
        assert!(!alt.matches_tool(Some("Read")));

        let wild = registration("h3", Some("mcp__.*"), 60);
        assert!(wild.matches_tool(Some("mcp__calc__add")));
        assert!(!wild.matches_tool(Some("Bash")));
    }

    #[test]
    fn test_null_pattern_matches_missing_tool_name() {
        let any = registration("h", None, 60);
        assert!(any.matches_tool(None));
        assert!(any.matches_tool(Some("Bash")));

        let specific = registration("h2", Some("Bash"), 60);
        assert!(!specific.matches_tool(None));
    }

    #[tokio::test]
    async fn test_execute_hook_runs_callback() {
        let registry = HookRegistry::new();
        let id = registry
            .register_pre_tool_use(
                Some("Bash"),
                Arc::new(|_input: HookInput, _id: Option<String>| async move {
                    Ok(HookOutput::block("nope"))
                }),
            )
            .unwrap();

        let output = registry
            .execute_hook(&id, pre_tool_use("Bash"), None)
            .await
            .unwrap();
        assert_eq!(output.reason.as_deref(), Some("nope"));
        assert_eq!(output.continue_execution, Some(false));
    }

    #[tokio::test]
    async fn test_execute_hook_converts_failure_to_block() {
        let registry = HookRegistry::new();
        let id = registry.register_pre_tool_use(None, failing()).unwrap();

        let output = registry
            .execute_hook(&id, pre_tool_use("Bash"), None)
            .await
            .unwrap();
        assert_eq!(output.decision, Some(crate::hooks::HookDecision::Block));
        assert!(
            output
                .reason
                .as_deref()
                .unwrap()
                .starts_with("Hook execution failed:")
        );
    }

    #[tokio::test]
    async fn test_execute_hook_unknown_id_errors() {
        let registry = HookRegistry::new();
        let err = registry
            .execute_hook("hook_99", pre_tool_use("Bash"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentLinkError::ControlError(_)));
    }

    #[test]
    fn test_build_hook_config_groups_by_pattern() {
        let registry = HookRegistry::new();
        let h1 = registry.register_pre_tool_use(Some("Bash"), noop()).unwrap();
        registry
            .register(
                HookRegistration::new(
                    "h2",
                    HookEventKind::PreToolUse,
                    Some("Bash"),
                    noop(),
                    120,
                )
                .unwrap(),
            )
            .unwrap();
        let h3 = registry.register_pre_tool_use(Some("Write"), noop()).unwrap();

        let config = registry.build_hook_config();
        let matchers = &config["PreToolUse"];
        assert_eq!(matchers.len(), 2);

        let bash = matchers.iter().find(|m| m.matcher == "Bash").unwrap();
        assert_eq!(bash.hook_callback_ids, vec![h1, "h2".to_string()]);
        assert_eq!(bash.timeout, 120);

        let write = matchers.iter().find(|m| m.matcher == "Write").unwrap();
        assert_eq!(write.hook_callback_ids, vec![h3]);
        assert_eq!(write.timeout, DEFAULT_HOOK_TIMEOUT_SECS);
    }

    #[test]
    fn test_build_hook_config_null_pattern_becomes_dot_star() {
        let registry = HookRegistry::new();
        let id = registry.register_pre_tool_use(None, noop()).unwrap();

        let config = registry.build_hook_config();
        let matchers = &config["PreToolUse"];
        assert_eq!(matchers.len(), 1);
        assert_eq!(matchers[0].matcher, ".*");
        assert_eq!(matchers[0].hook_callback_ids, vec![id]);
        assert_eq!(matchers[0].timeout, 60);
    }

    #[test]
    fn test_create_initialize_request() {
        let registry = HookRegistry::new();
        let id = registry.register_pre_tool_use(None, noop()).unwrap();

        let record = registry.create_initialize_request("r0");
        assert_eq!(record["type"], "control_request");
        assert_eq!(record["request_id"], "r0");
        assert_eq!(record["request"]["subtype"], "initialize");
        let matcher = &record["request"]["hooks"]["PreToolUse"][0];
        assert_eq!(matcher["matcher"], ".*");
        assert_eq!(matcher["hookCallbackIds"][0], id);
        assert_eq!(matcher["timeout"], 60);
    }

    #[test]
    fn test_empty_registry_config_is_empty() {
        let registry = HookRegistry::new();
        assert!(registry.build_hook_config().is_empty());
        let record = registry.create_initialize_request("r0");
        assert!(record["request"].get("hooks").is_none());
    }
}
