//! Per-session configuration.

use std::collections::HashMap;
use std::time::Duration;

use crate::framer::DEFAULT_MAX_RECORD_LEN;
use crate::transport::sink::OverflowPolicy;

/// Default bound on the broadcast sink, in records.
pub const DEFAULT_SINK_CAPACITY: usize = 256;
/// Default bound on the outbound channel, in records.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;
/// Default grace period before forceful child termination.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for one session
///
/// # Example
///
/// ```
/// use agentlink::transport::SessionOptions;
///
/// let options = SessionOptions::builder()
///     .model("sonnet")
///     .permission_mode("acceptEdits")
///     .env("DEBUG", "1")
///     .build();
/// assert_eq!(options.model.as_deref(), Some("sonnet"));
/// ```
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Model passed to the CLI, if any
    pub model: Option<String>,
    /// Permission mode passed to the CLI, if any
    pub permission_mode: Option<String>,
    /// Session id stamped on outgoing user messages
    pub session_id: Option<String>,
    /// Extra CLI arguments appended after the flag contract
    pub extra_args: Vec<String>,
    /// Environment overrides, merged last into the safe child environment
    pub env: HashMap<String, String>,
    /// Run the CLI as this user (POSIX `sudo -u`)
    pub user: Option<String>,
    /// Maximum accepted inbound record length, in bytes
    pub max_record_len: usize,
    /// Broadcast sink capacity, in records
    pub sink_capacity: usize,
    /// Broadcast sink behavior when the consumer lags
    pub overflow_policy: OverflowPolicy,
    /// Outbound channel capacity, in records
    pub outbound_capacity: usize,
    /// How long `close` waits for the child before forceful termination
    pub shutdown_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model: None,
            permission_mode: None,
            session_id: None,
            extra_args: Vec::new(),
            env: HashMap::new(),
            user: None,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            sink_capacity: DEFAULT_SINK_CAPACITY,
            overflow_policy: OverflowPolicy::Block,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl SessionOptions {
    /// Start building options.
    pub fn builder() -> SessionOptionsBuilder {
        SessionOptionsBuilder::default()
    }

    /// The CLI argument list for this session.
    ///
    /// Both directions are stream-JSON, the control protocol rides the same
    /// streams (`--permission-prompt-tool stdio`), and `--verbose` is
    /// required to receive every message kind. There is no `--print`: the
    /// initial prompt travels as a JSON user message on stdin.
    pub fn cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--input-format".to_string(),
            "stream-json".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--permission-prompt-tool".to_string(),
            "stdio".to_string(),
            "--verbose".to_string(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(mode) = &self.permission_mode {
            args.push("--permission-mode".to_string());
            args.push(mode.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Builder for [`SessionOptions`]
#[derive(Debug, Default)]
pub struct SessionOptionsBuilder {
    options: SessionOptions,
}

impl SessionOptionsBuilder {
    /// Model passed to the CLI.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    /// Permission mode passed to the CLI.
    pub fn permission_mode(mut self, mode: impl Into<String>) -> Self {
        self.options.permission_mode = Some(mode.into());
        self
    }

    /// Session id stamped on outgoing user messages.
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.options.session_id = Some(id.into());
        self
    }

    /// Append one extra CLI argument.
    pub fn extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.options.extra_args.push(arg.into());
        self
    }

    /// Add one environment override.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.env.insert(name.into(), value.into());
        self
    }

    /// Run the CLI as this user (POSIX only).
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.options.user = Some(user.into());
        self
    }

    /// Cap on inbound record length, in bytes.
    pub fn max_record_len(mut self, len: usize) -> Self {
        self.options.max_record_len = len;
        self
    }

    /// Broadcast sink capacity, in records.
    pub fn sink_capacity(mut self, capacity: usize) -> Self {
        self.options.sink_capacity = capacity;
        self
    }

    /// Sink behavior when the consumer lags.
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.options.overflow_policy = policy;
        self
    }

    /// Grace period before forceful child termination.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.options.shutdown_grace = grace;
        self
    }

    /// Finish building.
    pub fn build(self) -> SessionOptions {
        self.options
    }
}
