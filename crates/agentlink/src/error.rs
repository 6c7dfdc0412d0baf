//! Error types for the agentlink transport
//!
//! This module defines the error taxonomy for the crate using `thiserror`.
//! All fallible operations return `Result<T, AgentLinkError>`.
//!
//! Two broad propagation paths exist:
//!
//! - **Host-invoked APIs** (`start_session`, `send_user_message`, ...) surface
//!   errors directly to the caller.
//! - **Worker-internal failures** (a read loop dying, a malformed inbound
//!   record) are logged and, where fatal, recorded in the transport's
//!   session-error slot; they never raise spontaneously. The slot is surfaced
//!   through [`AgentTransport::session_error`](crate::transport::AgentTransport::session_error)
//!   and `wait_for_completion`.

use thiserror::Error;

/// Maximum number of characters of a raw record quoted in diagnostics.
pub const MAX_DIAGNOSTIC_RAW_LEN: usize = 100;

/// The main error type for all agentlink operations
///
/// Two variants support automatic conversion via the `?` operator:
/// - `JsonDecode` from `serde_json::Error`
/// - `Io` from `std::io::Error`
#[derive(Error, Debug)]
pub enum AgentLinkError {
    /// A record was not valid JSON
    ///
    /// Raised by the envelope codec. On the inbound path the record is
    /// logged and dropped; the session keeps running.
    #[error("failed to decode JSON record: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// JSON was valid but the envelope schema constraints failed
    ///
    /// Missing `type`, a `control_request` without `request_id`, and similar
    /// shape violations. `raw` carries the offending record truncated to
    /// [`MAX_DIAGNOSTIC_RAW_LEN`] characters.
    #[error("failed to parse message ({reason}): {raw}")]
    MessageParse {
        /// What schema constraint was violated
        reason: String,
        /// The raw record, truncated for diagnostics
        raw: String,
    },

    /// The CLI child process could not be started
    ///
    /// Fatal for `start_session`; the transport reverts to `Disconnected`.
    #[error("failed to launch CLI process: {0}")]
    ProcessLaunch(String),

    /// The CLI child exited with a non-zero code
    ///
    /// Surfaced by `wait_for_completion`, with captured stderr attached.
    #[error("CLI process exited with code {code}: {stderr}")]
    ProcessExit {
        /// Exit code reported by the child
        code: i32,
        /// Captured standard error output
        stderr: String,
    },

    /// An API was called while the transport is closing or closed
    #[error("transport is closed")]
    TransportClosed,

    /// An API was called in a valid but wrong state (e.g. send before start)
    #[error("illegal transport state: {0}")]
    IllegalState(String),

    /// A host-originated control request received no response in time
    ///
    /// The correlation entry has already been removed when this is raised.
    #[error("control request {request_id} timed out")]
    RequestTimeout {
        /// The request id whose response never arrived
        request_id: String,
    },

    /// The outbound channel refused a record
    ///
    /// The channel is closed, or full under a non-blocking overflow policy.
    #[error("failed to enqueue outbound record: {0}")]
    EmitFailure(String),

    /// The control protocol returned a semantic error
    #[error("control protocol error: {0}")]
    ControlError(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Truncate a raw record for inclusion in diagnostics.
///
/// Cuts at a character boundary so multi-byte UTF-8 records stay valid.
pub fn truncate_raw(raw: &str) -> String {
    if raw.chars().count() <= MAX_DIAGNOSTIC_RAW_LEN {
        raw.to_string()
    } else {
        let mut out: String = raw.chars().take(MAX_DIAGNOSTIC_RAW_LEN).collect();
        out.push_str("...");
        out
    }
}

impl AgentLinkError {
    /// Build a `MessageParse` error with the raw record truncated.
    pub fn message_parse(reason: impl Into<String>, raw: &str) -> Self {
        Self::MessageParse {
            reason: reason.into(),
            raw: truncate_raw(raw),
        }
    }
}
