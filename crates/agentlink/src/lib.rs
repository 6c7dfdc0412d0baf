//! agentlink - bidirectional control-protocol transport for interactive
//! agent CLIs
//!
//! A host program drives a long-lived conversation with an external agent
//! CLI over the CLI's stdin/stdout, exchanging newline-delimited JSON
//! records on two logical channels multiplexed over one byte stream:
//! ordinary conversation messages, and an in-band *control protocol* used
//! for hook callbacks, per-tool permission decisions, session parameter
//! changes, and cooperative interrupt.
//!
//! # Architecture
//!
//! - [`transport`]: process lifecycle, the five-state machine, the three
//!   worker tasks, backpressured buffering, graceful shutdown
//! - [`control`]: the control-protocol data model, request/response
//!   correlation, and host-side dispatch
//! - [`hooks`]: pattern-matched hook registration and the initialize
//!   configuration
//! - [`permissions`]: the pluggable "may I use this tool" policy
//! - [`envelope`]: classification of inbound records
//! - [`framer`]: newline-delimited framing with a record-length cap
//! - [`error`]: the error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use agentlink::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = AgentTransport::new(
//!     "/work/project",
//!     Duration::from_secs(30),
//!     "/usr/local/bin/agent-cli",
//!     None,
//! )?;
//!
//! // Refuse shell access before any tool runs
//! transport.hook_registry().register_pre_tool_use(
//!     Some("Bash"),
//!     Arc::new(|_input: HookInput, _id: Option<String>| async move {
//!         Ok(HookOutput::block("shell access is disabled"))
//!     }),
//! )?;
//! transport.set_permission_policy(Arc::new(AllowList::new(["Read", "Glob"])));
//!
//! transport
//!     .start_session(
//!         Some("summarize this repository"),
//!         SessionOptions::default(),
//!         Arc::new(|record: InboundRecord| async move { println!("{record:?}") }),
//!     )
//!     .await?;
//! transport.initialize().await?;
//!
//! transport.wait_for_completion(Duration::from_secs(300)).await?;
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod control;
pub mod envelope;
pub mod error;
pub mod framer;
pub mod hooks;
pub mod permissions;
pub mod transport;

/// Common imports for agentlink users.
pub mod prelude {
    //! Use `use agentlink::prelude::*;` to bring the usual types in.

    pub use crate::control::{
        ControlResponsePayload, IncomingControlRequest, OutboundControlRequest,
    };
    pub use crate::envelope::{ControlRequestEnvelope, InboundRecord};
    pub use crate::error::AgentLinkError;
    pub use crate::hooks::{
        HookCallback, HookEventKind, HookInput, HookOutput, HookRegistration, HookRegistry,
    };
    pub use crate::permissions::{
        AllowAll, AllowList, DenyList, PermissionPolicy, PermissionResult, ToolPermissionContext,
    };
    pub use crate::transport::{
        AgentTransport, CommandLauncher, LaunchSpec, MessageHandler, OverflowPolicy,
        ProcessLauncher, SessionOptions, TransportState,
    };
}
