//! Control protocol: data model, request/response correlation, and dispatch.
//!
//! The control protocol shares the stdio streams with regular conversation
//! messages. Requests flow both ways:
//!
//! - **Host → CLI** ([`messages::OutboundControlRequest`]): `initialize`,
//!   `interrupt`, `set_permission_mode`, `set_model`. The transport parks a
//!   completion slot in [`pending::PendingRequests`] and the inbound worker
//!   completes it when the matching response arrives.
//! - **CLI → host** ([`messages::IncomingControlRequest`]): `hook_callback`,
//!   `can_use_tool`, `mcp_message`, `initialize`. The
//!   [`dispatch::ControlDispatcher`] answers every one of them, failures
//!   included.
//!
//! Request ids are unique within one live session only; this is not a
//! general RPC layer.

pub mod dispatch;
pub mod messages;
pub mod pending;

pub use dispatch::ControlDispatcher;
pub use messages::{ControlResponsePayload, IncomingControlRequest, OutboundControlRequest};
pub use pending::PendingRequests;
