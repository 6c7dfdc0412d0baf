//! Tool-permission policy layer.
//!
//! When the CLI asks "may I use this tool with these arguments?" through a
//! `can_use_tool` control request, the transport consults the installed
//! [`PermissionPolicy`]. With no policy installed the answer is allow.

mod policy;

pub use policy::{
    AllowAll, AllowList, DenyList, PermissionPolicy, PermissionResult, ToolPermissionContext,
};
