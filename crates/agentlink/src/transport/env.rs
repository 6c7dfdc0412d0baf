//! Safe-whitelist construction of the child environment.
//!
//! The child never inherits the full parent environment. A small per-platform
//! whitelist is copied over, values that look like exported shell functions
//! (leading `()`) are dropped, the transport stamps its entrypoint and
//! version, the API key is forwarded when present, and caller-supplied
//! overrides merge last and win.

use std::collections::HashMap;
use tracing::debug;

/// Parent variables copied to the child on POSIX
#[cfg(unix)]
pub const SAFE_ENV_VARS: &[&str] = &[
    "HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER", "LANG", "LC_ALL", "LC_CTYPE",
];

/// Parent variables copied to the child on Windows
#[cfg(not(unix))]
pub const SAFE_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

/// Identifies this SDK to the CLI
pub const ENTRYPOINT_VAR: &str = "CLAUDE_CODE_ENTRYPOINT";
/// Entrypoint value for this SDK
pub const ENTRYPOINT_VALUE: &str = "sdk-rust";
/// Carries the crate version to the CLI
pub const SDK_VERSION_VAR: &str = "AGENTLINK_SDK_VERSION";
/// Forwarded from the parent when present
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Build the child environment from the current process environment.
pub fn build_child_env(overrides: &HashMap<String, String>) -> HashMap<String, String> {
    build_from_parent(std::env::vars(), overrides)
}

/// Build the child environment from an explicit parent snapshot.
///
/// Split out so the filtering rules are testable without touching the real
/// process environment.
pub fn build_from_parent(
    parent: impl IntoIterator<Item = (String, String)>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    let parent: HashMap<String, String> = parent.into_iter().collect();
    let mut env = HashMap::new();

    for name in SAFE_ENV_VARS {
        if let Some(value) = parent.get(*name) {
            // Values that start with "()" are exported shell functions
            // smuggled through the environment; never forward them.
            if value.starts_with("()") {
                debug!(name, "dropping shell-function environment value");
                continue;
            }
            env.insert((*name).to_string(), value.clone());
        }
    }

    env.insert(ENTRYPOINT_VAR.to_string(), ENTRYPOINT_VALUE.to_string());
    env.insert(
        SDK_VERSION_VAR.to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );

    if let Some(key) = parent.get(API_KEY_VAR) {
        env.insert(API_KEY_VAR.to_string(), key.clone());
    }

    // Caller overrides merge last and win
    for (name, value) in overrides {
        env.insert(name.clone(), value.clone());
    }

    env
}
