//! Process launching, behind a trait.
//!
//! The transport never spawns processes itself; it hands a [`LaunchSpec`] to
//! a [`ProcessLauncher`]. The default [`CommandLauncher`] spawns directly;
//! sandbox or container launchers implement the same trait and the transport
//! does not change.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::AgentLinkError;

/// Everything needed to start the CLI child process
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments, in order
    pub args: Vec<String>,
    /// Working directory of the child
    pub cwd: PathBuf,
    /// Complete child environment; nothing else is inherited
    pub env: HashMap<String, String>,
}

impl LaunchSpec {
    /// Rewrite the command to run as another user.
    ///
    /// On POSIX the command becomes `sudo -u <user> <program> <args...>`.
    /// Elsewhere the request is logged and ignored.
    pub fn with_user(mut self, user: &str) -> Self {
        #[cfg(unix)]
        {
            let mut args = vec![
                "-u".to_string(),
                user.to_string(),
                self.program.to_string_lossy().into_owned(),
            ];
            args.extend(self.args);
            self.program = PathBuf::from("sudo");
            self.args = args;
            debug!(user, "wrapped command with sudo");
        }
        #[cfg(not(unix))]
        {
            tracing::warn!(user, "user wrapping is not supported on this platform");
        }
        self
    }
}

/// Spawns the CLI child process from a [`LaunchSpec`]
///
/// Implementations must pipe stdin, stdout, and stderr; the transport owns
/// all three streams for the session lifetime.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start the child. A failure here is fatal for `start_session`.
    async fn launch(&self, spec: LaunchSpec) -> Result<Child, AgentLinkError>;
}

/// Default launcher: a plain `tokio::process::Command` spawn
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<Child, AgentLinkError> {
        debug!(
            program = %spec.program.display(),
            args = ?spec.args,
            cwd = %spec.cwd.display(),
            "spawning CLI"
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn().map_err(|e| {
            AgentLinkError::ProcessLaunch(format!(
                "failed to spawn {}: {e}",
                spec.program.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            program: PathBuf::from("some-cli"),
            args: vec!["--verbose".to_string()],
            cwd: PathBuf::from("/tmp"),
            env: HashMap::new(),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_user_wrapping_prefixes_sudo() {
        let wrapped = spec().with_user("builder");
        assert_eq!(wrapped.program, PathBuf::from("sudo"));
        assert_eq!(
            wrapped.args,
            vec![
                "-u".to_string(),
                "builder".to_string(),
                "some-cli".to_string(),
                "--verbose".to_string(),
            ]
        );
    }

    #[test]
    #[cfg(not(unix))]
    fn test_user_wrapping_ignored() {
        let wrapped = spec().with_user("builder");
        assert_eq!(wrapped.program, PathBuf::from("some-cli"));
    }

    #[tokio::test]
    async fn test_launch_missing_binary_fails() {
        let result = CommandLauncher
            .launch(LaunchSpec {
                program: PathBuf::from("/nonexistent/agentlink-cli"),
                args: vec![],
                cwd: std::env::temp_dir(),
                env: HashMap::new(),
            })
            .await;
        assert!(matches!(
            result.unwrap_err(),
            AgentLinkError::ProcessLaunch(_)
        ));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_launch_pipes_stdio() {
        let mut child = CommandLauncher
            .launch(LaunchSpec {
                program: PathBuf::from("/bin/cat"),
                args: vec![],
                cwd: std::env::temp_dir(),
                env: HashMap::new(),
            })
            .await
            .unwrap();

        assert!(child.stdin.is_some());
        assert!(child.stdout.is_some());
        assert!(child.stderr.is_some());
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}
