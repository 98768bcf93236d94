///! Remote command execution over SSH
///!
///! The engine only ever needs one operation from the transport: send a
///! command line to the host, get back stdout, stderr and the exit code.
///! That seam is the `RemoteShell` trait; the production implementation
///! drives the OpenSSH client binary, one command per call, with a bounded
///! timeout. Non-zero exit codes are data, not transport errors: callers
///! inspect stdout shape defensively and decide what a failure means for
///! the step they are running.

use std::time::Duration;

use async_trait::async_trait;
use switchyard_common::{Error, HostConfig, Result};
use tokio::process::Command;
use tracing::debug;

/// Result of one remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run one command line on the host. Transport failures (unreachable
    /// host, timeout) are errors; a non-zero exit code is not.
    async fn execute(&self, command: &str) -> Result<CommandOutput>;

    /// Run a command and treat a non-zero exit as a hard failure of the
    /// calling step, surfacing stderr in the error.
    async fn execute_checked(&self, command: &str) -> Result<String> {
        let output = self.execute(command).await?;
        if output.exit_code != 0 {
            return Err(Error::CommandFailed(format!(
                "`{}` exited with {}: {}",
                command,
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// SSH transport using the OpenSSH client binary.
///
/// Authentication is key-based (an explicit `ssh_key_path` or whatever the
/// local agent/default identities provide); `BatchMode` keeps the client
/// from ever prompting.
pub struct SshShell {
    host: HostConfig,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshShell {
    pub fn new(host: HostConfig, connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            host,
            connect_timeout,
            command_timeout,
        }
    }

    fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
            "-p".to_string(),
            self.host.port.to_string(),
        ];
        if let Some(key_path) = &self.host.ssh_key_path {
            args.push("-i".to_string());
            args.push(key_path.clone());
        }
        args.push(format!("{}@{}", self.host.username, self.host.hostname));
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        debug!(host = %self.host.hostname, command, "executing remote command");

        let output = tokio::time::timeout(
            self.command_timeout,
            Command::new("ssh").args(self.ssh_args(command)).output(),
        )
        .await
        .map_err(|_| {
            Error::Remote(format!(
                "command timed out after {}s on {}: {}",
                self.command_timeout.as_secs(),
                self.host.hostname,
                command
            ))
        })?
        .map_err(|e| Error::Remote(format!("failed to spawn ssh: {}", e)))?;

        // 255 is the ssh client's own failure code (auth, unreachable, ...)
        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == 255 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Remote(format!(
                "ssh to {} failed: {}",
                self.host.hostname,
                stderr.trim()
            )));
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostConfig {
        HostConfig {
            name: "pve1".to_string(),
            hostname: "10.0.0.5".to_string(),
            port: 2222,
            username: "root".to_string(),
            ssh_key_path: Some("/etc/switchyard/id_ed25519".to_string()),
            password: None,
            description: None,
        }
    }

    #[test]
    fn test_ssh_args_include_identity_and_port() {
        let shell = SshShell::new(host(), Duration::from_secs(10), Duration::from_secs(30));
        let args = shell.ssh_args("ovs-vsctl show");
        assert!(args.contains(&"-p".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"/etc/switchyard/id_ed25519".to_string()));
        assert!(args.contains(&"root@10.0.0.5".to_string()));
        assert_eq!(args.last().unwrap(), "ovs-vsctl show");
    }

    #[test]
    fn test_ssh_args_without_key_use_defaults() {
        let mut config = host();
        config.ssh_key_path = None;
        let shell = SshShell::new(config, Duration::from_secs(10), Duration::from_secs(30));
        let args = shell.ssh_args("true");
        assert!(!args.contains(&"-i".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
    }
}
