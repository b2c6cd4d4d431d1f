use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::warn;

use super::{ShellCommand, TransportOutcome};

/// Grace period on top of the command timeout before the client is killed.
const DEADLINE_GRACE_SECS: u64 = 15;
/// Upper bound on the TCP connect phase.
const MAX_CONNECT_TIMEOUT_SECS: u64 = 10;
/// `ssh` reports its own failures (connect, auth, protocol) with this code.
const SSH_CLIENT_ERROR: i32 = 255;
/// `sshpass` exit code for a rejected password.
const SSHPASS_BAD_PASSWORD: i32 = 5;

#[derive(Debug, Clone)]
pub(super) struct SshPrograms {
    pub ssh: String,
    pub sshpass: String,
}

impl Default for SshPrograms {
    fn default() -> Self {
        Self {
            ssh: "ssh".into(),
            sshpass: "sshpass".into(),
        }
    }
}

pub(super) async fn run_shell(programs: &SshPrograms, shell: &ShellCommand) -> Result<TransportOutcome> {
    let identity = match shell.private_key.as_deref().filter(|key| !key.trim().is_empty()) {
        Some(key) => Some(write_identity(key)?),
        None => None,
    };
    let uses_password = identity.is_none();

    let mut command = if uses_password {
        let mut command = Command::new(&programs.sshpass);
        command.arg("-e").arg(&programs.ssh).env("SSHPASS", &shell.password);
        command
    } else {
        Command::new(&programs.ssh)
    };
    command.args(ssh_args(shell, identity.as_ref().map(|file| file.path().to_string_lossy().to_string())));
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(error) => return Ok(TransportOutcome::failed(format!("Connection error: {error}"))),
    };

    let deadline = Duration::from_secs(shell.timeout_secs + DEADLINE_GRACE_SECS);
    match tokio::time::timeout(deadline, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(classify_exit(
            output.status.code(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            uses_password,
        )),
        Ok(Err(error)) => Ok(TransportOutcome::failed(format!("Connection error: {error}"))),
        Err(_) => {
            warn!(host = %shell.host, timeout = shell.timeout_secs, "ssh command exceeded its deadline");
            Ok(timed_out(shell.timeout_secs))
        }
    }
}

fn write_identity(key: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new().context("create ssh identity file")?;
    let mut pem = key.trim().to_string();
    pem.push('\n');
    file.write_all(pem.as_bytes()).context("write ssh identity file")?;
    file.flush().context("flush ssh identity file")?;
    Ok(file)
}

fn ssh_args(shell: &ShellCommand, identity_path: Option<String>) -> Vec<String> {
    let connect_timeout = shell.timeout_secs.clamp(1, MAX_CONNECT_TIMEOUT_SECS);
    let mut args = vec![
        "-p".to_string(),
        shell.port.to_string(),
        "-o".into(),
        "StrictHostKeyChecking=no".into(),
        "-o".into(),
        "UserKnownHostsFile=/dev/null".into(),
        "-o".into(),
        "LogLevel=ERROR".into(),
        "-o".into(),
        format!("ConnectTimeout={connect_timeout}"),
    ];
    match identity_path {
        Some(path) => args.extend([
            "-i".into(),
            path,
            "-o".into(),
            "IdentitiesOnly=yes".into(),
            "-o".into(),
            "BatchMode=yes".into(),
        ]),
        None => args.extend([
            "-o".into(),
            "PubkeyAuthentication=no".into(),
            "-o".into(),
            "PreferredAuthentications=password,keyboard-interactive".into(),
        ]),
    }
    args.push(format!("{}@{}", shell.username, shell.host));
    args.push("--".into());
    args.push(shell.command.clone());
    args
}

/// Map a finished client process to an outcome.
fn classify_exit(code: Option<i32>, stdout: &str, stderr: &str, uses_password: bool) -> TransportOutcome {
    let code = code.unwrap_or(-1);
    let stderr_trimmed = stderr.trim();

    if uses_password && code == SSHPASS_BAD_PASSWORD {
        return TransportOutcome::failed("Authentication failed");
    }
    if code == SSH_CLIENT_ERROR && stdout.is_empty() {
        if stderr_trimmed.contains("Permission denied") {
            return TransportOutcome::failed("Authentication failed");
        }
        return TransportOutcome::failed(format!("SSH error: {stderr_trimmed}"));
    }

    let mut output = stdout.to_string();
    if !stderr.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str("STDERR: ");
        output.push_str(stderr);
    }
    TransportOutcome {
        output,
        error: (!stderr.is_empty()).then(|| stderr.to_string()),
        exit_status: code,
        success: code == 0,
    }
}

fn timed_out(timeout_secs: u64) -> TransportOutcome {
    TransportOutcome {
        output: format!("Command timed out after {timeout_secs}s. The remote command may still be running."),
        error: Some("Timeout".into()),
        exit_status: -1,
        success: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(private_key: Option<&str>) -> ShellCommand {
        ShellCommand {
            host: "10.0.0.5".into(),
            port: 22,
            username: "admin".into(),
            password: "secret".into(),
            private_key: private_key.map(str::to_string),
            command: "tmsh show sys version".into(),
            timeout_secs: 30,
        }
    }

    #[test]
    fn stderr_is_merged_into_output() {
        let outcome = classify_exit(Some(1), "partial\n", "boom", true);
        assert_eq!(outcome.output, "partial\n\nSTDERR: boom");
        assert_eq!(outcome.error.as_deref(), Some("boom"));
        assert_eq!(outcome.exit_status, 1);
        assert!(!outcome.success);
    }

    #[test]
    fn clean_exit_succeeds() {
        let outcome = classify_exit(Some(0), "ok", "", false);
        assert!(outcome.success);
        assert_eq!(outcome.output, "ok");
        assert_eq!(outcome.error, None);
    }

    #[test]
    fn client_failures_are_classified() {
        let denied = classify_exit(Some(255), "", "admin@10.0.0.5: Permission denied (publickey).", false);
        assert_eq!(denied.error.as_deref(), Some("Authentication failed"));

        let refused = classify_exit(Some(255), "", "ssh: connect to host 10.0.0.5 port 22: Connection refused\n", false);
        assert_eq!(
            refused.error.as_deref(),
            Some("SSH error: ssh: connect to host 10.0.0.5 port 22: Connection refused")
        );

        let bad_password = classify_exit(Some(5), "", "", true);
        assert_eq!(bad_password.error.as_deref(), Some("Authentication failed"));
    }

    #[test]
    fn timeout_message_names_the_limit() {
        let outcome = timed_out(45);
        assert_eq!(outcome.output, "Command timed out after 45s. The remote command may still be running.");
        assert_eq!(outcome.error.as_deref(), Some("Timeout"));
    }

    #[test]
    fn key_auth_uses_batch_mode() {
        let args = ssh_args(&shell(Some("KEY")), Some("/tmp/id".into()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"/tmp/id".to_string()));
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args.last().map(String::as_str), Some("tmsh show sys version"));

        let password_args = ssh_args(&shell(None), None);
        assert!(password_args.contains(&"PubkeyAuthentication=no".to_string()));
        assert!(password_args.contains(&"admin@10.0.0.5".to_string()));
    }

    #[tokio::test]
    async fn missing_client_binary_is_a_connection_error() {
        let programs = SshPrograms {
            ssh: "/nonexistent/opschain-ssh".into(),
            sshpass: "/nonexistent/opschain-sshpass".into(),
        };
        let outcome = run_shell(&programs, &shell(None)).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("Connection error:"));
    }
}
