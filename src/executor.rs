use crate::config::RemoteConfig;
use crate::error::TransportError;
use crate::types::ExecOutput;
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};
use wait_timeout::ChildExt;

/// ssh reserves this status for its own failures.
const SSH_ERROR_STATUS: i32 = 255;

/// Runs one shell command somewhere and reports how it ended.
///
/// A nonzero exit code is a normal [`ExecOutput`]; `Err` means the command
/// could not be run or did not finish.
pub trait Executor {
    fn run(&self, command: &str) -> Result<ExecOutput, TransportError>;

    /// Where commands run, for display.
    fn target(&self) -> String;
}

impl<T: Executor + ?Sized> Executor for Box<T> {
    fn run(&self, command: &str) -> Result<ExecOutput, TransportError> {
        (**self).run(command)
    }

    fn target(&self) -> String {
        (**self).target()
    }
}

pub struct SshExecutor {
    program: String,
    user: String,
    host: String,
    port: u16,
    connect_timeout_secs: u64,
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            program: config.ssh_program.clone(),
            user: config.user.clone(),
            host: config.host.clone(),
            port: config.port,
            connect_timeout_secs: config.connect_timeout_secs,
            timeout: config.command_timeout(),
        }
    }

    /// Exit status 255 is ssh failing, not the remote command.
    pub(crate) fn check_connection(
        &self,
        output: ExecOutput,
    ) -> Result<ExecOutput, TransportError> {
        if output.exit_code == SSH_ERROR_STATUS {
            return Err(TransportError::Connection {
                target: self.target(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// `ssh` invocation for `remote_command`, non-interactive.
    pub(crate) fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
            .arg("-p")
            .arg(self.port.to_string())
            .arg(self.target())
            .arg("--")
            .arg(remote_command);
        cmd
    }
}

impl Executor for SshExecutor {
    fn run(&self, command: &str) -> Result<ExecOutput, TransportError> {
        info!(host = %self.target(), command, "running remote command");
        let output = run_process(self.command(command), None, self.timeout)?;
        self.check_connection(output)
    }

    fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

pub struct LocalExecutor {
    timeout: Duration,
}

impl LocalExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Executor for LocalExecutor {
    fn run(&self, command: &str) -> Result<ExecOutput, TransportError> {
        info!(command, "running local command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        run_process(cmd, None, self.timeout)
    }

    fn target(&self) -> String {
        "local".to_string()
    }
}

pub fn from_config(config: &RemoteConfig) -> Box<dyn Executor> {
    if config.local {
        Box::new(LocalExecutor::new(config.command_timeout()))
    } else {
        Box::new(SshExecutor::new(config))
    }
}

/// Spawns `cmd`, feeds it `stdin`, and waits at most `timeout`.
///
/// Pipes are drained on their own threads so a chatty child cannot block on a
/// full pipe while we wait for it.
pub(crate) fn run_process(
    mut cmd: Command,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<ExecOutput, TransportError> {
    let program = cmd.get_program().to_string_lossy().to_string();
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|source| TransportError::Spawn { program, source })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // Dropping the pipe afterwards closes the child's stdin.
        match pipe.write_all(input.as_bytes()) {
            Ok(()) => {}
            // The child quit without reading; its status and stderr say why.
            Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                debug!("child closed stdin early");
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TransportError::Io(err));
            }
        }
    }

    // On timeout the reader threads are left to finish on their own; a
    // grandchild may still hold the pipes open.
    let status = wait(&mut child, timeout)?;

    let output = ExecOutput {
        stdout: join(stdout),
        stderr: join(stderr),
        exit_code: status.code().unwrap_or(-1),
    };
    debug!(exit_code = output.exit_code, "process finished");
    Ok(output)
}

fn wait(child: &mut Child, timeout: Duration) -> Result<std::process::ExitStatus, TransportError> {
    match child.wait_timeout(timeout) {
        Ok(Some(status)) => Ok(status),
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(TransportError::Timeout(timeout))
        }
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(TransportError::Io(err))
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn join(handle: JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Keeps the first and last halves of `text` when it has more than
/// `max_lines` lines.
pub fn truncate_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if max_lines == 0 || lines.len() <= max_lines {
        return text.to_string();
    }

    let head = max_lines / 2;
    let tail = max_lines - head;
    let mut truncated: Vec<String> = lines[..head].iter().map(|l| l.to_string()).collect();
    truncated.push(format!(
        "... [{} lines truncated] ...",
        lines.len() - max_lines
    ));
    truncated.extend(lines[lines.len() - tail..].iter().map(|l| l.to_string()));
    let mut out = truncated.join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[cfg(all(test, unix))]
pub(crate) mod testutil {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Writes an executable `sh` script standing in for ssh.
    pub(crate) fn fake_program(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_command_is_non_interactive() {
        let config = RemoteConfig {
            host: "nas.lan".to_string(),
            user: "admin".to_string(),
            port: 2222,
            connect_timeout_secs: 5,
            ..RemoteConfig::default()
        };
        let executor = SshExecutor::new(&config);
        let cmd = executor.command("uptime");
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        assert_eq!(cmd.get_program(), "ssh");
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=5",
                "-p",
                "2222",
                "admin@nas.lan",
                "--",
                "uptime"
            ]
        );
        assert_eq!(executor.target(), "admin@nas.lan");
    }

    #[cfg(unix)]
    fn fake_ssh(dir: &tempfile::TempDir, body: &str) -> SshExecutor {
        let config = RemoteConfig {
            host: "nas.lan".to_string(),
            user: "admin".to_string(),
            ssh_program: testutil::fake_program(dir.path(), "ssh", body),
            command_timeout_secs: 10,
            ..RemoteConfig::default()
        };
        SshExecutor::new(&config)
    }

    #[cfg(unix)]
    #[test]
    fn ssh_failure_status_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = fake_ssh(
            &dir,
            "echo 'ssh: connect to host nas.lan port 22: Connection refused' >&2; exit 255",
        );
        match executor.run("uptime").unwrap_err() {
            TransportError::Connection { target, stderr } => {
                assert_eq!(target, "admin@nas.lan");
                assert!(stderr.ends_with("Connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn remote_exit_status_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let executor = fake_ssh(&dir, "echo \"$@\"; exit 3");
        let output = executor.run("systemctl is-active docker").unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(output.stdout.starts_with("-o BatchMode=yes"));
        assert!(output
            .stdout
            .ends_with("admin@nas.lan -- systemctl is-active docker\n"));
    }

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(truncate_lines("a\nb\n", 10), "a\nb\n");
        assert_eq!(truncate_lines("a\nb\nc", 0), "a\nb\nc");
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let text: String = (1..=10).map(|n| format!("line {n}\n")).collect();
        let truncated = truncate_lines(&text, 4);
        assert_eq!(
            truncated,
            "line 1\nline 2\n... [6 lines truncated] ...\nline 9\nline 10\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn local_command_reports_output_and_status() {
        let executor = LocalExecutor::new(Duration::from_secs(10));
        let output = executor.run("printf 'out'; printf 'err' >&2").unwrap();
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
        assert!(output.succeeded());
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_not_an_error() {
        let executor = LocalExecutor::new(Duration::from_secs(10));
        let output = executor.run("echo missing >&2; exit 3").unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr, "missing\n");
    }

    #[cfg(unix)]
    #[test]
    fn large_output_does_not_deadlock() {
        let executor = LocalExecutor::new(Duration::from_secs(20));
        let output = executor.run("seq 1 200000").unwrap();
        assert_eq!(output.stdout.lines().count(), 200000);
    }

    #[cfg(unix)]
    #[test]
    fn stdin_is_forwarded() {
        let mut cmd = Command::new("cat");
        cmd.arg("-");
        let output = run_process(cmd, Some("prompt text"), Duration::from_secs(10)).unwrap();
        assert_eq!(output.stdout, "prompt text");
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_times_out() {
        let executor = LocalExecutor::new(Duration::from_millis(200));
        let err = executor.run("sleep 5").unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[test]
    fn missing_program_is_a_transport_error() {
        let cmd = Command::new("rex-definitely-not-a-program");
        let err = run_process(cmd, None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }
}
