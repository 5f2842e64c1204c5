//! Shell command execution.
//!
//! Every build step is a shell line run through `bash -c`, optionally as
//! another user via `sudo -u <user> -E`. Commands go through the
//! [`ProcessRunner`] trait so tests can record them instead.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::{InstallError, Result};

/// A shell line to run, with its working directory and options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The shell line passed to `bash -c`
    pub line: String,
    pub cwd: Option<PathBuf>,
    /// Extra environment variables, set on top of the inherited ones
    pub env: Vec<(String, String)>,
    /// Run as this user through `sudo -u`
    pub user: Option<String>,
    /// Echo stdout lines as they arrive
    pub echo: bool,
}

impl CommandSpec {
    pub fn new(line: impl Into<String>) -> Self {
        CommandSpec {
            line: line.into(),
            cwd: None,
            env: Vec::new(),
            user: None,
            echo: false,
        }
    }

    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// argv actually executed.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(user) = &self.user {
            argv.extend(["sudo", "-u", user.as_str(), "-E"].map(str::to_string));
        }
        argv.extend(["bash".to_string(), "-c".to_string(), self.line.clone()]);
        argv
    }
}

/// Outcome of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub command: String,
    /// Exit code (0 = success, -1 when killed by a signal)
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Output of a command that was not executed (dry run).
    pub fn skipped(command: impl Into<String>) -> Self {
        CommandOutput {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }

    pub fn failed(&self) -> bool {
        !self.ok()
    }

    /// Turn a non-zero exit into [`InstallError::ProcessExecution`].
    pub fn check(self) -> Result<Self> {
        if self.ok() {
            return Ok(self);
        }
        Err(InstallError::ProcessExecution {
            command: self.command,
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

/// Runs shell lines.
#[async_trait]
pub trait ProcessRunner: Send + Sync + std::fmt::Debug {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands on the host with `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        ShellRunner
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let argv = spec.argv();
        debug!(command = %spec.line, cwd = ?spec.cwd, "spawning");

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let mut child = cmd.spawn()?;

        // Drain stderr concurrently so a chatty build can't fill the pipe.
        let stderr_task = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                pipe.read_to_end(&mut buf).await.map(|_| buf)
            })
        });

        let stdout = match child.stdout.take() {
            Some(pipe) => read_lines(pipe, spec.echo).await,
            None => Ok(String::new()),
        };
        if stdout.is_err() {
            let _ = child.start_kill();
        }
        // Reap the child before reporting a read error.
        let status = child.wait().await;
        let stdout = stdout?;
        let status = status?;
        let stderr = match stderr_task {
            Some(task) => {
                let bytes = task
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
                String::from_utf8_lossy(&bytes).to_string()
            }
            None => String::new(),
        };

        Ok(CommandOutput {
            command: argv.join(" "),
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

/// Collect `pipe` line by line, replacing invalid UTF-8.
async fn read_lines<R>(pipe: R, echo: bool) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut out = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(&['\n', '\r'][..]);
        if echo {
            println!("{line}");
        }
        out.push_str(line);
        out.push('\n');
    }
    Ok(out)
}

/// Quote a word for a POSIX shell line.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
