//! # Command Bodies / 命令主体
//!
//! Declarative suite files describe tests and hooks as shell-style command
//! lines. This module turns such a line into a future-style [`Body`]: the
//! line is environment-expanded, split into words, spawned without a shell,
//! and fails the runnable with its captured output on a non-zero exit.
//!
//! 声明式套件文件将测试和钩子描述为 shell 风格的命令行。本模块将这样的命令行
//! 转换为 future 风格的 [`Body`]：展开环境变量、拆分单词、不经过 shell 直接派生，
//! 非零退出时以捕获的输出使 runnable 失败。

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use rust_i18n::t;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::runnable::Body;

/// Exit status and interleaved stdout/stderr of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub output: String,
}

/// Expands `~` and `$VARS`, then splits the line into program and arguments.
pub fn parse_command_line(line: &str) -> Result<Vec<String>> {
    let expanded = shellexpand::full(line)
        .with_context(|| t!("command.expand_failed", command = line).to_string())?
        .to_string();
    let parts = shlex::split(&expanded)
        .ok_or_else(|| anyhow!(t!("command.parse_failed", command = expanded).to_string()))?;
    if parts.is_empty() {
        return Err(anyhow!(t!("command.empty").to_string()));
    }
    Ok(parts)
}

/// Runs a command line to completion in `cwd`.
pub async fn run_command(line: &str, cwd: &Path) -> Result<CommandOutput> {
    let parts = parse_command_line(line)?;
    let mut cmd = tokio::process::Command::new(&parts[0]);
    cmd.args(&parts[1..]).kill_on_drop(true).current_dir(cwd);
    tracing::debug!(command = line, cwd = %cwd.display(), "spawning");

    let (status, output) = spawn_and_capture(cmd).await;
    let status = status.with_context(|| t!("command.spawn_failed", command = line).to_string())?;
    Ok(CommandOutput { status, output })
}

/// A body that runs `line` and fails when it exits unsuccessfully.
pub fn command_body(line: impl Into<String>, cwd: impl Into<PathBuf>) -> Body {
    let line: Arc<str> = Arc::from(line.into());
    let cwd: Arc<Path> = Arc::from(cwd.into());
    Body::future(move |_ctx| {
        let line = line.clone();
        let cwd = cwd.clone();
        async move {
            let CommandOutput { status, output } = run_command(&line, &cwd).await?;
            if status.success() {
                return Ok(());
            }
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let mut message = t!("command.exit_failure", command = &*line, code = code).to_string();
            let output = output.trim();
            if !output.is_empty() {
                message.push('\n');
                message.push_str(output);
            }
            Err(anyhow!(message))
        }
    })
}

/// Spawns a command and captures stdout and stderr concurrently into one string.
///
/// 派生一个命令，并发捕获 stdout 和 stderr 到一个字符串中。
pub async fn spawn_and_capture(mut cmd: tokio::process::Command) -> (std::io::Result<ExitStatus>, String) {
    let mut child = match cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn() {
        Ok(child) => child,
        Err(e) => return (Err(e), String::new()),
    };

    let Some(stdout) = child.stdout.take() else {
        return (
            Err(std::io::Error::other(t!("command.capture_stdout_failed").to_string())),
            String::new(),
        );
    };
    let Some(stderr) = child.stderr.take() else {
        return (
            Err(std::io::Error::other(t!("command.capture_stderr_failed").to_string())),
            String::new(),
        );
    };

    let output = Arc::new(tokio::sync::Mutex::new(String::new()));

    let stdout_output = Arc::clone(&output);
    let stdout_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut output = stdout_output.lock().await;
            output.push_str(&line);
            output.push('\n');
        }
    });

    let stderr_output = Arc::clone(&output);
    let stderr_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut output = stderr_output.lock().await;
            output.push_str(&line);
            output.push('\n');
        }
    });

    let status = child.wait().await;

    // Drain both readers so no trailing output is lost.
    if let Err(e) = stdout_handle.await {
        tracing::warn!(error = %e, "stdout reader task failed");
    }
    if let Err(e) = stderr_handle.await {
        tracing::warn!(error = %e, "stderr reader task failed");
    }

    let captured = output.lock().await.clone();
    (status, captured)
}
