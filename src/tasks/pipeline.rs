use std::{process::Stdio, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
};
use tracing::{error, info};

use super::{TaskError, TaskSection, TaskStatus, TaskStore, TaskUpdate, percent, timestamp};

/// Command run through the platform shell (`sh -c` or `cmd /C`).
pub fn shell_command(command: &str) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };
    cmd.kill_on_drop(true);
    cmd
}

/// Runs an ordered list of shell commands, streaming their output into the
/// task store section.
#[derive(Clone)]
pub struct PipelineRunner {
    store: Arc<TaskStore>,
}

impl PipelineRunner {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    /// Run `commands` in order and stop at the first failure. Progress after
    /// command `i` of `n` is `i * 100 / n`; a full run ends in `success`.
    pub async fn run_sequence(
        &self,
        section: TaskSection,
        commands: &[String],
    ) -> Result<(), TaskError> {
        let total = commands.len();
        self.store.update(
            section,
            TaskUpdate::new().status(TaskStatus::Running).progress(0),
        );

        for (idx, command) in commands.iter().enumerate() {
            let step = idx + 1;
            self.store
                .append_log(section, format!("[{}] $ {}", timestamp(), command));
            info!("[{}] running step {}/{}: {}", section, step, total, command);

            let code = match self.run_streaming(section, command).await {
                Ok(code) => code,
                Err(e) => {
                    error!("[{}] execution error: {}", section, e);
                    self.store
                        .append_log(section, format!("execution error: {}", e));
                    self.store.update(
                        section,
                        TaskUpdate::new()
                            .status(TaskStatus::Error)
                            .message(e.to_string()),
                    );
                    return Err(e);
                }
            };

            if code != 0 {
                let message = format!("command failed with exit code {}", code);
                error!("[{}] {}", section, message);
                self.store.append_log(section, message.clone());
                self.store.update(
                    section,
                    TaskUpdate::new()
                        .status(TaskStatus::Error)
                        .message(message)
                        .progress(percent(step, total)),
                );
                return Err(TaskError::ProcessFailed {
                    command: command.clone(),
                    code,
                });
            }

            self.store
                .update(section, TaskUpdate::new().progress(percent(step, total)));
        }

        self.store.update(
            section,
            TaskUpdate::new()
                .status(TaskStatus::Success)
                .message("all commands completed")
                .progress(100),
        );
        info!("[{}] all {} commands completed", section, total);
        Ok(())
    }

    async fn run_streaming(&self, section: TaskSection, command: &str) -> Result<i32, TaskError> {
        let mut child = shell_command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (out, err) = tokio::join!(
            self.forward_lines(section, stdout),
            self.forward_lines(section, stderr)
        );
        out?;
        err?;

        let status = child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Append each non-empty line of `stream` to the log and mirror it into
    /// the section message. Output is decoded lossily.
    async fn forward_lines<R>(&self, section: TaskSection, stream: Option<R>) -> Result<(), TaskError>
    where
        R: AsyncRead + Unpin,
    {
        let Some(stream) = stream else {
            return Ok(());
        };

        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.store.append_log(section, line);
            self.store
                .update(section, TaskUpdate::new().message(line));
        }
    }
}
