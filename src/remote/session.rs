//! Remote session: one authenticated connection per run.

use tracing::{debug, error, info, warn};

use super::transport::{shell_quote, CommandOutput, Connector, RemoteTransport};
use crate::error::PipelineError;
use crate::plan::SshSettings;

/// A live connection to the remote host.
///
/// Owned by the orchestrator and lent by reference to remote stage
/// executors. Must be released with [`RemoteSession::close`].
pub struct RemoteSession {
    transport: Box<dyn RemoteTransport>,
    target: String,
    profile_init: String,
    closed: bool,
}

impl RemoteSession {
    /// Connects with the retry policy from `settings`.
    ///
    /// Makes at most `connect_retries` attempts with `retry_delay_secs`
    /// between them. The returned `Connection` error carries the cause of the
    /// last attempt.
    pub async fn connect(
        connector: &dyn Connector,
        settings: &SshSettings,
    ) -> Result<Self, PipelineError> {
        let attempts = settings.connect_retries.max(1);
        let delay = settings.retry_delay();
        let target = settings.target();
        let mut last_cause = String::new();

        for attempt in 1..=attempts {
            debug!(host = %target, attempt, "Opening SSH connection");
            match connector.connect(settings).await {
                Ok(transport) => {
                    info!(host = %target, attempt, "SSH connection established");
                    return Ok(Self::from_transport(
                        transport,
                        target,
                        settings.profile_init.clone(),
                    ));
                }
                Err(e) => {
                    warn!(
                        host = %target,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "SSH connection attempt failed"
                    );
                    last_cause = e.to_string();
                    if attempt < attempts {
                        debug!("Retrying in {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        error!(host = %target, attempts, "Giving up on SSH connection");
        Err(PipelineError::Connection {
            host: target,
            attempts,
            cause: last_cause,
        })
    }

    /// Wraps an already-open transport.
    pub fn from_transport(
        transport: Box<dyn RemoteTransport>,
        target: impl Into<String>,
        profile_init: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            target: target.into(),
            profile_init: profile_init.into(),
            closed: false,
        }
    }

    /// `user@host:port` of the connection.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn transport(&self) -> &dyn RemoteTransport {
        self.transport.as_ref()
    }

    /// Builds the full shell line: `cd <dir> && <profile init> && <command>`.
    pub fn wrap_command(&self, command: &str, working_dir: Option<&str>) -> String {
        let mut line = if self.profile_init.trim().is_empty() {
            command.to_string()
        } else {
            format!("{} && {}", self.profile_init, command)
        };
        if let Some(dir) = working_dir {
            line = format!("cd {} && {}", shell_quote(dir), line);
        }
        line
    }

    /// Runs a command and waits for it. A non-zero exit is an error.
    pub async fn run(
        &self,
        command: &str,
        working_dir: Option<&str>,
    ) -> Result<CommandOutput, PipelineError> {
        let line = self.wrap_command(command, working_dir);
        debug!(host = %self.target, command = %line, "Running remote command");

        let output = self
            .transport
            .exec(&line)
            .await
            .map_err(|source| PipelineError::RemoteChannel {
                command: line.clone(),
                source,
            })?;

        if !output.is_success() {
            error!(
                host = %self.target,
                exit_code = output.exit_code,
                "Remote command failed:\n{}\nSTDOUT:\n{}\nSTDERR:\n{}",
                line,
                output.stdout,
                output.stderr
            );
            return Err(PipelineError::RemoteExecution {
                command: line,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Creates a remote directory and its parents. Idempotent.
    pub async fn ensure_directory(&self, path: &str) -> Result<(), PipelineError> {
        self.run(&format!("mkdir -p {}", shell_quote(path)), None)
            .await
            .map(|_| ())
    }

    /// Removes a remote file if it exists.
    pub async fn remove_file(&self, path: &str) -> Result<(), PipelineError> {
        self.run(&format!("rm -f {}", shell_quote(path)), None)
            .await
            .map(|_| ())
    }

    /// Closes the connection. Failures are logged, never raised.
    pub async fn close(mut self) {
        self.closed = true;
        match self.transport.close().await {
            Ok(()) => info!(host = %self.target, "SSH connection closed"),
            Err(e) => warn!(host = %self.target, error = %e, "Failed to close SSH connection cleanly"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Remote session {} was not closed properly", self.target);
        }
    }
}
