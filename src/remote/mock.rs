//! In-process test doubles for the remote transport.
//!
//! `DirTransport` maps remote paths into a local directory and understands
//! just enough shell to emulate `mkdir -p`, `rm -f` and a stage invocation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::transport::{CommandOutput, Connector, RemoteTransport};
use crate::plan::SshSettings;

/// Directory-backed transport.
#[derive(Clone)]
pub struct DirTransport {
    root: PathBuf,
    commands: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
    stage_time: f64,
    fail_commands: Option<String>,
    fail_puts: Option<String>,
    exec_delay: Option<(String, Duration)>,
}

impl DirTransport {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            commands: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
            stage_time: 5.0,
            fail_commands: None,
            fail_puts: None,
            exec_delay: None,
        }
    }

    /// Compute time written to the timing file by emulated stages.
    pub fn with_stage_time(mut self, seconds: f64) -> Self {
        self.stage_time = seconds;
        self
    }

    /// Commands containing `needle` exit with code 1.
    pub fn fail_commands_containing(mut self, needle: &str) -> Self {
        self.fail_commands = Some(needle.to_string());
        self
    }

    /// Uploads to remote paths containing `needle` fail.
    pub fn fail_puts_containing(mut self, needle: &str) -> Self {
        self.fail_puts = Some(needle.to_string());
        self
    }

    /// Commands containing `needle` sleep for `delay` before running.
    pub fn with_exec_delay(mut self, needle: &str, delay: Duration) -> Self {
        self.exec_delay = Some((needle.to_string(), delay));
        self
    }

    pub fn command_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.commands)
    }

    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }

    pub fn local_path(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }

    fn arg_after<'a>(tokens: &[&'a str], flag: &str) -> Option<&'a str> {
        tokens
            .iter()
            .position(|t| *t == flag)
            .and_then(|i| tokens.get(i + 1).copied())
    }

    fn emulate(&self, command: &str) -> io::Result<()> {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        let cwd = Self::arg_after(&tokens, "cd")
            .map(|d| self.local_path(d))
            .unwrap_or_else(|| self.root.clone());

        if let Some(dir) = Self::arg_after(&tokens, "-p") {
            fs::create_dir_all(self.local_path(dir))?;
        }
        if let Some(file) = Self::arg_after(&tokens, "-f") {
            let _ = fs::remove_file(self.local_path(file));
        }
        if let (Some(task), Some(input), Some(output), Some(timing)) = (
            Self::arg_after(&tokens, "--task"),
            Self::arg_after(&tokens, "--input"),
            Self::arg_after(&tokens, "--output"),
            Self::arg_after(&tokens, "--timing-output"),
        ) {
            let input = fs::read(cwd.join(input))?;
            let mut produced = format!("remote:{task}:").into_bytes();
            produced.extend(input);
            fs::write(cwd.join(output), produced)?;
            fs::write(
                cwd.join(timing),
                format!(r#"{{"time": {}, "task": "{}"}}"#, self.stage_time, task),
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTransport for DirTransport {
    async fn exec(&self, command: &str) -> io::Result<CommandOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        if let Some((needle, delay)) = &self.exec_delay {
            if command.contains(needle.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
        if let Some(needle) = &self.fail_commands {
            if command.contains(needle.as_str()) {
                return Ok(CommandOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: format!("{needle}: command failed"),
                });
            }
        }
        match self.emulate(command) {
            Ok(()) => Ok(CommandOutput::default()),
            Err(e) => Ok(CommandOutput {
                exit_code: 2,
                stdout: String::new(),
                stderr: e.to_string(),
            }),
        }
    }

    async fn put(&self, local: &Path, remote: &str) -> io::Result<u64> {
        if let Some(needle) = &self.fail_puts {
            if remote.contains(needle.as_str()) {
                return Err(io::Error::new(io::ErrorKind::AlreadyExists, "file exists"));
            }
        }
        let dest = self.local_path(remote);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, dest)
    }

    async fn get(&self, remote: &str, local: &Path) -> io::Result<u64> {
        fs::copy(self.local_path(remote), local)
    }

    async fn close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector that fails a fixed number of attempts, then hands out clones
/// of one `DirTransport`.
pub struct MockConnector {
    transport: DirTransport,
    fail_first: usize,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new(transport: DirTransport) -> Self {
        Self::failing_first(0, transport)
    }

    pub fn failing_first(failures: usize, transport: DirTransport) -> Self {
        Self {
            transport,
            fail_first: failures,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn always_failing(transport: DirTransport) -> Self {
        Self::failing_first(usize::MAX, transport)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _settings: &SshSettings) -> io::Result<Box<dyn RemoteTransport>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_first {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("connection refused #{attempt}"),
            ));
        }
        Ok(Box::new(self.transport.clone()))
    }
}
