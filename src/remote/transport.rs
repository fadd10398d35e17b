//! Transport seam between the session logic and the SSH library.

use std::io;
use std::path::Path;

use async_trait::async_trait;

use crate::plan::SshSettings;

/// Captured result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One authenticated connection able to run commands and move files.
///
/// `put` and `get` each use their own transfer channel, overwrite the
/// destination, and return the number of bytes copied.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Runs a shell command to completion.
    async fn exec(&self, command: &str) -> io::Result<CommandOutput>;

    /// Copies a local file to a remote path.
    async fn put(&self, local: &Path, remote: &str) -> io::Result<u64>;

    /// Copies a remote file to a local path.
    async fn get(&self, remote: &str, local: &Path) -> io::Result<u64>;

    /// Tears the connection down.
    async fn close(&self) -> io::Result<()>;
}

/// Opens transports. One call is one connection attempt; retrying is the
/// session's job.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, settings: &SshSettings) -> io::Result<Box<dyn RemoteTransport>>;
}

/// Quotes a word for a POSIX shell.
///
/// Words made only of safe characters are returned unchanged so that a
/// leading `~` still expands.
pub fn shell_quote(word: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "_-./~=:@,+%".contains(c);
    if !word.is_empty() && word.chars().all(safe) {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
