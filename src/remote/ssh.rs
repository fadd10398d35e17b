//! libssh2-backed transport.
//!
//! libssh2 is blocking, so every call is moved onto tokio's blocking pool.
//! The session sits behind a mutex only to make it shareable with those
//! threads; the pipeline never issues two operations at once.

use std::fs::File;
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, TryLockError};

use async_trait::async_trait;
use ssh2::Session;
use tracing::{debug, warn};

use super::transport::{CommandOutput, Connector, RemoteTransport};
use crate::plan::SshSettings;

/// Opens [`SshTransport`]s with password or private-key authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, settings: &SshSettings) -> io::Result<Box<dyn RemoteTransport>> {
        let settings = settings.clone();
        let session = tokio::task::spawn_blocking(move || open_session(&settings))
            .await
            .map_err(io::Error::other)??;
        Ok(Box::new(SshTransport::new(session)))
    }
}

/// Connects TCP, performs the handshake, and authenticates.
fn open_session(settings: &SshSettings) -> io::Result<Session> {
    let timeout = settings.connect_timeout();
    let mut last_err = None;
    let tcp = (settings.host.as_str(), settings.port)
        .to_socket_addrs()?
        .find_map(|addr| match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => Some(stream),
            Err(e) => {
                debug!(addr = %addr, error = %e, "TCP connect failed");
                last_err = Some(e);
                None
            }
        })
        .ok_or_else(|| {
            last_err.unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {}", settings.host),
                )
            })
        })?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.handshake()?;
    authenticate(&session, settings)?;
    // Commands and transfers are unbounded once connected.
    session.set_timeout(0);
    Ok(session)
}

/// Tries the private key first, then the password.
fn authenticate(session: &Session, settings: &SshSettings) -> io::Result<()> {
    let credentials = settings.credentials();
    if credentials.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!(
                "no usable credentials for {}: key file missing and no password set",
                settings.target()
            ),
        ));
    }

    if let Some(key) = &credentials.key_path {
        match session.userauth_pubkey_file(&settings.username, None, key, None) {
            Ok(()) if session.authenticated() => return Ok(()),
            Ok(()) => debug!("Key authentication incomplete, falling back to password"),
            Err(e) => debug!(key = %key.display(), error = %e, "Key authentication rejected"),
        }
    }

    if let Some(password) = &credentials.password {
        session.userauth_password(&settings.username, password)?;
    }

    if session.authenticated() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("authentication failed for {}", settings.target()),
        ))
    }
}

/// Transport over one libssh2 session.
pub struct SshTransport {
    session: Arc<Mutex<Session>>,
}

impl SshTransport {
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Runs `f` against the session on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> io::Result<T> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let guard = session
                .lock()
                .map_err(|_| io::Error::other("ssh session lock poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(io::Error::other)?
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn exec(&self, command: &str) -> io::Result<CommandOutput> {
        let command = command.to_string();
        self.blocking(move |session| {
            let mut channel = session.channel_session()?;
            channel.exec(&command)?;

            let mut stdout = Vec::new();
            channel.read_to_end(&mut stdout)?;
            let mut stderr = Vec::new();
            channel.stderr().read_to_end(&mut stderr)?;

            channel.wait_close()?;
            let exit_code = channel.exit_status()?;
            Ok(CommandOutput {
                exit_code,
                stdout: String::from_utf8_lossy(&stdout).to_string(),
                stderr: String::from_utf8_lossy(&stderr).to_string(),
            })
        })
        .await
    }

    async fn put(&self, local: &Path, remote: &str) -> io::Result<u64> {
        let local = local.to_path_buf();
        let remote = PathBuf::from(remote);
        self.blocking(move |session| {
            let sftp = session.sftp()?;
            let mut source = File::open(&local)?;
            let mut dest = sftp.create(&remote)?;
            io::copy(&mut source, &mut dest)
        })
        .await
    }

    async fn get(&self, remote: &str, local: &Path) -> io::Result<u64> {
        let local = local.to_path_buf();
        let remote = PathBuf::from(remote);
        self.blocking(move |session| {
            let sftp = session.sftp()?;
            let mut source = sftp.open(&remote)?;
            let mut dest = File::create(&local)?;
            io::copy(&mut source, &mut dest)
        })
        .await
    }

    async fn close(&self) -> io::Result<()> {
        // A timed-out command may still hold the session on a blocking
        // thread; the socket goes away with the process in that case.
        let session = match self.session.try_lock() {
            Ok(session) => session,
            Err(TryLockError::WouldBlock) => {
                warn!("SSH session busy, skipping disconnect");
                return Ok(());
            }
            Err(TryLockError::Poisoned(_)) => {
                return Err(io::Error::other("ssh session lock poisoned"));
            }
        };
        session.disconnect(None, "pipeline finished", None)?;
        Ok(())
    }
}
