//! Remote host access: session management and artifact staging.
//!
//! # Architecture
//!
//! ```text
//! Connector ──connect (retried)──► RemoteSession ──► RemoteTransport (ssh2)
//!                                       │
//!                                       └── ArtifactStager (timed put/get)
//! ```
//!
//! The session owns exactly one transport. Retrying is limited to
//! connection establishment; a failed command or transfer is final.

#[cfg(test)]
pub mod mock;
pub mod session;
pub mod ssh;
pub mod stager;
pub mod transport;

pub use session::RemoteSession;
pub use ssh::{SshConnector, SshTransport};
pub use stager::{ArtifactStager, TreeUpload};
pub use transport::{shell_quote, CommandOutput, Connector, RemoteTransport};
