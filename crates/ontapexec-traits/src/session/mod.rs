use std::fmt;
use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::batch::CommandResult;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("SSH connection to {host}:{port} failed: {reason}")]
    AuthenticationOrNetworkFailure {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("Failed to submit command: {0}")]
    ExecFailed(String),
}

/// Where and as whom to open a session.
#[derive(Clone)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Zeroizing<String>,
    pub timeout: Duration,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// The `SessionService` trait defines the contract for the secure shell client.
#[async_trait]
pub trait SessionService: Send + Sync {
    type Session: Send + Sync;

    async fn connect(&self, request: &ConnectRequest) -> Result<Self::Session, SessionError>;

    /// Runs one command to completion. A non-zero exit status is returned as
    /// data; only a failure to submit the command is an error.
    async fn exec(&self, session: &Self::Session, command: &str) -> Result<CommandResult, SessionError>;

    /// Ends the session. Never fails; problems are logged.
    async fn close(&self, session: Self::Session);
}
