use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use russh::ChannelMsg;
use russh::client::{self, Handle, Handler};
use russh::keys::PublicKey;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use ontapexec_traits::batch::{CommandResult, TRANSPORT_FAILURE_EXIT_CODE};
use ontapexec_traits::session::{ConnectRequest, SessionError, SessionService};

/// Upper bound on the disconnect handshake when closing a session.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Management endpoints are reached by private IP or through a tunnel on
/// localhost, where no stable known_hosts entry exists. Keys are accepted and
/// logged.
struct AcceptingHandler {
    host: String,
}

impl Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(host = %self.host, algorithm = ?server_public_key.algorithm(), "Accepting server host key");
        Ok(true)
    }
}

/// An authenticated connection to a management endpoint.
pub struct SshSession {
    handle: Handle<AcceptingHandler>,
    host: String,
    port: u16,
}

impl SshSession {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Accumulates what a command channel reports until it closes.
#[derive(Default)]
struct OutputCollector {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    signal: Option<String>,
}

impl OutputCollector {
    fn push(&mut self, msg: ChannelMsg) {
        match msg {
            ChannelMsg::Data { data } => self.stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext } if ext == 1 => {
                self.stderr.extend_from_slice(&data)
            }
            ChannelMsg::ExitStatus { exit_status } => self.exit_status = Some(exit_status),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                self.signal = Some(format!("{:?}", signal_name))
            }
            _ => {}
        }
    }

    /// Builds the row once the channel is closed. A channel that closes
    /// without an exit status lost its stream and gets the sentinel code.
    fn finish(self, command: &str) -> CommandResult {
        let output = String::from_utf8_lossy(&self.stdout);
        let error = String::from_utf8_lossy(&self.stderr);

        match self.exit_status {
            Some(status) => {
                let code = i32::try_from(status).unwrap_or(TRANSPORT_FAILURE_EXIT_CODE);
                CommandResult::from_exit(command, code, &output, &error)
            }
            None => {
                let reason = match self.signal {
                    Some(signal) => format!("terminated by signal {}", signal),
                    None => "channel closed without an exit status".to_string(),
                };
                let mut message = format!("Stream error: {}", reason);
                if !error.trim().is_empty() {
                    message.push('\n');
                    message.push_str(error.trim());
                }
                CommandResult::from_exit(command, TRANSPORT_FAILURE_EXIT_CODE, &output, &message)
            }
        }
    }
}

/// Password-authenticated SSH client built on russh.
#[derive(Debug, Clone, Default)]
pub struct RusshSessionClient;

impl RusshSessionClient {
    pub fn new() -> Self {
        Self
    }

    async fn establish(request: &ConnectRequest) -> Result<Handle<AcceptingHandler>, SessionError> {
        let failure = |reason: String| SessionError::AuthenticationOrNetworkFailure {
            host: request.host.clone(),
            port: request.port,
            reason,
        };

        let config = Arc::new(client::Config::default());
        let handler = AcceptingHandler {
            host: request.host.clone(),
        };

        let mut handle = client::connect(config, (request.host.as_str(), request.port), handler)
            .await
            .map_err(|e| failure(e.to_string()))?;

        let auth = handle
            .authenticate_password(&request.username, request.password.as_str())
            .await
            .map_err(|e| failure(format!("authentication error: {}", e)))?;

        if !auth.success() {
            return Err(failure(format!(
                "authentication rejected for user '{}'",
                request.username
            )));
        }
        Ok(handle)
    }
}

#[async_trait]
impl SessionService for RusshSessionClient {
    type Session = SshSession;

    async fn connect(&self, request: &ConnectRequest) -> Result<SshSession, SessionError> {
        debug!(host = %request.host, port = request.port, user = %request.username, "Opening SSH session");

        let handle = timeout(request.timeout, Self::establish(request))
            .await
            .map_err(|_| SessionError::AuthenticationOrNetworkFailure {
                host: request.host.clone(),
                port: request.port,
                reason: format!("timed out after {}ms", request.timeout.as_millis()),
            })??;

        info!("SSH session ready on {}:{}", request.host, request.port);
        Ok(SshSession {
            handle,
            host: request.host.clone(),
            port: request.port,
        })
    }

    async fn exec(&self, session: &SshSession, command: &str) -> Result<CommandResult, SessionError> {
        let mut channel = session
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SessionError::ExecFailed(format!("failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SessionError::ExecFailed(format!("failed to execute command: {}", e)))?;

        let mut collector = OutputCollector::default();
        while let Some(msg) = channel.wait().await {
            collector.push(msg);
        }

        let result = collector.finish(command);
        debug!(command, exit_code = result.exit_code, endpoint = %session.endpoint(), "Command finished");
        Ok(result)
    }

    async fn close(&self, session: SshSession) {
        let endpoint = session.endpoint();
        match timeout(
            CLOSE_TIMEOUT,
            session
                .handle
                .disconnect(russh::Disconnect::ByApplication, "", "en"),
        )
        .await
        {
            Ok(Ok(())) => debug!(%endpoint, "SSH session closed"),
            Ok(Err(e)) => warn!(%endpoint, error = %e, "Error while closing SSH session"),
            Err(_) => warn!(%endpoint, "Timeout closing SSH session, dropping it"),
        }
    }
}
