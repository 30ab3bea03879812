use std::fmt;
use serde::Serialize;
use zeroize::Zeroizing;

/// Exit code recorded when a command never produced one because the channel
/// or the protocol layer failed.
pub const TRANSPORT_FAILURE_EXIT_CODE: i32 = -1;

/// Exit code the ONTAP CLI uses for usage and syntax errors. Hosts driving an
/// automatic correction cycle treat it as "ask for a corrected command".
pub const ONTAP_SYNTAX_ERROR_EXIT_CODE: i32 = 255;

/// How the session reaches the management endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Direct,
    Tunneled,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Direct => write!(f, "direct"),
            Transport::Tunneled => write!(f, "EC2 Instance Connect"),
        }
    }
}

/// The storage cluster a batch runs against, as reported by the resource
/// listing collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub management_ip: String,
    pub file_system_id: Option<String>,
    pub dns_name: Option<String>,
    pub region: Option<String>,
}

impl TargetDescriptor {
    pub fn new(management_ip: impl Into<String>) -> Self {
        Self {
            management_ip: management_ip.into(),
            file_system_id: None,
            dns_name: None,
            region: None,
        }
    }

    /// Key under which a reusable connection context is stored for this target.
    pub fn cache_key(&self) -> Option<String> {
        match (&self.file_system_id, &self.region) {
            (Some(id), Some(region)) => Some(format!("sshKey-{}-{}", id, region)),
            _ => None,
        }
    }

    /// The management DNS name, derived from the file system id and region
    /// when the listing did not provide one.
    pub fn management_dns_name(&self) -> Option<String> {
        if let Some(name) = &self.dns_name {
            return Some(name.clone());
        }
        match (&self.file_system_id, &self.region) {
            (Some(id), Some(region)) => {
                Some(format!("management.{}.fsx.{}.amazonaws.com", id, region))
            }
            _ => None,
        }
    }
}

/// Transport and credential parameters for one target, reusable across
/// batches. An endpoint id selects the tunneled transport.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub username: String,
    pub password: Zeroizing<String>,
    pub instance_connect_endpoint_id: Option<String>,
    pub private_ip_address: String,
}

impl ConnectionContext {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        instance_connect_endpoint_id: Option<String>,
        private_ip_address: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            instance_connect_endpoint_id: instance_connect_endpoint_id
                .filter(|id| !id.trim().is_empty()),
            private_ip_address: private_ip_address.into(),
        }
    }

    pub fn transport(&self) -> Transport {
        match self.endpoint_id() {
            Some(_) => Transport::Tunneled,
            None => Transport::Direct,
        }
    }

    /// The endpoint id, ignoring blank values.
    pub fn endpoint_id(&self) -> Option<&str> {
        self.instance_connect_endpoint_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("instance_connect_endpoint_id", &self.instance_connect_endpoint_id)
            .field("private_ip_address", &self.private_ip_address)
            .finish()
    }
}

/// One row of a batch transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command: String,
    pub exit_code: i32,
    pub output: String,
    pub error: String,
    pub success: bool,
}

impl CommandResult {
    /// Builds a row from what the remote command produced. Output is trimmed
    /// and success is derived from the exit code alone.
    pub fn from_exit(command: &str, exit_code: i32, output: &str, error: &str) -> Self {
        Self {
            command: command.to_string(),
            exit_code,
            output: output.trim().to_string(),
            error: error.trim().to_string(),
            success: exit_code == 0,
        }
    }

    /// A row for a command whose submission failed before the remote side
    /// reported an exit status.
    pub fn transport_failure(command: &str, message: impl fmt::Display) -> Self {
        Self {
            command: command.to_string(),
            exit_code: TRANSPORT_FAILURE_EXIT_CODE,
            output: String::new(),
            error: format!("Command failed: {}\nError: {}", command, message),
            success: false,
        }
    }

    /// A row for a command skipped because the batch was cancelled first.
    pub fn cancelled(command: &str) -> Self {
        Self {
            command: command.to_string(),
            exit_code: TRANSPORT_FAILURE_EXIT_CODE,
            output: String::new(),
            error: "cancelled before execution".to_string(),
            success: false,
        }
    }
}

/// Everything one invocation produced: a row per submitted command and the
/// context that was actually used, so the caller can retry with it.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub results: Vec<CommandResult>,
    pub connection_context: ConnectionContext,
}

impl BatchResult {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CommandResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// Milestones an invocation reports while it runs.
#[derive(Debug)]
pub enum ProgressEvent<'a> {
    Connecting { host: &'a str, username: &'a str },
    Executing { command: &'a str },
    Completed { result: &'a CommandResult },
}

/// Receives progress for display. The engine never depends on what a sink
/// does with an event.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent<'_>);
}

/// A sink that drops every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent<'_>) {}
}
