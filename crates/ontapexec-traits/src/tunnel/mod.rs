use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Child;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Failed to start tunnel process '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Tunnel process exited during warm-up with status: {0}")]
    ExitedEarly(String),
}

/// The AWS credential context the tunnel runs under. Passed explicitly so the
/// tunnel never reads a process-wide "current profile".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsProfile {
    pub profile: Option<String>,
    pub region: Option<String>,
}

/// What to forward: `localhost:local_port` to `private_ip_address:remote_port`
/// through an EC2 Instance Connect endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub endpoint_id: String,
    pub private_ip_address: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub aws: AwsProfile,
}

/// A handle to a running tunnel subprocess and the local port it occupies.
pub struct TunnelHandle {
    pub local_port: u16,
    child: Option<Child>,
}

impl TunnelHandle {
    pub fn new(local_port: u16, child: Child) -> Self {
        Self {
            local_port,
            child: Some(child),
        }
    }

    /// A handle that owns no process, for transports that forward in-process.
    pub fn detached(local_port: u16) -> Self {
        Self {
            local_port,
            child: None,
        }
    }

    /// Takes the process out of the handle; later calls return `None`.
    pub fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }
}

/// The `TunnelService` trait defines the contract for the forwarding subprocess.
/// The port `open-tunnel` forwards to when `--remote-port` is omitted.
pub const DEFAULT_REMOTE_PORT: u16 = 22;

#[async_trait]
pub trait TunnelService: Send + Sync {
    async fn start(&self, request: &TunnelRequest) -> Result<TunnelHandle, TunnelError>;
    /// Force-kills the tunnel. Safe to call more than once and never fails.
    async fn stop(&self, handle: &mut TunnelHandle);
}
