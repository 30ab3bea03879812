use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("No ephemeral port is available: {0}")]
    ResourceExhausted(#[source] std::io::Error),
    #[error("Port {port} not ready after {attempts} attempts")]
    TimeoutExceeded { port: u16, attempts: u32 },
}

/// Pacing of readiness probes against a local port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Upper bound on how long a single connection attempt may take.
    pub connect_timeout: Duration,
    /// Pause between two failed attempts.
    pub retry_interval: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Local port allocation and readiness polling for the tunneled transport.
#[async_trait]
pub trait PortService: Send + Sync {
    async fn acquire_ephemeral_port(&self) -> Result<u16, ProbeError>;
    async fn wait_until_reachable(&self, port: u16, max_attempts: u32) -> Result<(), ProbeError>;
}
