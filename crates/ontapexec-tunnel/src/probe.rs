use std::net::Ipv4Addr;
use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::debug;

use ontapexec_traits::probe::{PortService, ProbeError, ProbeSettings};

/// Allocates loopback ports and waits for a tunnel to start accepting on them.
#[derive(Debug, Clone, Default)]
pub struct PortProber {
    settings: ProbeSettings,
}

impl PortProber {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PortService for PortProber {
    async fn acquire_ephemeral_port(&self) -> Result<u16, ProbeError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(ProbeError::ResourceExhausted)?;
        let port = listener
            .local_addr()
            .map_err(ProbeError::ResourceExhausted)?
            .port();
        drop(listener);

        debug!(port, "Allocated local port");
        Ok(port)
    }

    async fn wait_until_reachable(&self, port: u16, max_attempts: u32) -> Result<(), ProbeError> {
        let attempts = max_attempts.max(1);

        for attempt in 1..=attempts {
            match timeout(self.settings.connect_timeout, TcpStream::connect(("localhost", port))).await {
                Ok(Ok(_stream)) => {
                    debug!(port, attempt, "Port is accepting connections");
                    return Ok(());
                }
                Ok(Err(e)) => debug!(port, attempt, error = %e, "Port not ready"),
                Err(_) => debug!(port, attempt, "Port probe timed out"),
            }

            if attempt < attempts {
                sleep(self.settings.retry_interval).await;
            }
        }

        Err(ProbeError::TimeoutExceeded { port, attempts })
    }
}
