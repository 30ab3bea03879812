use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use ontapexec_traits::config::Config;
use ontapexec_traits::tunnel::{
    DEFAULT_REMOTE_PORT, TunnelError, TunnelHandle, TunnelRequest, TunnelService,
};

mod probe;

pub use probe::PortProber;

/// The tunnel CLI prints nothing reliable once it is listening, so `start`
/// resolves after this delay and leaves readiness to the port prober.
pub const TUNNEL_WARM_UP: Duration = Duration::from_secs(3);

/// Upper bound on reaping a killed tunnel process.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Arguments for `aws ec2-instance-connect open-tunnel`.
pub fn build_tunnel_args(request: &TunnelRequest) -> Vec<String> {
    let mut args = vec![
        "ec2-instance-connect".to_string(),
        "open-tunnel".to_string(),
        "--instance-connect-endpoint-id".to_string(),
        request.endpoint_id.clone(),
        "--private-ip-address".to_string(),
        request.private_ip_address.clone(),
        "--local-port".to_string(),
        request.local_port.to_string(),
    ];
    if request.remote_port != DEFAULT_REMOTE_PORT {
        args.push("--remote-port".to_string());
        args.push(request.remote_port.to_string());
    }
    if let Some(profile) = &request.aws.profile {
        args.push("--profile".to_string());
        args.push(profile.clone());
    }
    if let Some(region) = &request.aws.region {
        args.push("--region".to_string());
        args.push(region.clone());
    }
    args
}

/// Forwards the tunnel's output to the log until its pipes close.
fn forward_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[tunnel] {}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let mut lines = BufReader::new(stderr).lines();
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("[tunnel] {}", line);
            }
        });
    }
}

/// Runs the EC2 Instance Connect tunnel as a child process of the AWS CLI.
pub struct InstanceConnectTunnel {
    program: String,
    warm_up: Duration,
}

impl InstanceConnectTunnel {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.aws_cli.clone().unwrap_or_else(|| "aws".to_string()),
            warm_up: TUNNEL_WARM_UP,
        }
    }

    #[cfg(test)]
    fn with_program(program: impl Into<String>, warm_up: Duration) -> Self {
        Self {
            program: program.into(),
            warm_up,
        }
    }
}

#[async_trait]
impl TunnelService for InstanceConnectTunnel {
    async fn start(&self, request: &TunnelRequest) -> Result<TunnelHandle, TunnelError> {
        let args = build_tunnel_args(request);

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            "Opening tunnel to {} via {} on local port {}",
            request.private_ip_address, request.endpoint_id, request.local_port
        );
        debug!("Spawning tunnel command: {} {}", self.program, args.join(" "));

        let mut child = cmd.spawn().map_err(|source| TunnelError::SpawnFailed {
            program: self.program.clone(),
            source,
        })?;
        forward_output(&mut child);

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = sleep(self.warm_up) => None,
        };

        match exited {
            None => Ok(TunnelHandle::new(request.local_port, child)),
            Some(Ok(status)) => Err(TunnelError::ExitedEarly(status.to_string())),
            Some(Err(source)) => Err(TunnelError::SpawnFailed {
                program: self.program.clone(),
                source,
            }),
        }
    }

    async fn stop(&self, handle: &mut TunnelHandle) {
        let Some(mut child) = handle.take_child() else {
            return;
        };
        let pid = child.id();

        if let Err(e) = child.start_kill() {
            debug!(?pid, error = %e, "Tunnel process was already gone");
        }

        match timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => info!(?pid, "Tunnel closed ({})", status),
            Ok(Err(e)) => warn!(?pid, error = %e, "Failed to reap tunnel process"),
            Err(_) => warn!(?pid, "Tunnel process did not exit after kill"),
        }
    }
}
