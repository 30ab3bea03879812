use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info};

use ontapexec_traits::batch::ConnectionContext;
use ontapexec_traits::tunnel::{AwsProfile, DEFAULT_REMOTE_PORT};

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Failed to start SSH process: {0}")]
    ProcessError(#[from] std::io::Error),
}

/// What an interactive login needs beyond the connection context.
#[derive(Debug, Clone)]
pub struct ShellTarget {
    /// Host name presented to `ssh`; the management DNS name when known.
    pub host: String,
    pub port: u16,
    pub aws_cli: String,
    pub aws: AwsProfile,
}

/// Arguments for the system `ssh` client. Tunneled contexts route through an
/// `open-tunnel` ProxyCommand instead of a local port.
pub fn build_shell_args(target: &ShellTarget, context: &ConnectionContext) -> Vec<String> {
    let mut args = vec![format!("{}@{}", context.username, target.host)];

    if target.port != DEFAULT_REMOTE_PORT {
        args.push("-p".to_string());
        args.push(target.port.to_string());
    }

    if let Some(endpoint_id) = context.endpoint_id() {
        let mut proxy = format!(
            "{} ec2-instance-connect open-tunnel --instance-connect-endpoint-id {} --private-ip-address {}",
            target.aws_cli, endpoint_id, context.private_ip_address
        );
        if target.port != DEFAULT_REMOTE_PORT {
            proxy.push_str(&format!(" --remote-port {}", target.port));
        }
        if let Some(profile) = &target.aws.profile {
            proxy.push_str(&format!(" --profile {}", profile));
        }
        if let Some(region) = &target.aws.region {
            proxy.push_str(&format!(" --region {}", region));
        }
        args.push("-o".to_string());
        args.push(format!("ProxyCommand={}", proxy));
    }

    args.push("-o".to_string());
    args.push("StrictHostKeyChecking=no".to_string());
    args.push("-o".to_string());
    args.push("UserKnownHostsFile=/dev/null".to_string());
    args
}

/// Hands the terminal to an interactive `ssh` session and waits for it to end.
pub async fn launch_shell(
    target: &ShellTarget,
    context: &ConnectionContext,
) -> Result<ExitStatus, ShellError> {
    let mut cmd = Command::new("ssh");
    cmd.args(build_shell_args(target, context))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    info!("Opening SSH shell to {} as {}", target.host, context.username);

    let mut child = cmd.spawn()?;
    let status = child.wait().await?;

    if status.success() {
        info!("SSH shell exited.");
    } else {
        error!("SSH shell exited with status: {}", status);
    }
    Ok(status)
}
