use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ontapexec_traits::batch::{
    BatchResult, CommandResult, ConnectionContext, NoProgress, ProgressEvent, ProgressSink,
    TargetDescriptor,
};
use ontapexec_traits::config::Config;
use ontapexec_traits::probe::PortService;
use ontapexec_traits::prompt::Prompter;
use ontapexec_traits::session::{ConnectRequest, SessionService};
use ontapexec_traits::tunnel::{AwsProfile, TunnelRequest, TunnelService};

use crate::error::{EngineError, EstablishmentError, Stage};
use crate::resolver::{ContextResolver, NoPrompt};
use crate::runner::run_batch;

/// Host the session dials when traffic goes through the local tunnel port.
const TUNNEL_HOST: &str = "localhost";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub ssh_port: u16,
    pub connect_timeout: Duration,
    pub port_wait_attempts: u32,
    pub default_username: String,
    pub aws: AwsProfile,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            ssh_port: 22,
            connect_timeout: Duration::from_millis(20_000),
            port_wait_attempts: 15,
            default_username: "fsxadmin".to_string(),
            aws: AwsProfile::default(),
        }
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        Self {
            ssh_port: config.ssh_port.unwrap_or(defaults.ssh_port),
            connect_timeout: config
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            port_wait_attempts: config.port_wait_attempts.unwrap_or(defaults.port_wait_attempts),
            default_username: config
                .default_username
                .clone()
                .unwrap_or(defaults.default_username),
            aws: AwsProfile {
                profile: config.aws_profile.clone(),
                region: config.aws_region.clone(),
            },
        }
    }
}

/// Runs command batches against management endpoints, directly or through an
/// EC2 Instance Connect tunnel.
///
/// An executor holds no state between invocations, so one instance can serve
/// concurrent batches. Each invocation owns the port, tunnel and session it
/// opens and tears them down before returning, whether the batch succeeded,
/// partially failed or could not connect.
pub struct Executor<T, S, P> {
    tunnels: T,
    sessions: S,
    ports: P,
    settings: ExecutorSettings,
    prompter: Arc<dyn Prompter>,
    progress: Arc<dyn ProgressSink>,
}

impl<T, S, P> Executor<T, S, P>
where
    T: TunnelService,
    S: SessionService,
    P: PortService,
{
    pub fn new(tunnels: T, sessions: S, ports: P, settings: ExecutorSettings) -> Self {
        Self {
            tunnels,
            sessions,
            ports,
            settings,
            prompter: Arc::new(NoPrompt),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub async fn resolve(
        &self,
        target: &TargetDescriptor,
        cached: Option<ConnectionContext>,
    ) -> ConnectionContext {
        ContextResolver::new(self.prompter.as_ref(), &self.settings.default_username)
            .resolve(target, cached)
            .await
    }

    pub async fn execute(
        &self,
        target: &TargetDescriptor,
        commands: &[String],
        cached: Option<ConnectionContext>,
    ) -> Result<BatchResult, EngineError> {
        self.execute_with_cancel(target, commands, cached, &CancellationToken::new())
            .await
    }

    /// Like [`Executor::execute`], but observes `cancel`.
    ///
    /// Cancellation before the session is up aborts the phase in progress,
    /// tears down whatever was already started and returns
    /// [`EngineError::Cancelled`]. Once connected, the running command is
    /// awaited and the commands not yet started get a cancelled row.
    pub async fn execute_with_cancel(
        &self,
        target: &TargetDescriptor,
        commands: &[String],
        cached: Option<ConnectionContext>,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, EngineError> {
        debug!(stage = %Stage::ResolvingContext, ip = %target.management_ip);
        let context = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(EngineError::Cancelled { stage: Stage::ResolvingContext });
            }
            context = self.resolve(target, cached) => context,
        };
        self.execute_with_context(context, commands, cancel).await
    }

    /// Runs the batch with a context that is already resolved, so callers
    /// can finish prompting before they start listening for interrupts.
    pub async fn execute_with_context(
        &self,
        context: ConnectionContext,
        commands: &[String],
        cancel: &CancellationToken,
    ) -> Result<BatchResult, EngineError> {
        info!(
            "Establishing SSH connection to {} as {} ({})",
            context.private_ip_address,
            context.username,
            context.transport()
        );
        self.progress.report(ProgressEvent::Connecting {
            host: context.private_ip_address.as_str(),
            username: context.username.as_str(),
        });

        let results = match context.endpoint_id() {
            Some(endpoint_id) => {
                self.run_tunneled(&context, endpoint_id, commands, cancel)
                    .await?
            }
            None => {
                let host = context.private_ip_address.as_str();
                self.connect_and_run(host, self.settings.ssh_port, &context, commands, cancel)
                    .await?
            }
        };

        let failed = results.iter().filter(|r| !r.success).count();
        info!("Batch finished: {} command(s), {} failed", results.len(), failed);

        Ok(BatchResult {
            results,
            connection_context: context,
        })
    }

    async fn run_tunneled(
        &self,
        context: &ConnectionContext,
        endpoint_id: &str,
        commands: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<CommandResult>, EngineError> {
        let local_port = establish(
            Stage::AllocatingPort,
            cancel,
            self.ports.acquire_ephemeral_port(),
        )
        .await?;

        let request = TunnelRequest {
            endpoint_id: endpoint_id.to_string(),
            private_ip_address: context.private_ip_address.clone(),
            local_port,
            remote_port: self.settings.ssh_port,
            aws: self.settings.aws.clone(),
        };
        // A start abandoned on cancellation drops the child, which kills it.
        let mut tunnel = establish(Stage::StartingTunnel, cancel, self.tunnels.start(&request)).await?;

        let outcome = self
            .await_tunnel_and_run(tunnel.local_port, context, commands, cancel)
            .await;

        debug!(local_port, "Tearing down tunnel");
        self.tunnels.stop(&mut tunnel).await;

        outcome
    }

    async fn await_tunnel_and_run(
        &self,
        local_port: u16,
        context: &ConnectionContext,
        commands: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<CommandResult>, EngineError> {
        let reachable = self
            .ports
            .wait_until_reachable(local_port, self.settings.port_wait_attempts);
        establish(Stage::AwaitingTunnelReady, cancel, reachable)
            .await
            .inspect_err(|e| {
                if e.is_timeout() {
                    warn!("Tunnel on port {} never became reachable", local_port);
                }
            })?;

        self.connect_and_run(TUNNEL_HOST, local_port, context, commands, cancel)
            .await
    }

    async fn connect_and_run(
        &self,
        host: &str,
        port: u16,
        context: &ConnectionContext,
        commands: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<CommandResult>, EngineError> {
        let request = ConnectRequest {
            host: host.to_string(),
            port,
            username: context.username.clone(),
            password: context.password.clone(),
            timeout: self.settings.connect_timeout,
        };
        let session = establish(Stage::Connecting, cancel, self.sessions.connect(&request)).await?;

        debug!(commands = commands.len(), "Executing batch");
        let results = run_batch(&self.sessions, &session, commands, self.progress.as_ref(), cancel).await;

        debug!(host, port, "Closing session");
        self.sessions.close(session).await;

        Ok(results)
    }
}

/// Runs one establishment phase unless `cancel` fires first, in which case
/// the phase's future is dropped.
async fn establish<T, E>(
    stage: Stage,
    cancel: &CancellationToken,
    phase: impl Future<Output = Result<T, E>>,
) -> Result<T, EngineError>
where
    E: Into<EstablishmentError>,
{
    debug!(stage = %stage);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("Cancelled while {}", stage);
            Err(EngineError::Cancelled { stage })
        }
        outcome = phase => outcome.map_err(|e| EngineError::establishing(stage, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;
    use crate::fakes::{
        CallLog, FakePorts, FakeSessions, FakeTunnel, Outcome, RecordingProgress, ScriptedPrompter,
    };

    type TestExecutor = Executor<FakeTunnel, FakeSessions, FakePorts>;

    fn target() -> TargetDescriptor {
        TargetDescriptor::new("172.31.5.14")
    }

    fn commands(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    fn executor(log: &CallLog, sessions: FakeSessions) -> TestExecutor {
        Executor::new(
            FakeTunnel::new(log.clone()),
            sessions,
            FakePorts::new(log.clone(), 40022),
            ExecutorSettings::default(),
        )
    }

    fn tunneled() -> ConnectionContext {
        ConnectionContext::new("fsxadmin", "secret", Some("eice-0099".to_string()), "172.31.5.14")
    }

    fn direct() -> ConnectionContext {
        ConnectionContext::new("fsxadmin", "secret", None, "172.31.5.14")
    }

    #[tokio::test]
    async fn test_tunneled_batch_succeeds() {
        let log = CallLog::default();
        let exec = executor(&log, FakeSessions::new(log.clone()));

        let batch = exec
            .execute(&target(), &commands(&["version", "volume show"]), Some(tunneled()))
            .await
            .unwrap();

        assert_eq!(batch.results.len(), 2);
        assert!(batch.all_succeeded());
        assert_eq!(batch.connection_context.endpoint_id(), Some("eice-0099"));
        assert_eq!(batch.connection_context.private_ip_address, "172.31.5.14");
        assert_eq!(
            log.calls(),
            [
                "acquire 40022",
                "tunnel start eice-0099 172.31.5.14 40022:22",
                "wait 40022 x15",
                "connect localhost:40022 fsxadmin secret",
                "exec version",
                "exec volume show",
                "close",
                "tunnel stop 40022",
            ]
        );
    }

    #[tokio::test]
    async fn test_direct_usage_error_is_data() {
        let log = CallLog::default();
        let sessions = FakeSessions::new(log.clone())
            .with_outcome("bogus-cmd", Outcome::Exit(255, "", "Error: \"bogus-cmd\" is not a recognized command"));
        let exec = executor(&log, sessions);

        let batch = exec
            .execute(&target(), &commands(&["bogus-cmd"]), Some(direct()))
            .await
            .unwrap();

        assert_eq!(batch.results.len(), 1);
        let row = &batch.results[0];
        assert!(!row.success);
        assert_eq!(row.exit_code, 255);
        assert!(!row.error.is_empty());
        assert!(!log.calls().iter().any(|c| c.starts_with("tunnel") || c.starts_with("acquire")));
        assert!(log.contains("connect 172.31.5.14:22 fsxadmin secret"));
    }

    #[tokio::test]
    async fn test_direct_uses_configured_port() {
        let log = CallLog::default();
        let exec = Executor::new(
            FakeTunnel::new(log.clone()),
            FakeSessions::new(log.clone()),
            FakePorts::new(log.clone(), 40022),
            ExecutorSettings {
                ssh_port: 2222,
                ..ExecutorSettings::default()
            },
        );

        exec.execute(&target(), &commands(&["version"]), Some(direct()))
            .await
            .unwrap();

        assert!(log.contains("connect 172.31.5.14:2222 fsxadmin secret"));
    }

    #[tokio::test]
    async fn test_teardown_after_mid_batch_failure() {
        let log = CallLog::default();
        let sessions = FakeSessions::new(log.clone())
            .with_outcome("volume show", Outcome::SubmitFails("channel reset by peer"));
        let exec = executor(&log, sessions);

        let batch = exec
            .execute(
                &target(),
                &commands(&["version", "volume show", "snapshot show"]),
                Some(tunneled()),
            )
            .await
            .unwrap();

        assert_eq!(batch.results.len(), 3);
        assert!(batch.results[0].success);
        assert_eq!(batch.results[1].exit_code, -1);
        assert!(batch.results[2].success);

        let close = log.position("close").expect("session closed");
        let stop = log.position("tunnel stop 40022").expect("tunnel stopped");
        assert!(close < stop);
    }

    #[tokio::test]
    async fn test_port_wait_timeout_kills_tunnel() {
        let log = CallLog::default();
        let exec = Executor::new(
            FakeTunnel::new(log.clone()),
            FakeSessions::new(log.clone()),
            FakePorts::new(log.clone(), 40022).unreachable(),
            ExecutorSettings::default(),
        );

        let err = exec
            .execute(&target(), &commands(&["version"]), Some(tunneled()))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::AwaitingTunnelReady);
        assert!(err.is_timeout());
        assert!(log.contains("wait 40022 x15"));
        assert!(log.contains("tunnel stop 40022"));
        assert!(!log.calls().iter().any(|c| c.starts_with("connect") || c.starts_with("exec")));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let log = CallLog::default();
        let exec = Executor::new(
            FakeTunnel::failing(log.clone()),
            FakeSessions::new(log.clone()),
            FakePorts::new(log.clone(), 40022),
            ExecutorSettings::default(),
        );

        let err = exec
            .execute(&target(), &commands(&["version"]), Some(tunneled()))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::StartingTunnel);
        assert!(!err.is_timeout());
        assert!(!log.calls().iter().any(|c| c.starts_with("wait") || c.starts_with("connect")));
    }

    #[tokio::test]
    async fn test_auth_failure_tears_down_tunnel() {
        let log = CallLog::default();
        let sessions = FakeSessions::new(log.clone()).failing_connect("authentication rejected");
        let exec = executor(&log, sessions);

        let err = exec
            .execute(&target(), &commands(&["version"]), Some(tunneled()))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Connecting);
        assert!(err.to_string().contains("authentication rejected"));
        assert!(log.contains("tunnel stop 40022"));
        assert!(!log.contains("close"));
    }

    #[tokio::test]
    async fn test_direct_connect_failure_has_no_partial_result() {
        let log = CallLog::default();
        let sessions = FakeSessions::new(log.clone()).failing_connect("connection refused");
        let exec = executor(&log, sessions);

        let err = exec
            .execute(&target(), &commands(&["version", "volume show"]), Some(direct()))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Connecting);
        assert!(!log.calls().iter().any(|c| c.starts_with("exec")));
    }

    #[tokio::test]
    async fn test_cached_context_never_prompts_for_username_or_transport() {
        let log = CallLog::default();
        let prompter = Arc::new(ScriptedPrompter::answering(&[Some("typed-password")]));
        let exec = executor(&log, FakeSessions::new(log.clone())).with_prompter(prompter.clone());
        let cached = ConnectionContext::new("fsxadmin", "", None, "172.31.5.14");

        let batch = exec
            .execute(&target(), &commands(&["version"]), Some(cached))
            .await
            .unwrap();

        assert_eq!(prompter.asked.calls(), ["password"]);
        assert_eq!(batch.connection_context.password.as_str(), "typed-password");
        assert!(log.contains("connect 172.31.5.14:22 fsxadmin typed-password"));
    }

    #[tokio::test]
    async fn test_returned_context_can_be_reused() {
        let log = CallLog::default();
        let prompter = Arc::new(ScriptedPrompter::answering(&[
            Some("fsxadmin"),
            Some("secret"),
            Some("tunneled"),
            Some("eice-0099"),
        ]));
        let exec = executor(&log, FakeSessions::new(log.clone())).with_prompter(prompter.clone());

        let first = exec
            .execute(&target(), &commands(&["version"]), None)
            .await
            .unwrap();
        let second = exec
            .execute(&target(), &commands(&["volume show"]), Some(first.connection_context.clone()))
            .await
            .unwrap();

        assert_eq!(prompter.asked.calls().len(), 4);
        assert_eq!(second.connection_context, first.connection_context);
    }

    #[tokio::test]
    async fn test_progress_reports_connection_and_commands() {
        let log = CallLog::default();
        let progress = Arc::new(RecordingProgress::default());
        let exec = executor(&log, FakeSessions::new(log.clone())).with_progress(progress.clone());

        exec.execute(&target(), &commands(&["version"]), Some(direct()))
            .await
            .unwrap();

        assert_eq!(
            progress.events(),
            [
                "connecting 172.31.5.14 fsxadmin",
                "executing version",
                "completed version 0",
            ]
        );
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config {
            ssh_port: Some(2022),
            connect_timeout_ms: Some(5_000),
            aws_profile: Some("storage-admin".to_string()),
            ..Config::default()
        };
        let settings = ExecutorSettings::from_config(&config);
        assert_eq!(settings.ssh_port, 2022);
        assert_eq!(settings.connect_timeout, Duration::from_secs(5));
        assert_eq!(settings.port_wait_attempts, 15);
        assert_eq!(settings.default_username, "fsxadmin");
        assert_eq!(settings.aws.profile.as_deref(), Some("storage-admin"));
    }

    #[tokio::test]
    async fn test_tunnel_forwards_to_configured_port() {
        let log = CallLog::default();
        let exec = Executor::new(
            FakeTunnel::new(log.clone()),
            FakeSessions::new(log.clone()),
            FakePorts::new(log.clone(), 40022),
            ExecutorSettings {
                ssh_port: 2222,
                ..ExecutorSettings::default()
            },
        );

        exec.execute(&target(), &commands(&["version"]), Some(tunneled()))
            .await
            .unwrap();

        assert!(log.contains("tunnel start eice-0099 172.31.5.14 40022:2222"));
        assert!(log.contains("connect localhost:40022 fsxadmin secret"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_opens_nothing() {
        let log = CallLog::default();
        let exec = Executor::new(
            FakeTunnel::new(log.clone()),
            FakeSessions::new(log.clone()),
            FakePorts::new(log.clone(), 40022).stalled(),
            ExecutorSettings::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = Instant::now();
        let err = exec
            .execute_with_cancel(&target(), &commands(&["version"]), Some(tunneled()), &cancel)
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(err.is_cancelled());
        assert_eq!(err.stage(), Stage::ResolvingContext);
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_tunnel_wait_tears_down_without_connecting() {
        let log = CallLog::default();
        let exec = Executor::new(
            FakeTunnel::new(log.clone()),
            FakeSessions::new(log.clone()),
            FakePorts::new(log.clone(), 40022).stalled(),
            ExecutorSettings::default(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = exec
            .execute_with_cancel(&target(), &commands(&["version"]), Some(tunneled()), &cancel)
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(err.is_cancelled());
        assert!(!err.is_timeout());
        assert_eq!(err.stage(), Stage::AwaitingTunnelReady);
        assert_eq!(
            log.calls(),
            [
                "acquire 40022",
                "tunnel start eice-0099 172.31.5.14 40022:22",
                "wait 40022 x15",
                "tunnel stop 40022",
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_with_resolved_context_direct() {
        let log = CallLog::default();
        let exec = executor(&log, FakeSessions::new(log.clone()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = exec
            .execute_with_context(direct(), &commands(&["version"]), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Connecting);
        assert!(err.is_cancelled());
        assert!(!log.calls().iter().any(|c| c.starts_with("connect") || c.starts_with("exec")));
    }
}
