//! In-process stand-ins for the transport services, recording every call.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use ontapexec_traits::batch::{CommandResult, ProgressEvent, ProgressSink, Transport};
use ontapexec_traits::probe::{PortService, ProbeError};
use ontapexec_traits::prompt::Prompter;
use ontapexec_traits::session::{ConnectRequest, SessionError, SessionService};
use ontapexec_traits::tunnel::{TunnelError, TunnelHandle, TunnelRequest, TunnelService};

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, call: &str) -> bool {
        self.0.lock().unwrap().iter().any(|c| c == call)
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|c| c == call)
    }
}

pub enum Outcome {
    Exit(i32, &'static str, &'static str),
    SubmitFails(&'static str),
}

pub struct FakeSessions {
    log: CallLog,
    outcomes: HashMap<String, Outcome>,
    connect_error: Option<&'static str>,
    cancel_after: Option<(String, CancellationToken)>,
}

impl FakeSessions {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            outcomes: HashMap::new(),
            connect_error: None,
            cancel_after: None,
        }
    }

    pub fn with_outcome(mut self, command: &str, outcome: Outcome) -> Self {
        self.outcomes.insert(command.to_string(), outcome);
        self
    }

    pub fn failing_connect(mut self, reason: &'static str) -> Self {
        self.connect_error = Some(reason);
        self
    }

    pub fn cancel_after(mut self, command: &str, token: CancellationToken) -> Self {
        self.cancel_after = Some((command.to_string(), token));
        self
    }
}

#[async_trait]
impl SessionService for FakeSessions {
    type Session = ();

    async fn connect(&self, request: &ConnectRequest) -> Result<(), SessionError> {
        self.log.push(format!(
            "connect {}:{} {} {}",
            request.host,
            request.port,
            request.username,
            request.password.as_str()
        ));
        match self.connect_error {
            Some(reason) => Err(SessionError::AuthenticationOrNetworkFailure {
                host: request.host.clone(),
                port: request.port,
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn exec(&self, _session: &(), command: &str) -> Result<CommandResult, SessionError> {
        self.log.push(format!("exec {}", command));
        if let Some((after, token)) = &self.cancel_after {
            if after == command {
                token.cancel();
            }
        }
        match self.outcomes.get(command) {
            Some(Outcome::Exit(code, out, err)) => Ok(CommandResult::from_exit(command, *code, out, err)),
            Some(Outcome::SubmitFails(reason)) => Err(SessionError::ExecFailed(reason.to_string())),
            None => Ok(CommandResult::from_exit(command, 0, &format!("ok: {}", command), "")),
        }
    }

    async fn close(&self, _session: ()) {
        self.log.push("close");
    }
}

pub struct FakeTunnel {
    log: CallLog,
    fail: bool,
}

impl FakeTunnel {
    pub fn new(log: CallLog) -> Self {
        Self { log, fail: false }
    }

    pub fn failing(log: CallLog) -> Self {
        Self { log, fail: true }
    }
}

#[async_trait]
impl TunnelService for FakeTunnel {
    async fn start(&self, request: &TunnelRequest) -> Result<TunnelHandle, TunnelError> {
        self.log.push(format!(
            "tunnel start {} {} {}:{}",
            request.endpoint_id, request.private_ip_address, request.local_port, request.remote_port
        ));
        if self.fail {
            return Err(TunnelError::SpawnFailed {
                program: "aws".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "aws: not found"),
            });
        }
        Ok(TunnelHandle::detached(request.local_port))
    }

    async fn stop(&self, handle: &mut TunnelHandle) {
        self.log.push(format!("tunnel stop {}", handle.local_port));
    }
}

pub struct FakePorts {
    log: CallLog,
    port: u16,
    reachable: bool,
    stalled: bool,
}

impl FakePorts {
    pub fn new(log: CallLog, port: u16) -> Self {
        Self {
            log,
            port,
            reachable: true,
            stalled: false,
        }
    }

    /// The reachability wait never finishes on its own.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }
}

#[async_trait]
impl PortService for FakePorts {
    async fn acquire_ephemeral_port(&self) -> Result<u16, ProbeError> {
        self.log.push(format!("acquire {}", self.port));
        Ok(self.port)
    }

    async fn wait_until_reachable(&self, port: u16, max_attempts: u32) -> Result<(), ProbeError> {
        self.log.push(format!("wait {} x{}", port, max_attempts));
        if self.stalled {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        }
        if self.reachable {
            Ok(())
        } else {
            Err(ProbeError::TimeoutExceeded {
                port,
                attempts: max_attempts,
            })
        }
    }
}

/// Answers prompts from a script and records which ones were asked.
#[derive(Default)]
pub struct ScriptedPrompter {
    pub asked: CallLog,
    answers: Mutex<VecDeque<Option<String>>>,
}

impl ScriptedPrompter {
    pub fn answering(answers: &[Option<&str>]) -> Self {
        Self {
            asked: CallLog::default(),
            answers: Mutex::new(answers.iter().map(|a| a.map(str::to_string)).collect()),
        }
    }

    fn next(&self, prompt: &str) -> Option<String> {
        self.asked.push(prompt);
        self.answers.lock().unwrap().pop_front().flatten()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn username(&self, _default: &str) -> Option<String> {
        self.next("username")
    }

    async fn password(&self) -> Option<Zeroizing<String>> {
        self.next("password").map(Zeroizing::new)
    }

    async fn transport(&self) -> Option<Transport> {
        self.next("transport").map(|t| match t.as_str() {
            "tunneled" => Transport::Tunneled,
            _ => Transport::Direct,
        })
    }

    async fn endpoint_id(&self) -> Option<String> {
        self.next("endpoint_id")
    }
}

#[derive(Default)]
pub struct RecordingProgress(CallLog);

impl RecordingProgress {
    pub fn events(&self) -> Vec<String> {
        self.0.calls()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, event: ProgressEvent<'_>) {
        self.0.push(match event {
            ProgressEvent::Connecting { host, username } => format!("connecting {} {}", host, username),
            ProgressEvent::Executing { command } => format!("executing {}", command),
            ProgressEvent::Completed { result } => {
                format!("completed {} {}", result.command, result.exit_code)
            }
        });
    }
}
