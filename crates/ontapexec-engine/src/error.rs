use std::fmt;
use thiserror::Error;

use ontapexec_traits::probe::ProbeError;
use ontapexec_traits::session::SessionError;
use ontapexec_traits::tunnel::TunnelError;

/// The phases that run before a session exists. An invocation can only fail
/// or be cancelled in one of these; once connected, problems are rows.
///
/// `ResolvingContext` has no establishment error of its own and is reported
/// only through [`EngineError::Cancelled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolvingContext,
    AllocatingPort,
    StartingTunnel,
    AwaitingTunnelReady,
    Connecting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ResolvingContext => "resolving the connection context",
            Stage::AllocatingPort => "allocating a local port",
            Stage::StartingTunnel => "starting the tunnel",
            Stage::AwaitingTunnelReady => "waiting for the tunnel",
            Stage::Connecting => "connecting",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum EstablishmentError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Connection establishment failed while {stage}: {source}")]
    ConnectionEstablishmentFailed {
        stage: Stage,
        #[source]
        source: EstablishmentError,
    },
    #[error("Cancelled while {stage}")]
    Cancelled { stage: Stage },
}

impl EngineError {
    pub(crate) fn establishing(stage: Stage, source: impl Into<EstablishmentError>) -> Self {
        EngineError::ConnectionEstablishmentFailed {
            stage,
            source: source.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            EngineError::ConnectionEstablishmentFailed { stage, .. } => *stage,
            EngineError::Cancelled { stage } => *stage,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled { .. })
    }

    /// True when the tunnel never started accepting connections in time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            EngineError::ConnectionEstablishmentFailed {
                source: EstablishmentError::Probe(ProbeError::TimeoutExceeded { .. }),
                ..
            }
        )
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access context store: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse context store: {0}")]
    Parse(#[from] serde_json::Error),
}
