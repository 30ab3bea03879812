//! Remote command execution over SSH, directly or through an EC2 Instance
//! Connect tunnel.
//!
//! [`Executor::execute`] resolves a [`ConnectionContext`], opens the transport
//! the context calls for, runs the commands in order and tears everything
//! down again. Per-command failures come back as data in the
//! [`BatchResult`]; only failures to establish the connection are errors.
//!
//! [`ConnectionContext`]: ontapexec_traits::batch::ConnectionContext
//! [`BatchResult`]: ontapexec_traits::batch::BatchResult

mod error;
mod executor;
mod resolver;
mod retry;
mod runner;
mod store;

#[cfg(test)]
mod fakes;

pub use error::{EngineError, EstablishmentError, Stage, StoreError};
pub use executor::{Executor, ExecutorSettings};
pub use resolver::{ContextResolver, NoPrompt};
pub use retry::RetryPolicy;
pub use runner::run_batch;
pub use store::ContextStore;
pub use tokio_util::sync::CancellationToken;
