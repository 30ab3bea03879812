//! Shared contracts for the ontapexec workspace: the data model, the error
//! enums and the service traits each implementation crate provides.

pub mod batch;
pub mod config;
pub mod logging;
pub mod probe;
pub mod prompt;
pub mod session;
pub mod tunnel;
