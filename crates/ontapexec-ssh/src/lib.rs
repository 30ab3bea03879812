//! Secure shell transport: the russh session client used for command
//! batches, and the system `ssh` launcher used for interactive logins.

mod session;
mod shell;

pub use session::{RusshSessionClient, SshSession};
pub use shell::{ShellError, ShellTarget, build_shell_args, launch_shell};
