use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ontapexec_traits::batch::{CommandResult, ProgressEvent, ProgressSink};
use ontapexec_traits::session::SessionService;

/// Runs `commands` one after another over an open session.
///
/// Every command yields exactly one row, in submission order. A command that
/// cannot be submitted becomes a `-1` row and the loop moves on. Once `cancel`
/// fires, the commands that have not started yet get a cancelled row; a
/// command already running is awaited and recorded.
pub async fn run_batch<S>(
    sessions: &S,
    session: &S::Session,
    commands: &[String],
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Vec<CommandResult>
where
    S: SessionService + ?Sized,
{
    let mut results = Vec::with_capacity(commands.len());

    for command in commands {
        if cancel.is_cancelled() {
            debug!(command = %command, "Skipping command after cancellation");
            results.push(CommandResult::cancelled(command));
            continue;
        }

        progress.report(ProgressEvent::Executing { command: command.as_str() });

        let result = match sessions.exec(session, command).await {
            Ok(result) => result,
            Err(e) => {
                warn!(command = %command, error = %e, "Command could not be submitted");
                CommandResult::transport_failure(command, e)
            }
        };

        progress.report(ProgressEvent::Completed { result: &result });
        results.push(result);
    }

    results
}
