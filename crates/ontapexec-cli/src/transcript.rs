use std::io::Write;
use std::sync::Mutex;

use serde_json::json;

use ontapexec_traits::batch::{BatchResult, CommandResult, ProgressEvent, ProgressSink};

/// Streams the batch to a writer as it runs, one block per command.
pub struct Transcript<W: Write + Send> {
    out: Mutex<W>,
}

impl Transcript<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> Transcript<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn write_completed(out: &mut impl Write, result: &CommandResult) -> std::io::Result<()> {
    writeln!(
        out,
        "Command `{}` completed with exit code {}",
        result.command, result.exit_code
    )?;
    if !result.output.is_empty() {
        writeln!(out, "```\n{}\n```", result.output)?;
    }
    if !result.error.is_empty() {
        writeln!(out, "Error:\n```\n{}\n```", result.error)?;
    }
    Ok(())
}

impl<W: Write + Send> ProgressSink for Transcript<W> {
    fn report(&self, event: ProgressEvent<'_>) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        // A closed stdout must not abort the batch.
        let _ = match event {
            ProgressEvent::Connecting { host, username } => writeln!(
                out,
                "Establishing SSH connection to {} as {}...",
                host, username
            ),
            ProgressEvent::Executing { command } => writeln!(out, "Executing command: `{}`", command),
            ProgressEvent::Completed { result } => write_completed(&mut *out, result),
        };
        let _ = out.flush();
    }
}

/// The machine-readable form of a batch. The password never appears.
pub fn batch_to_json(batch: &BatchResult) -> serde_json::Value {
    let context = &batch.connection_context;
    json!({
        "results": batch.results,
        "connectionContext": {
            "username": context.username,
            "instanceConnectEndpointId": context.endpoint_id(),
            "privateIpAddress": context.private_ip_address,
        },
    })
}
