use ontapexec_traits::batch::{BatchResult, CommandResult, ONTAP_SYNTAX_ERROR_EXIT_CODE};
use ontapexec_traits::config::Config;

/// Decides which failed rows a host should send back for correction before
/// re-invoking the engine with the same connection context.
///
/// The default exit code is the ONTAP CLI's usage-error convention; other
/// remote targets can override it through `syntax_error_exit_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub syntax_error_exit_code: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            syntax_error_exit_code: ONTAP_SYNTAX_ERROR_EXIT_CODE,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            syntax_error_exit_code: config
                .syntax_error_exit_code
                .unwrap_or(ONTAP_SYNTAX_ERROR_EXIT_CODE),
        }
    }

    pub fn needs_correction(&self, result: &CommandResult) -> bool {
        !result.success && result.exit_code == self.syntax_error_exit_code
    }

    pub fn commands_needing_correction<'a>(&self, batch: &'a BatchResult) -> Vec<&'a CommandResult> {
        batch
            .results
            .iter()
            .filter(|r| self.needs_correction(r))
            .collect()
    }
}
