use std::process::ExitCode;

/// Exit status for CLI commands.
///
/// - `Success` (0): build completed; skipped pages are still success
/// - `Failure` (1): build completed but strict mode saw recoverable errors
/// - `Error` (2): command failed due to internal error (config error,
///   unwritable output, etc.)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// Command completed successfully.
    Success,
    /// Command completed but found errors under strict mode.
    Failure,
    /// Command failed due to internal error.
    Error,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Success => ExitCode::from(0),
            ExitStatus::Failure => ExitCode::from(1),
            ExitStatus::Error => ExitCode::from(2),
        }
    }
}
