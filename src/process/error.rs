//! Supervisor error types.

use crate::stream::StreamError;

/// Errors surfaced synchronously when configuring or launching a script.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// A required argument was empty.
    #[error("Invalid argument `{name}`: cannot be null or empty")]
    InvalidArgument {
        /// Name of the offending argument.
        name: &'static str,
    },

    /// The OS refused or failed to spawn the script process.
    #[error(
        "Failed to start '{command}'. To resolve this:\n\n\
         [1] Ensure that '{command}' is installed and can be found in one of the PATH directories.\n    \
         Current PATH environment variable is: {path}\n    \
         Make sure the executable is in one of those directories, or update your PATH.\n\n\
         [2] Underlying error: {source}"
    )]
    ProcessLaunch {
        /// The manager command that was attempted.
        command: String,
        /// The PATH the child would have been launched with.
        path: String,
        source: std::io::Error,
    },

    /// `launch` was called on a supervisor that already ran a process.
    #[error("Script process already started; create a new supervisor to run again")]
    AlreadyStarted,

    /// `launch` was called after the supervisor was disposed.
    #[error("Supervisor was disposed before the script process was started")]
    Disposed,

    /// An output stream could not be attached.
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}
