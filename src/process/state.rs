//! Script process lifecycle state machine.

use std::fmt;

/// Lifecycle of the child process owned by a supervisor.
///
/// `NotStarted → Running → (Exited | Killed)`. Both end states are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessState {
    #[default]
    NotStarted,
    Running,
    /// The process terminated on its own.
    Exited {
        /// Exit code, if the process was not ended by a signal.
        code: Option<i32>,
    },
    /// The process was terminated by disposal or cancellation.
    Killed,
}

impl ProcessState {
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Killed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Running)
                | (Self::Running, Self::Exited { .. } | Self::Killed)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::Running => f.write_str("running"),
            Self::Exited { code: Some(code) } => write!(f, "exited with code {code}"),
            Self::Exited { code: None } => f.write_str("exited by signal"),
            Self::Killed => f.write_str("killed"),
        }
    }
}
