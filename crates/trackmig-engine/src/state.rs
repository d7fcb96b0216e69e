//! Run lifecycle state machine

use crate::error::MigrationError;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Loading mapping and checkpoint
    Starting,
    /// Enumerating and writing records
    Running,
    /// Source exhausted; checkpoint archived
    Completed,
    /// Halted by a systemic error; checkpoint preserved
    Failed,
    /// Stopped by cancellation; checkpoint flushed
    Paused,
}

impl RunState {
    /// Check if the run has ended
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Paused)
    }
}

/// States reachable from `from`
#[must_use]
pub fn allowed_transitions(from: RunState) -> &'static [RunState] {
    use RunState::*;
    match from {
        Starting => &[Running, Failed],
        Running => &[Completed, Failed, Paused],
        Completed | Failed | Paused => &[],
    }
}

/// Validate a state transition
///
/// # Errors
/// `MigrationError::IllegalTransition` when `to` is not reachable from `from`
pub fn validate_transition(from: RunState, to: RunState) -> Result<(), MigrationError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(MigrationError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_allowed() {
        assert!(validate_transition(RunState::Starting, RunState::Running).is_ok());
        assert!(validate_transition(RunState::Running, RunState::Completed).is_ok());
    }

    #[test]
    fn startup_failure_is_allowed() {
        assert!(validate_transition(RunState::Starting, RunState::Failed).is_ok());
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [RunState::Completed, RunState::Failed, RunState::Paused] {
            assert!(terminal.is_terminal());
            assert!(allowed_transitions(terminal).is_empty());
            assert!(validate_transition(terminal, RunState::Running).is_err());
        }
    }

    #[test]
    fn cannot_pause_before_running() {
        assert!(matches!(
            validate_transition(RunState::Starting, RunState::Paused),
            Err(MigrationError::IllegalTransition { .. })
        ));
    }
}
