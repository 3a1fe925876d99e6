//! Session state machine.

/// Lifecycle state of a shell session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Interpreter launched, no command run yet.
    #[default]
    Created,
    /// A command holds the execution lock.
    Running,
    /// Waiting for the next command.
    Idle,
    /// Interpreter gone; the session cannot be reused.
    Disposed,
}

impl SessionState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - Created -> Running
    /// - Created -> Disposed
    /// - Running -> Idle
    /// - Running -> Disposed (failure or timeout)
    /// - Idle -> Running
    /// - Idle -> Disposed
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, target),
            (Created, Running)
                | (Created, Disposed)
                | (Running, Idle)
                | (Running, Disposed)
                | (Idle, Running)
                | (Idle, Disposed)
        )
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns `Ok(())` if the transition is valid, or an error otherwise.
    pub fn transition_to(&mut self, target: SessionState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::ShellJailError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let mut state = SessionState::Created;
        assert!(state.transition_to(SessionState::Running).is_ok());
        assert!(state.transition_to(SessionState::Idle).is_ok());
        assert!(state.transition_to(SessionState::Running).is_ok());
        assert!(state.transition_to(SessionState::Idle).is_ok());
        assert!(state.transition_to(SessionState::Disposed).is_ok());
        assert_eq!(state, SessionState::Disposed);
    }

    #[test]
    fn test_running_to_disposed() {
        let mut state = SessionState::Running;
        assert!(state.transition_to(SessionState::Disposed).is_ok());
    }

    #[test]
    fn test_invalid_created_to_idle() {
        let mut state = SessionState::Created;
        assert!(state.transition_to(SessionState::Idle).is_err());
        assert_eq!(state, SessionState::Created);
    }

    #[test]
    fn test_nothing_leaves_disposed() {
        let mut state = SessionState::Disposed;
        for target in [
            SessionState::Created,
            SessionState::Running,
            SessionState::Idle,
            SessionState::Disposed,
        ] {
            assert!(state.transition_to(target).is_err());
        }
    }

    #[test]
    fn test_is_terminal() {
        assert!(!SessionState::Created.is_terminal());
        assert!(!SessionState::Running.is_terminal());
        assert!(!SessionState::Idle.is_terminal());
        assert!(SessionState::Disposed.is_terminal());
    }

    #[test]
    fn test_default() {
        assert_eq!(SessionState::default(), SessionState::Created);
    }
}
