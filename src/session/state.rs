use serde::{Deserialize, Serialize};

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Uninitialized,
    SetupInProgress,
    Ready,
    Streaming,
    Finalizing,
    Done,
    Aborted,
}

impl SessionState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            (Uninitialized, SetupInProgress) |
            (Ready, SetupInProgress) |
            (SetupInProgress, Ready) |
            (Ready, Streaming) |
            (Streaming, Finalizing) |
            (Finalizing, Done) |

            // Forced abort
            (Uninitialized, Aborted) |
            (SetupInProgress, Aborted) |
            (Ready, Aborted) |
            (Streaming, Aborted) |
            (Finalizing, Aborted) |
            (Done, Aborted)
        )
    }

    /// No further events are handled
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Aborted)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "UNINITIALIZED",
            SessionState::SetupInProgress => "SETUP_IN_PROGRESS",
            SessionState::Ready => "READY",
            SessionState::Streaming => "STREAMING",
            SessionState::Finalizing => "FINALIZING",
            SessionState::Done => "DONE",
            SessionState::Aborted => "ABORTED",
        }
    }
}
