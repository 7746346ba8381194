//! Job lifecycle states and the legal transition table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The lifecycle state of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted by the runner, nothing done yet.
    Submitted,
    /// The runner is checking the pipeline.
    Validating,
    /// Waiting for an execution slot.
    Queued,
    /// Executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped on request.
    Cancelled,
}

impl Default for JobState {
    fn default() -> Self {
        Self::Submitted
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "submitted" => Ok(Self::Submitted),
            "validating" => Ok(Self::Validating),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

impl JobState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Submitted,
        Self::Validating,
        Self::Queued,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Returns the wire name of the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Validating => "validating",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if no transition leaves this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if a cancel request can still take effect.
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true for the successful terminal state.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if `next` is a single legal edge from `self`.
    ///
    /// `Submitted -> Validating -> Queued -> Running -> {Completed, Failed}`,
    /// plus `Cancelled` from any non-terminal state.
    #[must_use]
    pub fn has_edge_to(self, next: Self) -> bool {
        use JobState::{Cancelled, Completed, Failed, Queued, Running, Submitted, Validating};
        matches!(
            (self, next),
            (Submitted, Validating)
                | (Validating, Queued)
                | (Queued, Running)
                | (Running, Completed | Failed)
                | (Submitted | Validating | Queued | Running, Cancelled)
        )
    }

    /// Returns true if a poll may legally report `next` after `self`.
    ///
    /// Polls sample the backend, so intermediate states can be missed: any
    /// state reachable through the edge table is accepted, as is observing
    /// the same state again. Moving backwards or leaving a terminal state is
    /// not.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        let mut seen = [false; JobState::ALL.len()];
        let mut frontier = vec![self];
        while let Some(state) = frontier.pop() {
            for candidate in Self::ALL {
                if !state.has_edge_to(candidate) || seen[candidate as usize] {
                    continue;
                }
                if candidate == next {
                    return true;
                }
                seen[candidate as usize] = true;
                frontier.push(candidate);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        for state in JobState::ALL {
            assert_eq!(state.to_string().parse::<JobState>().unwrap(), state);
        }
        assert_eq!("CANCELED".parse::<JobState>().unwrap(), JobState::Cancelled);
        assert!("initializing".parse::<JobState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Queued.is_cancellable());
        assert!(!JobState::Completed.is_cancellable());
    }

    #[test]
    fn test_edge_table() {
        assert!(JobState::Submitted.has_edge_to(JobState::Validating));
        assert!(JobState::Running.has_edge_to(JobState::Failed));
        assert!(JobState::Queued.has_edge_to(JobState::Cancelled));
        assert!(!JobState::Submitted.has_edge_to(JobState::Running));
        assert!(!JobState::Completed.has_edge_to(JobState::Cancelled));
    }

    #[test]
    fn test_forward_skips_follow_edge_table() {
        assert!(JobState::Submitted.can_transition_to(JobState::Running));
        assert!(JobState::Submitted.can_transition_to(JobState::Completed));
        assert!(JobState::Validating.can_transition_to(JobState::Failed));
        assert!(JobState::Queued.can_transition_to(JobState::Cancelled));
        assert!(JobState::Running.can_transition_to(JobState::Running));
        assert!(JobState::Completed.can_transition_to(JobState::Completed));
        assert!(!JobState::Completed.can_transition_to(JobState::Failed));
        assert!(!JobState::Queued.can_transition_to(JobState::Validating));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!JobState::Running.can_transition_to(JobState::Queued));
        assert!(!JobState::Completed.can_transition_to(JobState::Running));
        assert!(!JobState::Failed.can_transition_to(JobState::Completed));
        assert!(!JobState::Cancelled.can_transition_to(JobState::Submitted));
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&JobState::Queued).unwrap();
        assert_eq!(json, r#""queued""#);
    }
}
