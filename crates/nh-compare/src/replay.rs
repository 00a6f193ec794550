//! The boundary to the program under test.
//!
//! A [`Replayer`] feeds a session's recorded inputs to the candidate and
//! returns what it captured. Replayers never fail outright: errors end up in
//! [`CandidateTrace::error`] next to whatever was captured before the fault.

use thiserror::Error;

use crate::trace::{CandidateTrace, Session};

/// Why a replay could not complete.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to start candidate: {0}")]
    Launch(String),

    #[error("candidate exited after {steps} of {expected} steps")]
    Truncated { steps: usize, expected: usize },

    #[error("candidate reported an error at step {step}: {message}")]
    Candidate { step: usize, message: String },

    #[error("malformed candidate output: {0}")]
    Protocol(String),

    #[error("no candidate trace for session {0}")]
    MissingTrace(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReplayError {
    /// A trace carrying this error and the steps captured so far.
    pub fn into_trace(self, partial: CandidateTrace) -> CandidateTrace {
        CandidateTrace {
            error: Some(self.to_string()),
            ..partial
        }
    }
}

/// Drives the program under test with a session's recorded inputs.
pub trait Replayer: Send + Sync {
    fn replay(&self, session: &Session) -> CandidateTrace;
}

impl<F> Replayer for F
where
    F: Fn(&Session) -> CandidateTrace + Send + Sync,
{
    fn replay(&self, session: &Session) -> CandidateTrace {
        self(session)
    }
}

/// Replays a session by echoing its own recording.
///
/// Every channel must match; anything else means the harness is broken.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfCheckReplayer;

impl Replayer for SelfCheckReplayer {
    fn replay(&self, session: &Session) -> CandidateTrace {
        CandidateTrace {
            startup: session.startup.clone(),
            steps: session.steps.clone(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Step;

    #[test]
    fn test_self_check_echoes_session() {
        let session = Session {
            steps: vec![Step {
                key: Some("h".into()),
                rng: vec!["rn2(2)=0".into()],
                ..Step::default()
            }],
            ..Session::default()
        };
        let trace = SelfCheckReplayer.replay(&session);
        assert_eq!(trace.steps, session.steps);
        assert!(trace.error.is_none());
    }

    #[test]
    fn test_closure_replayer() {
        let replayer = |_: &Session| CandidateTrace::failed("nope");
        let trace = replayer.replay(&Session::default());
        assert_eq!(trace.error.as_deref(), Some("nope"));
    }

    #[test]
    fn test_error_keeps_partial_trace() {
        let partial = CandidateTrace {
            steps: vec![Step::default(), Step::default()],
            ..CandidateTrace::default()
        };
        let trace = ReplayError::Truncated { steps: 2, expected: 5 }.into_trace(partial);
        assert_eq!(trace.steps.len(), 2);
        assert_eq!(trace.error.as_deref(), Some("candidate exited after 2 of 5 steps"));
    }
}
