//! Drives a candidate executable over a blocking request/response protocol.
//!
//! The candidate is spawned once per session. The harness sends `start`,
//! then one `key` request per recorded step, and waits for each step's
//! capture before sending the next input.

use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use nh_compare::replay::{ReplayError, Replayer};
use nh_compare::trace::{CandidateTrace, Session, SessionKind, Step};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::protocol::{read_message, write_message};

/// Harness to candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverRequest {
    Start {
        name: String,
        seed: u64,
        kind: SessionKind,
        options: serde_json::Map<String, serde_json::Value>,
    },
    Key {
        key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<serde_json::Value>,
    },
    Finish,
}

/// Candidate to harness: the capture of the last request, or a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverResponse {
    Step(Step),
    Error { message: String },
}

/// Kills the candidate if the replay ends early.
struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            let _ = self.0.kill();
        }
        let _ = self.0.wait();
    }
}

/// The candidate's pipes.
struct DriverPipe {
    writer: BufWriter<ChildStdin>,
    reader: BufReader<ChildStdout>,
    expected: usize,
}

impl DriverPipe {
    /// Send one request and wait for its capture. `captured` is the number
    /// of input steps already answered.
    fn request(&mut self, request: &DriverRequest, captured: usize) -> Result<Step, ReplayError> {
        let expected = self.expected;
        let truncated = || ReplayError::Truncated {
            steps: captured,
            expected,
        };
        if write_message(&mut self.writer, request).is_err() {
            return Err(truncated());
        }
        match read_message(&mut self.reader) {
            Ok(Some(DriverResponse::Step(step))) => Ok(step),
            Ok(Some(DriverResponse::Error { message })) => Err(ReplayError::Candidate {
                step: captured + usize::from(matches!(request, DriverRequest::Key { .. })),
                message,
            }),
            Ok(None) => Err(truncated()),
            Err(e) => Err(ReplayError::Protocol(e.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandReplayer {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandReplayer {
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }

    fn drive(&self, session: &Session, trace: &mut CandidateTrace) -> Result<(), ReplayError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ReplayError::Launch(format!("{}: {}", self.program.display(), e)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let _guard = ChildGuard(child);
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            return Err(ReplayError::Launch("candidate pipes unavailable".into()));
        };

        let mut pipe = DriverPipe {
            writer: BufWriter::new(stdin),
            reader: BufReader::new(stdout),
            expected: session.steps.len(),
        };

        let start = DriverRequest::Start {
            name: session.name().to_string(),
            seed: session.meta.seed,
            kind: session.kind(),
            options: session.meta.options.clone(),
        };
        trace.startup = pipe.request(&start, 0)?;
        for step in &session.steps {
            let key = DriverRequest::Key {
                key: step.key.clone(),
                meta: step.meta.clone(),
            };
            let captured = pipe.request(&key, trace.steps.len())?;
            trace.steps.push(captured);
        }
        if write_message(&mut pipe.writer, &DriverRequest::Finish).is_err() {
            debug!(session = session.name(), "candidate closed before finish");
        }
        Ok(())
    }
}

impl Replayer for CommandReplayer {
    fn replay(&self, session: &Session) -> CandidateTrace {
        let mut trace = CandidateTrace::default();
        match self.drive(session, &mut trace) {
            Ok(()) => trace,
            Err(e) => {
                warn!(session = session.name(), error = %e, "candidate replay failed");
                e.into_trace(trace)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(DriverRequest::Key {
            key: Some("h".into()),
            meta: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "key", "key": "h"}));
        let json = serde_json::to_value(DriverRequest::Finish).unwrap();
        assert_eq!(json, serde_json::json!({"type": "finish"}));
    }

    #[test]
    fn test_response_carries_step_fields_inline() {
        let response: DriverResponse =
            serde_json::from_str(r#"{"type":"step","rng":["rn2(2)=1"],"screen":["@"]}"#).unwrap();
        match response {
            DriverResponse::Step(step) => {
                assert_eq!(step.rng, vec!["rn2(2)=1"]);
                assert_eq!(step.screen, vec!["@"]);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_missing_program_is_reported_on_trace() {
        let replayer = CommandReplayer::new(PathBuf::from("/nonexistent/candidate"), vec![]);
        let trace = replayer.replay(&Session::default());
        assert!(trace.is_empty());
        assert!(trace.error.unwrap().starts_with("failed to start candidate"));
    }
}
