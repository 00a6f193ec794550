//! Isolated workers.
//!
//! A worker is a loop that receives `run` requests, compares one session per
//! request, and answers with a `result`. It shares nothing with the
//! orchestrator: requests and results travel over channels or pipes.
//!
//! Two launchers are provided: [`ProcessLauncher`] runs each worker as its
//! own OS process (a hung candidate can be killed), and [`ThreadLauncher`]
//! runs workers as threads of the current process.

mod subprocess;
mod thread;

use std::io::{BufRead, Write};
use std::sync::mpsc::Sender;

use nh_compare::policy::policy_by_name;
use nh_compare::replay::Replayer;
use nh_compare::session::{SessionComparator, SessionComparison};
use nh_compare::trace::SessionKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::protocol::{read_message, write_message};
use crate::store::SessionSource;

pub use subprocess::{ProcessHandle, ProcessLauncher, default_worker_exe};
pub use thread::{ThreadHandle, ThreadLauncher};

/// One session to compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub kind: SessionKind,
    pub source: SessionSource,
    /// Scheduling cost; larger tasks are dispatched first.
    pub cost: u64,
    /// Policy name overriding the kind-based choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

impl Task {
    pub fn new(source: SessionSource) -> Self {
        Self {
            name: source.name(),
            kind: source.kind(),
            cost: source.cost(),
            source,
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: Option<String>) -> Self {
        self.policy = policy;
        self
    }
}

/// Orchestrator to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    Run { task: usize, job: Task },
    Exit,
}

/// Worker to orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    Result { task: usize, outcome: WorkerOutcome },
}

/// What a worker learned about one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub kind: SessionKind,
    pub seed: u64,
    pub comparison: SessionComparison,
}

/// Load, replay and compare one task.
///
/// Session and adapter failures end up on the returned comparison.
pub fn execute(task: &Task, replayer: &dyn Replayer) -> WorkerOutcome {
    let session = match task.source.load() {
        Ok(session) => session,
        Err(e) => {
            return WorkerOutcome {
                kind: task.kind,
                seed: 0,
                comparison: SessionComparison::failed(e.to_string()),
            };
        }
    };

    let comparator = match task.policy.as_deref() {
        None => SessionComparator::for_session(&session),
        Some(name) => match policy_by_name(name, &session) {
            Some(policy) => SessionComparator::with_policy(policy),
            None => {
                return WorkerOutcome {
                    kind: session.kind(),
                    seed: session.meta.seed,
                    comparison: SessionComparison::failed(format!("unknown policy {:?}", name)),
                };
            }
        },
    };

    debug!(session = %task.name, policy = comparator.policy_name(), "comparing session");
    WorkerOutcome {
        kind: session.kind(),
        seed: session.meta.seed,
        comparison: comparator.compare(&session, replayer),
    }
}

/// Worker loop over a request stream, until `exit` or end of input.
pub fn serve<R: BufRead, W: Write>(
    mut reader: R,
    mut writer: W,
    replayer: &dyn Replayer,
) -> Result<()> {
    while let Some(request) = read_message(&mut reader)? {
        match request {
            WorkerRequest::Run { task, job } => {
                let outcome = execute(&job, replayer);
                write_message(&mut writer, &WorkerResponse::Result { task, outcome })?;
            }
            WorkerRequest::Exit => break,
        }
    }
    Ok(())
}

/// What the orchestrator hears from its workers.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Finished {
        worker: usize,
        task: usize,
        outcome: WorkerOutcome,
    },
    Exited {
        worker: usize,
        reason: String,
    },
}

/// Starts workers that report to a shared event channel.
pub trait WorkerLauncher {
    type Handle: WorkerHandle;

    /// Start worker `id`. Every event it produces carries `id`.
    fn launch(&self, id: usize, events: Sender<WorkerEvent>) -> Result<Self::Handle>;
}

/// The orchestrator's end of one worker.
pub trait WorkerHandle {
    fn dispatch(&mut self, task: usize, job: &Task) -> Result<()>;

    /// Stop the worker without its cooperation. It may be mid-task.
    fn terminate(self);

    /// Ask an idle worker to exit and wait for it.
    fn shutdown(self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use nh_compare::replay::SelfCheckReplayer;
    use nh_compare::trace::CandidateTrace;
    use std::io::Cursor;
    use std::path::PathBuf;

    const SESSION: &str = r#"{
        "meta": {"seed": 7, "type": "gameplay"},
        "startup": {"rng": ["rn2(2)=1"], "screen": ["welcome"]},
        "steps": [
            {"key": "h", "rng": ["rn2(3)=0"], "screen": ["@"]},
            {"key": "l", "rng": ["rnd(4)=2"], "screen": [" @"]}
        ]
    }"#;

    fn task_in(dir: &std::path::Path, name: &str) -> Task {
        let path = dir.join(name);
        std::fs::write(&path, SESSION).unwrap();
        Task::new(SessionSource::File { path })
    }

    #[test]
    fn test_execute_self_check_passes() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_in(dir.path(), "seed7_gameplay.session.json");
        let outcome = execute(&task, &SelfCheckReplayer);
        assert_eq!(outcome.seed, 7);
        assert_eq!(outcome.kind, SessionKind::Gameplay);
        assert!(outcome.comparison.passed());
        assert_eq!(outcome.comparison.expected_steps, 2);
    }

    #[test]
    fn test_execute_reports_load_and_policy_failures() {
        let missing = Task::new(SessionSource::File {
            path: PathBuf::from("/nonexistent/seed1_gameplay.session.json"),
        });
        let outcome = execute(&missing, &SelfCheckReplayer);
        assert!(!outcome.comparison.passed());
        assert!(outcome.comparison.error.unwrap().starts_with("failed to read"));

        let dir = tempfile::tempdir().unwrap();
        let task = task_in(dir.path(), "seed7_gameplay.session.json")
            .with_policy(Some("lenient".into()));
        let outcome = execute(&task, &SelfCheckReplayer);
        assert_eq!(outcome.comparison.error.as_deref(), Some("unknown policy \"lenient\""));
    }

    #[test]
    fn test_serve_answers_each_run_then_exits() {
        let dir = tempfile::tempdir().unwrap();
        let job = task_in(dir.path(), "seed7_gameplay.session.json");

        let mut input = Vec::new();
        write_message(&mut input, &WorkerRequest::Run { task: 3, job: job.clone() }).unwrap();
        write_message(&mut input, &WorkerRequest::Run { task: 5, job }).unwrap();
        write_message(&mut input, &WorkerRequest::Exit).unwrap();

        let failing = |_: &nh_compare::trace::Session| CandidateTrace::failed("boom");
        let mut output = Vec::new();
        serve(Cursor::new(input), &mut output, &failing).unwrap();

        let mut reader = Cursor::new(output);
        let mut answered = Vec::new();
        while let Some(WorkerResponse::Result { task, outcome }) =
            read_message::<_, WorkerResponse>(&mut reader).unwrap()
        {
            assert_eq!(outcome.comparison.error.as_deref(), Some("boom"));
            answered.push(task);
        }
        assert_eq!(answered, vec![3, 5]);
    }

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(WorkerRequest::Exit).unwrap();
        assert_eq!(json, serde_json::json!({"type": "exit"}));
    }
}
