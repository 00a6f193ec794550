//! Workers as threads of the current process.
//!
//! A thread cannot be killed, so terminating a worker detaches it: its
//! request channel is dropped and whatever it reports later carries a
//! worker id the orchestrator no longer listens to.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use nh_compare::replay::Replayer;
use tracing::debug;

use super::{Task, WorkerEvent, WorkerHandle, WorkerLauncher, WorkerRequest, execute};
use crate::adapter::AdapterSpec;
use crate::error::{HarnessError, Result};

#[derive(Clone)]
pub struct ThreadLauncher {
    replayer: Arc<dyn Replayer>,
}

impl ThreadLauncher {
    pub fn new(adapter: &AdapterSpec) -> Self {
        Self {
            replayer: Arc::from(adapter.build()),
        }
    }

    /// Workers sharing one replayer.
    pub fn with_replayer(replayer: Arc<dyn Replayer>) -> Self {
        Self { replayer }
    }
}

/// Reports the worker's exit however its loop ends.
struct ExitGuard {
    id: usize,
    events: Sender<WorkerEvent>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let reason = if std::thread::panicking() {
            "worker thread panicked"
        } else {
            "worker thread stopped"
        };
        let _ = self.events.send(WorkerEvent::Exited {
            worker: self.id,
            reason: reason.to_string(),
        });
    }
}

fn worker_loop(guard: ExitGuard, requests: Receiver<WorkerRequest>, replayer: Arc<dyn Replayer>) {
    while let Ok(request) = requests.recv() {
        match request {
            WorkerRequest::Run { task, job } => {
                let outcome = execute(&job, replayer.as_ref());
                let event = WorkerEvent::Finished {
                    worker: guard.id,
                    task,
                    outcome,
                };
                if guard.events.send(event).is_err() {
                    break;
                }
            }
            WorkerRequest::Exit => break,
        }
    }
}

impl WorkerLauncher for ThreadLauncher {
    type Handle = ThreadHandle;

    fn launch(&self, id: usize, events: Sender<WorkerEvent>) -> Result<ThreadHandle> {
        let (tx, rx) = mpsc::channel();
        let replayer = Arc::clone(&self.replayer);
        let guard = ExitGuard { id, events };
        let join = std::thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || worker_loop(guard, rx, replayer))
            .map_err(|source| HarnessError::Spawn { worker: id, source })?;
        debug!(worker = id, "worker thread started");
        Ok(ThreadHandle {
            id,
            requests: tx,
            join,
        })
    }
}

pub struct ThreadHandle {
    id: usize,
    requests: Sender<WorkerRequest>,
    join: JoinHandle<()>,
}

impl WorkerHandle for ThreadHandle {
    fn dispatch(&mut self, task: usize, job: &Task) -> Result<()> {
        self.requests
            .send(WorkerRequest::Run {
                task,
                job: job.clone(),
            })
            .map_err(|_| HarnessError::Channel(format!("worker {} is gone", self.id)))
    }

    fn terminate(self) {
        debug!(worker = self.id, "detaching worker thread");
    }

    fn shutdown(self) {
        let _ = self.requests.send(WorkerRequest::Exit);
        let _ = self.join.join();
    }
}
