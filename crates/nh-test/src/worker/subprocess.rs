//! Workers as OS processes running `nh-test-worker`.
//!
//! On Unix each worker leads its own process group, so the candidates it
//! starts share the group and die with it when the worker is terminated.

use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use super::{Task, WorkerEvent, WorkerHandle, WorkerLauncher, WorkerRequest, WorkerResponse};
use crate::adapter::AdapterSpec;
use crate::error::{HarnessError, Result};
use crate::protocol::{read_message, write_message};

const WORKER_BIN: &str = "nh-test-worker";

/// `nh-test-worker` next to the running executable.
pub fn default_worker_exe() -> Result<PathBuf> {
    let current = std::env::current_exe()?;
    Ok(current.with_file_name(format!("{}{}", WORKER_BIN, std::env::consts::EXE_SUFFIX)))
}

#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    exe: PathBuf,
    adapter: AdapterSpec,
}

impl ProcessLauncher {
    pub fn new(exe: PathBuf, adapter: AdapterSpec) -> Self {
        Self { exe, adapter }
    }
}

impl WorkerLauncher for ProcessLauncher {
    type Handle = ProcessHandle;

    fn launch(&self, id: usize, events: Sender<WorkerEvent>) -> Result<ProcessHandle> {
        let adapter = serde_json::to_string(&self.adapter)?;
        let mut command = Command::new(&self.exe);
        command
            .arg("--adapter")
            .arg(adapter)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .map_err(|source| HarnessError::Spawn { worker: id, source })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(HarnessError::Channel(format!("worker {} has no pipes", id)));
        };

        let reader = std::thread::Builder::new()
            .name(format!("worker-{}-reader", id))
            .spawn(move || forward_events(id, BufReader::new(stdout), events))?;

        debug!(worker = id, pid = child.id(), "worker process started");
        Ok(ProcessHandle {
            id,
            child,
            writer: BufWriter::new(stdin),
            reader: Some(reader),
        })
    }
}

/// Relay a worker's responses until its stdout closes.
fn forward_events<R: std::io::BufRead>(id: usize, mut reader: R, events: Sender<WorkerEvent>) {
    let reason = loop {
        match read_message::<_, WorkerResponse>(&mut reader) {
            Ok(Some(WorkerResponse::Result { task, outcome })) => {
                let event = WorkerEvent::Finished {
                    worker: id,
                    task,
                    outcome,
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Ok(None) => break "worker process exited".to_string(),
            Err(e) => break e.to_string(),
        }
    };
    let _ = events.send(WorkerEvent::Exited { worker: id, reason });
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
fn kill_group(pid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::other(format!("pid {} out of range", pid)))?;
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(()),
        _ => Err(err),
    }
}

pub struct ProcessHandle {
    id: usize,
    child: Child,
    writer: BufWriter<ChildStdin>,
    reader: Option<JoinHandle<()>>,
}

impl WorkerHandle for ProcessHandle {
    fn dispatch(&mut self, task: usize, job: &Task) -> Result<()> {
        let request = WorkerRequest::Run {
            task,
            job: job.clone(),
        };
        write_message(&mut self.writer, &request)
            .map_err(|e| HarnessError::Channel(format!("worker {}: {}", self.id, e)))
    }

    fn terminate(mut self) {
        #[cfg(unix)]
        let killed = kill_group(self.child.id());
        #[cfg(not(unix))]
        let killed = self.child.kill();
        if let Err(e) = killed {
            warn!(worker = self.id, error = %e, "failed to kill worker");
        }
        let _ = self.child.wait();
    }

    fn shutdown(mut self) {
        let _ = write_message(&mut self.writer, &WorkerRequest::Exit);
        drop(self.writer);
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}
