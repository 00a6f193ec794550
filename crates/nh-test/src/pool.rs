//! Task Orchestrator.
//!
//! Spreads tasks over a fixed pool of workers. Each task moves from pending
//! to assigned to exactly one terminal state; results come back in
//! submission order whatever order they complete in.
//!
//! Scheduling is longest-first: tasks are sorted once by descending cost
//! and idle workers pull from that single queue. Every assigned task has a
//! deadline. When it passes, the task is finalized as timed out, its worker
//! is terminated and a fresh worker takes its place.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use nh_compare::report::{TaskRecorder, TaskResult, TaskStatus, format_task_line};
use tracing::{debug, info, warn};

use crate::adapter::AdapterSpec;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::worker::{
    ProcessLauncher, Task, ThreadLauncher, WorkerEvent, WorkerHandle, WorkerLauncher,
    WorkerOutcome, default_worker_exe,
};

/// A task in flight on one worker.
struct Assignment {
    task: usize,
    recorder: TaskRecorder,
    deadline: Instant,
}

struct Slot<H> {
    worker: usize,
    handle: H,
    current: Option<Assignment>,
}

pub struct Orchestrator<L: WorkerLauncher> {
    launcher: L,
    config: HarnessConfig,
}

impl<L: WorkerLauncher> Orchestrator<L> {
    pub fn new(launcher: L, config: HarnessConfig) -> Self {
        Self { launcher, config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run every task to a terminal state.
    ///
    /// Returns one result per task, in the order given. Only harness faults
    /// are errors; candidate failures and timeouts are results.
    pub fn run(&self, tasks: &[Task]) -> Result<Vec<TaskResult>> {
        self.config.validate()?;
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let mut run = Run::start(&self.launcher, &self.config, tasks)?;
        let outcome = run.drive();
        run.shutdown();
        outcome?;
        run.into_results()
    }

    /// Run one task on a single worker, under the same deadline.
    pub fn run_single(&self, task: &Task) -> Result<TaskResult> {
        let mut results = self.run(std::slice::from_ref(task))?;
        results
            .pop()
            .ok_or(HarnessError::Stalled { pending: 1 })
    }
}

/// Run `tasks` on worker processes, or on threads when `in_process` is set.
pub fn run_with_adapter(
    config: &HarnessConfig,
    adapter: &AdapterSpec,
    in_process: bool,
    tasks: &[Task],
) -> Result<Vec<TaskResult>> {
    if in_process {
        return Orchestrator::new(ThreadLauncher::new(adapter), config.clone()).run(tasks);
    }
    let exe = match &config.worker_exe {
        Some(exe) => exe.clone(),
        None => default_worker_exe()?,
    };
    debug!(worker = %exe.display(), "using worker executable");
    Orchestrator::new(ProcessLauncher::new(exe, adapter.clone()), config.clone()).run(tasks)
}

/// Dispatch order: descending cost, ties in submission order.
pub fn schedule_order(tasks: &[Task]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..tasks.len()).collect();
    order.sort_by(|&a, &b| tasks[b].cost.cmp(&tasks[a].cost));
    order
}

/// State of one `Orchestrator::run` call.
struct Run<'a, L: WorkerLauncher> {
    launcher: &'a L,
    config: &'a HarnessConfig,
    tasks: &'a [Task],
    queue: VecDeque<usize>,
    results: Vec<Option<TaskResult>>,
    resolved: usize,
    slots: Vec<Slot<L::Handle>>,
    events_tx: Sender<WorkerEvent>,
    events: Receiver<WorkerEvent>,
    next_worker: usize,
    respawns: usize,
    max_respawns: usize,
    stopping: bool,
}

impl<'a, L: WorkerLauncher> Run<'a, L> {
    fn start(launcher: &'a L, config: &'a HarnessConfig, tasks: &'a [Task]) -> Result<Self> {
        let jobs = config.effective_jobs(tasks.len());
        let (events_tx, events) = mpsc::channel();
        let mut run = Self {
            launcher,
            config,
            tasks,
            queue: schedule_order(tasks).into(),
            results: vec![None; tasks.len()],
            resolved: 0,
            slots: Vec::with_capacity(jobs),
            events_tx,
            events,
            next_worker: 0,
            respawns: 0,
            max_respawns: tasks.len() + jobs * 2,
            stopping: false,
        };
        info!(tasks = tasks.len(), workers = jobs, timeout_ms = config.timeout_ms, "starting run");
        for _ in 0..jobs {
            let slot = run.spawn()?;
            run.slots.push(slot);
        }
        Ok(run)
    }

    fn spawn(&mut self) -> Result<Slot<L::Handle>> {
        let worker = self.next_worker;
        self.next_worker += 1;
        let handle = self.launcher.launch(worker, self.events_tx.clone())?;
        Ok(Slot {
            worker,
            handle,
            current: None,
        })
    }

    /// Swap the worker in slot `index` for a fresh one, terminating the old
    /// one.
    fn replace(&mut self, index: usize) -> Result<()> {
        self.respawns += 1;
        if self.respawns > self.max_respawns {
            return Err(HarnessError::CrashLoop {
                respawns: self.respawns,
                tasks: self.tasks.len(),
            });
        }
        let fresh = self.spawn()?;
        let old = std::mem::replace(&mut self.slots[index], fresh);
        debug!(old = old.worker, new = self.slots[index].worker, "replaced worker");
        old.handle.terminate();
        Ok(())
    }

    fn resolve(&mut self, task: usize, result: TaskResult) {
        if !result.passed && self.config.fail_fast && !self.stopping {
            warn!(session = %result.session, "fail-fast: cancelling remaining tasks");
            self.stopping = true;
        }
        self.resolved += 1;
        info!(done = self.resolved, total = self.tasks.len(), "{}", format_task_line(&result));
        self.results[task] = Some(result);
    }

    fn cancel_pending(&mut self) {
        let tasks = self.tasks;
        while let Some(task) = self.queue.pop_front() {
            let job = &tasks[task];
            let result = TaskResult::cancelled(job.name.clone(), job.kind);
            self.resolve(task, result);
        }
    }

    /// Hand pending tasks to idle workers.
    fn assign(&mut self) -> Result<()> {
        let tasks = self.tasks;
        let mut index = 0;
        while index < self.slots.len() {
            if self.slots[index].current.is_some() {
                index += 1;
                continue;
            }
            let Some(task) = self.queue.pop_front() else {
                break;
            };
            let job = &tasks[task];
            let slot = &mut self.slots[index];
            match slot.handle.dispatch(task, job) {
                Ok(()) => {
                    debug!(worker = slot.worker, session = %job.name, "assigned");
                    slot.current = Some(Assignment {
                        task,
                        recorder: TaskRecorder::begin(job.name.clone()).with_meta(job.kind, 0),
                        deadline: Instant::now() + self.config.timeout(),
                    });
                    index += 1;
                }
                Err(e) => {
                    warn!(worker = slot.worker, error = %e, "dispatch failed, replacing worker");
                    self.queue.push_front(task);
                    self.replace(index)?;
                }
            }
        }
        Ok(())
    }

    fn slot_of(&self, worker: usize) -> Option<usize> {
        self.slots.iter().position(|s| s.worker == worker)
    }

    fn on_finished(&mut self, worker: usize, task: usize, outcome: WorkerOutcome) {
        let Some(index) = self.slot_of(worker) else {
            debug!(worker, task, "ignoring result from a retired worker");
            return;
        };
        let slot = &mut self.slots[index];
        if slot.current.as_ref().map(|a| a.task) != Some(task) {
            debug!(worker, task, "ignoring result for a task no longer assigned");
            return;
        }
        let Some(assignment) = slot.current.take() else {
            return;
        };
        let mut recorder = assignment.recorder.with_meta(outcome.kind, outcome.seed);
        recorder.record_comparison(&outcome.comparison);
        self.resolve(task, recorder.finish(TaskStatus::Completed));
    }

    fn on_exited(&mut self, worker: usize, reason: String) -> Result<()> {
        let Some(index) = self.slot_of(worker) else {
            return Ok(());
        };
        warn!(worker, %reason, "worker exited");
        if let Some(assignment) = self.slots[index].current.take() {
            let mut recorder = assignment.recorder;
            recorder.fail(format!("Worker exited: {}", reason));
            self.resolve(assignment.task, recorder.finish(TaskStatus::Errored));
        }
        if self.resolved < self.tasks.len() {
            self.replace(index)?;
        }
        Ok(())
    }

    fn expire(&mut self, now: Instant) -> Result<()> {
        for index in 0..self.slots.len() {
            let expired = self.slots[index]
                .current
                .as_ref()
                .is_some_and(|a| a.deadline <= now);
            if !expired {
                continue;
            }
            let Some(assignment) = self.slots[index].current.take() else {
                continue;
            };
            let result = assignment.recorder.time_out(self.config.timeout());
            warn!(
                worker = self.slots[index].worker,
                session = %result.session,
                "task timed out, terminating worker"
            );
            self.resolve(assignment.task, result);
            self.replace(index)?;
        }
        Ok(())
    }

    fn drive(&mut self) -> Result<()> {
        while self.resolved < self.tasks.len() {
            if self.stopping {
                self.cancel_pending();
            }
            self.assign()?;

            let Some(deadline) = self
                .slots
                .iter()
                .filter_map(|s| s.current.as_ref().map(|a| a.deadline))
                .min()
            else {
                if self.resolved < self.tasks.len() && self.queue.is_empty() {
                    return Err(HarnessError::Stalled {
                        pending: self.tasks.len() - self.resolved,
                    });
                }
                continue;
            };

            let wait = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(wait.max(Duration::from_millis(1))) {
                Ok(WorkerEvent::Finished {
                    worker,
                    task,
                    outcome,
                }) => self.on_finished(worker, task, outcome),
                Ok(WorkerEvent::Exited { worker, reason }) => self.on_exited(worker, reason)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(HarnessError::Channel("event channel closed".into()));
                }
            }
            self.expire(Instant::now())?;
        }
        Ok(())
    }

    /// Stop every worker: idle ones politely, busy ones by force.
    fn shutdown(&mut self) {
        for slot in self.slots.drain(..) {
            if slot.current.is_some() {
                slot.handle.terminate();
            } else {
                slot.handle.shutdown();
            }
        }
    }

    fn into_results(self) -> Result<Vec<TaskResult>> {
        let pending = self.results.iter().filter(|r| r.is_none()).count();
        self.results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(HarnessError::Stalled { pending })
    }
}
