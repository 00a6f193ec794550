//! Task results and result bundles, with human-readable and machine-readable
//! output.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::diff::{Channel, ChannelMetrics, ChannelResult, Divergence};
use crate::session::SessionComparison;
use crate::trace::SessionKind;

/// Terminal state of a task.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    TimedOut,
    Errored,
    /// Never started because the run stopped early.
    Cancelled,
}

/// Outcome of one session comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub session: String,
    #[serde(rename = "type")]
    pub kind: SessionKind,
    #[serde(default)]
    pub seed: u64,
    pub status: TaskStatus,
    pub passed: bool,
    pub metrics: BTreeMap<Channel, ChannelMetrics>,
    pub first_divergence: Option<Divergence>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn cancelled(session: impl Into<String>, kind: SessionKind) -> Self {
        let mut recorder = TaskRecorder::begin(session).with_meta(kind, 0);
        recorder.fail("Cancelled after an earlier failure");
        recorder.finish(TaskStatus::Cancelled)
    }

    pub fn metric(&self, channel: Channel) -> ChannelMetrics {
        self.metrics.get(&channel).copied().unwrap_or_default()
    }
}

/// Builds a [`TaskResult`] while a task runs.
///
/// Channel scores accumulate as they arrive; [`finish`](Self::finish)
/// consumes the recorder, stamping the duration and freezing the verdict.
#[derive(Debug)]
pub struct TaskRecorder {
    session: String,
    kind: SessionKind,
    seed: u64,
    metrics: BTreeMap<Channel, ChannelMetrics>,
    first_divergence: Option<Divergence>,
    error: Option<String>,
    started: Instant,
}

impl TaskRecorder {
    pub fn begin(session: impl Into<String>) -> Self {
        let session = session.into();
        Self {
            kind: SessionKind::infer_from_name(&session),
            session,
            seed: 0,
            metrics: BTreeMap::new(),
            first_divergence: None,
            error: None,
            started: Instant::now(),
        }
    }

    pub fn with_meta(mut self, kind: SessionKind, seed: u64) -> Self {
        self.kind = kind;
        self.seed = seed;
        self
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn record(&mut self, channel: Channel, result: &ChannelResult) {
        self.metrics.entry(channel).or_default().add(result.metrics());
        if self.first_divergence.is_none() {
            self.first_divergence = result.first_divergence.clone();
        }
    }

    /// Record every channel of a session comparison, in channel order.
    pub fn record_comparison(&mut self, comparison: &SessionComparison) {
        for (channel, result) in &comparison.channels {
            self.record(*channel, result);
        }
        if let Some(error) = &comparison.error {
            self.fail(error.clone());
        }
    }

    /// Keeps the first error only.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(error.into());
        }
    }

    /// Finalize as timed out after `timeout`.
    pub fn time_out(mut self, timeout: Duration) -> TaskResult {
        self.fail(format!("External timeout after {}ms", timeout.as_millis()));
        self.finish(TaskStatus::TimedOut)
    }

    pub fn finish(self, status: TaskStatus) -> TaskResult {
        let passed = status == TaskStatus::Completed
            && self.error.is_none()
            && self.first_divergence.is_none()
            && self.metrics.values().all(ChannelMetrics::is_complete);
        TaskResult {
            duration_ms: self.started.elapsed().as_millis() as u64,
            session: self.session,
            kind: self.kind,
            seed: self.seed,
            status,
            passed,
            metrics: self.metrics,
            first_divergence: self.first_divergence,
            error: self.error,
        }
    }
}

/// Aggregate counts over a bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
    pub per_channel_totals: BTreeMap<Channel, ChannelMetrics>,
}

/// Every task result of a run, in submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBundle {
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub golden_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub results: Vec<TaskResult>,
    pub summary: BundleSummary,
}

impl ResultBundle {
    pub fn from_results(results: Vec<TaskResult>) -> Self {
        let mut summary = BundleSummary {
            total: results.len(),
            ..BundleSummary::default()
        };
        for result in &results {
            if result.passed {
                summary.passed += 1;
            } else {
                summary.failed += 1;
            }
            for (channel, metrics) in &result.metrics {
                summary.per_channel_totals.entry(*channel).or_default().add(*metrics);
            }
        }
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            golden_branch: None,
            commit: None,
            results,
            summary,
        }
    }

    pub fn with_golden_branch(mut self, branch: Option<String>) -> Self {
        self.golden_branch = branch;
        self
    }

    pub fn with_commit(mut self, commit: Option<String>) -> Self {
        self.commit = commit;
        self
    }

    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }

    pub fn failed_sessions(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.session.as_str())
            .collect()
    }

    /// Passed/total per session kind.
    pub fn per_kind(&self) -> BTreeMap<SessionKind, (usize, usize)> {
        let mut counts: BTreeMap<SessionKind, (usize, usize)> = BTreeMap::new();
        for result in &self.results {
            let entry = counts.entry(result.kind).or_default();
            entry.1 += 1;
            if result.passed {
                entry.0 += 1;
            }
        }
        counts
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }

    /// Print the per-task lines and the summary block to stdout.
    pub fn print_summary(&self) {
        for result in &self.results {
            println!("{}", format_task_line(result));
        }
        println!("\n============================================================");
        println!("{}", format_summary(self));
        println!("============================================================\n");
    }
}

const REPORTED_CHANNELS: [Channel; 4] = [Channel::Rng, Channel::Screen, Channel::Color, Channel::Event];

/// One line per task: verdict, per-channel fractions, duration.
pub fn format_task_line(result: &TaskResult) -> String {
    let verdict = if result.passed { "PASS" } else { "FAIL" };
    let mut line = format!("[{}] {}:", verdict, result.session);
    for channel in REPORTED_CHANNELS {
        line.push_str(&format!(" {}={}", channel, result.metric(channel).fraction()));
    }
    if let Some(animation) = result.metrics.get(&Channel::Animation) {
        line.push_str(&format!(" {}={}", Channel::Animation, animation.fraction()));
    }
    line.push_str(&format!(" ({}ms)", result.duration_ms));
    if result.status != TaskStatus::Completed {
        line.push_str(&format!(" {}", result.status));
    }
    if let Some(error) = &result.error {
        line.push_str(&format!(": {}", error));
    } else if let Some(div) = &result.first_divergence {
        line.push_str(&format!(" -- {}", div));
    }
    line
}

/// Summary block: overall counts, per-kind counts, per-channel totals.
pub fn format_summary(bundle: &ResultBundle) -> String {
    let s = &bundle.summary;
    let mut lines = Vec::new();
    if let Some(commit) = &bundle.commit {
        lines.push(format!("Commit: {}", commit));
    }
    if let Some(branch) = &bundle.golden_branch {
        lines.push(format!("Golden branch: {}", branch));
    }
    lines.push(format!("Sessions: {}/{} passed ({} failed)", s.passed, s.total, s.failed));
    for (kind, (passed, total)) in bundle.per_kind() {
        lines.push(format!("  {}: {}/{}", kind, passed, total));
    }
    for (channel, metrics) in &s.per_channel_totals {
        lines.push(format!("{}: {}", channel, metrics.fraction()));
    }
    lines.join("\n")
}
