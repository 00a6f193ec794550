//! Harness configuration.
//!
//! Built from defaults, then environment, then command-line flags applied by
//! the binaries.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

pub const ENV_GOLDEN_BRANCH: &str = "GOLDEN_BRANCH";
pub const ENV_JOBS: &str = "NH_TEST_JOBS";
pub const ENV_TIMEOUT_MS: &str = "NH_TEST_TIMEOUT_MS";
pub const ENV_WORKER: &str = "NH_TEST_WORKER";

pub const DEFAULT_GOLDEN_BRANCH: &str = "golden";
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_SESSIONS_DIRS: &[&str] = &["sessions", "maps"];

/// Worker count when none is configured: the CPU count, kept within 4..=8.
pub fn default_jobs() -> usize {
    let cpus = std::thread::available_parallelism().map_or(4, |n| n.get());
    cpus.clamp(4, 8)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Maximum number of concurrent workers.
    pub jobs: usize,
    /// Per-task deadline, in milliseconds.
    pub timeout_ms: u64,
    /// Stop scheduling after the first failed task.
    pub fail_fast: bool,
    /// Branch holding the golden session corpus.
    pub golden_branch: String,
    /// Load sessions from `golden_branch` instead of the working copy.
    pub use_golden: bool,
    pub sessions_dirs: Vec<PathBuf>,
    /// Worker executable; defaults to the `nh-test-worker` next to the
    /// running binary.
    pub worker_exe: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            fail_fast: false,
            golden_branch: DEFAULT_GOLDEN_BRANCH.to_string(),
            use_golden: false,
            sessions_dirs: DEFAULT_SESSIONS_DIRS.iter().map(PathBuf::from).collect(),
            worker_exe: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| HarnessError::Config(format!("{}={:?} is not a valid value", key, value)))
}

impl HarnessConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(branch) = lookup(ENV_GOLDEN_BRANCH).filter(|b| !b.trim().is_empty()) {
            config.golden_branch = branch.trim().to_string();
        }
        if let Some(jobs) = lookup(ENV_JOBS) {
            config.jobs = parse_var(ENV_JOBS, &jobs)?;
        }
        if let Some(ms) = lookup(ENV_TIMEOUT_MS) {
            config.timeout_ms = parse_var(ENV_TIMEOUT_MS, &ms)?;
        }
        if let Some(exe) = lookup(ENV_WORKER).filter(|e| !e.is_empty()) {
            config.worker_exe = Some(PathBuf::from(exe));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(HarnessError::Config("jobs must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(HarnessError::Config("timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Number of workers for `tasks` tasks.
    pub fn effective_jobs(&self, tasks: usize) -> usize {
        self.jobs.min(tasks).max(1)
    }

    /// The golden branch, when golden sessions are selected.
    pub fn golden(&self) -> Option<&str> {
        self.use_golden.then_some(self.golden_branch.as_str())
    }
}
