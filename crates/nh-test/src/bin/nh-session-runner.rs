//! Batch session runner.
//!
//! Discovers recorded sessions, compares each one against the candidate on
//! a pool of workers, and prints one line per session plus a summary.
//! Exits non-zero when any session fails.

use std::path::PathBuf;
use std::process::{Command, ExitCode};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use nh_compare::baseline::BaselineDiff;
use nh_compare::report::ResultBundle;
use nh_compare::trace::SessionKind;
use nh_test::store::{self, SessionFilter};
use nh_test::{AdapterSpec, HarnessConfig, Task, logging, run_with_adapter};

const RESULTS_MARKER: &str = "__RESULTS_JSON__";

#[derive(Parser, Debug)]
#[command(name = "nh-session-runner")]
#[command(about = "Replay recorded sessions against a candidate", long_about = None)]
struct Args {
    /// Only sessions of these types (gameplay, chargen, map, interface, special)
    #[arg(long = "type", value_delimiter = ',')]
    kinds: Vec<SessionKind>,

    /// Only these sessions, by file name with or without the suffix
    #[arg(long = "name", value_delimiter = ',')]
    names: Vec<String>,

    /// Only the sessions listed in this file (see --write-failed)
    #[arg(long = "failed-file")]
    failed_file: Option<PathBuf>,

    /// Number of parallel workers
    #[arg(short = 'j', long = "jobs")]
    jobs: Option<usize>,

    /// Per-session deadline, in milliseconds
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Stop scheduling after the first failure
    #[arg(long = "fail-fast")]
    fail_fast: bool,

    /// Read sessions from the golden branch (default: $GOLDEN_BRANCH or "golden")
    #[arg(long = "golden", num_args = 0..=1, value_name = "BRANCH")]
    golden: Option<Option<String>>,

    /// Directory holding session files (repeatable)
    #[arg(long = "sessions-dir")]
    sessions_dirs: Vec<PathBuf>,

    /// Command driving the candidate
    #[arg(long = "replay-cmd", conflicts_with_all = ["trace_dir", "self_check"])]
    replay_cmd: Option<String>,

    /// Extra argument for the replay command (repeatable)
    #[arg(long = "replay-arg")]
    replay_args: Vec<String>,

    /// Directory of captured traces, one <session>.trace.json per session
    #[arg(long = "trace-dir", conflicts_with = "self_check")]
    trace_dir: Option<PathBuf>,

    /// Compare every session with itself to check the harness
    #[arg(long = "self-check")]
    self_check: bool,

    /// Comparator policy for every session
    #[arg(long = "policy")]
    policy: Option<String>,

    /// Print the result bundle as JSON after the summary
    #[arg(long = "json")]
    json: bool,

    /// Run workers as threads of this process
    #[arg(long = "in-process")]
    in_process: bool,

    /// Worker executable (defaults to nh-test-worker next to this binary)
    #[arg(long = "worker")]
    worker: Option<PathBuf>,

    /// Previous result bundle to diff against
    #[arg(long = "baseline")]
    baseline: Option<PathBuf>,

    /// Write the names of failed sessions to this file
    #[arg(long = "write-failed")]
    write_failed: Option<PathBuf>,

    /// Also save the result bundle to this file
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

impl Args {
    fn adapter(&self) -> Result<AdapterSpec> {
        if self.self_check {
            return Ok(AdapterSpec::SelfCheck);
        }
        if let Some(dir) = &self.trace_dir {
            return Ok(AdapterSpec::TraceDir { dir: dir.clone() });
        }
        match &self.replay_cmd {
            Some(cmd) => {
                AdapterSpec::command(cmd, &self.replay_args).context("--replay-cmd is empty")
            }
            None => bail!("one of --replay-cmd, --trace-dir or --self-check is required"),
        }
    }

    fn config(&self) -> Result<HarnessConfig> {
        let mut config = HarnessConfig::from_env()?;
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout_ms = ms;
        }
        config.fail_fast = self.fail_fast;
        if let Some(branch) = &self.golden {
            config.use_golden = true;
            if let Some(branch) = branch {
                config.golden_branch = branch.clone();
            }
        }
        if !self.sessions_dirs.is_empty() {
            config.sessions_dirs = self.sessions_dirs.clone();
        }
        if self.worker.is_some() {
            config.worker_exe = self.worker.clone();
        }
        config.validate()?;
        Ok(config)
    }

    fn filter(&self) -> Result<SessionFilter> {
        let mut filter = SessionFilter {
            kinds: self.kinds.clone(),
            names: self.names.clone(),
        };
        if let Some(path) = &self.failed_file {
            filter
                .add_names_from_file(path)
                .with_context(|| format!("reading {}", path.display()))?;
        }
        Ok(filter)
    }
}

fn current_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logging::init("info");

    let adapter = args.adapter()?;
    let config = args.config()?;
    let filter = args.filter()?;

    let sources = match config.golden() {
        Some(branch) => store::discover_golden(branch, &config.sessions_dirs)
            .with_context(|| format!("listing sessions on {}", branch))?,
        None => store::discover(&config.sessions_dirs),
    };
    let sources = filter.apply(sources);
    if sources.is_empty() {
        bail!("no sessions matched in {:?}", config.sessions_dirs);
    }
    if filter.names.len() > sources.len() {
        warn!(
            requested = filter.names.len(),
            found = sources.len(),
            "some requested sessions were not found"
        );
    }

    let tasks: Vec<Task> = sources
        .into_iter()
        .map(|source| Task::new(source).with_policy(args.policy.clone()))
        .collect();
    info!(sessions = tasks.len(), golden = config.golden(), "running sessions");

    let results = run_with_adapter(&config, &adapter, args.in_process, &tasks)?;
    let bundle = ResultBundle::from_results(results)
        .with_golden_branch(config.golden().map(str::to_string))
        .with_commit(current_commit());

    bundle.print_summary();

    if let Some(path) = &args.baseline {
        let baseline =
            store::load_bundle(path).with_context(|| format!("loading baseline {}", path.display()))?;
        println!("{}", BaselineDiff::between(&baseline, &bundle));
    }
    if let Some(path) = &args.write_failed {
        store::write_failed_list(path, &bundle)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if let Some(path) = &args.output {
        store::write_json_file(path, &bundle)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if args.json {
        println!("{}", RESULTS_MARKER);
        println!("{}", bundle.to_json());
    }

    Ok(if bundle.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
