//! Compare one recorded session against a candidate.
//!
//! The candidate side is either a trace captured earlier (`--trace`) or a
//! live replay through a command (`--live --replay-cmd`). The comparison
//! runs in one isolated worker under the usual deadline.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;

use nh_compare::diff::format_divergence;
use nh_compare::report::format_task_line;
use nh_test::{AdapterSpec, HarnessConfig, SessionSource, Task, logging, run_with_adapter};

#[derive(Parser, Debug)]
#[command(name = "nh-session-compare")]
#[command(about = "Compare a recorded session with a candidate trace", long_about = None)]
struct Args {
    /// Reference session file (*.session.json or *.session.json.gz)
    session: PathBuf,

    /// Previously captured candidate trace
    #[arg(long = "trace", conflicts_with = "live")]
    trace: Option<PathBuf>,

    /// Replay the candidate now instead of reading a trace
    #[arg(long = "live", requires = "replay_cmd")]
    live: bool,

    /// Command driving the candidate, for --live
    #[arg(long = "replay-cmd")]
    replay_cmd: Option<String>,

    /// Extra argument for the replay command (repeatable)
    #[arg(long = "replay-arg")]
    replay_args: Vec<String>,

    /// Comparator policy, instead of the one chosen by session type
    #[arg(long = "policy")]
    policy: Option<String>,

    /// Print the result as JSON
    #[arg(long = "json")]
    json: bool,

    /// Deadline for the comparison, in milliseconds
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Worker executable (defaults to nh-test-worker next to this binary)
    #[arg(long = "worker")]
    worker: Option<PathBuf>,

    /// Compare on a thread of this process instead of a worker process
    #[arg(long = "in-process")]
    in_process: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logging::init("info");

    let adapter = match (&args.trace, &args.replay_cmd) {
        (Some(trace), _) => AdapterSpec::TraceFile {
            path: trace.clone(),
        },
        (None, Some(cmd)) if args.live => AdapterSpec::command(cmd, &args.replay_args)
            .context("--replay-cmd is empty")?,
        _ => bail!("either --trace <file> or --live --replay-cmd <cmd> is required"),
    };

    let mut config = HarnessConfig::from_env()?;
    config.jobs = 1;
    if let Some(ms) = args.timeout_ms {
        config.timeout_ms = ms;
    }
    if args.worker.is_some() {
        config.worker_exe = args.worker.clone();
    }

    let source = SessionSource::File {
        path: args.session.clone(),
    };
    let task = Task::new(source).with_policy(args.policy.clone());
    let mut results = run_with_adapter(&config, &adapter, args.in_process, &[task])
        .with_context(|| format!("comparing {}", args.session.display()))?;
    let result = results.pop().context("no result for the session")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", format_task_line(&result));
        if result.first_divergence.is_some() {
            println!("{}", format_divergence(result.first_divergence.as_ref()));
        }
    }

    Ok(if result.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
