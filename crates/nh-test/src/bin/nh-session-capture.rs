//! Replay a session through a candidate command and save what it produced.
//!
//! The written trace can be compared later with
//! `nh-session-compare --trace`, or in bulk with `nh-session-runner
//! --trace-dir`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use nh_compare::replay::Replayer;
use nh_test::adapter::trace_path_for;
use nh_test::store::write_trace;
use nh_test::{AdapterSpec, SessionSource, logging};

#[derive(Parser, Debug)]
#[command(name = "nh-session-capture")]
#[command(about = "Capture a candidate trace for a recorded session", long_about = None)]
struct Args {
    /// Reference session file
    session: PathBuf,

    /// Command driving the candidate
    #[arg(long = "replay-cmd")]
    replay_cmd: String,

    /// Extra argument for the replay command (repeatable)
    #[arg(long = "replay-arg")]
    replay_args: Vec<String>,

    /// Output file; `.gz` compresses. Defaults to <session>.trace.json in
    /// the current directory.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logging::init("info");

    let source = SessionSource::File {
        path: args.session.clone(),
    };
    let session = source
        .load()
        .with_context(|| format!("loading {}", args.session.display()))?;

    let replayer = AdapterSpec::command(&args.replay_cmd, &args.replay_args)
        .context("--replay-cmd is empty")?
        .build();

    let trace = replayer.replay(&session);
    let output = args
        .output
        .unwrap_or_else(|| trace_path_for(Path::new("."), session.name()));
    write_trace(&output, &trace).with_context(|| format!("writing {}", output.display()))?;
    info!(
        session = session.name(),
        steps = trace.steps.len(),
        expected = session.steps.len(),
        output = %output.display(),
        "trace written"
    );

    if let Some(e) = &trace.error {
        error!(session = session.name(), error = %e, "candidate failed during capture");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
