//! Comparison worker process.
//!
//! Reads `run` requests from stdin, compares one session per request and
//! writes each result to stdout. Started by the runner; not meant to be run
//! by hand.

use std::io::{self, BufWriter};

use anyhow::{Context, Result};
use clap::Parser;

use nh_test::adapter::AdapterSpec;
use nh_test::{logging, worker};

#[derive(Parser, Debug)]
#[command(name = "nh-test-worker")]
#[command(about = "Session comparison worker", long_about = None)]
struct Args {
    /// Replayer description as JSON, e.g. {"adapter":"self_check"}
    #[arg(long = "adapter")]
    adapter: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init("warn");

    let adapter: AdapterSpec =
        serde_json::from_str(&args.adapter).context("invalid --adapter description")?;
    let replayer = adapter.build();

    let stdin = io::stdin();
    let stdout = io::stdout();
    worker::serve(stdin.lock(), BufWriter::new(stdout.lock()), replayer.as_ref())
        .context("worker loop failed")?;
    Ok(())
}
