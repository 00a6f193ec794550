//! Concrete replayers for the program under test.
//!
//! An [`AdapterSpec`] is the serializable description of a replayer, so it
//! can be handed to worker processes on their command line.

mod command;
mod trace_file;

use std::path::PathBuf;

use nh_compare::replay::{Replayer, SelfCheckReplayer};
use serde::{Deserialize, Serialize};

pub use command::{CommandReplayer, DriverRequest, DriverResponse};
pub use trace_file::{TraceDirReplayer, TraceFileReplayer, trace_path_for};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "adapter", rename_all = "snake_case")]
pub enum AdapterSpec {
    /// Drive a candidate executable step by step.
    Command { program: PathBuf, args: Vec<String> },
    /// Use one previously captured trace for every session.
    TraceFile { path: PathBuf },
    /// Use `<dir>/<session>.trace.json[.gz]` for each session.
    TraceDir { dir: PathBuf },
    /// Echo the recording itself.
    SelfCheck,
}

impl AdapterSpec {
    pub fn build(&self) -> Box<dyn Replayer> {
        match self {
            AdapterSpec::Command { program, args } => {
                Box::new(CommandReplayer::new(program.clone(), args.clone()))
            }
            AdapterSpec::TraceFile { path } => Box::new(TraceFileReplayer::new(path.clone())),
            AdapterSpec::TraceDir { dir } => Box::new(TraceDirReplayer::new(dir.clone())),
            AdapterSpec::SelfCheck => Box::new(SelfCheckReplayer),
        }
    }

    /// Split a shell-style command string into program and arguments.
    ///
    /// Only whitespace separation is supported; quote-free commands only.
    pub fn command(command_line: &str, extra_args: &[String]) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = PathBuf::from(parts.next()?);
        let args = parts.chain(extra_args.iter().cloned()).collect();
        Some(AdapterSpec::Command { program, args })
    }
}
