//! Session replay harness.
//!
//! Loads recorded reference sessions, replays each one through the program
//! under test and compares the two with [`nh_compare`].
//!
//! ## Pieces
//!
//! - [`store`]: session discovery and loading, from the working copy or a
//!   golden branch; trace and bundle files.
//! - [`adapter`]: replayers for the program under test (a driven command,
//!   captured trace files, or the session itself).
//! - [`worker`]: the worker loop and its process/thread launchers.
//! - [`pool`]: the Task Orchestrator (bounded pool, deadlines, fail-fast).
//! - [`config`]: harness settings from defaults and environment.

pub mod adapter;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod store;
pub mod worker;

pub use adapter::AdapterSpec;
pub use config::HarnessConfig;
pub use error::{HarnessError, LoadError};
pub use pool::{Orchestrator, run_with_adapter};
pub use store::{SessionFilter, SessionSource};
pub use worker::{ProcessLauncher, Task, ThreadLauncher};
