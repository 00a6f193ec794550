//! Error types for the harness.
//!
//! [`HarnessError`] is a fault of the harness itself and aborts a run.
//! [`LoadError`] is a per-session failure and ends up on that task's result.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("worker channel closed: {0}")]
    Channel(String),

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("workers keep failing: {respawns} respawns for {tasks} tasks")]
    CrashLoop { respawns: usize, tasks: usize },

    #[error("scheduler stalled with {pending} unresolved tasks and no worker busy")]
    Stalled { pending: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("git {args}: {message}")]
    Git { args: String, message: String },

    #[error("session not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
