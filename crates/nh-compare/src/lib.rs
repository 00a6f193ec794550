//! Session replay comparison for nethack-rs.
//!
//! Compares a candidate's replay of a recorded session against the recording,
//! channel by channel (RNG calls, screen text, colored cells, call-boundary
//! events), and reports the first point of divergence.

pub mod ansi;
pub mod baseline;
pub mod diff;
pub mod policy;
pub mod replay;
pub mod report;
pub mod rng;
pub mod session;
pub mod trace;

pub use diff::{Channel, ChannelMetrics, ChannelResult, Divergence};
pub use policy::{ComparatorPolicy, policy_by_name, policy_for};
pub use replay::{ReplayError, Replayer, SelfCheckReplayer};
pub use report::{ResultBundle, TaskRecorder, TaskResult, TaskStatus};
pub use session::{SessionComparator, SessionComparison};
pub use trace::{CandidateTrace, Session, SessionKind, Step};
