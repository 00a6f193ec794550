//! Replayers backed by candidate traces captured earlier.

use std::path::{Path, PathBuf};

use nh_compare::replay::{ReplayError, Replayer};
use nh_compare::trace::{CandidateTrace, Session};
use tracing::debug;

use crate::store::{SESSION_SUFFIX, SESSION_SUFFIX_GZ, load_trace};

const TRACE_SUFFIX: &str = ".trace.json";

/// Uncompressed trace path for `session_name` under `dir`.
///
/// `seed1_gameplay.session.json.gz` maps to `<dir>/seed1_gameplay.trace.json`.
pub fn trace_path_for(dir: &Path, session_name: &str) -> PathBuf {
    let stem = session_name
        .strip_suffix(SESSION_SUFFIX_GZ)
        .or_else(|| session_name.strip_suffix(SESSION_SUFFIX))
        .or_else(|| session_name.strip_suffix(".json"))
        .unwrap_or(session_name);
    dir.join(format!("{}{}", stem, TRACE_SUFFIX))
}

/// Returns the same trace for every session.
#[derive(Debug, Clone)]
pub struct TraceFileReplayer {
    path: PathBuf,
}

impl TraceFileReplayer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Replayer for TraceFileReplayer {
    fn replay(&self, _session: &Session) -> CandidateTrace {
        load_trace(&self.path).unwrap_or_else(|e| CandidateTrace::failed(e.to_string()))
    }
}

/// Looks up each session's trace by name in a directory.
#[derive(Debug, Clone)]
pub struct TraceDirReplayer {
    dir: PathBuf,
}

impl TraceDirReplayer {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn find(&self, session_name: &str) -> Option<PathBuf> {
        let plain = trace_path_for(&self.dir, session_name);
        let mut gz = plain.clone().into_os_string();
        gz.push(".gz");
        [plain, PathBuf::from(gz)].into_iter().find(|p| p.is_file())
    }
}

impl Replayer for TraceDirReplayer {
    fn replay(&self, session: &Session) -> CandidateTrace {
        let Some(path) = self.find(session.name()) else {
            return ReplayError::MissingTrace(session.name().to_string())
                .into_trace(CandidateTrace::default());
        };
        debug!(session = session.name(), trace = %path.display(), "using captured trace");
        load_trace(&path).unwrap_or_else(|e| CandidateTrace::failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::write_trace;
    use nh_compare::trace::{SessionMeta, Step};

    fn session(name: &str) -> Session {
        Session {
            meta: SessionMeta {
                name: name.to_string(),
                ..SessionMeta::default()
            },
            ..Session::default()
        }
    }

    fn trace() -> CandidateTrace {
        CandidateTrace {
            steps: vec![Step {
                key: Some("j".into()),
                rng: vec!["rn2(5)=2".into()],
                ..Step::default()
            }],
            ..CandidateTrace::default()
        }
    }

    #[test]
    fn test_trace_path_for_strips_session_suffix() {
        let dir = Path::new("traces");
        assert_eq!(
            trace_path_for(dir, "seed1_gameplay.session.json.gz"),
            PathBuf::from("traces/seed1_gameplay.trace.json")
        );
        assert_eq!(
            trace_path_for(dir, "interface_menu.session.json"),
            PathBuf::from("traces/interface_menu.trace.json")
        );
    }

    #[test]
    fn test_trace_dir_finds_plain_and_compressed() {
        let dir = tempfile::tempdir().unwrap();
        write_trace(&dir.path().join("a.trace.json"), &trace()).unwrap();
        write_trace(&dir.path().join("b.trace.json.gz"), &trace()).unwrap();

        let replayer = TraceDirReplayer::new(dir.path().to_path_buf());
        assert_eq!(replayer.replay(&session("a.session.json")), trace());
        assert_eq!(replayer.replay(&session("b.session.json")), trace());

        let missing = replayer.replay(&session("c.session.json"));
        assert!(missing.is_empty());
        assert_eq!(
            missing.error.as_deref(),
            Some("no candidate trace for session c.session.json")
        );
    }

    #[test]
    fn test_unreadable_trace_file_fails_the_replay() {
        let replayer = TraceFileReplayer::new(PathBuf::from("/nonexistent/trace.json"));
        let trace = replayer.replay(&session("a.session.json"));
        assert!(trace.error.unwrap().starts_with("failed to read"));
    }
}
