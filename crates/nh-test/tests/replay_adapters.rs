//! Candidate adapters driven end to end.

use std::path::PathBuf;

use nh_compare::replay::Replayer;
use nh_compare::session::SessionComparator;
use nh_compare::trace::SessionDocument;
use nh_test::AdapterSpec;
use nh_test::adapter::trace_path_for;
use nh_test::store::{load_trace, write_trace};
use serial_test::serial;

const SESSION: &str = r#"{
    "meta": {"seed": 3, "type": "gameplay"},
    "startup": {"rng": ["rn2(2)=1"]},
    "steps": [
        {"key": "h", "rng": ["rn2(2)=1 @ hack.c:12"]},
        {"key": "l", "rng": ["rn2(2)=1"]},
        {"key": ".", "rng": ["rn2(2)=1", "rn2(2)=1"]}
    ]
}"#;

/// A candidate answering every request with the same single RNG call.
fn echo_candidate() -> AdapterSpec {
    AdapterSpec::Command {
        program: PathBuf::from("sh"),
        args: vec![
            "-c".into(),
            r#"while read -r line; do echo "booting"; echo 'JSON:{"type":"step","rng":["rn2(2)=1"]}'; done"#
                .into(),
        ],
    }
}

fn session() -> nh_compare::Session {
    serde_json::from_str::<SessionDocument>(SESSION)
        .unwrap()
        .into_session("seed3_gameplay.session.json")
}

#[cfg(unix)]
#[test]
#[serial]
fn test_command_candidate_is_driven_step_by_step() {
    let session = session();
    let replayer = echo_candidate().build();
    let trace = replayer.replay(&session);

    assert!(trace.error.is_none(), "{:?}", trace.error);
    assert_eq!(trace.steps.len(), 3);
    assert_eq!(trace.startup.rng, vec!["rn2(2)=1"]);

    let comparison = SessionComparator::for_session(&session).compare_trace(&session, &trace);
    let rng = comparison.channel(nh_compare::Channel::Rng).unwrap();
    assert_eq!((rng.matched, rng.total), (4, 5));
    assert_eq!(rng.first_divergence.as_ref().unwrap().index, 4);
}

#[cfg(unix)]
#[test]
#[serial]
fn test_candidate_exiting_early_keeps_partial_trace() {
    // Answers start and the first key, then exits.
    let adapter = AdapterSpec::Command {
        program: PathBuf::from("sh"),
        args: vec![
            "-c".into(),
            r#"for i in 1 2; do read -r line; echo 'JSON:{"type":"step"}'; done"#.into(),
        ],
    };
    let trace = adapter.build().replay(&session());
    assert_eq!(trace.steps.len(), 1);
    assert_eq!(trace.error.as_deref(), Some("candidate exited after 1 of 3 steps"));
}

#[cfg(unix)]
#[test]
#[serial]
fn test_candidate_error_names_the_step() {
    let adapter = AdapterSpec::Command {
        program: PathBuf::from("sh"),
        args: vec![
            "-c".into(),
            r#"read -r line; echo 'JSON:{"type":"step"}'; read -r line; echo 'JSON:{"type":"error","message":"no such command"}'"#
                .into(),
        ],
    };
    let trace = adapter.build().replay(&session());
    assert!(trace.steps.is_empty());
    assert_eq!(
        trace.error.as_deref(),
        Some("candidate reported an error at step 1: no such command")
    );
}

#[test]
fn test_captured_traces_replay_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    let session = session();
    let captured = AdapterSpec::SelfCheck.build().replay(&session);
    let path = trace_path_for(dir.path(), session.name());
    write_trace(&path, &captured).unwrap();
    assert_eq!(load_trace(&path).unwrap(), captured);

    let replayer = AdapterSpec::TraceDir {
        dir: dir.path().to_path_buf(),
    }
    .build();
    let comparison = SessionComparator::for_session(&session).compare(&session, replayer.as_ref());
    assert!(comparison.passed());
}
