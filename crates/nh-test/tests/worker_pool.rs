//! Worker pool tests against real `nh-test-worker` processes.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nh_compare::report::TaskStatus;
use nh_test::{AdapterSpec, HarnessConfig, Orchestrator, ProcessLauncher, SessionSource, Task};
use serial_test::serial;

const SESSION: &str = r#"{
    "meta": {"seed": 11},
    "startup": {"rng": ["rn2(2)=1"]},
    "steps": [
        {"key": "j", "rng": ["rn2(2)=1"], "screen": ["@"]},
        {"key": "k", "rng": ["rn2(2)=1"], "screen": [" @"]}
    ]
}"#;

fn worker_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_nh-test-worker"))
}

fn write_tasks(dir: &Path, names: &[&str]) -> Vec<Task> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, SESSION).unwrap();
            Task::new(SessionSource::File { path })
        })
        .collect()
}

fn config(jobs: usize, timeout_ms: u64) -> HarnessConfig {
    HarnessConfig {
        jobs,
        timeout_ms,
        ..HarnessConfig::default()
    }
}

// ============================================================================
// Self-check
// ============================================================================

#[test]
#[serial]
fn test_self_check_over_worker_processes() {
    nh_test::logging::init_test();
    let dir = tempfile::tempdir().unwrap();
    let names = [
        "seed1_gameplay.session.json",
        "seed2_chargen.session.json",
        "interface_options.session.json",
        "seed4_map.session.json",
    ];
    let tasks = write_tasks(dir.path(), &names);

    let pool = Orchestrator::new(
        ProcessLauncher::new(worker_exe(), AdapterSpec::SelfCheck),
        config(2, 10_000),
    );
    let results = pool.run(&tasks).unwrap();

    assert_eq!(results.len(), names.len());
    for (result, name) in results.iter().zip(names) {
        assert_eq!(result.session, name);
        assert_eq!(result.status, TaskStatus::Completed);
        assert!(result.passed, "{:?}", result);
        assert_eq!(result.seed, 11);
    }
}

#[test]
#[serial]
fn test_missing_session_file_fails_only_that_task() {
    nh_test::logging::init_test();
    let dir = tempfile::tempdir().unwrap();
    let mut tasks = write_tasks(dir.path(), &["seed1_gameplay.session.json"]);
    tasks.push(Task::new(SessionSource::File {
        path: dir.path().join("seed9_gameplay.session.json"),
    }));

    let pool = Orchestrator::new(
        ProcessLauncher::new(worker_exe(), AdapterSpec::SelfCheck),
        config(2, 10_000),
    );
    let results = pool.run(&tasks).unwrap();
    assert!(results[0].passed);
    assert!(!results[1].passed);
    assert_eq!(results[1].status, TaskStatus::Completed);
    assert!(results[1].error.as_deref().unwrap().starts_with("failed to read"));
}

// ============================================================================
// Deadlines
// ============================================================================

#[cfg(unix)]
#[test]
#[serial]
fn test_hung_candidates_are_killed_at_the_deadline() {
    nh_test::logging::init_test();
    let dir = tempfile::tempdir().unwrap();
    let tasks = write_tasks(
        dir.path(),
        &[
            "seed1_gameplay.session.json",
            "seed2_gameplay.session.json",
            "seed3_gameplay.session.json",
        ],
    );
    // Never answers the start request.
    let adapter = AdapterSpec::Command {
        program: PathBuf::from("sleep"),
        args: vec!["5".into()],
    };
    let pool = Orchestrator::new(ProcessLauncher::new(worker_exe(), adapter), config(2, 300));

    let started = Instant::now();
    let results = pool.run(&tasks).unwrap();
    assert!(started.elapsed() < Duration::from_secs(4));

    assert_eq!(results.len(), 3);
    for result in &results {
        assert_eq!(result.status, TaskStatus::TimedOut);
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("External timeout after 300ms"));
    }
}

/// Running, as opposed to gone or a zombie waiting to be reaped.
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    let state = stat
        .rsplit_once(')')
        .and_then(|(_, rest)| rest.trim_start().chars().next());
    !matches!(state, None | Some('Z' | 'X'))
}

#[cfg(target_os = "linux")]
#[test]
#[serial]
fn test_terminated_worker_takes_its_candidate_down() {
    nh_test::logging::init_test();
    let dir = tempfile::tempdir().unwrap();
    let tasks = write_tasks(dir.path(), &["seed1_gameplay.session.json"]);
    let pid_file = dir.path().join("candidate.pid");
    // Records its pid, then never answers.
    let adapter = AdapterSpec::Command {
        program: PathBuf::from("sh"),
        args: vec![
            "-c".into(),
            r#"echo $$ > "$1"; exec sleep 47"#.into(),
            "sh".into(),
            pid_file.display().to_string(),
        ],
    };
    let pool = Orchestrator::new(ProcessLauncher::new(worker_exe(), adapter), config(1, 1000));

    let results = pool.run(&tasks).unwrap();
    assert_eq!(results[0].status, TaskStatus::TimedOut);

    let pid: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let give_up = Instant::now() + Duration::from_secs(5);
    while process_alive(pid) && Instant::now() < give_up {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(!process_alive(pid), "candidate {} outlived its worker", pid);
}
