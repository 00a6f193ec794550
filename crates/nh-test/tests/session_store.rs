//! Session discovery and loading from disk.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use flate2::Compression;
use flate2::write::GzEncoder;
use nh_compare::report::{ResultBundle, TaskRecorder, TaskStatus};
use nh_compare::trace::SessionKind;
use nh_test::store::{self, SessionFilter, SessionSource};

const LEGACY_SESSION: &str = r#"{
    "seed": 5,
    "type": "chargen",
    "steps": [
        {"key": null, "action": "startup", "rng": ["rn2(20)=4"], "screen": ["Who are you?"]},
        {"key": "v", "rng": [], "screen": ["Valkyrie"]}
    ]
}"#;

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn test_discover_lists_sessions_in_order() {
    let sessions = tempfile::tempdir().unwrap();
    let maps = tempfile::tempdir().unwrap();
    fs::write(sessions.path().join("seed2_gameplay.session.json"), "{}").unwrap();
    fs::write(sessions.path().join("seed1_gameplay.session.json"), "{}").unwrap();
    fs::write(sessions.path().join("notes.txt"), "ignored").unwrap();
    fs::write(maps.path().join("seed1_map.session.json.gz"), gzip(b"{}")).unwrap();

    let dirs = vec![
        sessions.path().to_path_buf(),
        PathBuf::from("/nonexistent/sessions"),
        maps.path().to_path_buf(),
    ];
    let names: Vec<String> = store::discover(&dirs).iter().map(SessionSource::name).collect();
    assert_eq!(
        names,
        vec![
            "seed1_gameplay.session.json",
            "seed2_gameplay.session.json",
            "seed1_map.session.json.gz",
        ]
    );
}

#[test]
fn test_compressed_legacy_session_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seed5_chargen.session.json.gz");
    fs::write(&path, gzip(LEGACY_SESSION.as_bytes())).unwrap();

    let session = SessionSource::File { path }.load().unwrap();
    assert_eq!(session.name(), "seed5_chargen.session.json.gz");
    assert_eq!(session.kind(), SessionKind::Chargen);
    assert_eq!(session.meta.seed, 5);
    assert_eq!(session.startup.rng, vec!["rn2(20)=4"]);
    assert_eq!(session.steps.len(), 1);
    assert_eq!(session.steps[0].key.as_deref(), Some("v"));
}

#[test]
fn test_malformed_session_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.session.json");
    fs::write(&path, "{\"steps\": [").unwrap();
    let err = SessionSource::File { path }.load().unwrap_err();
    assert!(err.to_string().starts_with("failed to parse broken.session.json"));
}

#[test]
fn test_failed_list_feeds_back_into_filter() {
    let dir = tempfile::tempdir().unwrap();
    let mut failing = TaskRecorder::begin("seed2_gameplay.session.json");
    failing.fail("crash");
    let bundle = ResultBundle::from_results(vec![
        TaskRecorder::begin("seed1_gameplay.session.json").finish(TaskStatus::Completed),
        failing.finish(TaskStatus::Completed),
    ]);

    let list = dir.path().join("failed.txt");
    store::write_failed_list(&list, &bundle).unwrap();
    assert_eq!(fs::read_to_string(&list).unwrap(), "seed2_gameplay.session.json\n");

    let mut filter = SessionFilter::default();
    filter.add_names_from_file(&list).unwrap();
    let sources = vec![
        SessionSource::File {
            path: PathBuf::from("sessions/seed1_gameplay.session.json"),
        },
        SessionSource::File {
            path: PathBuf::from("sessions/seed2_gameplay.session.json"),
        },
    ];
    let kept = filter.apply(sources);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].name(), "seed2_gameplay.session.json");
}

#[test]
fn test_bundle_file_round_trip_compressed() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = ResultBundle::from_results(vec![
        TaskRecorder::begin("seed1_gameplay.session.json").finish(TaskStatus::Completed),
    ])
    .with_golden_branch(Some("golden".into()));

    let path = dir.path().join("out/results.json.gz");
    store::write_json_file(&path, &bundle).unwrap();
    let loaded = store::load_bundle(&path).unwrap();
    assert_eq!(loaded, bundle);
}
