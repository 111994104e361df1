//! End-to-end streaming ingestion: log lines in, database file out.

use relief_data::Database;
use relief_ingest::{run_stream, RunnerConfig};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "relief_stream_test_{}_{}",
        tag,
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_run_stream_end_to_end() {
    let dir = scratch_dir("end_to_end");
    let log = dir.join("log.txt");
    let db = dir.join("db.bin");
    fs::write(
        &log,
        "HIT|P: 0,0,0|N: 0,1,0\n\
         HIT|P: 1,0,0|N: 0,1,0\n\
         MISS|S: 0,5,0|E: 0,-5,0\n",
    )
    .unwrap();

    let config = RunnerConfig {
        db_path: db.clone(),
        log_path: log.clone(),
        min_merge_distance: 0.01,
        start_at_end: false,
    };
    let cancel = Arc::new(AtomicBool::new(false));
    let runner_cancel = cancel.clone();
    let handle = thread::spawn(move || run_stream(&config, Database::default(), runner_cancel));

    // Let the pipeline replay the existing lines, then append one more so
    // the tailer's incremental path is exercised too.
    thread::sleep(Duration::from_millis(400));
    let mut file = fs::OpenOptions::new().append(true).open(&log).unwrap();
    file.write_all(b"HIT|P: 2,0,0|N: 0,1,0\n").unwrap();
    drop(file);
    thread::sleep(Duration::from_millis(1500));

    cancel.store(true, Ordering::Relaxed);
    let outcome = handle.join().unwrap().unwrap();

    assert_eq!(outcome.points.len(), 3);
    assert_eq!(outcome.rays.len(), 1);
    assert_eq!(outcome.summary.hits_accepted, 3);
    assert!(outcome.summary.saves >= 1);

    // The shutdown save left a loadable database behind.
    let saved = Database::load(&db).unwrap();
    assert_eq!(saved.points.len(), 3);
    assert_eq!(saved.rays.len(), 1);

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_run_stream_spacing_and_skipped_lines() {
    let dir = scratch_dir("spacing");
    let log = dir.join("log.txt");
    let db = dir.join("db.bin");
    fs::write(
        &log,
        "HIT|P: 0,0,0|N: 0,1,0\n\
         HIT|P: 0.005,0,0|N: 0,1,0\n\
         not a record\n\
         HIT|P: 1,0,0|N: 0,1,0\n",
    )
    .unwrap();

    let config = RunnerConfig {
        db_path: db.clone(),
        log_path: log,
        min_merge_distance: 0.01,
        start_at_end: false,
    };
    let cancel = Arc::new(AtomicBool::new(false));
    let runner_cancel = cancel.clone();
    let handle = thread::spawn(move || run_stream(&config, Database::default(), runner_cancel));

    thread::sleep(Duration::from_millis(800));
    cancel.store(true, Ordering::Relaxed);
    let outcome = handle.join().unwrap().unwrap();

    assert_eq!(outcome.points.len(), 2);
    assert_eq!(outcome.summary.hits_accepted, 2);
    assert_eq!(outcome.summary.hits_rejected, 1);
    assert_eq!(outcome.summary.misses, 0);

    fs::remove_dir_all(&dir).unwrap();
}
