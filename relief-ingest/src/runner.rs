//! Streaming ingestion runner.
//!
//! Wires the tailer, the record parser, and the point index together behind
//! a bounded line queue, and keeps the on-disk database fresh with
//! debounced atomic saves. Three concurrent tasks: the tailer produces
//! lines, the consumer batches and applies records under the gate mutex,
//! and the saver persists when the state has been quiet long enough (with a
//! hard staleness cap).

use crate::parser::{parse_line, Record};
use crate::tailer::{LogTailer, TailEvent, FRAGMENT_PREFIX};
use relief_data::{Database, PointIndex, Ray, Vertex};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Bounded line queue capacity between tailer and consumer.
const QUEUE_CAPACITY: usize = 8192;

/// Flush a batch at this many accepted records, or after `BATCH_WINDOW`.
const BATCH_LIMIT: usize = 500;
const BATCH_WINDOW: Duration = Duration::from_millis(200);

/// Saver poll cadence and debounce policy.
const SAVE_POLL: Duration = Duration::from_millis(500);
const QUIET_WINDOW: Duration = Duration::from_secs(1);
const MIN_SAVE_GAP: Duration = Duration::from_secs(5);
const MAX_SAVE_GAP: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Streaming configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub db_path: PathBuf,
    pub log_path: PathBuf,
    /// Minimum 3D spacing between accepted hit points.
    pub min_merge_distance: f64,
    /// Tail a pre-existing log from its end instead of replaying it.
    pub start_at_end: bool,
}

/// Counters reported at shutdown (and logged along the way).
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestSummary {
    pub lines_processed: u64,
    pub baseline_file_lines: u64,
    pub hits_accepted: u64,
    pub hits_rejected: u64,
    pub misses: u64,
    pub saves: u64,
}

/// Final state of a streaming session.
pub struct StreamOutcome {
    pub points: Vec<Vertex>,
    pub rays: Vec<Ray>,
    pub summary: IngestSummary,
}

/// Everything the consumer mutates, behind the gate mutex. The point index
/// is an extension of the master point list and shares its protection.
struct IngestState {
    index: PointIndex,
    rays: Vec<Ray>,
    dirty: bool,
    last_mutation: Instant,
    last_save: Instant,
    summary: IngestSummary,
}

impl IngestState {
    fn new(database: Database, min_merge_distance: f64) -> Self {
        let now = Instant::now();
        Self {
            index: PointIndex::from_existing(database.points, min_merge_distance),
            rays: database.rays,
            dirty: false,
            last_mutation: now,
            last_save: now,
            summary: IngestSummary::default(),
        }
    }

    fn apply(&mut self, batch: &[Record], lines: u64) {
        for record in batch {
            match record {
                Record::Hit(vertex) => {
                    if self.index.try_add(*vertex) {
                        self.summary.hits_accepted += 1;
                    } else {
                        self.summary.hits_rejected += 1;
                    }
                }
                Record::Miss(ray) => {
                    self.rays.push(*ray);
                    self.summary.misses += 1;
                }
            }
        }
        self.summary.lines_processed += lines;
        if !batch.is_empty() {
            self.dirty = true;
            self.last_mutation = Instant::now();
        }
    }
}

/// Stream the log into the database until `cancel` is set.
///
/// Takes the already-loaded database as a starting point and returns the
/// final master lists. The database file is saved along the way and once
/// more, unconditionally, at shutdown.
pub fn run_stream(
    config: &RunnerConfig,
    database: Database,
    cancel: Arc<AtomicBool>,
) -> Result<StreamOutcome, IngestError> {
    let state = Arc::new(Mutex::new(IngestState::new(
        database,
        config.min_merge_distance,
    )));

    let (line_tx, line_rx) = mpsc::sync_channel::<TailEvent>(QUEUE_CAPACITY);

    let tailer = LogTailer::new(&config.log_path, config.start_at_end);
    let tailer_cancel = cancel.clone();
    let tailer_handle = thread::Builder::new()
        .name("relief-tailer".into())
        .spawn(move || {
            if let Err(e) = tailer.run(line_tx, &tailer_cancel) {
                warn!("Tailer stopped: {e}");
            }
        })?;

    let saver_state = state.clone();
    let saver_cancel = cancel.clone();
    let saver_db_path = config.db_path.clone();
    let saver_handle = thread::Builder::new()
        .name("relief-saver".into())
        .spawn(move || saver_loop(&saver_state, &saver_db_path, &saver_cancel))?;

    consume(&line_rx, &state, &config.log_path, &cancel);

    // Dropping the receiver turns any in-flight tailer send into an error
    // instead of a block, so the join below cannot hang.
    drop(line_rx);
    tailer_handle.join().expect("tailer thread panicked");
    saver_handle.join().expect("saver thread panicked");

    // Final forced save, debounce notwithstanding.
    let mut state = match Arc::try_unwrap(state) {
        Ok(mutex) => mutex.into_inner().expect("gate poisoned"),
        Err(_) => unreachable!("worker threads joined"),
    };
    match Database::save(&config.db_path, state.index.points(), &state.rays) {
        Ok(()) => state.summary.saves += 1,
        Err(e) => warn!("Final save failed: {e}"),
    }

    info!(
        "Ingest finished: {} lines, {} hits accepted ({} merged away), {} misses, {} saves",
        state.summary.lines_processed,
        state.summary.hits_accepted,
        state.summary.hits_rejected,
        state.summary.misses,
        state.summary.saves
    );

    Ok(StreamOutcome {
        summary: state.summary,
        rays: state.rays,
        points: state.index.into_points(),
    })
}

fn consume(
    rx: &Receiver<TailEvent>,
    state: &Mutex<IngestState>,
    log_path: &Path,
    cancel: &AtomicBool,
) {
    let mut batch: Vec<Record> = Vec::with_capacity(BATCH_LIMIT);
    let mut batch_lines: u64 = 0;
    let mut batch_started: Option<Instant> = None;

    let flush = |batch: &mut Vec<Record>, batch_lines: &mut u64, started: &mut Option<Instant>| {
        if batch.is_empty() && *batch_lines == 0 {
            return;
        }
        let mut state = state.lock().expect("gate poisoned");
        state.apply(batch, *batch_lines);
        debug!(
            "Flushed {} records ({} points, {} rays total)",
            batch.len(),
            state.index.len(),
            state.rays.len()
        );
        batch.clear();
        *batch_lines = 0;
        *started = None;
    };

    let handle_event = |event: TailEvent,
                        batch: &mut Vec<Record>,
                        batch_lines: &mut u64,
                        started: &mut Option<Instant>| {
        match event {
            TailEvent::Line(line) => {
                if line.starts_with(FRAGMENT_PREFIX) {
                    debug!("Dropping fragment: {line}");
                    return;
                }
                *batch_lines += 1;
                if let Some(record) = parse_line(&line) {
                    if started.is_none() {
                        *started = Some(Instant::now());
                    }
                    batch.push(record);
                }
            }
            TailEvent::Reset(reason) => {
                flush(batch, batch_lines, started);
                let baseline = count_file_lines(log_path).unwrap_or(0);
                let mut state = state.lock().expect("gate poisoned");
                state.summary.lines_processed = 0;
                state.summary.baseline_file_lines = baseline;
                info!("Log reset ({reason:?}); {baseline} lines in current file");
            }
        }
    };

    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        match rx.recv_timeout(BATCH_WINDOW) {
            Ok(event) => {
                handle_event(event, &mut batch, &mut batch_lines, &mut batch_started);
                if batch.len() >= BATCH_LIMIT {
                    flush(&mut batch, &mut batch_lines, &mut batch_started);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if let Some(started) = batch_started {
            if started.elapsed() >= BATCH_WINDOW {
                flush(&mut batch, &mut batch_lines, &mut batch_started);
            }
        }
    }

    // Drain whatever the tailer still flushes on its way out, then apply
    // the final batch.
    loop {
        match rx.recv_timeout(SAVE_POLL) {
            Ok(event) => handle_event(event, &mut batch, &mut batch_lines, &mut batch_started),
            Err(_) => break,
        }
    }
    flush(&mut batch, &mut batch_lines, &mut batch_started);
}

fn saver_loop(state: &Mutex<IngestState>, db_path: &Path, cancel: &AtomicBool) {
    while !cancel.load(Ordering::Relaxed) {
        thread::sleep(SAVE_POLL);
        let mut state = state.lock().expect("gate poisoned");
        if !state.dirty {
            continue;
        }
        let now = Instant::now();
        let quiet = now.duration_since(state.last_mutation) >= QUIET_WINDOW;
        let spaced = now.duration_since(state.last_save) >= MIN_SAVE_GAP;
        let overdue = now.duration_since(state.last_save) >= MAX_SAVE_GAP;
        if (quiet && spaced) || overdue {
            match Database::save(db_path, state.index.points(), &state.rays) {
                Ok(()) => {
                    state.dirty = false;
                    state.last_save = now;
                    state.summary.saves += 1;
                }
                Err(e) => warn!("Periodic save failed: {e}"),
            }
        }
    }
}

/// Replay an existing log once, without tailing.
///
/// Returns the number of lines read. A missing log is not an error; a
/// session may start with nothing but a database.
pub fn ingest_once(
    log_path: &Path,
    index: &mut PointIndex,
    rays: &mut Vec<Ray>,
    summary: &mut IngestSummary,
) -> Result<u64, IngestError> {
    let file = match File::open(log_path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No log at {}", log_path.display());
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    let mut text = String::new();
    BufReader::new(file).read_to_string(&mut text)?;

    let mut lines = 0u64;
    for line in text.lines() {
        lines += 1;
        match parse_line(line) {
            Some(Record::Hit(vertex)) => {
                if index.try_add(vertex) {
                    summary.hits_accepted += 1;
                } else {
                    summary.hits_rejected += 1;
                }
            }
            Some(Record::Miss(ray)) => {
                rays.push(ray);
                summary.misses += 1;
            }
            None => {}
        }
    }
    summary.lines_processed += lines;
    info!(
        "Replayed {} lines from {}: {} hits accepted, {} merged away, {} misses",
        lines,
        log_path.display(),
        summary.hits_accepted,
        summary.hits_rejected,
        summary.misses
    );
    Ok(lines)
}

/// Approximate line count of a file: newline bytes, plus one when the last
/// byte is not a newline.
fn count_file_lines(path: &Path) -> std::io::Result<u64> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; 64 * 1024];
    let mut count = 0u64;
    let mut last = b'\n';
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        count += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        last = buf[n - 1];
    }
    if last != b'\n' {
        count += 1;
    }
    Ok(count)
}
