//! Append-only log tailer.
//!
//! Follows a single file across growth, truncation, rotation, and deletion,
//! emitting complete lines and reset markers. The tailer wakes on a
//! filesystem notification or a one-second heartbeat, whichever comes
//! first; missed notifications only delay a tick, never lose data.

use notify::{RecursiveMode, Watcher};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Prefix marking a partial line flushed at a state transition. Such lines
/// are unusable as records and downstream parsers drop them.
pub const FRAGMENT_PREFIX: &str = "[FRAGMENT] ";

/// Heartbeat covering missed filesystem notifications.
const HEARTBEAT: Duration = Duration::from_secs(1);

/// Why the tailer restarted its position within the file stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// The file appeared (or reappeared) and tailing began.
    NewFile,
    /// The file was replaced by one with a different identity.
    Rotation,
    /// The file shrank in place.
    Truncation,
    /// The file disappeared.
    Deleted,
}

/// One emission from the tailer.
#[derive(Debug, Clone, PartialEq)]
pub enum TailEvent {
    /// A complete line (without its terminator), or a fragment-prefixed
    /// partial line flushed during a reset.
    Line(String),
    /// Position restart; lines before and after it belong to different
    /// file generations.
    Reset(ResetReason),
}

#[derive(Debug, Error)]
pub enum TailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Tails one file path, surviving rotation and truncation.
///
/// `poll` is the pure state machine and can be driven directly (tests do);
/// `run` wraps it in a notify watcher plus heartbeat loop.
pub struct LogTailer {
    path: PathBuf,
    start_at_end: bool,
    active: bool,
    offset: u64,
    identity: u64,
    partial: Vec<u8>,
}

impl LogTailer {
    /// Create a tailer for `path`. With `start_at_end`, an already-existing
    /// file is tailed from its current length; otherwise from byte zero.
    pub fn new(path: impl Into<PathBuf>, start_at_end: bool) -> Self {
        Self {
            path: path.into(),
            start_at_end,
            active: false,
            offset: 0,
            identity: 0,
            partial: Vec::new(),
        }
    }

    /// Observe the file once and emit any resulting events into `sink`.
    ///
    /// Transient I/O errors skip the tick; the next wake retries from the
    /// same position.
    pub fn poll(&mut self, sink: &mut impl FnMut(TailEvent)) {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.active {
                    info!("Log {} disappeared", self.path.display());
                    self.flush_partial(sink);
                    self.active = false;
                    self.offset = 0;
                    self.identity = 0;
                    sink(TailEvent::Reset(ResetReason::Deleted));
                }
                return;
            }
            Err(e) => {
                debug!("Stat {} failed ({e}), skipping tick", self.path.display());
                return;
            }
        };

        let length = meta.len();
        let identity = file_identity(&meta);

        if !self.active {
            self.active = true;
            self.identity = identity;
            self.offset = if self.start_at_end { length } else { 0 };
            self.partial.clear();
            info!(
                "Tailing {} from byte {}",
                self.path.display(),
                self.offset
            );
            sink(TailEvent::Reset(ResetReason::NewFile));
        } else if self.identity != 0 && identity != 0 && identity != self.identity {
            info!("Log {} rotated", self.path.display());
            self.flush_partial(sink);
            self.offset = 0;
            self.identity = identity;
            sink(TailEvent::Reset(ResetReason::Rotation));
        } else if length < self.offset {
            info!("Log {} truncated", self.path.display());
            self.flush_partial(sink);
            self.offset = 0;
            sink(TailEvent::Reset(ResetReason::Truncation));
        }

        if length > self.offset {
            self.read_new_bytes(length, sink);
        }
    }

    /// Emit any buffered partial line as a fragment. Called on resets and
    /// at shutdown.
    pub fn flush_partial(&mut self, sink: &mut impl FnMut(TailEvent)) {
        if self.partial.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        sink(TailEvent::Line(format!("{FRAGMENT_PREFIX}{text}")));
    }

    fn read_new_bytes(&mut self, length: u64, sink: &mut impl FnMut(TailEvent)) {
        let read = || -> std::io::Result<Vec<u8>> {
            let mut file = File::open(&self.path)?;
            file.seek(SeekFrom::Start(self.offset))?;
            let mut buf = Vec::with_capacity((length - self.offset) as usize);
            file.take(length - self.offset).read_to_end(&mut buf)?;
            Ok(buf)
        };
        match read() {
            Ok(buf) => {
                self.offset += buf.len() as u64;
                self.partial.extend_from_slice(&buf);
                self.drain_complete_lines(sink);
            }
            Err(e) => {
                debug!("Read of {} failed ({e}), skipping tick", self.path.display());
            }
        }
    }

    /// Split the buffer on newlines: emit everything up through the last
    /// `'\n'`, keep the trailing partial.
    fn drain_complete_lines(&mut self, sink: &mut impl FnMut(TailEvent)) {
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            sink(TailEvent::Line(String::from_utf8_lossy(&line).into_owned()));
        }
    }

    /// Tail until `cancel` is set, sending events into `send`.
    ///
    /// The channel is bounded, so a slow consumer backpressures the tailer.
    /// On cancellation the pending partial line is flushed as a fragment.
    /// Returns early (without error) if the receiving side goes away.
    pub fn run(mut self, send: SyncSender<TailEvent>, cancel: &AtomicBool) -> Result<(), TailError> {
        let (watch_tx, watch_rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(watch_tx)?;
        let watch_dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        if let Err(e) = watcher.watch(watch_dir, RecursiveMode::NonRecursive) {
            warn!("Filesystem watch unavailable ({e}), relying on heartbeat");
        }

        let mut disconnected = false;
        loop {
            if cancel.load(Ordering::Relaxed) || disconnected {
                break;
            }
            {
                let mut sink = |event: TailEvent| {
                    if send.send(event).is_err() {
                        disconnected = true;
                    }
                };
                self.poll(&mut sink);
            }
            match watch_rx.recv_timeout(HEARTBEAT) {
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => std::thread::sleep(HEARTBEAT),
            }
        }

        if !disconnected {
            let mut sink = |event: TailEvent| {
                let _ = send.send(event);
            };
            self.flush_partial(&mut sink);
        }
        Ok(())
    }
}

/// Stable per-file identity: inode where the platform has one, zero where
/// it does not. Zero disables rotation detection; truncation detection
/// still works off lengths.
#[cfg(unix)]
fn file_identity(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn file_identity(_meta: &fs::Metadata) -> u64 {
    0
}
