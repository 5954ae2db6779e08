//! Global session recorder, following the `OnceLock<Mutex<Option<…>>>`
//! pattern of the run logger.

use super::entry::{RecordEntry, SessionEndRecord};
use crate::errors::StandinError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

static RECORD_SEQ: AtomicU64 = AtomicU64::new(1);

pub fn next_seq() -> u64 {
    RECORD_SEQ.fetch_add(1, Ordering::Relaxed)
}

pub fn timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

struct RecorderState {
    path: PathBuf,
    started_ns: u64,
    written: AtomicU64,
    write_lock: Mutex<()>,
}

impl RecorderState {
    fn emit(&self, entry: &RecordEntry) -> Result<(), StandinError> {
        let line = serde_json::to_string(entry).map_err(|e| StandinError::Io(e.to_string()))?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StandinError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| StandinError::Io(e.to_string()))?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

static SESSION_RECORDER: OnceLock<Mutex<Option<Arc<RecorderState>>>> = OnceLock::new();

fn recorder_slot() -> &'static Mutex<Option<Arc<RecorderState>>> {
    SESSION_RECORDER.get_or_init(|| Mutex::new(None))
}

/// Start recording to `path`, creating its parent directory.
pub fn init_session_recorder(path: impl AsRef<Path>) -> Result<(), StandinError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StandinError::Io(e.to_string()))?;
    }
    let state = Arc::new(RecorderState {
        path,
        started_ns: timestamp_ns(),
        written: AtomicU64::new(0),
        write_lock: Mutex::new(()),
    });
    *recorder_slot().lock().unwrap_or_else(PoisonError::into_inner) = Some(state);
    Ok(())
}

/// Stop recording and reset the sequence counter.
pub fn clear_session_recorder() {
    *recorder_slot().lock().unwrap_or_else(PoisonError::into_inner) = None;
    RECORD_SEQ.store(1, Ordering::Relaxed);
}

pub fn is_recording() -> bool {
    recorder_slot()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

/// Write `entry` to the session file. A no-op when not recording.
pub fn emit_record(entry: RecordEntry) {
    let guard = recorder_slot().lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(state) = guard.as_ref() {
        let state = Arc::clone(state);
        drop(guard);
        let _ = state.emit(&entry);
    }
}

/// Append a `session_end` record and stop recording.
pub fn end_session() {
    let state = recorder_slot()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(state) = state {
        let end = RecordEntry::SessionEnd(SessionEndRecord {
            total_records: state.written.load(Ordering::Relaxed),
            total_duration_ns: timestamp_ns().saturating_sub(state.started_ns),
        });
        let _ = state.emit(&end);
    }
    clear_session_recorder();
}

/// Parse a recording back into entries. Blank lines are skipped.
pub fn load_recording(path: impl AsRef<Path>) -> Result<Vec<RecordEntry>, StandinError> {
    let text = fs::read_to_string(path.as_ref()).map_err(|e| StandinError::Io(e.to_string()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                StandinError::Io(format!("recording line {}: {e}", index + 1))
            })
        })
        .collect()
}
