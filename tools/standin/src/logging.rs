//! Structured JSONL run log.
//!
//! Proxies and patchers report through [`append_run_log`], which is a no-op
//! until [`init_run_logger`] installs a sink.

use crate::errors::StandinError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;
/// The active file rotates once it reaches this share of the budget.
const ROTATION_SHARE: u64 = 4;

/// Appends JSON lines to `path`. When the file grows past a quarter of
/// `budget_bytes` it is renamed to `<stem>.<generation>.<ext>`, and the
/// oldest generations are removed until the log and its generations fit
/// the budget again. Other files next to the log are never touched.
#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), StandinError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncate_json(event.payload.clone(), self.max_payload_bytes),
        })
        .map_err(|e| StandinError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_error)?;
        writeln!(file, "{line}").map_err(io_error)?;
        drop(file);

        self.rotate_if_full()?;
        self.enforce_budget()?;
        Ok(())
    }

    fn rotate_if_full(&self) -> Result<(), StandinError> {
        let threshold = (self.budget_bytes / ROTATION_SHARE).max(1);
        let size = fs::metadata(&self.path).map_err(io_error)?.len();
        if size < threshold {
            return Ok(());
        }
        let next = self
            .generations()?
            .last()
            .map_or(1, |(generation, _)| generation + 1);
        fs::rename(&self.path, self.generation_path(next)).map_err(io_error)
    }

    fn generation_path(&self, generation: u64) -> PathBuf {
        let (stem, extension) = self.name_parts();
        let name = match extension {
            Some(extension) => format!("{stem}.{generation}.{extension}"),
            None => format!("{stem}.{generation}"),
        };
        self.path.with_file_name(name)
    }

    fn name_parts(&self) -> (String, Option<String>) {
        let stem = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = self
            .path
            .extension()
            .map(|extension| extension.to_string_lossy().into_owned());
        (stem, extension)
    }

    /// Rotated files belonging to this log, oldest first.
    pub fn generations(&self) -> Result<Vec<(u64, PathBuf)>, StandinError> {
        let Some(dir) = self.path.parent() else {
            return Ok(Vec::new());
        };
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        let (stem, extension) = self.name_parts();
        let prefix = format!("{stem}.");
        let suffix = extension.map(|extension| format!(".{extension}"));

        let mut owned = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error)?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let counter = match &suffix {
                Some(suffix) => rest.strip_suffix(suffix.as_str()),
                None => Some(rest),
            };
            if let Some(generation) = counter.and_then(|counter| counter.parse::<u64>().ok()) {
                owned.push((generation, entry.path()));
            }
        }
        owned.sort_by_key(|(generation, _)| *generation);
        Ok(owned)
    }

    /// Removes the oldest generations until the log fits `budget_bytes`.
    /// Returns the removed paths, oldest first. The active file is kept.
    pub fn enforce_budget(&self) -> Result<Vec<PathBuf>, StandinError> {
        let generations = self
            .generations()?
            .into_iter()
            .map(|(_, path)| {
                let len = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
                (path, len)
            })
            .collect::<Vec<_>>();
        let active = fs::metadata(&self.path).map(|meta| meta.len()).unwrap_or(0);
        let mut total = active + generations.iter().map(|(_, len)| len).sum::<u64>();

        let mut removed = Vec::new();
        for (path, len) in generations {
            if total <= self.budget_bytes {
                break;
            }
            fs::remove_file(&path).map_err(io_error)?;
            total = total.saturating_sub(len);
            removed.push(path);
        }
        Ok(removed)
    }
}

fn io_error(err: std::io::Error) -> StandinError {
    StandinError::Io(err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn parse(text: &str) -> Option<Level> {
        match text.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            _ => None,
        }
    }
}

struct RunLogger {
    logger: JsonlLogger,
    min_level: Level,
}

static RUN_LOGGER: OnceLock<Mutex<Option<Arc<RunLogger>>>> = OnceLock::new();

fn logger_slot() -> &'static Mutex<Option<Arc<RunLogger>>> {
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

/// Route run events at or above `min_level` to `logger`.
pub fn init_run_logger(logger: JsonlLogger, min_level: Level) {
    *logger_slot().lock().unwrap_or_else(PoisonError::into_inner) =
        Some(Arc::new(RunLogger { logger, min_level }));
}

pub fn clear_run_logger() {
    *logger_slot().lock().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Whether an event at `level` would be written.
pub fn run_log_enabled(level: &str) -> bool {
    logger_slot()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .is_some_and(|sink| Level::parse(level).unwrap_or(Level::Info) >= sink.min_level)
}

/// Appends one event to the run log. Unknown levels are treated as `info`;
/// write failures are dropped so logging never changes proxy behaviour.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let sink = {
        let guard = logger_slot().lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sink) => Arc::clone(sink),
            None => return,
        }
    };
    if Level::parse(level).unwrap_or(Level::Info) < sink.min_level {
        return;
    }
    let _ = sink.logger.append(&LogEvent {
        level,
        event_type,
        payload,
    });
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
