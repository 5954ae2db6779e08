//! Process-wide settings: the test-method prefix used by class decoration,
//! the run log sink and the session recording path.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `STANDIN_*` environment overrides.

use crate::errors::StandinError;
use crate::logging::{
    clear_run_logger, init_run_logger, JsonlLogger, Level, DEFAULT_DISK_BUDGET_BYTES,
    DEFAULT_MAX_PAYLOAD_BYTES,
};
use crate::recording::{
    emit_record, end_session, init_session_recorder, timestamp_ns, RecordEntry,
    SessionStartRecord,
};
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

pub const ENV_TEST_PREFIX: &str = "STANDIN_TEST_PREFIX";
pub const ENV_LOG_LEVEL: &str = "STANDIN_LOG_LEVEL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    pub patch: PatchConfig,
    pub logging: LoggingConfig,
    pub recording: RecordingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchConfig {
    /// Methods whose names start with this are wrapped by class decoration.
    pub test_prefix: String,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            test_prefix: "test".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub level: String,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: None,
            level: "info".to_string(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RecordingConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    patch: Option<PartialPatchConfig>,
    logging: Option<PartialLoggingConfig>,
    recording: Option<RecordingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialPatchConfig {
    test_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    level: Option<String>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

/// Loads configuration from `path` (when given) and the process environment.
pub fn load_config(fs: &dyn FileSystem, path: Option<&Path>) -> Result<AppConfig, StandinError> {
    load_config_with_env(fs, path, &|key| std::env::var(key).ok())
}

pub fn load_config_with_env(
    fs: &dyn FileSystem,
    path: Option<&Path>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<AppConfig, StandinError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = path {
        if !fs.exists(path) {
            return Err(StandinError::Config(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        let contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig =
            toml::from_str(&contents).map_err(|e| StandinError::Config(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_env_overrides(&mut cfg, env);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(patch) = partial.patch {
        if let Some(prefix) = patch.test_prefix {
            cfg.patch.test_prefix = prefix;
        }
    }

    if let Some(logging) = partial.logging {
        if logging.path.is_some() {
            cfg.logging.path = logging.path;
        }
        if let Some(level) = logging.level {
            cfg.logging.level = level;
        }
        if let Some(max) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = max;
        }
        if let Some(budget) = logging.budget_bytes {
            cfg.logging.budget_bytes = budget;
        }
    }

    if let Some(recording) = partial.recording {
        cfg.recording.path = recording.path;
    }
}

fn apply_env_overrides(cfg: &mut AppConfig, env: &dyn Fn(&str) -> Option<String>) {
    if let Some(prefix) = env(ENV_TEST_PREFIX) {
        cfg.patch.test_prefix = prefix;
    }
    if let Some(level) = env(ENV_LOG_LEVEL) {
        cfg.logging.level = level;
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), StandinError> {
    if cfg.patch.test_prefix.trim().is_empty() {
        return Err(StandinError::Config(
            "patch.test_prefix must not be empty".to_string(),
        ));
    }
    if Level::parse(&cfg.logging.level).is_none() {
        return Err(StandinError::Config(format!(
            "logging.level must be one of debug, info, warn, error; got '{}'",
            cfg.logging.level
        )));
    }
    if cfg.logging.max_payload_bytes == 0 {
        return Err(StandinError::Config(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

static ACTIVE_CONFIG: OnceLock<Mutex<AppConfig>> = OnceLock::new();

fn config_slot() -> &'static Mutex<AppConfig> {
    ACTIVE_CONFIG.get_or_init(|| Mutex::new(AppConfig::default()))
}

/// The configuration currently in effect (defaults until [`install`]).
pub fn active() -> AppConfig {
    config_slot()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Makes `cfg` the active configuration and (re)starts the run logger and
/// session recorder it describes.
pub fn install(cfg: AppConfig) -> Result<(), StandinError> {
    validate_config(&cfg)?;

    clear_run_logger();
    if let Some(path) = &cfg.logging.path {
        let mut logger = JsonlLogger::new(path);
        logger.max_payload_bytes = cfg.logging.max_payload_bytes;
        logger.budget_bytes = cfg.logging.budget_bytes;
        let level = Level::parse(&cfg.logging.level).unwrap_or(Level::Info);
        init_run_logger(logger, level);
    }

    end_session();
    if let Some(path) = &cfg.recording.path {
        init_session_recorder(path)?;
        let now = timestamp_ns();
        emit_record(RecordEntry::SessionStart(SessionStartRecord {
            run_id: format!("run-{now}"),
            recorded_at_unix_ns: now,
            standin_version: env!("CARGO_PKG_VERSION").to_string(),
            config_snapshot: serde_json::to_value(&cfg)
                .map_err(|e| StandinError::Config(e.to_string()))?,
        }));
    }

    *config_slot().lock().unwrap_or_else(PoisonError::into_inner) = cfg;
    Ok(())
}

/// Stops logging and recording and restores the default configuration.
pub fn uninstall() {
    clear_run_logger();
    end_session();
    *config_slot().lock().unwrap_or_else(PoisonError::into_inner) = AppConfig::default();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeFileSystem;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_a_file() {
        let fs = FakeFileSystem::default();
        let cfg = load_config_with_env(&fs, None, &no_env).expect("config");
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.patch.test_prefix, "test");
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let fs = FakeFileSystem::with_file(
            "/cfg/standin.toml",
            "[patch]\ntest_prefix = \"check\"\n\n[logging]\nlevel = \"debug\"\n",
        );
        let cfg = load_config_with_env(&fs, Some(Path::new("/cfg/standin.toml")), &no_env)
            .expect("config");
        assert_eq!(cfg.patch.test_prefix, "check");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.logging.max_payload_bytes, DEFAULT_MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn environment_beats_file() {
        let fs = FakeFileSystem::with_file("/c.toml", "[patch]\ntest_prefix = \"check\"\n");
        let env = |key: &str| (key == ENV_TEST_PREFIX).then(|| "spec_".to_string());
        let cfg = load_config_with_env(&fs, Some(Path::new("/c.toml")), &env).expect("config");
        assert_eq!(cfg.patch.test_prefix, "spec_");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let fs = FakeFileSystem::with_file("/c.toml", "[logging]\nlevel = \"chatty\"\n");
        let err = load_config_with_env(&fs, Some(Path::new("/c.toml")), &no_env)
            .expect_err("bad level");
        assert!(matches!(err, StandinError::Config(_)));

        let fs = FakeFileSystem::with_file("/c.toml", "[patch]\ntest_prefix = \"\"\n");
        assert!(load_config_with_env(&fs, Some(Path::new("/c.toml")), &no_env).is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let fs = FakeFileSystem::default();
        let err = load_config_with_env(&fs, Some(Path::new("/nope.toml")), &no_env)
            .expect_err("missing");
        assert_eq!(err.to_string(), "config error: config file /nope.toml does not exist");
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let fs = FakeFileSystem::with_file("/c.toml", "[patch\n");
        let err = load_config_with_env(&fs, Some(Path::new("/c.toml")), &no_env)
            .expect_err("parse");
        assert!(matches!(err, StandinError::Config(_)));
    }
}
