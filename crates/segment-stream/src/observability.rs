use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const ENABLED_KEYS: [&str; 2] = [
    "SEGMENT_STREAM_OBSERVABILITY_ENABLED",
    "SEGMENT_STREAM_OBSERVABILITY",
];
const LEVEL_KEY: &str = "SEGMENT_STREAM_LOG_LEVEL";
const JSON_PATH_KEY: &str = "SEGMENT_STREAM_JSON_LOG_PATH";
const DEFAULT_JSON_LOG_FILE: &str = "segment-stream.logs.jsonl";

/// Where log records go.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LogOutput {
    /// Compact lines on stderr. stdout belongs to callers printing display output.
    Console,
    JsonFile(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct LogSettings {
    enabled: bool,
    /// Explicit filter directive; `None` falls back to `RUST_LOG`, then `info`.
    level: Option<String>,
    output: LogOutput,
}

impl LogSettings {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = ENABLED_KEYS
            .iter()
            .find_map(|key| lookup(key))
            .map(|value| parse_bool_env(&value).unwrap_or(true))
            .unwrap_or(true);
        let level = lookup(LEVEL_KEY).filter(|v| !v.trim().is_empty());
        let output = match lookup(JSON_PATH_KEY).filter(|v| !v.trim().is_empty()) {
            Some(path) => LogOutput::JsonFile(PathBuf::from(path)),
            None => LogOutput::Console,
        };
        Self {
            enabled,
            level,
            output,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = EnvFilter::try_new(level)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Splits a log path into the directory and file name handed to the appender.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_JSON_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Installs the process-wide tracing subscriber. Later calls do nothing.
///
/// Environment:
/// - `SEGMENT_STREAM_OBSERVABILITY_ENABLED` / `SEGMENT_STREAM_OBSERVABILITY`: on/off switch, default on.
/// - `SEGMENT_STREAM_LOG_LEVEL`: filter directive such as `debug` or `segment_stream=trace`.
/// - `SEGMENT_STREAM_JSON_LOG_PATH`: write JSONL records (with span context) to this file
///   instead of the console.
/// - `RUST_LOG`: filter used when no level is set.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let settings = LogSettings::from_lookup(|key| std::env::var(key).ok());
        if settings.enabled {
            install(&settings);
        }
    });
}

fn install(settings: &LogSettings) {
    let registry = tracing_subscriber::registry().with(settings.env_filter());
    match &settings.output {
        LogOutput::JsonFile(path) => {
            let (dir, file_name) = split_log_path(path);
            let _ = std::fs::create_dir_all(&dir);
            let json = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(tracing_appender::rolling::never(dir, file_name));
            let _ = registry.with(json).try_init();
        }
        LogOutput::Console => {
            let console = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = registry.with(console).try_init();
        }
    }
}
