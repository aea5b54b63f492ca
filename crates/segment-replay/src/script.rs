//! JSONL event scripts.
//!
//! One [`GenerationEvent`] per line, in its serde form, e.g.
//! `{"type":"text-delta","text":"Hi"}`. Blank lines and lines starting with
//! `#` are skipped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt as _;
use segment_stream::{EventSource, EventStream, GenerationEvent, GenerationFailure};

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to read script {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}:{line}: invalid event: {source}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
}

pub fn load_script(path: &Path) -> Result<Vec<GenerationEvent>, ScriptError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_script(path, &raw)
}

fn parse_script(path: &Path, raw: &str) -> Result<Vec<GenerationEvent>, ScriptError> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| ScriptError::Parse {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })
        })
        .collect()
}

/// Event source replaying a loaded script with a fixed delay before each event.
pub struct ScriptSource {
    events: Vec<GenerationEvent>,
    step_delay: Duration,
}

impl ScriptSource {
    pub fn new(events: Vec<GenerationEvent>, step_delay: Duration) -> Self {
        Self { events, step_delay }
    }
}

#[async_trait::async_trait]
impl EventSource for ScriptSource {
    async fn open(&self) -> Result<EventStream, GenerationFailure> {
        if self.events.is_empty() {
            return Err(GenerationFailure::protocol("script has no events"));
        }
        let delay = self.step_delay;
        let events = futures::stream::iter(self.events.clone()).then(move |event| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, GenerationFailure>(event)
        });
        Ok(Box::pin(events))
    }
}
