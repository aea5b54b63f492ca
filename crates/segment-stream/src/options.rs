use std::time::Duration;

use crate::errors::StreamError;

const RENDER_TIMEOUT_ENV: &str = "SEGMENT_STREAM_RENDER_TIMEOUT_MS";

/// Per-pipeline behavior options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Upper bound on one renderer's own work. Waiting for earlier segments to
    /// settle does not count against it.
    pub render_timeout: Option<Duration>,
}

impl PipelineOptions {
    /// Sets the per-renderer timeout.
    pub fn render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = Some(timeout);
        self
    }

    /// Builds options from `SEGMENT_STREAM_RENDER_TIMEOUT_MS`.
    ///
    /// An unset or empty variable means no timeout.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StreamError> {
        let mut options = Self::default();
        if let Some(raw) = lookup(RENDER_TIMEOUT_ENV).filter(|v| !v.trim().is_empty()) {
            let millis: u64 = raw.trim().parse().map_err(|e| {
                StreamError::Config(format!("invalid {RENDER_TIMEOUT_ENV}={raw:?}: {e}"))
            })?;
            if millis == 0 {
                return Err(StreamError::Config(format!(
                    "{RENDER_TIMEOUT_ENV} must be greater than 0"
                )));
            }
            options.render_timeout = Some(Duration::from_millis(millis));
        }
        Ok(options)
    }

    pub(crate) fn validate(&self) -> Result<(), StreamError> {
        if self.render_timeout.is_some_and(|t| t.is_zero()) {
            return Err(StreamError::Validation(
                "render_timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
