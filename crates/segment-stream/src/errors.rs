/// Boxed error returned by user callbacks such as the segment observer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by the upstream generation, either in-band through an
/// `error` event or because the event stream could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationFailure {
    /// The model provider reported an application-level failure.
    #[error("provider failure: {message}")]
    Provider { message: String },
    /// Network/stream transport failed.
    #[error("transport failure: {message}")]
    Transport { message: String },
    /// The upstream produced an event sequence it should not have.
    #[error("protocol failure: {message}")]
    Protocol { message: String },
}

impl GenerationFailure {
    /// Creates a provider-level failure.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Creates a transport-level failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a protocol-level failure.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns the human-readable message for this failure.
    pub fn message(&self) -> &str {
        match self {
            Self::Provider { message }
            | Self::Transport { message }
            | Self::Protocol { message } => message,
        }
    }
}

/// Failure raised by a renderer, either synchronously or from its deferred
/// value / sequence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RenderError {
    message: String,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for RenderError {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RenderError {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Top-level error type for the segment pipeline.
///
/// Every failure after a pipeline has started ends up here: it seals the
/// display sink in its error state and is returned from
/// [`SegmentedRun::finish`](crate::SegmentedRun::finish).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Invalid pipeline or environment configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid builder input.
    #[error("validation error: {0}")]
    Validation(String),
    /// The upstream generation failed.
    #[error(transparent)]
    Upstream(GenerationFailure),
    /// A renderer failed while rendering a segment.
    #[error("render failed for segment {segment}: {message}")]
    Render { segment: usize, message: String },
    /// A renderer did not settle within the configured render timeout.
    #[error("render for segment {segment} timed out after {timeout_ms}ms")]
    RenderTimeout { segment: usize, timeout_ms: u64 },
    /// The segment observer returned an error.
    #[error("segment observer failed on segment {segment}: {message}")]
    Observer { segment: usize, message: String },
    /// Internal sequencing error or an upstream stream that ended early.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StreamError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub(crate) fn render(segment: usize, err: &RenderError) -> Self {
        Self::Render {
            segment,
            message: err.message().to_string(),
        }
    }
}

impl From<GenerationFailure> for StreamError {
    fn from(value: GenerationFailure) -> Self {
        StreamError::Upstream(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_failure_uses_kind_tag() {
        let failure: GenerationFailure =
            serde_json::from_str(r#"{"kind":"transport","message":"reset"}"#).expect("parse");
        assert_eq!(failure, GenerationFailure::transport("reset"));
        assert_eq!(failure.message(), "reset");
    }

    #[test]
    fn upstream_error_is_transparent() {
        let err = StreamError::from(GenerationFailure::provider("rate limited"));
        assert_eq!(err.to_string(), "provider failure: rate limited");
    }
}
