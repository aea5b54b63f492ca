use std::pin::Pin;

use crate::errors::GenerationFailure;

/// Boxed stream of upstream generation events.
///
/// `Err` items are transport-level failures; the pipeline treats them exactly
/// like an in-band [`GenerationEvent::Error`].
pub type EventStream =
    Pin<Box<dyn futures::Stream<Item = Result<GenerationEvent, GenerationFailure>> + Send + 'static>>;

/// One incremental event produced by a model call.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GenerationEvent {
    /// Incremental text output.
    TextDelta { text: String },
    /// Partial tool-call arguments. Not actionable until the call completes.
    ToolCallDelta {
        id: String,
        #[serde(default)]
        name: Option<String>,
        args_text_delta: String,
    },
    /// A completed tool invocation.
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    /// Terminal failure reported by the model stream.
    Error { cause: GenerationFailure },
    /// Terminal success marker.
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl GenerationEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    pub fn finish() -> Self {
        Self::Finish {
            finish_reason: None,
            usage: None,
        }
    }

    pub fn error(cause: GenerationFailure) -> Self {
        Self::Error { cause }
    }

    /// Short event name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text-delta",
            Self::ToolCallDelta { .. } => "tool-call-delta",
            Self::ToolCall { .. } => "tool-call",
            Self::Error { .. } => "error",
            Self::Finish { .. } => "finish",
        }
    }

    /// Returns true for `error` and `finish`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Finish { .. })
    }
}

/// Token accounting reported with `finish`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}
