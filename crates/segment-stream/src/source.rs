use futures::stream;

use crate::errors::GenerationFailure;
use crate::event::{EventStream, GenerationEvent};

/// Producer of the upstream event stream (the model call).
///
/// Implementations own transport and token-format concerns; the pipeline only
/// sees normalized [`GenerationEvent`]s. An `Err` from `open` is a
/// stream-initialization failure and fails both duplicated views at once.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Opens the single-consumption event stream for one generation.
    async fn open(&self) -> Result<EventStream, GenerationFailure>;
}

/// Wraps an already materialized event list as an [`EventStream`].
pub fn stream_of(events: Vec<GenerationEvent>) -> EventStream {
    Box::pin(stream::iter(events.into_iter().map(Ok)))
}
