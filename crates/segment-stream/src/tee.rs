//! Event source duplicator.
//!
//! One pump task reads the upstream stream and fans every item out to two
//! unbounded channels, so neither reader can stall the other and both end on
//! the same terminal item.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::GenerationFailure;
use crate::event::{EventStream, GenerationEvent};
use crate::source::EventSource;

type Item = Result<GenerationEvent, GenerationFailure>;

/// Splits `stream` into two independent views over the same event sequence.
pub fn tee(stream: EventStream) -> (EventStream, EventStream) {
    duplicate(async move { Ok(stream) })
}

/// Opens `source` and duplicates its stream.
pub fn tee_source(source: Arc<dyn EventSource>) -> (EventStream, EventStream) {
    duplicate(async move { source.open().await })
}

/// Duplicates the stream produced by `open`.
///
/// If `open` fails, both views yield that failure once and end.
pub fn duplicate<F>(open: F) -> (EventStream, EventStream)
where
    F: Future<Output = Result<EventStream, GenerationFailure>> + Send + 'static,
{
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();
    tokio::spawn(pump(open, left_tx, right_tx));
    (receiver_stream(left_rx), receiver_stream(right_rx))
}

async fn pump<F>(open: F, left: mpsc::UnboundedSender<Item>, right: mpsc::UnboundedSender<Item>)
where
    F: Future<Output = Result<EventStream, GenerationFailure>>,
{
    let mut upstream = match open.await {
        Ok(stream) => stream,
        Err(failure) => {
            debug!(error = %failure, "event stream failed to open");
            let _ = left.send(Err(failure.clone()));
            let _ = right.send(Err(failure));
            return;
        }
    };

    while let Some(item) = upstream.next().await {
        let left_open = left.send(item.clone()).is_ok();
        let right_open = right.send(item).is_ok();
        if !left_open && !right_open {
            debug!("both event stream views dropped; stopping upstream read");
            return;
        }
    }
}

fn receiver_stream(mut rx: mpsc::UnboundedReceiver<Item>) -> EventStream {
    Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::stream_of;

    fn script() -> Vec<GenerationEvent> {
        vec![
            GenerationEvent::text("Hi "),
            GenerationEvent::text("there"),
            GenerationEvent::finish(),
        ]
    }

    async fn drain(stream: EventStream) -> Vec<Item> {
        stream.collect().await
    }

    #[tokio::test]
    async fn both_views_see_identical_sequence() {
        let (left, right) = tee(stream_of(script()));
        let (left, right) = tokio::join!(drain(left), drain(right));
        let expected: Vec<Item> = script().into_iter().map(Ok).collect();
        assert_eq!(left, expected);
        assert_eq!(right, expected);
    }

    #[tokio::test]
    async fn reading_one_view_to_the_end_does_not_need_the_other() {
        let (left, right) = tee(stream_of(script()));
        let left = drain(left).await;
        assert_eq!(left.len(), 3);
        let right = drain(right).await;
        assert_eq!(right.len(), 3);
    }

    #[tokio::test]
    async fn dropping_one_view_keeps_the_other_flowing() {
        let (left, right) = tee(stream_of(script()));
        drop(left);
        let right = drain(right).await;
        assert_eq!(right.last(), Some(&Ok(GenerationEvent::finish())));
    }

    #[tokio::test]
    async fn open_failure_fails_both_views() {
        let failure = GenerationFailure::transport("connection refused");
        let expected = failure.clone();
        let (left, right) = duplicate(async move { Err(failure) });
        let (left, right) = tokio::join!(drain(left), drain(right));
        assert_eq!(left, vec![Err(expected.clone())]);
        assert_eq!(right, vec![Err(expected)]);
    }

    #[tokio::test]
    async fn tee_source_opens_the_source() {
        struct Scripted;

        #[async_trait::async_trait]
        impl EventSource for Scripted {
            async fn open(&self) -> Result<EventStream, GenerationFailure> {
                Ok(stream_of(vec![GenerationEvent::finish()]))
            }
        }

        let (left, right) = tee_source(Arc::new(Scripted));
        let (left, right) = tokio::join!(drain(left), drain(right));
        assert_eq!(left, right);
        assert_eq!(left, vec![Ok(GenerationEvent::finish())]);
    }
}
