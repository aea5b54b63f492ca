//! Ordered async render scheduler.
//!
//! Every scheduled segment gets its own render task, started immediately, so
//! renderers and their intermediate updates run concurrently. Only the final
//! "done" of each slot is serialized: task N settles its slot after task N-1
//! signalled through a oneshot, and then signals task N+1 in turn.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument as _, debug, info_span, warn};

use crate::display::{DisplaySink, Node, SlotSink};
use crate::errors::{RenderError, StreamError};
use crate::render::{RenderStep, Rendered, RendererRegistry};
use crate::segment::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Settled,
    /// The predecessor never settled; this slot is left unsettled.
    Abandoned,
}

type TaskResult = Result<TaskOutcome, StreamError>;

pub struct RenderScheduler {
    run_id: uuid::Uuid,
    registry: Arc<RendererRegistry>,
    display: DisplaySink,
    render_timeout: Option<Duration>,
    shown_any: bool,
    last_settled: Option<oneshot::Receiver<()>>,
    tasks: JoinSet<TaskResult>,
    scheduled: usize,
}

impl RenderScheduler {
    pub fn new(
        run_id: uuid::Uuid,
        registry: Arc<RendererRegistry>,
        display: DisplaySink,
        render_timeout: Option<Duration>,
    ) -> Self {
        Self {
            run_id,
            registry,
            display,
            render_timeout,
            shown_any: false,
            last_settled: None,
            tasks: JoinSet::new(),
            scheduled: 0,
        }
    }

    /// Number of segments scheduled so far.
    pub fn scheduled(&self) -> usize {
        self.scheduled
    }

    /// Render tasks not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Starts rendering `segment`. Must be called in closing order.
    pub fn schedule(&mut self, segment: Segment) {
        let index = segment.index();
        let replaces_placeholder = !std::mem::replace(&mut self.shown_any, true);
        let slot = self.display.reserve(index, replaces_placeholder);

        let (settled_tx, settled_rx) = oneshot::channel();
        let predecessor = self.last_settled.replace(settled_rx);
        self.scheduled += 1;

        let span = info_span!("render", run_id = %self.run_id, segment = index, kind = segment.kind());
        debug!(run_id = %self.run_id, segment = index, replaces_placeholder, "render task scheduled");
        self.tasks.spawn(
            render_task(
                segment,
                self.registry.clone(),
                slot,
                predecessor,
                settled_tx,
                self.render_timeout,
            )
            .instrument(span),
        );
    }

    /// Waits for the next render task to finish.
    ///
    /// Returns `None` when no task is in flight.
    pub async fn next_settled(&mut self) -> Option<Result<(), StreamError>> {
        let joined = self.tasks.join_next().await?;
        Some(flatten(joined))
    }

    /// Waits for every scheduled task, stopping at the first failure.
    pub async fn settle_all(&mut self) -> Result<(), StreamError> {
        while let Some(result) = self.next_settled().await {
            result?;
        }
        Ok(())
    }

    /// Cancels every render task still in flight.
    pub fn abort(&mut self) {
        if !self.tasks.is_empty() {
            debug!(run_id = %self.run_id, pending = self.tasks.len(), "aborting render tasks");
        }
        self.tasks.abort_all();
        self.last_settled = None;
    }
}

fn flatten(joined: Result<TaskResult, JoinError>) -> Result<(), StreamError> {
    match joined {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(err)) => Err(err),
        Err(err) if err.is_cancelled() => Ok(()),
        Err(err) => Err(StreamError::protocol_msg(format!(
            "render task panicked: {err}"
        ))),
    }
}

async fn render_task(
    segment: Segment,
    registry: Arc<RendererRegistry>,
    slot: SlotSink,
    predecessor: Option<oneshot::Receiver<()>>,
    settled_tx: oneshot::Sender<()>,
    render_timeout: Option<Duration>,
) -> TaskResult {
    let index = segment.index();
    let work = render_segment(&registry, &segment, &slot);
    let rendered = match render_timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = millis(limit), "renderer timed out");
                return Err(StreamError::RenderTimeout {
                    segment: index,
                    timeout_ms: millis(limit),
                });
            }
        },
        None => work.await,
    };
    let final_node = rendered.map_err(|err| {
        warn!(error = %err, "renderer failed");
        StreamError::render(index, &err)
    })?;

    if let Some(predecessor) = predecessor
        && predecessor.await.is_err()
    {
        debug!("predecessor abandoned; slot left unsettled");
        return Ok(TaskOutcome::Abandoned);
    }

    slot.done(final_node);
    let _ = settled_tx.send(());
    debug!("slot settled");
    Ok(TaskOutcome::Settled)
}

async fn render_segment(
    registry: &RendererRegistry,
    segment: &Segment,
    slot: &SlotSink,
) -> Result<Option<Node>, RenderError> {
    let rendered = registry.render(segment)?;
    debug!(capability = rendered.capability(), "renderer invoked");
    drive(rendered, slot).await
}

/// Runs a renderer result to completion, forwarding updates to `slot`.
/// Returns the final node, or `None` to keep the last update.
async fn drive(rendered: Rendered, slot: &SlotSink) -> Result<Option<Node>, RenderError> {
    match rendered {
        Rendered::Value(node) => Ok(Some(node)),
        Rendered::Deferred(future) => future.await.map(Some),
        Rendered::Sequence(steps) => {
            let mut last = None;
            for step in steps {
                apply_step(step?, slot, &mut last);
                // Iterators run inline; let sibling render tasks progress.
                tokio::task::yield_now().await;
            }
            Ok(last)
        }
        Rendered::Stream(mut steps) => {
            let mut last = None;
            while let Some(step) = steps.next().await {
                apply_step(step?, slot, &mut last);
            }
            Ok(last)
        }
    }
}

fn apply_step(step: RenderStep, slot: &SlotSink, last: &mut Option<Node>) {
    match step {
        RenderStep::Update(node) => slot.update(node),
        RenderStep::Done(node) => *last = Some(node),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
