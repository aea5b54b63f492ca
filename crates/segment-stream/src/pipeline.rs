use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::demux::{Halt, SegmentDemux};
use crate::display::{DisplayHandle, DisplaySink, Node};
use crate::errors::{BoxError, RenderError, StreamError};
use crate::event::{EventStream, GenerationEvent, Usage};
use crate::notify::{CompletionNotifier, SegmentObserver};
use crate::options::PipelineOptions;
use crate::render::{Rendered, RendererRegistry, TextRenderFn, ToolRenderFn};
use crate::scheduler::RenderScheduler;
use crate::segment::{Segment, TextSegment, TextStream, ToolSegment};
use crate::source::EventSource;
use crate::tee;

/// Builder for one segmented generation.
///
/// Register renderers and the segment observer, then hand over the upstream
/// event stream with [`start`](Self::start) or
/// [`start_source`](Self::start_source). Starting spawns the consumption task
/// and must happen inside a Tokio runtime.
pub struct PipelineBuilder {
    initial: Node,
    tools: Vec<(String, ToolRenderFn)>,
    text: Option<TextRenderFn>,
    on_segment: Option<SegmentObserver>,
    options: PipelineOptions,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            initial: Node::Empty,
            tools: Vec::new(),
            text: None,
            on_segment: None,
            options: PipelineOptions::default(),
        }
    }

    /// Placeholder shown until the first segment shows something.
    pub fn initial(mut self, node: Node) -> Self {
        self.initial = node;
        self
    }

    /// Registers the renderer for tool calls named `name`.
    pub fn tool<F>(mut self, name: impl Into<String>, renderer: F) -> Self
    where
        F: Fn(&ToolSegment) -> Result<Rendered, RenderError> + Send + Sync + 'static,
    {
        self.tools.push((name.into(), Arc::new(renderer)));
        self
    }

    /// Replaces the default text renderer.
    pub fn text<F>(mut self, renderer: F) -> Self
    where
        F: Fn(&TextSegment) -> Result<Rendered, RenderError> + Send + Sync + 'static,
    {
        self.text = Some(Arc::new(renderer));
        self
    }

    /// Sets the observer called once per closed segment, in closing order.
    pub fn on_segment<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&Segment) -> Result<(), BoxError> + Send + 'static,
    {
        self.on_segment = Some(Box::new(observer));
        self
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn render_timeout(mut self, timeout: Duration) -> Self {
        self.options.render_timeout = Some(timeout);
        self
    }

    /// Starts consuming `events`.
    pub fn start(self, events: EventStream) -> Result<SegmentedRun, StreamError> {
        let parts = self.prepare()?;
        let (raw, internal) = tee::tee(events);
        Ok(launch(parts, raw, internal))
    }

    /// Opens `source` and starts consuming its events.
    pub fn start_source(self, source: Arc<dyn EventSource>) -> Result<SegmentedRun, StreamError> {
        let parts = self.prepare()?;
        let (raw, internal) = tee::tee_source(source);
        Ok(launch(parts, raw, internal))
    }

    fn prepare(self) -> Result<Prepared, StreamError> {
        self.options.validate()?;
        let mut registry = RendererRegistry::new();
        for (name, renderer) in self.tools {
            registry.insert_tool(name, renderer)?;
        }
        if let Some(text) = self.text {
            registry.insert_text(text);
        }
        Ok(Prepared {
            run_id: uuid::Uuid::new_v4(),
            registry: Arc::new(registry),
            initial: self.initial,
            notifier: CompletionNotifier::new(self.on_segment),
            options: self.options,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Prepared {
    run_id: uuid::Uuid,
    registry: Arc<RendererRegistry>,
    initial: Node,
    notifier: CompletionNotifier,
    options: PipelineOptions,
}

fn launch(parts: Prepared, raw: EventStream, internal: EventStream) -> SegmentedRun {
    let display = DisplaySink::new(parts.initial);
    let (text_tx, text_rx) = mpsc::unbounded_channel();
    let (final_tx, final_rx) = oneshot::channel();
    let run_id = parts.run_id;

    let pipeline = Pipeline {
        run_id,
        demux: SegmentDemux::new(),
        scheduler: RenderScheduler::new(
            run_id,
            parts.registry,
            display.clone(),
            parts.options.render_timeout,
        ),
        notifier: parts.notifier,
        segments: Vec::new(),
        text_tx,
    };
    info!(run_id = %run_id, "segment pipeline started");
    let handle = display.subscribe();
    tokio::spawn(pipeline_task(pipeline, internal, display, final_tx));

    SegmentedRun {
        run_id,
        raw: Some(raw),
        display: handle,
        text_rx,
        final_rx,
    }
}

/// Result of a completed generation.
#[derive(Clone, Debug)]
pub struct GenerationOutput {
    pub run_id: uuid::Uuid,
    /// Every closed segment, in closing order.
    pub segments: Vec<Segment>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl GenerationOutput {
    /// Concatenates the text of all text segments in order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            if let Segment::Text(text) = segment {
                out.push_str(&text.text);
            }
        }
        out
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Tool calls in the order they arrived.
    pub fn tool_calls(&self) -> Vec<&ToolSegment> {
        self.segments
            .iter()
            .filter_map(Segment::as_tool_call)
            .collect()
    }
}

/// Handle on a running segmented generation.
///
/// Exposes the raw event stream (an independent duplicate of what the
/// pipeline consumes), the live display value, per-segment text streams, and
/// the final result through [`finish`](Self::finish).
pub struct SegmentedRun {
    run_id: uuid::Uuid,
    raw: Option<EventStream>,
    display: DisplayHandle,
    text_rx: mpsc::UnboundedReceiver<TextStream>,
    final_rx: oneshot::Receiver<Result<GenerationOutput, StreamError>>,
}

impl SegmentedRun {
    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    /// Takes the raw event stream. Returns `None` after the first call.
    ///
    /// Reading it, or dropping it unread, never affects the pipeline.
    pub fn take_raw_events(&mut self) -> Option<EventStream> {
        self.raw.take()
    }

    /// Returns a handle on the live display value.
    pub fn display(&self) -> DisplayHandle {
        self.display.clone()
    }

    /// Waits for the next text segment to open and returns its live text.
    ///
    /// Returns `None` once the pipeline is over.
    pub async fn next_text_stream(&mut self) -> Option<TextStream> {
        self.text_rx.recv().await
    }

    /// Waits for the pipeline to finish and returns the final result.
    pub async fn finish(self) -> Result<GenerationOutput, StreamError> {
        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(StreamError::protocol_msg(format!(
                "pipeline task ended without final result (run_id={})",
                self.run_id
            ))),
        }
    }
}

struct Pipeline {
    run_id: uuid::Uuid,
    demux: SegmentDemux,
    scheduler: RenderScheduler,
    notifier: CompletionNotifier,
    segments: Vec<Segment>,
    text_tx: mpsc::UnboundedSender<TextStream>,
}

struct Finished {
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

async fn pipeline_task(
    mut pipeline: Pipeline,
    mut events: EventStream,
    display: DisplaySink,
    final_tx: oneshot::Sender<Result<GenerationOutput, StreamError>>,
) {
    let run_id = pipeline.run_id;
    match pipeline.consume(&mut events).await {
        Ok(finished) => {
            display.done(None);
            info!(run_id = %run_id, segments = pipeline.segments.len(), "segment pipeline finished");
            let _ = final_tx.send(Ok(GenerationOutput {
                run_id,
                segments: pipeline.segments,
                finish_reason: finished.finish_reason,
                usage: finished.usage,
            }));
        }
        Err(err) => {
            pipeline.scheduler.abort();
            warn!(run_id = %run_id, error = %err, "segment pipeline failed");
            display.error(err.clone());
            let _ = final_tx.send(Err(err));
        }
    }
}

impl Pipeline {
    async fn consume(&mut self, events: &mut EventStream) -> Result<Finished, StreamError> {
        let halt = loop {
            tokio::select! {
                biased;
                Some(settled) = self.scheduler.next_settled() => settled?,
                next = events.next() => {
                    let event = match next {
                        Some(Ok(event)) => event,
                        Some(Err(failure)) => GenerationEvent::Error { cause: failure },
                        None => {
                            return Err(StreamError::protocol_msg(
                                "event stream ended without finish",
                            ));
                        }
                    };
                    if let Some(halt) = self.apply(event)? {
                        break halt;
                    }
                }
            }
        };

        match halt {
            Halt::Failed(cause) => Err(StreamError::Upstream(cause)),
            Halt::Finished {
                finish_reason,
                usage,
            } => {
                self.scheduler.settle_all().await?;
                Ok(Finished {
                    finish_reason,
                    usage,
                })
            }
        }
    }

    /// Applies one event: closed segments go to the scheduler, then to the
    /// notifier, before the next event is read.
    fn apply(&mut self, event: GenerationEvent) -> Result<Option<Halt>, StreamError> {
        debug!(run_id = %self.run_id, event = event.kind(), "event");
        let transition = self.demux.apply(event);
        if let Some(stream) = transition.opened {
            let _ = self.text_tx.send(stream);
        }
        for segment in transition.closed {
            self.scheduler.schedule(segment.clone());
            self.notifier.notify(&segment)?;
            self.segments.push(segment);
        }
        Ok(transition.halt)
    }
}
