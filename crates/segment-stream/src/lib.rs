//! Splits one model generation event stream into ordered segments and renders
//! them concurrently while keeping the display in segment order.
//!
//! A generation is a run of text deltas and tool calls. Consecutive text
//! deltas form one text segment; every tool call is its own segment. Each
//! closed segment is rendered by its own task, started as soon as the segment
//! closes, but a segment's final content only lands after every earlier
//! segment has landed.
//!
//! # Usage
//!
//! ```no_run
//! use segment_stream::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let events = stream_of(vec![
//!     GenerationEvent::text("Let me check"),
//!     GenerationEvent::tool_call("1", "lookup", json!({"q": "weather"})),
//!     GenerationEvent::finish(),
//! ]);
//!
//! let run = PipelineBuilder::new()
//!     .initial(Node::text("thinking…"))
//!     .tool("lookup", |call| {
//!         let q = call.args["q"].as_str().unwrap_or_default().to_string();
//!         Ok(Rendered::deferred(async move {
//!             Ok(Node::text(format!("looked up {q}")))
//!         }))
//!     })
//!     .on_segment(|segment| {
//!         println!("segment {} closed", segment.index());
//!         Ok(())
//!     })
//!     .start(events)?;
//!
//! let mut display = run.display();
//! let output = run.finish().await?;
//! println!("{:?}", display.wait_sealed().await.nodes());
//! println!("{}", output.text());
//! # Ok(())
//! # }
//! ```

/// Segment splitting state machine.
pub mod demux;
/// Observable display value and per-segment slots.
pub mod display;
/// Public error types.
pub mod errors;
/// Normalized generation events.
pub mod event;
/// Segment completion observer.
pub mod notify;
/// Tracing subscriber setup.
pub mod observability;
/// Pipeline options and environment configuration.
pub mod options;
/// Pipeline builder, running handle, and final output.
pub mod pipeline;
/// Common imports for typical usage.
pub mod prelude;
/// Renderer capabilities and the per-tool renderer registry.
pub mod render;
/// Ordered concurrent rendering of closed segments.
pub mod scheduler;
/// Segment types and live text streams.
pub mod segment;
/// Event source contract.
pub mod source;
/// Event stream duplication.
pub mod tee;

pub use demux::{Halt, SegmentDemux, Transition};
pub use display::{
    DisplayHandle, DisplaySink, DisplayState, DisplayStatus, Node, SlotSink, SlotState,
};
pub use errors::{BoxError, GenerationFailure, RenderError, StreamError};
pub use event::{EventStream, GenerationEvent, Usage};
pub use notify::{CompletionNotifier, SegmentObserver};
pub use observability::init_observability;
pub use options::PipelineOptions;
pub use pipeline::{GenerationOutput, PipelineBuilder, SegmentedRun};
pub use render::{RenderStep, Rendered, RendererRegistry};
pub use scheduler::RenderScheduler;
pub use segment::{Segment, TextSegment, TextSnapshot, TextStream, ToolSegment};
pub use source::{EventSource, stream_of};
