//! Common imports for building and running a segment pipeline.
pub use crate::{
    DisplayHandle, DisplayState, DisplayStatus, EventSource, EventStream, GenerationEvent,
    GenerationFailure, GenerationOutput, Node, PipelineBuilder, PipelineOptions, RenderError,
    RenderStep, Rendered, Segment, SegmentedRun, StreamError, TextSegment, TextStream,
    ToolSegment, stream_of,
};
