//! Renderer capability model and registry.
//!
//! A renderer turns one closed segment into display content. What it returns
//! decides how the scheduler drives it:
//!
//! - [`Rendered::Value`]: a plain node, settled immediately.
//! - [`Rendered::Deferred`]: a future resolving to the final node.
//! - [`Rendered::Sequence`]: a synchronous sequence of [`RenderStep`]s.
//! - [`Rendered::Stream`]: an asynchronous sequence of [`RenderStep`]s.
//!
//! Sequences are always consumed to exhaustion. Each `Update` is shown on the
//! segment's slot as it arrives; the last `Done` is the final value. A
//! sequence that never yields `Done` settles with its last update.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::display::Node;
use crate::errors::{RenderError, StreamError};
use crate::segment::{Segment, TextSegment, ToolSegment};

/// One step produced by a sequence renderer.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderStep {
    Update(Node),
    Done(Node),
}

pub type RenderSequence = Box<dyn Iterator<Item = Result<RenderStep, RenderError>> + Send>;
pub type RenderStream = BoxStream<'static, Result<RenderStep, RenderError>>;

/// Value returned by a renderer.
pub enum Rendered {
    Value(Node),
    Deferred(BoxFuture<'static, Result<Node, RenderError>>),
    Sequence(RenderSequence),
    Stream(RenderStream),
}

impl Rendered {
    pub fn value(node: Node) -> Self {
        Rendered::Value(node)
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Node, RenderError>> + Send + 'static,
    {
        Rendered::Deferred(Box::pin(future))
    }

    pub fn sequence<I>(steps: I) -> Self
    where
        I: IntoIterator<Item = Result<RenderStep, RenderError>>,
        I::IntoIter: Send + 'static,
    {
        Rendered::Sequence(Box::new(steps.into_iter()))
    }

    pub fn stream<S>(steps: S) -> Self
    where
        S: futures::Stream<Item = Result<RenderStep, RenderError>> + Send + 'static,
    {
        Rendered::Stream(Box::pin(steps))
    }

    pub fn capability(&self) -> &'static str {
        match self {
            Rendered::Value(_) => "value",
            Rendered::Deferred(_) => "deferred",
            Rendered::Sequence(_) => "sequence",
            Rendered::Stream(_) => "stream",
        }
    }
}

impl fmt::Debug for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rendered::Value(node) => f.debug_tuple("Value").field(node).finish(),
            other => write!(f, "Rendered::{}", other.capability()),
        }
    }
}

/// Renderer for one tool name.
pub type ToolRenderFn = Arc<dyn Fn(&ToolSegment) -> Result<Rendered, RenderError> + Send + Sync>;

/// Renderer for text segments.
pub type TextRenderFn = Arc<dyn Fn(&TextSegment) -> Result<Rendered, RenderError> + Send + Sync>;

/// Registry: tool name -> renderer, plus the text renderer.
#[derive(Clone)]
pub struct RendererRegistry {
    tools: HashMap<String, ToolRenderFn>,
    text: Option<TextRenderFn>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            text: None,
        }
    }

    /// Registers the renderer for `name`. Registering a name twice is an error.
    pub fn register_tool(
        &mut self,
        name: impl Into<String>,
        renderer: impl Fn(&ToolSegment) -> Result<Rendered, RenderError> + Send + Sync + 'static,
    ) -> Result<(), StreamError> {
        self.insert_tool(name.into(), Arc::new(renderer))
    }

    pub(crate) fn insert_tool(
        &mut self,
        name: String,
        renderer: ToolRenderFn,
    ) -> Result<(), StreamError> {
        if self.tools.contains_key(&name) {
            return Err(StreamError::Config(format!(
                "duplicate renderer registration for tool: {name}"
            )));
        }
        self.tools.insert(name, renderer);
        Ok(())
    }

    /// Replaces the default text renderer.
    pub fn set_text(
        &mut self,
        renderer: impl Fn(&TextSegment) -> Result<Rendered, RenderError> + Send + Sync + 'static,
    ) {
        self.insert_text(Arc::new(renderer));
    }

    pub(crate) fn insert_text(&mut self, renderer: TextRenderFn) {
        self.text = Some(renderer);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Invokes the renderer for `segment`.
    ///
    /// Text segments without a custom renderer render their final text. Tool
    /// calls with no registered renderer fall back to [`Node::ToolNotFound`].
    pub fn render(&self, segment: &Segment) -> Result<Rendered, RenderError> {
        match segment {
            Segment::Text(text) => match &self.text {
                Some(renderer) => renderer(text),
                None => Ok(Rendered::Value(Node::text(text.text.clone()))),
            },
            Segment::ToolCall(call) => match self.tools.get(&call.name) {
                Some(renderer) => renderer(call),
                None => Ok(Rendered::Value(Node::ToolNotFound {
                    name: call.name.clone(),
                })),
            },
        }
    }
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tools: Vec<_> = self.tools.keys().collect();
        tools.sort();
        f.debug_struct("RendererRegistry")
            .field("tools", &tools)
            .field("custom_text", &self.text.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::GenerationEvent;
    use crate::demux::SegmentDemux;
    use serde_json::json;

    fn closed(events: Vec<GenerationEvent>) -> Vec<Segment> {
        let mut demux = SegmentDemux::new();
        events
            .into_iter()
            .flat_map(|event| demux.apply(event).closed)
            .collect()
    }

    #[test]
    fn duplicate_tool_registration_is_rejected() {
        let mut registry = RendererRegistry::new();
        registry
            .register_tool("lookup", |_call| Ok(Rendered::value(Node::Empty)))
            .expect("first");
        let err = registry
            .register_tool("lookup", |_call| Ok(Rendered::value(Node::Empty)))
            .expect_err("duplicate");
        assert!(matches!(err, StreamError::Config(msg) if msg.contains("duplicate renderer")));
    }

    #[test]
    fn unknown_tool_falls_back_to_not_found() {
        let registry = RendererRegistry::new();
        let segments = closed(vec![GenerationEvent::tool_call("1", "nope", json!({}))]);
        match registry.render(&segments[0]).expect("render") {
            Rendered::Value(Node::ToolNotFound { name }) => assert_eq!(name, "nope"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn text_defaults_to_final_text() {
        let registry = RendererRegistry::new();
        let segments = closed(vec![GenerationEvent::text("hello"), GenerationEvent::finish()]);
        match registry.render(&segments[0]).expect("render") {
            Rendered::Value(node) => assert_eq!(node, Node::text("hello")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn registered_tool_receives_arguments() {
        let mut registry = RendererRegistry::new();
        registry
            .register_tool("lookup", |call| {
                let q = call.args.get("q").and_then(|v| v.as_str()).unwrap_or_default();
                Ok(Rendered::value(Node::text(format!("looked up {q}"))))
            })
            .expect("register");
        assert!(registry.has_tool("lookup"));
        let segments = closed(vec![GenerationEvent::tool_call("1", "lookup", json!({"q": "x"}))]);
        match registry.render(&segments[0]).expect("render") {
            Rendered::Value(node) => assert_eq!(node, Node::text("looked up x")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn custom_text_renderer_can_fail() {
        let mut registry = RendererRegistry::new();
        registry.set_text(|_text| Err(RenderError::new("no text allowed")));
        let segments = closed(vec![GenerationEvent::text("x"), GenerationEvent::finish()]);
        let err = registry.render(&segments[0]).expect_err("fails");
        assert_eq!(err.message(), "no text allowed");
    }
}
