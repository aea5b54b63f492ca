//! Segment demultiplexer: the boundary-detection state machine.
//!
//! At most one text segment is open at a time. Tool calls are created and
//! closed in the same step. Closing always happens in creation order and is
//! reported synchronously from [`SegmentDemux::apply`].

use tracing::debug;

use crate::errors::GenerationFailure;
use crate::event::{GenerationEvent, Usage};
use crate::segment::{Segment, TextSink, TextStream, ToolSegment};

/// Why the demultiplexer stopped consuming events.
#[derive(Clone, Debug, PartialEq)]
pub enum Halt {
    Finished {
        finish_reason: Option<String>,
        usage: Option<Usage>,
    },
    Failed(GenerationFailure),
}

/// Result of applying one event.
#[derive(Debug, Default)]
pub struct Transition {
    /// Text stream of a segment opened by this event.
    pub opened: Option<TextStream>,
    /// Segments closed by this event, in closing order.
    pub closed: Vec<Segment>,
    /// Set once a terminal event has been applied.
    pub halt: Option<Halt>,
}

#[derive(Debug)]
struct OpenText {
    text: String,
    sink: TextSink,
}

#[derive(Debug, Default)]
pub struct SegmentDemux {
    open: Option<OpenText>,
    next_index: usize,
    halted: bool,
}

impl SegmentDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of segments created so far.
    pub fn created(&self) -> usize {
        self.next_index
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Classifies `event` and advances the state machine.
    ///
    /// Events applied after a terminal event are ignored.
    pub fn apply(&mut self, event: GenerationEvent) -> Transition {
        let mut transition = Transition::default();
        if self.halted {
            debug!(event = event.kind(), "event after terminal ignored");
            return transition;
        }

        match event {
            GenerationEvent::TextDelta { text } => {
                if let Some(open) = self.open.as_mut() {
                    open.text.push_str(&text);
                    open.sink.append(&text);
                } else {
                    let index = self.take_index();
                    let sink = TextSink::open(index, &text);
                    transition.opened = Some(sink.subscribe());
                    debug!(segment = index, "text segment opened");
                    self.open = Some(OpenText { text, sink });
                }
            }
            GenerationEvent::ToolCallDelta { .. } => {}
            GenerationEvent::ToolCall { id, name, args } => {
                self.close_open(&mut transition.closed);
                let index = self.take_index();
                debug!(segment = index, tool = %name, "tool segment closed");
                transition.closed.push(Segment::ToolCall(ToolSegment {
                    index,
                    id,
                    name,
                    args,
                }));
            }
            GenerationEvent::Error { cause } => {
                self.close_open(&mut transition.closed);
                self.halted = true;
                transition.halt = Some(Halt::Failed(cause));
            }
            GenerationEvent::Finish {
                finish_reason,
                usage,
            } => {
                self.close_open(&mut transition.closed);
                self.halted = true;
                transition.halt = Some(Halt::Finished {
                    finish_reason,
                    usage,
                });
            }
        }
        transition
    }

    fn take_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn close_open(&mut self, closed: &mut Vec<Segment>) {
        if let Some(OpenText { text, sink }) = self.open.take() {
            let segment = sink.close(text);
            debug!(segment = segment.index, chars = segment.text.len(), "text segment closed");
            closed.push(Segment::Text(segment));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(events: Vec<GenerationEvent>) -> (Vec<Segment>, Option<Halt>) {
        let mut demux = SegmentDemux::new();
        let mut closed = Vec::new();
        let mut halt = None;
        for event in events {
            let transition = demux.apply(event);
            closed.extend(transition.closed);
            if transition.halt.is_some() {
                halt = transition.halt;
            }
        }
        (closed, halt)
    }

    #[test]
    fn text_deltas_accumulate_into_one_segment() {
        let (closed, halt) = run(vec![
            GenerationEvent::text("Hi "),
            GenerationEvent::text("there"),
            GenerationEvent::finish(),
        ]);
        assert_eq!(closed.len(), 1);
        let text = closed[0].as_text().expect("text segment");
        assert_eq!(text.text, "Hi there");
        assert!(text.stream().current().done);
        assert!(matches!(halt, Some(Halt::Finished { .. })));
    }

    #[test]
    fn tool_call_closes_open_text_first() {
        let (closed, _) = run(vec![
            GenerationEvent::text("Let me check"),
            GenerationEvent::tool_call("1", "lookup", json!({"q": "x"})),
            GenerationEvent::finish(),
        ]);
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].as_text().expect("text").text, "Let me check");
        let call = closed[1].as_tool_call().expect("tool");
        assert_eq!(call.index, 1);
        assert_eq!(call.name, "lookup");
        assert_eq!(call.args, json!({"q": "x"}));
    }

    #[test]
    fn empty_text_segment_still_closes() {
        let mut demux = SegmentDemux::new();
        let opened = demux.apply(GenerationEvent::text(""));
        assert!(opened.opened.is_some());
        let transition = demux.apply(GenerationEvent::tool_call("1", "a", json!(null)));
        assert_eq!(transition.closed.len(), 2);
        assert_eq!(transition.closed[0].as_text().expect("text").text, "");
        assert_eq!(transition.closed[1].index(), 1);
    }

    #[test]
    fn text_after_tool_call_opens_new_segment() {
        let mut demux = SegmentDemux::new();
        demux.apply(GenerationEvent::tool_call("1", "a", json!({})));
        let transition = demux.apply(GenerationEvent::text("after"));
        assert!(transition.closed.is_empty());
        assert_eq!(transition.opened.expect("opened").segment_index(), 1);
        let transition = demux.apply(GenerationEvent::finish());
        assert_eq!(transition.closed[0].as_text().expect("text").text, "after");
    }

    #[test]
    fn tool_call_deltas_are_dropped() {
        let (closed, _) = run(vec![
            GenerationEvent::text("a"),
            GenerationEvent::ToolCallDelta {
                id: "1".into(),
                name: Some("lookup".into()),
                args_text_delta: "{\"q\"".into(),
            },
            GenerationEvent::text("b"),
            GenerationEvent::finish(),
        ]);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].as_text().expect("text").text, "ab");
    }

    #[test]
    fn error_closes_open_segment_and_halts() {
        let failure = GenerationFailure::provider("E");
        let (closed, halt) = run(vec![
            GenerationEvent::text("ok"),
            GenerationEvent::error(failure.clone()),
            GenerationEvent::text("late"),
            GenerationEvent::finish(),
        ]);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].as_text().expect("text").text, "ok");
        assert_eq!(halt, Some(Halt::Failed(failure)));
    }

    #[test]
    fn finish_alone_creates_no_segments() {
        let mut demux = SegmentDemux::new();
        let transition = demux.apply(GenerationEvent::finish());
        assert!(transition.closed.is_empty());
        assert!(demux.is_halted());
        assert_eq!(demux.created(), 0);
    }

    #[test]
    fn accumulated_text_equals_concatenated_deltas() {
        let fragments = ["The ", "quick", "", " brown ", "fox", "…", "\n"];
        let mut events: Vec<_> = fragments.iter().map(|f| GenerationEvent::text(*f)).collect();
        events.push(GenerationEvent::finish());
        let (closed, _) = run(events);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].as_text().expect("text").text, fragments.concat());
    }

    #[test]
    fn indices_follow_creation_order() {
        let (closed, _) = run(vec![
            GenerationEvent::tool_call("1", "a", json!({})),
            GenerationEvent::text("x"),
            GenerationEvent::tool_call("2", "b", json!({})),
            GenerationEvent::tool_call("3", "c", json!({})),
            GenerationEvent::text("y"),
            GenerationEvent::finish(),
        ]);
        let indices: Vec<_> = closed.iter().map(Segment::index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        let kinds: Vec<_> = closed.iter().map(Segment::kind).collect();
        assert_eq!(kinds, vec!["tool-call", "text", "tool-call", "tool-call", "text"]);
    }
}
