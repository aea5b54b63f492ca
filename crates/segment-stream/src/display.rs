//! Display sink for one generation.
//!
//! The display is a list of slots, one per scheduled segment, in closing
//! order. The first scheduled slot takes the placeholder's position; every
//! later slot is appended after it. The whole state is published through a
//! `watch` channel so consumers always read the latest value.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::errors::StreamError;

/// Renderable display content.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "v", rename_all = "snake_case")]
pub enum Node {
    Empty,
    Text { value: String },
    Json { value: serde_json::Value },
    /// Fallback shown for a tool call with no registered renderer.
    ToolNotFound { name: String },
    Stack { children: Vec<Node> },
}

impl Node {
    pub fn text(value: impl Into<String>) -> Self {
        Node::Text {
            value: value.into(),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Node::Json { value }
    }
}

/// Overall status of the display sink.
#[derive(Clone, Debug, PartialEq)]
pub enum DisplayStatus {
    Streaming,
    Done,
    Failed(StreamError),
}

/// One segment's region of the display.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotState {
    pub segment: usize,
    /// `None` until the segment's first sink activity.
    pub node: Option<Node>,
    /// Whether this slot stands in for the placeholder until it shows content.
    pub replaces_placeholder: bool,
    pub settled: bool,
}

/// Externally readable display value.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayState {
    pub placeholder: Node,
    pub slots: Vec<SlotState>,
    /// Segment indices in the order their slots settled.
    pub settled_order: Vec<usize>,
    pub status: DisplayStatus,
}

impl DisplayState {
    fn new(placeholder: Node) -> Self {
        Self {
            placeholder,
            slots: Vec::new(),
            settled_order: Vec::new(),
            status: DisplayStatus::Streaming,
        }
    }

    /// Nodes currently visible, in display order.
    pub fn nodes(&self) -> Vec<Node> {
        if self.slots.is_empty() {
            return vec![self.placeholder.clone()];
        }
        self.slots
            .iter()
            .filter_map(|slot| match (&slot.node, slot.replaces_placeholder) {
                (Some(node), _) => Some(node.clone()),
                (None, true) => Some(self.placeholder.clone()),
                (None, false) => None,
            })
            .collect()
    }

    /// True while nothing has replaced the placeholder.
    pub fn shows_placeholder(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| !slot.replaces_placeholder || slot.node.is_none())
    }

    pub fn is_sealed(&self) -> bool {
        !matches!(self.status, DisplayStatus::Streaming)
    }

    pub fn error(&self) -> Option<&StreamError> {
        match &self.status {
            DisplayStatus::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Write side of the display, shared by the pipeline and its render tasks.
#[derive(Clone, Debug)]
pub struct DisplaySink {
    tx: Arc<watch::Sender<DisplayState>>,
}

impl DisplaySink {
    pub fn new(placeholder: Node) -> Self {
        let (tx, _rx) = watch::channel(DisplayState::new(placeholder));
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> DisplayHandle {
        DisplayHandle {
            rx: self.tx.subscribe(),
            terminal_seen: false,
        }
    }

    pub fn current(&self) -> DisplayState {
        self.tx.borrow().clone()
    }

    /// Reserves the next slot for `segment`.
    ///
    /// With `replaces_placeholder` the slot takes over the placeholder's
    /// position on its first activity; otherwise it is appended alongside the
    /// slots before it.
    pub(crate) fn reserve(&self, segment: usize, replaces_placeholder: bool) -> SlotSink {
        let mut position = 0;
        self.tx.send_if_modified(|state| {
            position = state.slots.len();
            state.slots.push(SlotState {
                segment,
                node: None,
                replaces_placeholder,
                settled: false,
            });
            // Reserving is invisible until the slot shows something.
            false
        });
        SlotSink {
            display: self.clone(),
            position,
            segment,
        }
    }

    /// Seals the display in its error state. Returns false if already sealed.
    pub fn error(&self, cause: StreamError) -> bool {
        let sealed = self.tx.send_if_modified(|state| {
            if state.is_sealed() {
                return false;
            }
            state.status = DisplayStatus::Failed(cause.clone());
            true
        });
        if sealed {
            debug!(error = %cause, "display sealed with error");
        }
        sealed
    }

    /// Seals the display. With `Some(node)`, `node` becomes the final content
    /// of the last slot (or replaces the placeholder when no slot exists).
    /// Returns false if already sealed.
    pub fn done(&self, node: Option<Node>) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_sealed() {
                return false;
            }
            if let Some(node) = node {
                match state.slots.last_mut() {
                    Some(slot) => slot.node = Some(node),
                    None => state.placeholder = node,
                }
            }
            state.status = DisplayStatus::Done;
            true
        })
    }
}

/// Per-segment sink: the render task's handle on its own slot.
#[derive(Debug)]
pub struct SlotSink {
    display: DisplaySink,
    position: usize,
    segment: usize,
}

impl SlotSink {
    pub fn segment(&self) -> usize {
        self.segment
    }

    /// Shows an intermediate value. Ignored after the slot settled or the
    /// display was sealed.
    pub fn update(&self, node: Node) {
        self.display.tx.send_if_modified(|state| {
            if state.is_sealed() {
                return false;
            }
            match state.slots.get_mut(self.position) {
                Some(slot) if !slot.settled => {
                    slot.node = Some(node);
                    true
                }
                _ => false,
            }
        });
    }

    /// Settles the slot, optionally with a final value. A settled slot keeps
    /// its content; `None` keeps whatever was last shown.
    pub fn done(&self, node: Option<Node>) {
        self.display.tx.send_if_modified(|state| {
            if state.is_sealed() {
                return false;
            }
            let Some(slot) = state.slots.get_mut(self.position) else {
                return false;
            };
            if slot.settled {
                return false;
            }
            if let Some(node) = node {
                slot.node = Some(node);
            }
            slot.settled = true;
            state.settled_order.push(self.segment);
            true
        });
    }
}

/// Read side of the display sink.
#[derive(Clone, Debug)]
pub struct DisplayHandle {
    rx: watch::Receiver<DisplayState>,
    terminal_seen: bool,
}

impl DisplayHandle {
    pub fn current(&self) -> DisplayState {
        self.rx.borrow().clone()
    }

    /// Waits for the next published change. The sealed state is always
    /// delivered once, even after the pipeline dropped its sink; after that
    /// `None` is returned.
    pub async fn changed(&mut self) -> Option<DisplayState> {
        if self.terminal_seen {
            return None;
        }
        // Sealed, seen, and a sink is still alive: nothing can change any more.
        let sealed = self.rx.borrow().is_sealed();
        if sealed && matches!(self.rx.has_changed(), Ok(false)) {
            self.terminal_seen = true;
            return None;
        }
        match self.rx.changed().await {
            Ok(()) => {
                let state = self.rx.borrow_and_update().clone();
                self.terminal_seen = state.is_sealed();
                Some(state)
            }
            Err(_) => None,
        }
    }

    /// Waits until the display is sealed (done or failed).
    pub async fn wait_sealed(&mut self) -> DisplayState {
        let waited = self
            .rx
            .wait_for(DisplayState::is_sealed)
            .await
            .map(|state| state.clone());
        let state = match waited {
            Ok(state) => state,
            Err(_) => self.rx.borrow().clone(),
        };
        self.terminal_seen = state.is_sealed();
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loading() -> Node {
        Node::text("loading…")
    }

    #[test]
    fn placeholder_shown_until_first_activity() {
        let display = DisplaySink::new(loading());
        assert_eq!(display.current().nodes(), vec![loading()]);

        let first = display.reserve(0, true);
        assert_eq!(display.current().nodes(), vec![loading()]);
        assert!(display.current().shows_placeholder());

        first.update(Node::text("a"));
        assert_eq!(display.current().nodes(), vec![Node::text("a")]);
        assert!(!display.current().shows_placeholder());
    }

    #[test]
    fn later_slots_append_in_reservation_order() {
        let display = DisplaySink::new(loading());
        let first = display.reserve(0, true);
        let second = display.reserve(1, false);
        let third = display.reserve(2, false);

        third.update(Node::text("c"));
        assert_eq!(display.current().nodes(), vec![loading(), Node::text("c")]);

        first.update(Node::text("a"));
        second.done(Some(Node::text("b")));
        assert_eq!(
            display.current().nodes(),
            vec![Node::text("a"), Node::text("b"), Node::text("c")]
        );
        assert_eq!(display.current().settled_order, vec![1]);
    }

    #[test]
    fn settled_slot_ignores_updates() {
        let display = DisplaySink::new(Node::Empty);
        let slot = display.reserve(0, true);
        slot.update(Node::text("draft"));
        slot.done(None);
        slot.update(Node::text("late"));
        slot.done(Some(Node::text("later")));
        let state = display.current();
        assert_eq!(state.nodes(), vec![Node::text("draft")]);
        assert_eq!(state.settled_order, vec![0]);
    }

    #[test]
    fn sealing_happens_once() {
        let display = DisplaySink::new(loading());
        let slot = display.reserve(0, true);
        assert!(display.error(StreamError::Protocol("boom".into())));
        assert!(!display.done(None));
        slot.update(Node::text("ignored"));
        let state = display.current();
        assert_eq!(state.error(), Some(&StreamError::Protocol("boom".into())));
        assert_eq!(state.nodes(), vec![loading()]);
    }

    #[test]
    fn done_with_node_replaces_placeholder_when_nothing_scheduled() {
        let display = DisplaySink::new(loading());
        assert!(display.done(Some(Node::text("final"))));
        let state = display.current();
        assert_eq!(state.status, DisplayStatus::Done);
        assert_eq!(state.nodes(), vec![Node::text("final")]);
    }

    #[tokio::test]
    async fn handle_observes_changes_until_sealed() {
        let display = DisplaySink::new(loading());
        let mut handle = display.subscribe();
        let slot = display.reserve(0, true);
        slot.update(Node::text("x"));
        let state = handle.changed().await.expect("update");
        assert_eq!(state.nodes(), vec![Node::text("x")]);

        display.done(None);
        let sealed = handle.wait_sealed().await;
        assert_eq!(sealed.status, DisplayStatus::Done);
        assert_eq!(handle.changed().await, None);
    }

    #[tokio::test]
    async fn lagging_handle_sees_the_sealed_state_after_the_sink_is_gone() {
        let display = DisplaySink::new(loading());
        let mut handle = display.subscribe();
        let slot = display.reserve(0, true);
        slot.update(Node::text("x"));
        slot.done(None);
        display.done(None);
        drop(slot);
        drop(display);

        let state = handle.changed().await.expect("sealed state");
        assert_eq!(state.status, DisplayStatus::Done);
        assert_eq!(state.nodes(), vec![Node::text("x")]);
        assert_eq!(handle.changed().await, None);
    }
}
