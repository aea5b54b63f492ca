use tokio::sync::watch;

/// A closed, immutable unit of model output.
#[derive(Clone, Debug)]
pub enum Segment {
    Text(TextSegment),
    ToolCall(ToolSegment),
}

impl Segment {
    /// Position of this segment in creation order, starting at 0.
    pub fn index(&self) -> usize {
        match self {
            Segment::Text(text) => text.index,
            Segment::ToolCall(call) => call.index,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Segment::Text(_) => "text",
            Segment::ToolCall(_) => "tool-call",
        }
    }

    pub fn as_text(&self) -> Option<&TextSegment> {
        match self {
            Segment::Text(text) => Some(text),
            Segment::ToolCall(_) => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolSegment> {
        match self {
            Segment::ToolCall(call) => Some(call),
            Segment::Text(_) => None,
        }
    }
}

/// A contiguous run of text deltas.
#[derive(Clone, Debug)]
pub struct TextSegment {
    pub index: usize,
    /// Concatenation of every delta received while the segment was open.
    pub text: String,
    stream: TextStream,
}

impl TextSegment {
    /// Subscribable view of this segment's text sink. Sealed once the segment
    /// is closed.
    pub fn stream(&self) -> TextStream {
        self.stream.clone()
    }
}

/// A single completed tool invocation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolSegment {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// Snapshot of a per-segment text sink.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextSnapshot {
    pub text: String,
    /// Last delta appended, empty before the first one.
    pub delta: String,
    pub done: bool,
}

/// Write side of a per-segment text sink, owned by the demultiplexer while the
/// segment is open.
#[derive(Debug)]
pub(crate) struct TextSink {
    index: usize,
    tx: watch::Sender<TextSnapshot>,
}

impl TextSink {
    pub(crate) fn open(index: usize, seed: &str) -> Self {
        let (tx, _rx) = watch::channel(TextSnapshot {
            text: seed.to_string(),
            delta: seed.to_string(),
            done: false,
        });
        Self { index, tx }
    }

    pub(crate) fn append(&self, delta: &str) {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.done {
                return false;
            }
            snapshot.text.push_str(delta);
            snapshot.delta = delta.to_string();
            true
        });
    }

    pub(crate) fn done(&self) {
        self.tx.send_if_modified(|snapshot| !std::mem::replace(&mut snapshot.done, true));
    }

    pub(crate) fn subscribe(&self) -> TextStream {
        TextStream {
            index: self.index,
            rx: self.tx.subscribe(),
            terminal_seen: false,
        }
    }

    /// Seals the sink and freezes it into a closed segment.
    pub(crate) fn close(self, text: String) -> TextSegment {
        self.done();
        TextSegment {
            index: self.index,
            text,
            stream: self.subscribe(),
        }
    }
}

/// Read side of a per-segment text sink.
#[derive(Clone, Debug)]
pub struct TextStream {
    index: usize,
    rx: watch::Receiver<TextSnapshot>,
    terminal_seen: bool,
}

impl TextStream {
    pub fn segment_index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> TextSnapshot {
        self.rx.borrow().clone()
    }

    /// Waits for the next change. The sealed snapshot is always delivered
    /// once, even when the sink was dropped before this call; after that
    /// `None` is returned.
    pub async fn changed(&mut self) -> Option<TextSnapshot> {
        if self.terminal_seen {
            return None;
        }
        // Sealed, seen, and the sink is still alive: nothing can change any more.
        let sealed = self.rx.borrow().done;
        if sealed && matches!(self.rx.has_changed(), Ok(false)) {
            self.terminal_seen = true;
            return None;
        }
        match self.rx.changed().await {
            Ok(()) => {
                let snapshot = self.rx.borrow_and_update().clone();
                self.terminal_seen = snapshot.done;
                Some(snapshot)
            }
            Err(_) => None,
        }
    }

    /// Waits until the sink is sealed and returns the final snapshot.
    pub async fn wait_done(&mut self) -> TextSnapshot {
        let waited = self
            .rx
            .wait_for(|snapshot| snapshot.done)
            .await
            .map(|snapshot| snapshot.clone());
        let snapshot = match waited {
            Ok(snapshot) => snapshot,
            // Sender dropped: nothing can change any more.
            Err(_) => self.rx.borrow().clone(),
        };
        self.terminal_seen = snapshot.done;
        snapshot
    }
}
