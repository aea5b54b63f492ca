use tracing::debug;

use crate::errors::{BoxError, StreamError};
use crate::segment::Segment;

/// User callback invoked once per closed segment, in closing order.
pub type SegmentObserver = Box<dyn FnMut(&Segment) -> Result<(), BoxError> + Send>;

/// Fires the segment observer exactly once per closed segment.
///
/// Observer errors are not recovered here; they are returned as
/// [`StreamError::Observer`] and end the generation.
#[derive(Default)]
pub struct CompletionNotifier {
    observer: Option<SegmentObserver>,
    notified: usize,
}

impl CompletionNotifier {
    pub fn new(observer: Option<SegmentObserver>) -> Self {
        Self {
            observer,
            notified: 0,
        }
    }

    /// Segments notified so far.
    pub fn notified(&self) -> usize {
        self.notified
    }

    pub fn notify(&mut self, segment: &Segment) -> Result<(), StreamError> {
        debug_assert_eq!(
            segment.index(),
            self.notified,
            "segments must be notified in closing order"
        );
        if let Segment::Text(text) = segment {
            debug_assert!(text.stream().current().done, "text sink sealed before notify");
        }
        self.notified += 1;

        let Some(observer) = self.observer.as_mut() else {
            return Ok(());
        };
        debug!(segment = segment.index(), kind = segment.kind(), "notifying segment observer");
        observer(segment).map_err(|err| StreamError::Observer {
            segment: segment.index(),
            message: err.to_string(),
        })
    }
}
