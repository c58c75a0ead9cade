//! Engine notifications.

use std::sync::Arc;

use crate::stream::StreamId;

/// Notification delivered to the engine's event handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    /// The first stream opened; the sink is about to receive audio.
    Opened,
    /// The last stream closed.
    Closed,
    /// A runtime failure inside the mix thread. `stream` is `None` for the
    /// mixed stream or the sink itself.
    Error {
        stream: Option<StreamId>,
        message: String,
    },
}

/// Callback invoked for every [`RenderEvent`].
pub type EventHandler = Arc<dyn Fn(&RenderEvent) + Send + Sync>;
