use std::sync::Arc;

use chrono::{DateTime, Utc};
use idsync_collections::Document;

use crate::tracker::TxTracker;

/// An event handed to the publishing pipeline.
///
/// The tracker handle travels with the event as opaque private state; the
/// pipeline returns it through [`acknowledge`] once the event has been
/// delivered downstream.
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub fields: Document,
    pub private: Option<Arc<TxTracker>>,
}

impl Event {
    pub fn new(fields: Document) -> Self {
        Self {
            timestamp: Utc::now(),
            fields,
            private: None,
        }
    }

    pub fn with_tracker(fields: Document, tracker: Arc<TxTracker>) -> Self {
        Self {
            timestamp: Utc::now(),
            fields,
            private: Some(tracker),
        }
    }
}

/// The publishing side of the host pipeline.
///
/// `publish` must not block; delivery and acknowledgement happen
/// asynchronously on the pipeline's own tasks.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// Acknowledges a delivered batch: every tracker handle carried by the
/// batch gets one `ack`.
pub fn acknowledge<I>(privates: I)
where
    I: IntoIterator<Item = Arc<TxTracker>>,
{
    for tracker in privates {
        tracker.ack();
    }
}
