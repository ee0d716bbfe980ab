//! The event surface the receive pipeline publishes to. A typed
//! publish/subscribe seam, mirroring the broadcast-bus shape the rest of
//! this codebase's UI layer used to lean on, minus any UI coupling.

use relay_wire::{ContactDetails, DataMessage};
use tokio::sync::mpsc;

use crate::error::ReceiverError;

#[derive(Debug, Clone)]
pub struct GroupEvent {
    pub id: Vec<u8>,
    pub name: Option<String>,
    pub members: Vec<String>,
    /// Members present in this UPDATE that weren't in the prior roster.
    pub added: Vec<String>,
}

#[derive(Debug)]
pub enum ReceiverEvent {
    Message {
        source: String,
        timestamp: u64,
        message: DataMessage,
    },
    Sent {
        destination: Option<String>,
        timestamp: u64,
        message: DataMessage,
        expiration_start_timestamp: Option<u64>,
    },
    Receipt {
        source: String,
        timestamp: u64,
    },
    Read {
        sender: String,
        timestamp: u64,
    },
    Contact {
        record: ContactDetails,
    },
    ContactSync,
    Group {
        event: GroupEvent,
    },
    GroupSync,
    Error(ReceiverError),
}

/// Publish side of the event surface. Implementations must not block; the
/// reactor emits inline from its single task.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ReceiverEvent);
}

/// The default sink: an unbounded channel a caller drains on its own
/// schedule. If the receiving end has been dropped, events are discarded
/// silently -- a disinterested consumer isn't this component's problem.
pub struct MpscEventSink {
    tx: mpsc::UnboundedSender<ReceiverEvent>,
}

impl MpscEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReceiverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for MpscEventSink {
    fn emit(&self, event: ReceiverEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitted_events_are_received_in_order() {
        let (sink, mut rx) = MpscEventSink::new();
        sink.emit(ReceiverEvent::Receipt { source: "a".into(), timestamp: 1 });
        sink.emit(ReceiverEvent::Receipt { source: "b".into(), timestamp: 2 });
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, ReceiverEvent::Receipt { source, .. } if source == "a"));
        assert!(matches!(second, ReceiverEvent::Receipt { source, .. } if source == "b"));
    }

    #[test]
    fn dropped_receiver_does_not_panic_on_emit() {
        let (sink, rx) = MpscEventSink::new();
        drop(rx);
        sink.emit(ReceiverEvent::GroupSync);
    }
}
