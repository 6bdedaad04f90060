//! Resubmission sink backed by a bounded tokio channel.

use tagward_approvals::{EventSink, SinkError};
use tagward_core::Event;
use tokio::sync::mpsc;

/// Hands approved events to whoever drains the paired receiver.
///
/// Sending never blocks: a full or closed channel is reported as a
/// `SinkError`, which the approval manager logs.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
}

impl ChannelSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn submit(&self, event: Event) -> Result<(), SinkError> {
        self.tx
            .try_send(event)
            .map_err(|e| SinkError(e.to_string()))
    }
}
