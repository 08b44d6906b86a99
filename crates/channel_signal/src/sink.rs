use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::{error::RelayError, event::NormalizedEvent};

/// Downstream consumer of accepted events. Called from the relay task, so
/// implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, batch: Vec<NormalizedEvent>) -> Result<(), RelayError>;
}

/// Hands batches to an in-process receiver.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: UnboundedSender<Vec<NormalizedEvent>>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<Vec<NormalizedEvent>>) {
        let (tx, rx) = unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, batch: Vec<NormalizedEvent>) -> Result<(), RelayError> {
        self.tx
            .send(batch)
            .map_err(|_| RelayError::Sink("receiver dropped".into()))
    }
}
