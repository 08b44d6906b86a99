// channel_signal/src/relay.rs
use std::sync::Arc;

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

use crate::{
    config::RelayConfig,
    connector::{FrameStream, StreamConnector, WsConnector},
    error::RelayError,
    event::{Classification, NormalizedEvent},
    metrics::RelayMetrics,
    processor::{FrameOutcome, FrameProcessor},
    receipt::{HttpReceiptClient, ReadReceipt, ReceiptDispatcher, ReceiptSender},
    sink::EventSink,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Waiting out the reconnect delay.
    Reconnecting,
    Stopped,
}

/// One inbound relay for one account. Configure it, then [`Relay::start`].
pub struct Relay {
    config: RelayConfig,
    sink: Arc<dyn EventSink>,
    connector: Arc<dyn StreamConnector>,
    receipt_sender: Option<Arc<dyn ReceiptSender>>,
    metrics: RelayMetrics,
}

impl Relay {
    pub fn new(config: RelayConfig, sink: impl EventSink) -> Self {
        Relay {
            config,
            sink: Arc::new(sink),
            connector: Arc::new(WsConnector::default()),
            receipt_sender: None,
            metrics: RelayMetrics::new(),
        }
    }

    pub fn with_connector(mut self, connector: impl StreamConnector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Overrides the HTTP receipt client. Only used when `mark_as_read` is on.
    pub fn with_receipt_sender(mut self, sender: impl ReceiptSender) -> Self {
        self.receipt_sender = Some(Arc::new(sender));
        self
    }

    /// Validates the configuration and spawns the run loop on the current
    /// tokio runtime. Configuration errors are the only errors returned.
    pub fn start(self) -> Result<RelayHandle, RelayError> {
        self.config.validate()?;
        let stream_url = self.config.stream_url()?;

        let receipts = if self.config.mark_as_read {
            let sender: Arc<dyn ReceiptSender> = match self.receipt_sender {
                Some(sender) => sender,
                None => Arc::new(HttpReceiptClient::new(
                    self.config.receipt_url()?,
                    self.config.auth_token.clone(),
                    self.config.receipt_timeout,
                )?),
            };
            Some(ReceiptDispatcher::new(
                sender,
                self.config.max_inflight_receipts,
                self.config.receipt_timeout,
                self.metrics.clone(),
            ))
        } else {
            None
        };

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();
        let span = info_span!("signal_relay", account = %self.config.account);

        let run_loop = RunLoop {
            processor: FrameProcessor::new(self.config.account.clone(), self.config.filters),
            config: self.config,
            stream_url,
            connector: self.connector,
            sink: self.sink,
            receipts,
            metrics: self.metrics,
            state: state_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run_loop.run().instrument(span));

        Ok(RelayHandle {
            cancel,
            state: state_rx,
            task: Some(task),
        })
    }
}

/// Control surface of a running relay. Dropping it stops the relay.
pub struct RelayHandle {
    cancel: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl RelayHandle {
    /// Closes the connection and cancels any pending reconnect. Safe to call
    /// more than once.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!("relay stop requested");
        }
        self.cancel.cancel();
    }

    /// [`stop`](Self::stop), then wait for the run loop to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "relay task ended abnormally");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum SessionEnd {
    Stopped,
    Closed,
    Errored(RelayError),
}

struct RunLoop {
    config: RelayConfig,
    stream_url: Url,
    connector: Arc<dyn StreamConnector>,
    processor: FrameProcessor,
    sink: Arc<dyn EventSink>,
    receipts: Option<ReceiptDispatcher>,
    metrics: RelayMetrics,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl RunLoop {
    async fn run(mut self) {
        info!(url = %self.stream_url, "relay started");
        loop {
            self.state.send_replace(ConnectionState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                res = self.connector.connect(&self.stream_url, self.config.auth_token.as_deref()) => res,
            };

            match connected {
                Ok(mut stream) => {
                    self.state.send_replace(ConnectionState::Open);
                    info!("receive stream open");
                    match self.pump(stream.as_mut()).await {
                        SessionEnd::Stopped => {
                            stream.close().await;
                            break;
                        }
                        SessionEnd::Closed => info!("receive stream closed"),
                        SessionEnd::Errored(err) => warn!(error = %err, "receive stream failed"),
                    }
                }
                Err(err) => warn!(error = %err, "could not open receive stream"),
            }

            // close and error both end up here, so only one reconnect is ever pending
            self.state.send_replace(ConnectionState::Reconnecting);
            let delay = self.config.reconnect_delay;
            info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
            self.metrics.reconnects.add(1, &[]);
        }
        self.state.send_replace(ConnectionState::Stopped);
        info!("relay stopped");
    }

    async fn pump(&mut self, stream: &mut dyn FrameStream) -> SessionEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Stopped,
                next = stream.next_frame() => next,
            };
            match next {
                Some(Ok(text)) => self.handle_frame(&text),
                Some(Err(err)) => return SessionEnd::Errored(err),
                None => return SessionEnd::Closed,
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        self.metrics.frames_received.add(1, &[]);
        let event = match self.processor.process(text) {
            FrameOutcome::Accepted(event) => *event,
            FrameOutcome::Discarded(reason) => {
                debug!(reason = reason.as_str(), "frame discarded");
                self.metrics.discarded(reason);
                return;
            }
        };

        let receipt = self.receipt_for(&event);
        let timestamp = event.timestamp;
        if let Err(err) = self.sink.emit(vec![event]) {
            warn!(timestamp, error = %err, "could not deliver event");
            return;
        }
        self.metrics.events_delivered.add(1, &[]);
        debug!(timestamp, "event delivered");

        if let (Some(dispatcher), Some(receipt)) = (&self.receipts, receipt) {
            dispatcher.dispatch(receipt);
        }
    }

    fn receipt_for(&self, event: &NormalizedEvent) -> Option<ReadReceipt> {
        if self.receipts.is_none() || event.classification != Classification::Incoming {
            return None;
        }
        match event.sender_id() {
            Some(recipient) => Some(ReadReceipt::read(recipient, event.timestamp)),
            None => {
                debug!(timestamp = event.timestamp, "no sender identity, skipping read receipt");
                None
            }
        }
    }
}
