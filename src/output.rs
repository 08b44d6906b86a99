//! JSON-RPC 2.0 notifications on stdout, one line per delivered batch.

use channel_signal::{EventSink, NormalizedEvent, RelayError};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
    sync::mpsc::{UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::error;

pub const JSONRPC_VERSION: &str = "2.0";
pub const MESSAGE_IN: &str = "messageIn";

/// A request without `id`: the host sends no response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Notification {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
        }
    }
}

/// `params` of a `messageIn` notification.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageInParams {
    pub events: Vec<NormalizedEvent>,
    pub received_at: DateTime<Utc>,
}

/// Serialises one batch as a newline-terminated `messageIn` line.
pub fn render_message_in(
    events: Vec<NormalizedEvent>,
    received_at: DateTime<Utc>,
) -> Result<String, serde_json::Error> {
    let params = serde_json::to_value(MessageInParams {
        events,
        received_at,
    })?;
    let notification = Notification::new(MESSAGE_IN, Some(params));
    Ok(format!("{}\n", serde_json::to_string(&notification)?))
}

/// [`EventSink`] that queues lines for a single writer task, so `emit`
/// never blocks the relay.
#[derive(Clone, Debug)]
pub struct JsonRpcStdoutSink {
    tx: UnboundedSender<String>,
}

impl JsonRpcStdoutSink {
    pub fn stdout() -> (Self, JoinHandle<()>) {
        Self::spawn(tokio::io::stdout())
    }

    /// The writer task ends once every clone of the sink is dropped.
    pub fn spawn<W>(writer: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = unbounded_channel::<String>();
        let task = tokio::spawn(async move {
            let mut w = BufWriter::new(writer);
            while let Some(line) = rx.recv().await {
                if let Err(err) = w.write_all(line.as_bytes()).await {
                    error!(error = %err, "stdout write failed");
                    break;
                }
                if let Err(err) = w.flush().await {
                    error!(error = %err, "stdout flush failed");
                    break;
                }
            }
        });
        (JsonRpcStdoutSink { tx }, task)
    }
}

impl EventSink for JsonRpcStdoutSink {
    fn emit(&self, batch: Vec<NormalizedEvent>) -> Result<(), RelayError> {
        let line = render_message_in(batch, Utc::now())
            .map_err(|e| RelayError::Sink(format!("cannot encode batch: {e}")))?;
        self.tx
            .send(line)
            .map_err(|_| RelayError::Sink("stdout writer stopped".into()))
    }
}
