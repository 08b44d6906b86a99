use std::{sync::Arc, time::{Duration, Instant}};

use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{debug, warn};
use url::Url;

use crate::{error::RelayError, metrics::RelayMetrics};

/// Body of `POST /v1/receipts/<account>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub receipt_type: String,
    pub recipient: String,
    pub timestamp: u64,
}

impl ReadReceipt {
    pub fn read(recipient: impl Into<String>, timestamp: u64) -> Self {
        ReadReceipt {
            receipt_type: "read".to_string(),
            recipient: recipient.into(),
            timestamp,
        }
    }
}

#[async_trait]
pub trait ReceiptSender: Send + Sync + 'static {
    async fn send(&self, receipt: &ReadReceipt) -> Result<(), RelayError>;
}

/// Posts receipts to the REST service. One attempt per receipt.
#[derive(Debug, Clone)]
pub struct HttpReceiptClient {
    client: reqwest::Client,
    url: Url,
    auth_token: Option<String>,
}

impl HttpReceiptClient {
    pub fn new(url: Url, auth_token: Option<String>, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("cannot build http client: {e}")))?;
        Ok(HttpReceiptClient {
            client,
            url,
            auth_token,
        })
    }
}

#[async_trait]
impl ReceiptSender for HttpReceiptClient {
    async fn send(&self, receipt: &ReadReceipt) -> Result<(), RelayError> {
        let mut request = self.client.post(self.url.clone()).json(receipt);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(RelayError::Receipt(format!("{status}: {body}")))
    }
}

/// Fires receipts as detached tasks, at most `max_inflight` at a time, each
/// bounded by `timeout`. A receipt that finds every slot taken is dropped, so
/// nothing queues behind a slow backend. Results are only logged and counted.
#[derive(Clone)]
pub struct ReceiptDispatcher {
    sender: Arc<dyn ReceiptSender>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    metrics: RelayMetrics,
}

impl ReceiptDispatcher {
    pub fn new(
        sender: Arc<dyn ReceiptSender>,
        max_inflight: usize,
        timeout: Duration,
        metrics: RelayMetrics,
    ) -> Self {
        ReceiptDispatcher {
            sender,
            permits: Arc::new(Semaphore::new(max_inflight.max(1))),
            timeout,
            metrics,
        }
    }

    /// Returns `None` when the receipt was dropped for lack of a free slot.
    pub fn dispatch(&self, receipt: ReadReceipt) -> Option<JoinHandle<()>> {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            self.metrics
                .receipts_failed
                .add(1, &[KeyValue::new("reason", "saturated")]);
            warn!(
                recipient = %receipt.recipient,
                timestamp = receipt.timestamp,
                "too many read receipts in flight, dropping"
            );
            return None;
        };
        let sender = self.sender.clone();
        let timeout = self.timeout;
        let metrics = self.metrics.clone();

        Some(tokio::spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, sender.send(&receipt)).await {
                Ok(result) => result,
                Err(_) => Err(RelayError::Receipt(format!(
                    "timed out after {} ms",
                    timeout.as_millis()
                ))),
            };
            metrics
                .receipt_latency_ms
                .record(started.elapsed().as_secs_f64() * 1_000.0, &[]);
            match result {
                Ok(()) => {
                    metrics.receipts_sent.add(1, &[]);
                    debug!(
                        recipient = %receipt.recipient,
                        timestamp = receipt.timestamp,
                        "read receipt sent"
                    );
                }
                Err(err) => {
                    metrics
                        .receipts_failed
                        .add(1, &[KeyValue::new("reason", "error")]);
                    warn!(
                        recipient = %receipt.recipient,
                        timestamp = receipt.timestamp,
                        error = %err,
                        "read receipt failed"
                    );
                }
            }
        }))
    }
}
