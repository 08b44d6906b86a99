use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};

use crate::processor::DiscardReason;

/// Relay counters. Recorded against whatever meter provider is installed
/// globally; with none installed they are no-ops.
#[derive(Clone, Debug)]
pub struct RelayMetrics {
    pub frames_received: Counter<u64>,
    pub events_delivered: Counter<u64>,
    pub frames_discarded: Counter<u64>,
    pub reconnects: Counter<u64>,
    pub receipts_sent: Counter<u64>,
    pub receipts_failed: Counter<u64>,
    pub receipt_latency_ms: Histogram<f64>,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        RelayMetrics::new()
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        let meter = global::meter("channel_signal");

        let frames_received = meter
            .u64_counter("signal_relay.frames_received")
            .with_description("Frames read from the receive stream")
            .build();
        let events_delivered = meter
            .u64_counter("signal_relay.events_delivered")
            .with_description("Normalized events handed to the sink")
            .build();
        let frames_discarded = meter
            .u64_counter("signal_relay.frames_discarded")
            .with_description("Frames dropped, by reason")
            .build();
        let reconnects = meter.u64_counter("signal_relay.reconnects").build();
        let receipts_sent = meter.u64_counter("signal_relay.receipts_sent").build();
        let receipts_failed = meter.u64_counter("signal_relay.receipts_failed").build();
        let receipt_latency_ms = meter
            .f64_histogram("signal_relay.receipt_latency_ms")
            .with_description("Round trip of one read receipt")
            .with_unit("ms")
            .build();

        RelayMetrics {
            frames_received,
            events_delivered,
            frames_discarded,
            reconnects,
            receipts_sent,
            receipts_failed,
            receipt_latency_ms,
        }
    }

    pub(crate) fn discarded(&self, reason: DiscardReason) {
        self.frames_discarded
            .add(1, &[KeyValue::new("reason", reason.as_str())]);
    }
}
