//! Inbound relay for a signal-cli style REST/WebSocket backend.
//!
//! A [`Relay`] keeps one receive stream open for an account, turns every
//! frame into a [`NormalizedEvent`] (or drops it), hands accepted events to an
//! [`EventSink`] and optionally posts read receipts back to the service.
//!
//! ```no_run
//! use channel_signal::{ChannelSink, Relay, RelayConfig};
//!
//! # async fn demo() -> Result<(), channel_signal::RelayError> {
//! let config = RelayConfig::new("http://localhost:8080", "+4915112345678")?;
//! let (sink, mut events) = ChannelSink::new();
//! let relay = Relay::new(config, sink).start()?;
//! while let Some(batch) = events.recv().await {
//!     println!("{} new event(s)", batch.len());
//! }
//! relay.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod dedup;
pub mod envelope;
pub mod error;
pub mod event;
pub mod metrics;
pub mod processor;
pub mod receipt;
pub mod relay;
pub mod sink;

pub use config::{FilterFlags, RelayConfig};
pub use connector::{FrameStream, StreamConnector, WsConnector};
pub use error::RelayError;
pub use event::{Classification, ContentKind, NormalizedEvent};
pub use metrics::RelayMetrics;
pub use processor::{DiscardReason, FrameOutcome, FrameProcessor};
pub use receipt::{HttpReceiptClient, ReadReceipt, ReceiptSender};
pub use relay::{ConnectionState, Relay, RelayHandle};
pub use sink::{ChannelSink, EventSink};
