//! Host runner around [`channel_signal`]: settings, logging and the JSON-RPC
//! output stream.

pub mod config;
pub mod logger;
pub mod output;
pub mod schema;
