//! Sluice bridge: the per-worker TCP server that receives parallel row
//! streams from the producer's processing units.
//!
//! Each producer unit opens its own connection, authenticates with the
//! query's dynamic token and streams compressed row batches. The bridge
//! demultiplexes connections by query id into bounded per-query buffers and
//! signals end-of-stream with a hybrid rule that tolerates connection skew.

// crate-specific lint exceptions:
#![allow(clippy::missing_errors_doc)]

/// The ingestion error taxonomy
pub mod error;
/// Framing constants and length-prefixed read/write helpers
pub mod protocol;
/// The TCP listener and per-connection protocol state machine
pub mod receiver;
/// Process-wide per-query batch buffers and end-of-stream tracking
pub mod registry;
/// Per-query dynamic tokens and secret masking
pub mod token;

pub use error::IngestError;
pub use receiver::{BridgeReceiver, ReceiverConfig};
pub use registry::{BufferRegistry, Polled, RegistrySettings};
pub use token::{DynamicToken, TokenStore};
