//! Sluice wire: the binary row protocol spoken between the producer-side
//! export operator and the bridge receiver.
//!
//! Everything in this crate is pure computation over byte slices. Sockets,
//! buffers and backpressure live in `sluice-bridge`.

// crate-specific lint exceptions:
#![allow(clippy::missing_errors_doc)]

/// Columnar row batches, the unit handed from the receiver to consumers
pub mod batch;
/// Big-endian primitive readers/writers and the checked decode window
pub mod codec;
/// Decompression of batch frames (none, zlib, lz4)
pub mod compression;
/// Producer decimal encodings
pub mod decimal;
/// Parsing of batch payloads into columnar batches
pub mod row_decoder;
/// Reference encoder for the per-row wire format
pub mod row_encoder;
/// Column schemas and the handshake JSON
pub mod schema;
/// Producer date/time/timestamp encodings
pub mod temporal;
/// UTF-16LE to UTF-8 conversion
pub mod utf16;

pub use codec::{CodecError, DecodeWindow};
