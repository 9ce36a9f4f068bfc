use thiserror::Error;

/// Errors surfaced to the consumer engine.
///
/// Per-connection failures (`ProtocolDecode`) are isolated: the connection
/// closes and the query continues on its remaining connections. Per-query
/// failures are recorded on the query's buffer and returned by the next
/// poll. Backpressure is not an error; a full buffer blocks the pusher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("unauthorized bridge connection")]
    AuthFailure,

    #[error("protocol decode error: {0}")]
    ProtocolDecode(String),

    #[error("producer execution failed: {0}")]
    ProducerExec(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("query cancelled")]
    Cancelled,
}
