use sluice_bridge::token::DynamicToken;
use std::net::SocketAddr;
use uuid::Uuid;

/// Generates a fresh, globally unique query id.
pub fn new_query_id() -> String {
    format!("sluice-{}", Uuid::new_v4())
}

/// One unit of work: drain the query's buffer on a single named worker.
///
/// The split id carries a random suffix so two tables of the same join never
/// share a buffer, and the split declares itself pinned so the engine
/// schedules it exactly on `worker`.
#[derive(Debug, Clone)]
pub struct Split {
    pub split_id: String,
    pub query_id: String,
    pub worker: SocketAddr,
    pub token: DynamicToken,
}

impl Split {
    pub fn new(query_id: &str, table_name: &str, worker: SocketAddr, token: DynamicToken) -> Self {
        Self {
            split_id: format!("{query_id}:{table_name}:{}", Uuid::new_v4()),
            query_id: query_id.to_string(),
            worker,
            token,
        }
    }

    /// Always false: the split must run on the worker whose bridge receives
    /// this query's connections.
    pub fn is_remotely_accessible(&self) -> bool {
        false
    }

    /// The only address this split may be scheduled on.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        vec![self.worker]
    }
}
