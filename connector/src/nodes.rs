use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;

/// Enumerates the bridge endpoints of every active consumer worker.
///
/// Backed by the engine's node manager in a cluster deployment; the static
/// implementation covers single-worker mode and tests.
#[async_trait]
pub trait NodeManager: Send + Sync {
    /// `host:port` bridge endpoints, one per active worker.
    async fn worker_endpoints(&self) -> Result<Vec<String>>;
}

pub struct StaticNodeManager {
    endpoints: Vec<String>,
}

impl StaticNodeManager {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl NodeManager for StaticNodeManager {
    async fn worker_endpoints(&self) -> Result<Vec<String>> {
        Ok(self.endpoints.clone())
    }
}

/// Resolves worker hostnames to literal IP addresses; the producer-side
/// operator does not resolve names itself. IPv4 is preferred when a name
/// has both families.
pub async fn resolve_endpoints(endpoints: &[String]) -> Result<Vec<SocketAddr>> {
    let mut resolved = vec![];
    for endpoint in endpoints {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(endpoint.as_str())
            .await
            .with_context(|| format!("resolving worker endpoint {endpoint}"))?
            .collect();
        let addr = addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .with_context(|| format!("no address for worker endpoint {endpoint}"))?;
        resolved.push(addr);
    }
    Ok(resolved)
}
