use crate::config::ConnectorConfig;
use sluice_bridge::token::{mask_secret, DynamicToken};
use sluice_wire::compression::Compression;
use std::net::SocketAddr;

/// Where one producer export should deliver its rows.
#[derive(Debug, Clone)]
pub struct ExportTarget {
    /// Bridge endpoints, one per consumer worker, as literal IPs.
    pub endpoints: Vec<SocketAddr>,
    pub query_id: String,
    pub token: DynamicToken,
    pub compression: Compression,
}

impl ExportTarget {
    fn endpoint_list(&self) -> String {
        let rendered: Vec<String> = self.endpoints.iter().map(|a| a.to_string()).collect();
        rendered.join(",")
    }
}

/// Renders the producer-side export invocation. The inner SELECT is the
/// planned table SQL; the DIMENSION row carries the delivery parameters
/// every processing unit needs.
///
/// The result embeds the raw token; pass it through [`loggable`] before it
/// reaches any log line.
pub fn build_export_query(
    config: &ConnectorConfig,
    planned_sql: &str,
    target: &ExportTarget,
) -> String {
    format!(
        "SELECT * FROM \"{}\".\"{}\"(\
         ON ({planned_sql}) \
         ON (SELECT '{endpoints}' AS worker_endpoints, '{query_id}' AS query_id, \
         '{token}' AS auth_token, {compression} AS compression) DIMENSION\
         ) AS export_bridge",
        config.udf_database,
        config.udf_name,
        endpoints = target.endpoint_list(),
        query_id = target.query_id,
        token = target.token.expose(),
        compression = target.compression.as_wire(),
    )
}

/// The export SQL with the token masked, safe for logs and error messages.
pub fn loggable(sql: &str, token: &DynamicToken) -> String {
    mask_secret(sql, token.expose())
}
