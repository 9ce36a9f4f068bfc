use crate::config::ConnectorConfig;
use crate::connection::ConnectionFactory;
use crate::nodes::{resolve_endpoints, NodeManager};
use crate::operator::{build_export_query, loggable, ExportTarget};
use crate::pushdown::{DynamicFilterSource, PlannedTable, PushdownPlanner};
use crate::split::{new_query_id, Split};
use anyhow::{Context, Result};
use sluice_bridge::protocol::{write_control_frame, COMMAND_JDBC_FINISHED};
use sluice_bridge::registry::BufferRegistry;
use sluice_bridge::token::{mask_secret, DynamicToken, TokenStore};
use sluice_bridge::IngestError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Dispatches one producer export per engine query and hands the engine one
/// pinned split per worker.
pub struct SplitOrchestrator {
    config: ConnectorConfig,
    registry: Arc<BufferRegistry>,
    tokens: Arc<TokenStore>,
    factory: Arc<ConnectionFactory>,
    nodes: Arc<dyn NodeManager>,
    /// In-flight producer export tasks, aborted on cancellation.
    producer_tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl SplitOrchestrator {
    pub fn new(
        config: ConnectorConfig,
        registry: Arc<BufferRegistry>,
        tokens: Arc<TokenStore>,
        factory: Arc<ConnectionFactory>,
        nodes: Arc<dyn NodeManager>,
    ) -> Self {
        Self {
            config,
            registry,
            tokens,
            factory,
            nodes,
            producer_tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a fresh query, starts the producer export in the
    /// background and returns one split per worker endpoint.
    ///
    /// A pending dynamic filter, when the engine supplies one, is waited on
    /// (bounded by `dynamic-filter-timeout`) and folded into the planned SQL
    /// before the export is rendered. The background task always broadcasts
    /// the completion control frame, on success and on failure alike, so
    /// page sources never hang on a failed producer.
    pub async fn create_splits(
        &self,
        table: &PlannedTable,
        end_user: &str,
        dynamic_filter: Option<&dyn DynamicFilterSource>,
    ) -> Result<Vec<Split>> {
        let query_id = new_query_id();
        let token = DynamicToken::generate();
        let endpoints = self
            .nodes
            .worker_endpoints()
            .await
            .with_context(|| "enumerating workers")?;
        let workers = resolve_endpoints(&endpoints)
            .await
            .with_context(|| "resolving worker endpoints")?;
        anyhow::ensure!(!workers.is_empty(), "no active workers to ingest into");

        self.registry.register_query(&query_id);
        self.tokens.register(&query_id, token.clone());

        let table = match dynamic_filter {
            Some(source) => {
                let planner = PushdownPlanner;
                let constraint = planner
                    .collect_dynamic_filter(source, self.config.dynamic_filter_timeout)
                    .await;
                let (planned, residue) = planner.apply_filter(table, &constraint);
                if !residue.is_empty() {
                    debug!(
                        "query {query_id}: {} dynamic filter column(s) stay with the engine",
                        residue.domains.len()
                    );
                }
                planned
            }
            None => table.clone(),
        };
        let planned_sql = table.render_select();
        let export_sql = build_export_query(
            &self.config,
            &planned_sql,
            &ExportTarget {
                endpoints: workers.clone(),
                query_id: query_id.clone(),
                token: token.clone(),
                compression: self.config.compression,
            },
        );
        info!(
            "dispatching export for query {query_id} across {} workers: {}",
            workers.len(),
            loggable(&export_sql, &token)
        );

        let factory = Arc::clone(&self.factory);
        let registry = Arc::clone(&self.registry);
        let tasks = Arc::clone(&self.producer_tasks);
        let background_query_id = query_id.clone();
        let background_token = token.clone();
        let background_workers = workers.clone();
        let background_user = end_user.to_string();
        let handle = tokio::spawn(async move {
            let outcome =
                run_producer_export(&factory, &background_user, &export_sql).await;
            if let Err(e) = outcome {
                // the driver may echo the statement, token included
                let e = match e {
                    IngestError::ProducerExec(message) => IngestError::ProducerExec(
                        mask_secret(&message, background_token.expose()),
                    ),
                    other => other,
                };
                error!("producer export failed for query {background_query_id}: {e}");
                registry.set_error(&background_query_id, e);
            }
            // unblocks every consumer, success or not
            broadcast_jdbc_finished(
                &background_workers,
                Some(background_token.expose()),
                &background_query_id,
            )
            .await;
            tasks.lock().unwrap().remove(&background_query_id);
        });
        {
            let mut tasks = self.producer_tasks.lock().unwrap();
            tasks.retain(|_, task| !task.is_finished());
            tasks.insert(query_id.clone(), handle);
        }

        Ok(workers
            .into_iter()
            .map(|worker| Split::new(&query_id, &table.table_name, worker, token.clone()))
            .collect())
    }

    /// Engine-initiated cancellation: stops the in-flight producer
    /// execution, tears down the buffer and invalidates the query's token.
    /// Late connections are rejected, late pushes drop.
    pub fn cancel_query(&self, query_id: &str) {
        info!("cancelling query {query_id}");
        if let Some(task) = self.producer_tasks.lock().unwrap().remove(query_id) {
            task.abort();
        }
        self.tokens.invalidate(query_id);
        self.registry.deregister_query(query_id);
    }

    /// Whether the query's producer export task is still running.
    pub fn export_running(&self, query_id: &str) -> bool {
        self.producer_tasks
            .lock()
            .unwrap()
            .get(query_id)
            .is_some_and(|task| !task.is_finished())
    }
}

async fn run_producer_export(
    factory: &ConnectionFactory,
    end_user: &str,
    export_sql: &str,
) -> std::result::Result<(), IngestError> {
    let mut session = factory.data_session(end_user).await?;
    let rows = session
        .execute(export_sql)
        .await
        .map_err(|e| IngestError::ProducerExec(format!("{e:#}")))?;
    debug!("producer export moved {rows} rows");
    Ok(())
}

/// Tells every worker's bridge that the producer is done. Per-worker
/// failures are logged and skipped; the local buffer still converges through
/// its own connection accounting.
pub async fn broadcast_jdbc_finished(
    workers: &[SocketAddr],
    token: Option<&str>,
    query_id: &str,
) {
    for worker in workers {
        match TcpStream::connect(worker).await {
            Ok(mut stream) => {
                if let Err(e) =
                    write_control_frame(&mut stream, token, query_id, COMMAND_JDBC_FINISHED).await
                {
                    warn!("control frame to {worker} failed for query {query_id}: {e}");
                }
                let _ = stream.shutdown().await;
            }
            Err(e) => {
                warn!("bridge at {worker} unreachable for query {query_id}: {e}");
            }
        }
    }
}
