//! Full ingestion path: the orchestrator dispatches a scripted producer,
//! whose processing units stream batches to the bridge over loopback TCP,
//! and a page source drains them.

use anyhow::Result;
use async_trait::async_trait;
use sluice_bridge::receiver::{BridgeReceiver, ReceiverConfig};
use sluice_bridge::registry::{BufferRegistry, RegistrySettings};
use sluice_bridge::token::TokenStore;
use sluice_bridge::IngestError;
use sluice_connector::config::ConnectorConfig;
use sluice_connector::connection::{ConnectionFactory, ProducerConnector, ProducerSession};
use sluice_connector::domain::{Constraint, Domain, Literal, Range};
use sluice_connector::nodes::StaticNodeManager;
use sluice_connector::page_source::{PagePoll, PageSource};
use sluice_connector::pushdown::{DynamicFilterSource, PlannedTable, PushdownPlanner};
use sluice_connector::SplitOrchestrator;
use sluice_wire::batch::ColumnValues;
use sluice_wire::codec::{put_len_prefixed, put_u32};
use sluice_wire::compression::{compress, Compression};
use sluice_wire::row_encoder::{encode_batch, WireValue};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const SCHEMA_JSON: &[u8] = br#"{"columns":[{"name":"test_id","type":"INTEGER"}]}"#;

struct Harness {
    registry: Arc<BufferRegistry>,
    tokens: Arc<TokenStore>,
    orchestrator: SplitOrchestrator,
}

fn start_harness(connector: Arc<dyn ProducerConnector>) -> Harness {
    let registry = BufferRegistry::new(RegistrySettings {
        queue_capacity: 16,
        eos_idle_window: Duration::from_millis(100),
    });
    let tokens = Arc::new(TokenStore::new(true, None));
    let receiver = Arc::new(
        BridgeReceiver::bind(
            ReceiverConfig {
                listen_addr: "127.0.0.1:0".parse().unwrap(),
                ..Default::default()
            },
            registry.clone(),
            tokens.clone(),
        )
        .unwrap(),
    );
    let bridge_addr = receiver.local_addr().unwrap();
    tokio::spawn(receiver.serve());

    let factory = Arc::new(ConnectionFactory::new(connector, true));
    let nodes = Arc::new(StaticNodeManager::new(vec![bridge_addr.to_string()]));
    let orchestrator = SplitOrchestrator::new(
        ConnectorConfig::default(),
        registry.clone(),
        tokens.clone(),
        factory,
        nodes,
    );
    Harness {
        registry,
        tokens,
        orchestrator,
    }
}

/// Pulls a quoted DIMENSION parameter out of the export SQL, the way the
/// producer-side operator would.
fn dimension_param(sql: &str, marker: &str) -> String {
    let end = sql.find(marker).unwrap_or_else(|| panic!("no {marker} in {sql}"));
    let start = sql[..end].rfind('\'').unwrap();
    sql[start + 1..end].to_string()
}

/// A producer whose processing units stream the given row groups, one
/// connection per group, to every worker endpoint in the DIMENSION row.
struct StreamingProducer {
    statements: Arc<Mutex<Vec<String>>>,
    row_groups: Vec<Vec<i32>>,
}

struct StreamingSession {
    statements: Arc<Mutex<Vec<String>>>,
    row_groups: Vec<Vec<i32>>,
}

impl StreamingSession {
    async fn export(&self, sql: &str) -> Result<u64> {
        let endpoints = dimension_param(sql, "' AS worker_endpoints");
        let query_id = dimension_param(sql, "' AS query_id");
        let token = dimension_param(sql, "' AS auth_token");
        let compression_flag: u32 = sql[..sql.find(" AS compression").unwrap()]
            .rsplit(' ')
            .next()
            .unwrap()
            .parse()
            .unwrap();
        let compression = Compression::from_wire(compression_flag).unwrap();
        let mut rows_sent = 0u64;
        for endpoint in endpoints.split(',') {
            for group in &self.row_groups {
                let mut stream = TcpStream::connect(endpoint).await?;
                let mut handshake = vec![];
                put_len_prefixed(&mut handshake, token.as_bytes());
                put_len_prefixed(&mut handshake, query_id.as_bytes());
                put_u32(&mut handshake, compression.as_wire());
                put_len_prefixed(&mut handshake, SCHEMA_JSON);
                let rows: Vec<Vec<WireValue>> =
                    group.iter().map(|v| vec![WireValue::Int32(*v)]).collect();
                let frame = compress(compression, &encode_batch(&rows))?;
                put_len_prefixed(&mut handshake, &frame);
                put_u32(&mut handshake, 0);
                stream.write_all(&handshake).await?;
                stream.shutdown().await?;
                rows_sent += group.len() as u64;
            }
        }
        Ok(rows_sent)
    }
}

#[async_trait]
impl ProducerSession for StreamingSession {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.statements.lock().unwrap().push(sql.to_string());
        if sql.starts_with("SET QUERY_BAND") {
            return Ok(0);
        }
        self.export(sql).await
    }

    async fn query_strings(&mut self, _sql: &str) -> Result<Vec<String>> {
        Ok(vec![])
    }
}

#[async_trait]
impl ProducerConnector for StreamingProducer {
    async fn connect(&self) -> Result<Box<dyn ProducerSession>> {
        Ok(Box::new(StreamingSession {
            statements: self.statements.clone(),
            row_groups: self.row_groups.clone(),
        }))
    }
}

async fn drain(source: &mut PageSource) -> Result<Vec<i32>, IngestError> {
    let mut rows = vec![];
    loop {
        match source.next_page().await? {
            PagePoll::Page(page) => {
                if let ColumnValues::Int32(values) = &page.batch.columns[0].values {
                    rows.extend_from_slice(values);
                }
            }
            PagePoll::Pending => {}
            PagePoll::Finished => return Ok(rows),
        }
    }
}

#[tokio::test]
async fn test_orchestrated_round_trip() {
    let statements = Arc::new(Mutex::new(vec![]));
    let producer = Arc::new(StreamingProducer {
        statements: statements.clone(),
        row_groups: vec![vec![3], vec![4]],
    });
    let harness = start_harness(producer);

    // SELECT test_id WHERE filter_int > 200 ORDER BY test_id LIMIT 2
    let planner = PushdownPlanner;
    let table = planner.apply_projection(&PlannedTable::new("lab", "ingest_test"), &["test_id".into()]);
    let constraint = Constraint::new(vec![(
        "filter_int".into(),
        Domain::of_range(Range::greater_than(Literal::Integer(200))),
    )]);
    let (table, residue) = planner.apply_filter(&table, &constraint);
    assert!(residue.is_empty());
    let table = planner
        .apply_top_n(
            &table,
            &[sluice_connector::pushdown::SortItem {
                column: "test_id".into(),
                descending: false,
            }],
            2,
        )
        .unwrap();

    let splits = harness
        .orchestrator
        .create_splits(&table, "alice", None)
        .await
        .unwrap();
    assert_eq!(splits.len(), 1);
    assert!(!splits[0].is_remotely_accessible());

    let mut source = PageSource::new(
        harness.registry.clone(),
        harness.tokens.clone(),
        &splits[0],
        Duration::from_millis(100),
    );
    let mut rows = tokio::time::timeout(Duration::from_secs(5), drain(&mut source))
        .await
        .expect("ingestion timed out")
        .unwrap();
    rows.sort_unstable();
    assert_eq!(rows, vec![3, 4]);
    assert_eq!(source.rows_read(), 2);

    // the producer saw the band first, then the export with the pushed SQL
    let recorded = statements.lock().unwrap();
    assert_eq!(recorded.len(), 2);
    assert_eq!(
        recorded[0],
        "SET QUERY_BAND = 'PROXYUSER=alice;' FOR SESSION;"
    );
    let export = &recorded[1];
    assert_eq!(export.matches("filter_int > 200").count(), 1);
    assert!(export.contains("TOP 2"));
    assert!(export.contains("ORDER BY test_id"));
    assert!(export.contains("ExportTableOp"));
}

/// A producer that fails the export statement outright.
struct FailingProducer {
    statements: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ProducerConnector for FailingProducer {
    async fn connect(&self) -> Result<Box<dyn ProducerSession>> {
        struct Session {
            statements: Arc<Mutex<Vec<String>>>,
        }
        #[async_trait]
        impl ProducerSession for Session {
            async fn execute(&mut self, sql: &str) -> Result<u64> {
                self.statements.lock().unwrap().push(sql.to_string());
                if sql.starts_with("SET QUERY_BAND") {
                    return Ok(0);
                }
                anyhow::bail!("3706: syntax error in export")
            }
            async fn query_strings(&mut self, _sql: &str) -> Result<Vec<String>> {
                Ok(vec![])
            }
        }
        Ok(Box::new(Session {
            statements: self.statements.clone(),
        }))
    }
}

#[tokio::test]
async fn test_producer_failure_surfaces_and_unblocks() {
    let statements = Arc::new(Mutex::new(vec![]));
    let producer = Arc::new(FailingProducer {
        statements: statements.clone(),
    });
    let harness = start_harness(producer);

    let table = PlannedTable::new("lab", "ingest_test");
    let splits = harness
        .orchestrator
        .create_splits(&table, "alice", None)
        .await
        .unwrap();
    let mut source = PageSource::new(
        harness.registry.clone(),
        harness.tokens.clone(),
        &splits[0],
        Duration::from_millis(100),
    );
    let outcome = tokio::time::timeout(Duration::from_secs(5), drain(&mut source))
        .await
        .expect("consumer hung on a failed producer");
    match outcome {
        Err(IngestError::ProducerExec(message)) => {
            assert!(message.contains("3706"));
        }
        other => panic!("expected producer failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancellation_tears_down() {
    // a producer that never finishes executing
    struct HangingProducer;
    #[async_trait]
    impl ProducerConnector for HangingProducer {
        async fn connect(&self) -> Result<Box<dyn ProducerSession>> {
            struct Session;
            #[async_trait]
            impl ProducerSession for Session {
                async fn execute(&mut self, sql: &str) -> Result<u64> {
                    if sql.starts_with("SET QUERY_BAND") {
                        return Ok(0);
                    }
                    std::future::pending().await
                }
                async fn query_strings(&mut self, _sql: &str) -> Result<Vec<String>> {
                    Ok(vec![])
                }
            }
            Ok(Box::new(Session))
        }
    }
    let harness = start_harness(Arc::new(HangingProducer));

    let table = PlannedTable::new("lab", "ingest_test");
    let splits = harness
        .orchestrator
        .create_splits(&table, "alice", None)
        .await
        .unwrap();
    let query_id = splits[0].query_id.clone();
    let mut source = PageSource::new(
        harness.registry.clone(),
        harness.tokens.clone(),
        &splits[0],
        Duration::from_millis(50),
    );
    assert!(matches!(source.next_page().await.unwrap(), PagePoll::Pending));
    assert!(harness.orchestrator.export_running(&query_id));

    harness.orchestrator.cancel_query(&query_id);
    // the in-flight producer execution is aborted, not just orphaned
    assert!(!harness.orchestrator.export_running(&query_id));
    let finished = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match source.next_page().await.unwrap() {
                PagePoll::Finished => break,
                PagePoll::Pending => {}
                PagePoll::Page(_) => panic!("no data expected"),
            }
        }
    })
    .await;
    assert!(finished.is_ok(), "source did not observe cancellation");
    assert!(!harness.registry.is_registered(&query_id));
}

#[tokio::test]
async fn test_dynamic_filter_folded_into_export() {
    struct ReadyFilter(Constraint);
    #[async_trait]
    impl DynamicFilterSource for ReadyFilter {
        async fn completed(&self) -> Constraint {
            self.0.clone()
        }
    }

    let statements = Arc::new(Mutex::new(vec![]));
    let producer = Arc::new(StreamingProducer {
        statements: statements.clone(),
        row_groups: vec![vec![7]],
    });
    let harness = start_harness(producer);

    let filter = ReadyFilter(Constraint::new(vec![(
        "filter_int".into(),
        Domain::of_values(vec![Literal::Integer(100), Literal::Integer(200)]),
    )]));
    let table = PlannedTable::new("lab", "ingest_test");
    let splits = harness
        .orchestrator
        .create_splits(&table, "alice", Some(&filter))
        .await
        .unwrap();
    let mut source = PageSource::new(
        harness.registry.clone(),
        harness.tokens.clone(),
        &splits[0],
        Duration::from_millis(100),
    );
    let rows = tokio::time::timeout(Duration::from_secs(5), drain(&mut source))
        .await
        .expect("ingestion timed out")
        .unwrap();
    assert_eq!(rows, vec![7]);

    // the completed filter was rendered into the producer-side WHERE clause
    let recorded = statements.lock().unwrap();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[1].matches("filter_int IN (100,200)").count(), 1);
}
