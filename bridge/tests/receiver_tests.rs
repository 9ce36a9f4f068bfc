//! End-to-end receiver tests: a scripted producer unit speaking the bridge
//! protocol over loopback TCP.

use sluice_bridge::protocol::{write_control_frame, COMMAND_JDBC_FINISHED, UNAUTHORIZED_REPLY};
use sluice_bridge::receiver::{BridgeReceiver, ReceiverConfig};
use sluice_bridge::registry::{BufferRegistry, Polled, RegistrySettings};
use sluice_bridge::token::{DynamicToken, TokenStore};
use sluice_wire::batch::ColumnValues;
use sluice_wire::codec::{put_len_prefixed, put_u32};
use sluice_wire::compression::{compress, Compression};
use sluice_wire::row_encoder::{encode_batch, WireValue};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const SCHEMA_JSON: &[u8] = br#"{"columns":[{"name":"n","type":"INTEGER"}]}"#;

struct TestBridge {
    registry: Arc<BufferRegistry>,
    tokens: Arc<TokenStore>,
    addr: SocketAddr,
}

fn start_bridge(static_token: Option<&str>) -> TestBridge {
    let registry = BufferRegistry::new(RegistrySettings {
        queue_capacity: 16,
        eos_idle_window: Duration::from_millis(100),
    });
    let tokens = Arc::new(TokenStore::new(
        static_token.is_some(),
        static_token.map(DynamicToken::from_value),
    ));
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
    let addr = receiver.local_addr().unwrap();
    tokio::spawn(receiver.serve());
    TestBridge {
        registry,
        tokens,
        addr,
    }
}

fn handshake(token: Option<&str>, query_id: &str, compression: Compression) -> Vec<u8> {
    let mut buf = vec![];
    if let Some(token) = token {
        put_len_prefixed(&mut buf, token.as_bytes());
    }
    put_len_prefixed(&mut buf, query_id.as_bytes());
    put_u32(&mut buf, compression.as_wire());
    put_len_prefixed(&mut buf, SCHEMA_JSON);
    buf
}

fn int_rows(values: &[i32]) -> Vec<Vec<WireValue>> {
    values.iter().map(|v| vec![WireValue::Int32(*v)]).collect()
}

async fn drain_rows(registry: &Arc<BufferRegistry>, query_id: &str) -> Vec<i32> {
    let mut rows = vec![];
    loop {
        match registry
            .poll(query_id, Duration::from_millis(200))
            .await
            .unwrap()
        {
            Polled::Batch(batch) => {
                if let ColumnValues::Int32(values) = &batch.columns[0].values {
                    rows.extend_from_slice(values);
                }
            }
            Polled::EndOfStream => return rows,
            Polled::Pending => {}
        }
    }
}

#[tokio::test]
async fn test_two_connections_then_finish() {
    let bridge = start_bridge(None);
    let qid = "query-1";

    for values in [vec![1, 2, 3], vec![4, 5]] {
        let mut stream = TcpStream::connect(bridge.addr).await.unwrap();
        stream
            .write_all(&handshake(None, qid, Compression::None))
            .await
            .unwrap();
        let payload = encode_batch(&int_rows(&values));
        let mut frame = vec![];
        put_len_prefixed(&mut frame, &payload);
        put_u32(&mut frame, 0); // end-of-connection sentinel
        stream.write_all(&frame).await.unwrap();
        stream.flush().await.unwrap();
        stream.shutdown().await.unwrap();
    }

    let mut control = TcpStream::connect(bridge.addr).await.unwrap();
    write_control_frame(&mut control, None, qid, COMMAND_JDBC_FINISHED)
        .await
        .unwrap();
    control.shutdown().await.unwrap();

    let mut rows = drain_rows(&bridge.registry, qid).await;
    rows.sort_unstable();
    assert_eq!(rows, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_compressed_streams() {
    for codec in [Compression::Zlib, Compression::Lz4] {
        let bridge = start_bridge(None);
        let qid = "query-z";
        let mut stream = TcpStream::connect(bridge.addr).await.unwrap();
        stream
            .write_all(&handshake(None, qid, codec))
            .await
            .unwrap();
        let values: Vec<i32> = (0..1000).collect();
        let payload = encode_batch(&int_rows(&values));
        let compressed = compress(codec, &payload).unwrap();
        let mut frame = vec![];
        put_len_prefixed(&mut frame, &compressed);
        put_u32(&mut frame, 0);
        stream.write_all(&frame).await.unwrap();
        stream.shutdown().await.unwrap();

        let mut control = TcpStream::connect(bridge.addr).await.unwrap();
        write_control_frame(&mut control, None, qid, COMMAND_JDBC_FINISHED)
            .await
            .unwrap();
        control.shutdown().await.unwrap();

        let rows = drain_rows(&bridge.registry, qid).await;
        assert_eq!(rows.len(), 1000, "row loss with {codec:?}");
    }
}

#[tokio::test]
async fn test_invalid_token_gets_literal_reply() {
    let bridge = start_bridge(Some("right-token"));
    let qid = "query-a";
    bridge.registry.register_query(qid);

    let mut stream = TcpStream::connect(bridge.addr).await.unwrap();
    stream
        .write_all(&handshake(Some("wrong-token"), qid, Compression::None))
        .await
        .unwrap();
    let mut reply = vec![];
    stream.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, UNAUTHORIZED_REPLY);
}

#[tokio::test]
async fn test_rejected_connection_touches_no_buffer() {
    let bridge = start_bridge(Some("right-token"));
    let qid = "query-b";

    let mut stream = TcpStream::connect(bridge.addr).await.unwrap();
    stream
        .write_all(&handshake(Some("wrong-token"), qid, Compression::None))
        .await
        .unwrap();
    let mut reply = vec![];
    stream.read_to_end(&mut reply).await.unwrap();
    assert!(!bridge.registry.is_registered(qid));
}

#[tokio::test]
async fn test_malicious_control_frame_is_dropped() {
    let bridge = start_bridge(Some("right-token"));
    let qid = "query-c";
    let token = DynamicToken::generate();
    bridge.tokens.register(qid, token.clone());
    bridge.registry.register_query(qid);

    // a legitimate connection is still open
    let mut stream = TcpStream::connect(bridge.addr).await.unwrap();
    stream
        .write_all(&handshake(Some(token.expose()), qid, Compression::None))
        .await
        .unwrap();

    // an attacker asks for JDBC_FINISHED with a bad token
    let mut attacker = TcpStream::connect(bridge.addr).await.unwrap();
    write_control_frame(&mut attacker, Some("wrong-token"), qid, COMMAND_JDBC_FINISHED)
        .await
        .unwrap();
    attacker.shutdown().await.unwrap();

    // well past the idle window: no end-of-stream may exist
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(matches!(
        bridge
            .registry
            .poll(qid, Duration::from_millis(20))
            .await
            .unwrap(),
        Polled::Pending
    ));
    drop(stream);
}

#[tokio::test]
async fn test_malformed_schema_closes_connection() {
    let bridge = start_bridge(None);
    let qid = "query-d";
    let mut stream = TcpStream::connect(bridge.addr).await.unwrap();
    let mut buf = vec![];
    put_len_prefixed(&mut buf, qid.as_bytes());
    put_u32(&mut buf, 0);
    put_len_prefixed(&mut buf, b"this is not json");
    stream.write_all(&buf).await.unwrap();
    let mut reply = vec![];
    stream.read_to_end(&mut reply).await.unwrap();
    assert!(reply.is_empty());
    // the handshake never completed, so no connection was counted
    bridge.registry.signal_jdbc_finished(qid);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(
        bridge
            .registry
            .poll(qid, Duration::from_millis(20))
            .await
            .unwrap(),
        Polled::EndOfStream
    ));
}

#[tokio::test]
async fn test_decode_error_isolated_to_connection() {
    let bridge = start_bridge(None);
    let qid = "query-e";

    // healthy connection delivers its rows
    let mut good = TcpStream::connect(bridge.addr).await.unwrap();
    good.write_all(&handshake(None, qid, Compression::None))
        .await
        .unwrap();
    let payload = encode_batch(&int_rows(&[10, 20]));
    let mut frame = vec![];
    put_len_prefixed(&mut frame, &payload);
    put_u32(&mut frame, 0);
    good.write_all(&frame).await.unwrap();
    good.shutdown().await.unwrap();

    // broken connection sends a garbage frame
    let mut bad = TcpStream::connect(bridge.addr).await.unwrap();
    bad.write_all(&handshake(None, qid, Compression::None))
        .await
        .unwrap();
    let mut garbage = vec![];
    put_len_prefixed(&mut garbage, &[0xFF; 7]);
    bad.write_all(&garbage).await.unwrap();
    bad.shutdown().await.unwrap();

    let mut control = TcpStream::connect(bridge.addr).await.unwrap();
    write_control_frame(&mut control, None, qid, COMMAND_JDBC_FINISHED)
        .await
        .unwrap();
    control.shutdown().await.unwrap();

    let rows = drain_rows(&bridge.registry, qid).await;
    assert_eq!(rows, vec![10, 20]);
}
