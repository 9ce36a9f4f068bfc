use crate::error::IngestError;
use crate::protocol::{
    read_frame_body, read_len_prefixed, read_u32, COMMAND_JDBC_FINISHED, CONTROL_MAGIC,
    MAX_QUERY_ID_BYTES, MAX_SCHEMA_BYTES, MAX_TOKEN_BYTES, UNAUTHORIZED_REPLY,
};
use crate::registry::BufferRegistry;
use crate::token::TokenStore;
use anyhow::{Context, Result};
use sluice_wire::compression::{decompress, Compression};
use sluice_wire::row_decoder::{decode_batch, DecodeOptions};
use sluice_wire::schema::parse_schema_json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub listen_addr: SocketAddr,
    /// SO_RCVBUF for the listening socket, inherited by accepted sockets.
    pub socket_receive_buffer_size: usize,
    /// Bound on concurrent connection handlers; excess connections wait in
    /// the accept backlog.
    pub max_connections: usize,
    /// Upper bound on a single batch frame.
    pub max_frame_bytes: usize,
    pub decode_options: DecodeOptions,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9999".parse().expect("valid literal address"),
            socket_receive_buffer_size: 4 * 1024 * 1024,
            max_connections: 64,
            max_frame_bytes: 64 * 1024 * 1024,
            decode_options: DecodeOptions::default(),
        }
    }
}

/// The per-worker TCP server receiving producer row streams.
///
/// Each accepted connection runs the handshake/streaming state machine in
/// its own task. Connection failures never fail a query: the handler closes
/// the socket, the connection counter drops, and the remaining connections
/// keep streaming.
pub struct BridgeReceiver {
    listener: TcpListener,
    registry: Arc<BufferRegistry>,
    tokens: Arc<TokenStore>,
    config: ReceiverConfig,
}

impl BridgeReceiver {
    pub fn bind(
        config: ReceiverConfig,
        registry: Arc<BufferRegistry>,
        tokens: Arc<TokenStore>,
    ) -> Result<Self> {
        let socket = match config.listen_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .with_context(|| "allocating bridge socket")?;
        socket
            .set_recv_buffer_size(config.socket_receive_buffer_size as u32)
            .with_context(|| "setting receive buffer size")?;
        socket.set_reuseaddr(true)?;
        socket
            .bind(config.listen_addr)
            .with_context(|| format!("binding bridge to {}", config.listen_addr))?;
        let listener = socket.listen(1024).with_context(|| "listening")?;
        Ok(Self {
            listener,
            registry,
            tokens,
            config,
        })
    }

    /// The bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .with_context(|| "reading bridge local address")
    }

    /// Accept loop. Runs until the task is dropped.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        info!("bridge listening on {}", self.local_addr()?);
        let permits = Arc::new(Semaphore::new(self.config.max_connections));
        loop {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .with_context(|| "acquiring connection permit")?;
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .with_context(|| "accepting bridge connection")?;
            let receiver = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = receiver.handle_connection(stream, peer).await {
                    debug!("connection from {peer} ended: {e:#}");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        stream.set_nodelay(true)?;
        let mut stream = BufReader::new(stream);

        let presented_token = if self.tokens.token_required() {
            Some(
                read_len_prefixed(&mut stream, MAX_TOKEN_BYTES)
                    .await
                    .with_context(|| "reading token frame")?,
            )
        } else {
            None
        };

        let first = read_u32(&mut stream).await.with_context(|| "reading query id length")?;
        if first == CONTROL_MAGIC {
            return self.handle_control_frame(&mut stream, presented_token, peer).await;
        }
        let query_id_raw = read_frame_body(&mut stream, first as usize, MAX_QUERY_ID_BYTES)
            .await
            .with_context(|| "reading query id")?;
        let query_id = String::from_utf8(query_id_raw)
            .map_err(|_| IngestError::ProtocolDecode("query id is not utf-8".into()))?;

        if !self
            .tokens
            .verify(&query_id, presented_token.as_deref())
        {
            warn!("unauthorized data connection from {peer}");
            let inner = stream.get_mut();
            inner.write_all(UNAUTHORIZED_REPLY).await?;
            inner.shutdown().await.ok();
            return Ok(());
        }

        let compression = Compression::from_wire(
            read_u32(&mut stream).await.with_context(|| "reading compression flag")?,
        )
        .map_err(|e| IngestError::ProtocolDecode(e.to_string()))?;
        let schema_raw = read_len_prefixed(&mut stream, MAX_SCHEMA_BYTES)
            .await
            .with_context(|| "reading schema handshake")?;
        let schema = parse_schema_json(&schema_raw)
            .map_err(|e| IngestError::ProtocolDecode(e.to_string()))?;
        debug!(
            "connection from {peer}: query {query_id}, {} columns, {compression:?}",
            schema.column_count()
        );

        // counted from here; the guard decrements on every exit path
        let _connection = ConnectionGuard::register(&self.registry, &query_id);
        loop {
            let frame_len = read_u32(&mut stream).await.with_context(|| "reading frame length")?
                as usize;
            if frame_len == 0 {
                debug!("end-of-connection sentinel from {peer} for query {query_id}");
                return Ok(());
            }
            let frame = read_frame_body(&mut stream, frame_len, self.config.max_frame_bytes)
                .await
                .with_context(|| "reading batch frame")?;
            let payload = decompress(compression, &frame)?;
            let batch = decode_batch(&payload, &schema, &self.config.decode_options)
                .map_err(|e| IngestError::ProtocolDecode(e.to_string()))?;
            if !self.registry.push_data(&query_id, Arc::new(batch)).await {
                debug!("query {query_id} is gone, dropping connection from {peer}");
                return Ok(());
            }
        }
    }

    async fn handle_control_frame(
        &self,
        stream: &mut BufReader<TcpStream>,
        presented_token: Option<Vec<u8>>,
        peer: SocketAddr,
    ) -> Result<()> {
        let query_id_raw = read_len_prefixed(stream, MAX_QUERY_ID_BYTES)
            .await
            .with_context(|| "reading control query id")?;
        let query_id = String::from_utf8(query_id_raw)
            .map_err(|_| IngestError::ProtocolDecode("control query id is not utf-8".into()))?;
        let command = read_u32(stream).await.with_context(|| "reading control command")?;
        if !self.tokens.verify(&query_id, presented_token.as_deref()) {
            warn!("dropping unauthenticated control frame from {peer} for query {query_id}");
            return Ok(());
        }
        match command {
            COMMAND_JDBC_FINISHED => {
                debug!("producer finished for query {query_id}");
                self.registry.signal_jdbc_finished(&query_id);
            }
            other => {
                warn!("unknown control command {other} from {peer} for query {query_id}");
            }
        }
        Ok(())
    }
}

/// Keeps the per-query connection count accurate on every exit path,
/// including panics and early returns from decode failures.
struct ConnectionGuard {
    registry: Arc<BufferRegistry>,
    query_id: String,
}

impl ConnectionGuard {
    fn register(registry: &Arc<BufferRegistry>, query_id: &str) -> Self {
        registry.increment_connections(query_id);
        Self {
            registry: Arc::clone(registry),
            query_id: query_id.to_string(),
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.decrement_connections(&self.query_id);
    }
}
