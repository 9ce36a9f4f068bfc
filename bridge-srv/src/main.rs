//! Standalone Sluice Bridge Server
//!
//! Runs one bridge receiver outside the engine process, for protocol
//! debugging and producer-side operator development. Production deployments
//! embed the receiver in each consumer worker instead.

use anyhow::{Context, Result};
use clap::Parser;
use sluice_bridge::receiver::{BridgeReceiver, ReceiverConfig};
use sluice_bridge::registry::{BufferRegistry, RegistrySettings};
use sluice_bridge::token::{DynamicToken, TokenStore};
use sluice_connector::config::ConnectorConfig;
use sluice_wire::row_decoder::DecodeOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(name = "Sluice Bridge Server")]
#[clap(about = "Standalone bridge receiver for producer row streams", version, author)]
struct Cli {
    #[clap(long, default_value = "0.0.0.0:9999")]
    listen_endpoint: SocketAddr,

    /// Max batches buffered per query before pushers block.
    #[clap(long, default_value_t = 100)]
    buffer_queue_capacity: usize,

    /// SO_RCVBUF for the listen socket, in bytes.
    #[clap(long, default_value_t = 4 * 1024 * 1024)]
    socket_receive_buffer_size: usize,

    /// Static bridge token; connections must present it.
    #[clap(long, env = "SLUICE_BRIDGE_TOKEN")]
    token: Option<String>,

    /// Program whose stdout supplies the bridge token.
    #[clap(long)]
    token_script: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Cli::parse();

    let config = ConnectorConfig {
        static_token: args.token.clone(),
        token_script: args.token_script.clone(),
        ..Default::default()
    };
    let static_token = config
        .resolve_static_token()
        .await
        .with_context(|| "resolving bridge token")?;

    let registry = BufferRegistry::new(RegistrySettings {
        queue_capacity: args.buffer_queue_capacity,
        eos_idle_window: Duration::from_millis(500),
    });
    let tokens = Arc::new(TokenStore::new(
        static_token.is_some(),
        static_token.map(DynamicToken::from_value),
    ));
    let receiver = Arc::new(
        BridgeReceiver::bind(
            ReceiverConfig {
                listen_addr: args.listen_endpoint,
                socket_receive_buffer_size: args.socket_receive_buffer_size,
                decode_options: DecodeOptions::default(),
                ..Default::default()
            },
            registry,
            tokens,
        )
        .with_context(|| "binding bridge receiver")?,
    );
    info!("bridge server ready on {}", receiver.local_addr()?);

    let serving = tokio::spawn(receiver.serve());
    tokio::signal::ctrl_c()
        .await
        .with_context(|| "waiting for ctrl-c")?;
    info!("shutting down");
    serving.abort();
    Ok(())
}
