//! memkv daemon - memcached text protocol server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use memkvcache::{Storage, StorageConfig, StripedLru};
use memkvd::{BlockingServer, NonBlockingServer, PooledServer, Server, ServerConfig};
use memkvexec::ExecutorConfig;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Network {
    /// One thread per connection
    Blocking,
    /// Connections run on the elastic worker pool
    Pooled,
    /// Every connection on one event loop thread
    Nonblocking,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1:11211")]
    bind: SocketAddr,

    /// Network transport
    #[arg(short, long, value_enum, default_value_t = Network::Pooled)]
    network: Network,

    /// Total cache budget in bytes, split evenly across shards
    #[arg(short, long, default_value_t = 64 * 1024 * 1024)]
    memory_limit: usize,

    /// Number of independently locked shards
    #[arg(short, long, default_value_t = 16)]
    shards: usize,

    /// Live connections allowed at once
    #[arg(long, default_value_t = 1024)]
    max_connections: usize,

    /// Worker threads kept alive by the pooled transport
    #[arg(long, default_value_t = 0)]
    low_watermark: usize,

    /// Most worker threads the pooled transport may grow to
    #[arg(long, default_value_t = 64)]
    high_watermark: usize,

    /// Connections waiting for a worker before new ones are refused
    #[arg(long, default_value_t = 128)]
    max_queue: usize,

    /// Idle time before a worker above the floor retires
    #[arg(long, default_value_t = 5000)]
    idle_timeout_ms: u64,
}

impl Args {
    fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            memory_limit: self.memory_limit,
            shard_count: self.shards,
        }
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_connections: self.max_connections,
            executor: ExecutorConfig {
                low_watermark: self.low_watermark,
                high_watermark: self.high_watermark,
                max_queue_size: self.max_queue,
                idle_timeout: Duration::from_millis(self.idle_timeout_ms),
                ..ExecutorConfig::default()
            },
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting memkv daemon v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Cache: {} bytes over {} shards, network: {:?}",
        args.memory_limit, args.shards, args.network
    );

    let storage: Arc<dyn Storage> = Arc::new(
        StripedLru::from_config(&args.storage_config()).context("invalid cache configuration")?,
    );
    let config = args.server_config();

    let mut server: Box<dyn Server> = match args.network {
        Network::Blocking => Box::new(BlockingServer::new(storage, config)),
        Network::Pooled => Box::new(
            PooledServer::new(storage, config).context("invalid worker pool configuration")?,
        ),
        Network::Nonblocking => Box::new(NonBlockingServer::new(storage, config)),
    };

    let local = server
        .start(args.bind)
        .with_context(|| format!("failed to listen on {}", args.bind))?;
    info!("Ready on {}; press Ctrl+C to stop", local);

    wait_for_ctrl_c()?;

    info!("Shutting down");
    server.stop();
    server.join();
    info!("Stopped");
    Ok(())
}

fn wait_for_ctrl_c() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("failed to listen for Ctrl+C")
}
