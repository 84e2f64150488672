//! Thread-per-connection server

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use memkvcache::Storage;
use tracing::{debug, info, warn};

use super::{reject, Acceptor, ConnectionRegistry, Server, ServerConfig};
use crate::connection::serve_blocking;

/// Serves each connection on its own OS thread
pub struct BlockingServer {
    storage: Arc<dyn Storage>,
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    acceptor: Option<Acceptor>,
}

impl BlockingServer {
    /// Create a server over `storage`; nothing is bound until `start`
    pub fn new(storage: Arc<dyn Storage>, config: ServerConfig) -> Self {
        Self {
            storage,
            config,
            registry: Arc::new(ConnectionRegistry::default()),
            acceptor: None,
        }
    }

    /// Connections currently being served
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}

impl Server for BlockingServer {
    fn start(&mut self, addr: SocketAddr) -> io::Result<SocketAddr> {
        if let Some(acceptor) = &self.acceptor {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already listening on {}", acceptor.local_addr()),
            ));
        }

        self.registry.reopen();
        let storage = Arc::clone(&self.storage);
        let registry = Arc::clone(&self.registry);
        let limit = self.config.max_connections;

        let acceptor = Acceptor::spawn(addr, "memkv-accept", move |stream, peer| {
            let guard = match registry.try_register(&stream, limit) {
                Ok(Some(guard)) => guard,
                Ok(None) => return reject(stream, peer),
                Err(e) => {
                    warn!("Could not track connection from {}: {}", peer, e);
                    return;
                }
            };

            let storage = Arc::clone(&storage);
            let spawned = thread::Builder::new()
                .name(format!("memkv-conn-{}", peer))
                .spawn(move || {
                    if let Err(e) = serve_blocking(stream, &*storage) {
                        warn!("Error handling client {}: {}", peer, e);
                    }
                    debug!("Connection closed: {}", peer);
                    drop(guard);
                });
            if let Err(e) = spawned {
                warn!("Could not spawn handler for {}: {}", peer, e);
            }
        })?;

        let local = acceptor.local_addr();
        self.acceptor = Some(acceptor);
        info!("Blocking server started on {}", local);
        Ok(local)
    }

    fn stop(&self) {
        if let Some(acceptor) = &self.acceptor {
            acceptor.stop();
        }
        self.registry.shutdown_all();
    }

    fn join(&mut self) {
        if let Some(mut acceptor) = self.acceptor.take() {
            acceptor.join();
        }
        self.registry.wait_empty();
    }
}

impl Drop for BlockingServer {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}
