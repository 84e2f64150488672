//! Connection handlers run as tasks on an elastic executor

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use memkvcache::Storage;
use memkvexec::Executor;
use tracing::{debug, info, warn};

use super::{reject, Acceptor, ConnectionRegistry, Server, ServerConfig};
use crate::connection::serve_blocking;

/// Submits every accepted connection to an owned [`Executor`].
///
/// A connection occupies one worker for its lifetime, so the executor's high
/// watermark bounds concurrent clients and its queue bounds those waiting.
pub struct PooledServer {
    storage: Arc<dyn Storage>,
    config: ServerConfig,
    executor: Arc<Executor>,
    registry: Arc<ConnectionRegistry>,
    acceptor: Option<Acceptor>,
}

impl PooledServer {
    /// Create a server and its stopped executor
    pub fn new(storage: Arc<dyn Storage>, config: ServerConfig) -> memkvexec::Result<Self> {
        let executor = Executor::new(config.executor.clone())?;
        Ok(Self {
            storage,
            config,
            executor: Arc::new(executor),
            registry: Arc::new(ConnectionRegistry::default()),
            acceptor: None,
        })
    }

    /// The pool running connection handlers
    pub fn executor(&self) -> &Executor {
        &self.executor
    }
}

impl Server for PooledServer {
    fn start(&mut self, addr: SocketAddr) -> io::Result<SocketAddr> {
        if let Some(acceptor) = &self.acceptor {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already listening on {}", acceptor.local_addr()),
            ));
        }

        self.registry.reopen();
        self.executor.start();

        let storage = Arc::clone(&self.storage);
        let registry = Arc::clone(&self.registry);
        let executor = Arc::clone(&self.executor);
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
            // submit drops the task on refusal, keep a handle for the reply
            let fallback = match stream.try_clone() {
                Ok(fallback) => fallback,
                Err(e) => {
                    warn!("Could not clone connection from {}: {}", peer, e);
                    return;
                }
            };

            let storage = Arc::clone(&storage);
            let submitted = executor.submit(move || {
                if let Err(e) = serve_blocking(stream, &*storage) {
                    warn!("Error handling client {}: {}", peer, e);
                }
                debug!("Connection closed: {}", peer);
                drop(guard);
            });
            if !submitted {
                reject(fallback, peer);
            }
        })?;

        let local = acceptor.local_addr();
        self.acceptor = Some(acceptor);
        info!(
            "Pooled server started on {} ({}..={} workers)",
            local,
            self.executor.config().low_watermark,
            self.executor.config().high_watermark
        );
        Ok(local)
    }

    fn stop(&self) {
        if let Some(acceptor) = &self.acceptor {
            acceptor.stop();
        }
        self.registry.shutdown_all();
        self.executor.stop(false);
    }

    fn join(&mut self) {
        if let Some(mut acceptor) = self.acceptor.take() {
            acceptor.join();
        }
        self.executor.stop(true);
        self.registry.wait_empty();
    }
}

impl Drop for PooledServer {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}
