//! Single-threaded event loop server on a Tokio `current_thread` runtime

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use memkvcache::Storage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{Server, ServerConfig, TOO_MANY_CONNECTIONS};
use crate::connection::Session;

/// Multiplexes every connection on one dedicated thread
pub struct NonBlockingServer {
    storage: Arc<dyn Storage>,
    config: ServerConfig,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl NonBlockingServer {
    /// Create a server over `storage`; nothing is bound until `start`
    pub fn new(storage: Arc<dyn Storage>, config: ServerConfig) -> Self {
        Self {
            storage,
            config,
            shutdown: None,
            handle: None,
        }
    }
}

impl Server for NonBlockingServer {
    fn start(&mut self, addr: SocketAddr) -> io::Result<SocketAddr> {
        if self.handle.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "event loop already running",
            ));
        }

        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, rx) = watch::channel(false);
        let storage = Arc::clone(&self.storage);
        let limit = self.config.max_connections;

        let handle = thread::Builder::new()
            .name("memkv-event-loop".to_string())
            .spawn(move || {
                runtime.block_on(event_loop(listener, storage, limit, rx));
                info!("Event loop on {} exited", local);
            })?;

        self.shutdown = Some(tx);
        self.handle = Some(handle);
        info!("Non-blocking server listening on {}", local);
        Ok(local)
    }

    fn stop(&self) {
        if let Some(tx) = &self.shutdown {
            tx.send_replace(true);
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Event loop thread panicked");
            }
        }
        self.shutdown = None;
    }
}

impl Drop for NonBlockingServer {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

async fn event_loop(
    listener: std::net::TcpListener,
    storage: Arc<dyn Storage>,
    limit: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not register listener: {}", e);
            return;
        }
    };
    let handler_shutdown = shutdown.clone();
    let slots = Arc::new(Semaphore::new(limit.min(Semaphore::MAX_PERMITS)));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((mut stream, peer)) => {
                    // one permit per live connection; the JoinSet also counts
                    // finished tasks that have not been reaped yet
                    let Ok(permit) = Arc::clone(&slots).try_acquire_owned() else {
                        debug!("Rejecting connection from {}", peer);
                        if let Err(e) = stream.write_all(TOO_MANY_CONNECTIONS).await {
                            debug!("Could not send rejection to {}: {}", peer, e);
                        }
                        continue;
                    };
                    debug!("New connection from {}", peer);
                    let storage = Arc::clone(&storage);
                    let shutdown = handler_shutdown.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_client(stream, storage, shutdown).await {
                            warn!("Error handling client {}: {}", peer, e);
                        }
                        debug!("Connection closed: {}", peer);
                        drop(permit);
                    });
                }
                Err(e) => warn!("Error accepting connection: {}", e),
            },
        }
    }

    while connections.join_next().await.is_some() {}
}

async fn handle_client(
    mut stream: TcpStream,
    storage: Arc<dyn Storage>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let mut session = Session::new();

    while !*shutdown.borrow() {
        let n = tokio::select! {
            read = stream.read_buf(session.buffer_mut()) => read?,
            _ = shutdown.changed() => return Ok(()),
        };
        if n == 0 {
            return Ok(());
        }

        let reply = session.process(&*storage);
        if !reply.is_empty() {
            stream.write_all(&reply).await?;
        }
        if session.is_closed() {
            return Ok(());
        }
    }

    Ok(())
}
