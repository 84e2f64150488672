//! TCP servers speaking the memcached text protocol
//!
//! - [`BlockingServer`]: one OS thread per connection
//! - [`PooledServer`]: connection handlers run on an elastic [`memkvexec::Executor`]
//! - [`NonBlockingServer`]: every connection multiplexed on one Tokio thread

mod blocking;
mod nonblocking;
mod pooled;

pub use blocking::BlockingServer;
pub use nonblocking::NonBlockingServer;
pub use pooled::PooledServer;

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use memkvexec::ExecutorConfig;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

/// Sent to a client the server has no room for
pub(crate) const TOO_MANY_CONNECTIONS: &[u8] = b"SERVER_ERROR too many connections\r\n";

/// A network front end over a shared [`memkvcache::Storage`]
pub trait Server {
    /// Bind `addr` and begin accepting. Returns the bound address.
    fn start(&mut self, addr: SocketAddr) -> io::Result<SocketAddr>;

    /// Stop accepting and ask every live connection to close
    fn stop(&self);

    /// Wait until the server and all of its connections have finished
    fn join(&mut self);
}

/// Settings shared by the server flavors
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Live connections allowed at once
    pub max_connections: usize,
    /// Pool sizing, used by [`PooledServer`]
    pub executor: ExecutorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            executor: ExecutorConfig::default(),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    streams: HashMap<u64, TcpStream>,
    next_id: u64,
    closed: bool,
}

/// Live connections of a blocking server, so `stop` can unblock their readers
#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    empty: Condvar,
}

impl ConnectionRegistry {
    /// Track `stream` unless the registry is closed or already holds `limit`
    /// connections.
    pub(crate) fn try_register(
        self: &Arc<Self>,
        stream: &TcpStream,
        limit: usize,
    ) -> io::Result<Option<ConnectionGuard>> {
        let mut inner = self.inner.lock();
        if inner.closed || inner.streams.len() >= limit {
            return Ok(None);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.streams.insert(id, stream.try_clone()?);
        Ok(Some(ConnectionGuard {
            registry: Arc::clone(self),
            id,
        }))
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().streams.len()
    }

    /// Accept registrations again after a stop
    pub(crate) fn reopen(&self) {
        self.inner.lock().closed = false;
    }

    /// Refuse new registrations and shut down the read half of every socket
    pub(crate) fn shutdown_all(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        for stream in inner.streams.values() {
            if let Err(e) = stream.shutdown(Shutdown::Read) {
                debug!("Shutdown of live connection failed: {}", e);
            }
        }
    }

    /// Block until every guard has been dropped
    pub(crate) fn wait_empty(&self) {
        let mut inner = self.inner.lock();
        while !inner.streams.is_empty() {
            self.empty.wait(&mut inner);
        }
    }

    fn remove(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.streams.remove(&id);
        if inner.streams.is_empty() {
            self.empty.notify_all();
        }
    }
}

/// Removes its connection from the registry when dropped
pub(crate) struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    id: u64,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

/// Thread blocked in `accept` on a std listener
pub(crate) struct Acceptor {
    local_addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Acceptor {
    /// Bind `addr` and hand every accepted stream to `on_accept`
    pub(crate) fn spawn<F>(addr: SocketAddr, name: &str, mut on_accept: F) -> io::Result<Self>
    where
        F: FnMut(TcpStream, SocketAddr) + Send + 'static,
    {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let stopping = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stopping);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for accepted in listener.incoming() {
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    match accepted {
                        Ok(stream) => {
                            let peer = match stream.peer_addr() {
                                Ok(peer) => peer,
                                Err(e) => {
                                    debug!("Dropping connection without peer address: {}", e);
                                    continue;
                                }
                            };
                            debug!("New connection from {}", peer);
                            on_accept(stream, peer);
                        }
                        Err(e) => warn!("Error accepting connection: {}", e),
                    }
                }
                info!("Acceptor on {} exited", local_addr);
            })?;

        info!("Server listening on {}", local_addr);
        Ok(Self {
            local_addr,
            stopping,
            handle: Some(handle),
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Flag the acceptor and unblock its pending `accept`
    pub(crate) fn stop(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        wake_listener(self.local_addr);
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Acceptor thread panicked");
            }
        }
    }
}

/// Connect once to `addr` so a thread blocked in `accept` returns
fn wake_listener(addr: SocketAddr) {
    let mut target = addr;
    if target.ip().is_unspecified() {
        target.set_ip(match addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        });
    }
    if let Err(e) = TcpStream::connect_timeout(&target, Duration::from_millis(500)) {
        debug!("Wake-up connect to {} failed: {}", target, e);
    }
}

/// Tell a client there is no room and close it
pub(crate) fn reject(mut stream: TcpStream, peer: SocketAddr) {
    debug!("Rejecting connection from {}", peer);
    if let Err(e) = stream.write_all(TOO_MANY_CONNECTIONS) {
        debug!("Could not send rejection to {}: {}", peer, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_registry_limit_and_guard() {
        let registry = Arc::new(ConnectionRegistry::default());
        let (_c1, s1) = pair();
        let (_c2, s2) = pair();

        let guard = registry.try_register(&s1, 1).unwrap();
        assert!(guard.is_some());
        assert!(registry.try_register(&s2, 1).unwrap().is_none());
        assert_eq!(registry.len(), 1);

        drop(guard);
        assert_eq!(registry.len(), 0);
        registry.wait_empty();
    }

    #[test]
    fn test_shutdown_all_unblocks_reader() {
        let registry = Arc::new(ConnectionRegistry::default());
        let (_client, mut server) = pair();
        let guard = registry.try_register(&server, 8).unwrap().unwrap();

        let reader = thread::spawn(move || {
            let mut buf = [0u8; 16];
            let n = server.read(&mut buf).unwrap_or(0);
            drop(guard);
            n
        });

        thread::sleep(Duration::from_millis(20));
        registry.shutdown_all();
        assert_eq!(reader.join().unwrap(), 0);
        registry.wait_empty();

        let (_c, s) = pair();
        assert!(registry.try_register(&s, 8).unwrap().is_none());
        registry.reopen();
        assert!(registry.try_register(&s, 8).unwrap().is_some());
    }

    #[test]
    fn test_acceptor_stop() {
        let (tx, rx) = std::sync::mpsc::channel();
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut acceptor = Acceptor::spawn(addr, "test-accept", move |_, peer| {
            tx.send(peer).unwrap();
        })
        .unwrap();

        let _client = TcpStream::connect(acceptor.local_addr()).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());

        acceptor.stop();
        acceptor.join();
    }
}
