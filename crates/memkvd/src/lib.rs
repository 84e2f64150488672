//! memkv daemon library: protocol, command execution and network servers
//!
//! The binary in `main.rs` only parses arguments and picks a server.

pub mod command;
pub mod connection;
pub mod error;
pub mod network;
pub mod protocol;

pub use command::{Command, StoreMode};
pub use error::ProtocolError;
pub use network::{BlockingServer, NonBlockingServer, PooledServer, Server, ServerConfig};
