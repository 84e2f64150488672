//! Parsed requests and their execution against a [`Storage`]

use memkvcache::Storage;

/// Which storage primitive a storage verb maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// `set`: insert or overwrite
    Set,
    /// `add`: only if absent
    Add,
    /// `replace`: only if present
    Replace,
}

/// One client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `set`, `add` or `replace`
    Store {
        /// Storage primitive to use
        mode: StoreMode,
        /// Key bytes
        key: Vec<u8>,
        /// Data block
        data: Vec<u8>,
        /// Suppress the reply
        noreply: bool,
    },
    /// `get`/`gets` with one or more keys
    Get {
        /// Keys in request order
        keys: Vec<Vec<u8>>,
    },
    /// `delete <key>`
    Delete {
        /// Key bytes
        key: Vec<u8>,
        /// Suppress the reply
        noreply: bool,
    },
    /// `flush_all`
    FlushAll {
        /// Suppress the reply
        noreply: bool,
    },
    /// `stats`
    Stats,
    /// `version`
    Version,
    /// `quit`
    Quit,
}

impl Command {
    /// Run the command and return the reply without its trailing CRLF.
    ///
    /// `None` means nothing is sent back: a `noreply` request or `quit`.
    pub fn execute(&self, storage: &dyn Storage) -> Option<Vec<u8>> {
        match self {
            Command::Store {
                mode,
                key,
                data,
                noreply,
            } => {
                let stored = match mode {
                    StoreMode::Set => storage.put(key, data),
                    StoreMode::Add => storage.put_if_absent(key, data),
                    StoreMode::Replace => storage.set(key, data),
                };
                reply(*noreply, if stored { "STORED" } else { "NOT_STORED" })
            }
            Command::Get { keys } => {
                let mut out = Vec::new();
                for key in keys {
                    if let Some(value) = storage.get(key) {
                        out.extend_from_slice(b"VALUE ");
                        out.extend_from_slice(key);
                        out.extend_from_slice(format!(" 0 {}\r\n", value.len()).as_bytes());
                        out.extend_from_slice(&value);
                        out.extend_from_slice(b"\r\n");
                    }
                }
                out.extend_from_slice(b"END");
                Some(out)
            }
            Command::Delete { key, noreply } => reply(
                *noreply,
                if storage.delete(key) {
                    "DELETED"
                } else {
                    "NOT_FOUND"
                },
            ),
            Command::FlushAll { noreply } => {
                storage.clear();
                reply(*noreply, "OK")
            }
            Command::Stats => Some(stats_reply(storage).into_bytes()),
            Command::Version => Some(format!("VERSION {}", env!("CARGO_PKG_VERSION")).into_bytes()),
            Command::Quit => None,
        }
    }

    /// Whether the connection should close after this command
    pub fn closes_connection(&self) -> bool {
        matches!(self, Command::Quit)
    }
}

fn reply(noreply: bool, line: &str) -> Option<Vec<u8>> {
    if noreply {
        None
    } else {
        Some(line.as_bytes().to_vec())
    }
}

fn stats_reply(storage: &dyn Storage) -> String {
    let stats = storage.stats();
    let lines = [
        ("pid", std::process::id().to_string()),
        ("version", env!("CARGO_PKG_VERSION").to_string()),
        ("curr_items", storage.len().to_string()),
        ("bytes", storage.used_bytes().to_string()),
        ("limit_maxbytes", storage.max_bytes().to_string()),
        ("get_hits", stats.hits.to_string()),
        ("get_misses", stats.misses.to_string()),
        ("total_items", (stats.inserts + stats.updates).to_string()),
        ("delete_hits", stats.deletes.to_string()),
        ("evictions", stats.evictions.to_string()),
        ("rejections", stats.rejections.to_string()),
    ];

    let mut out = String::new();
    for (name, value) in lines {
        out.push_str("STAT ");
        out.push_str(name);
        out.push(' ');
        out.push_str(&value);
        out.push_str("\r\n");
    }
    out.push_str("END");
    out
}
