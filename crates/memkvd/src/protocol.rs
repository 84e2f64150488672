//! memcached text protocol parser
//!
//! Supports the storage verbs `set`, `add`, `replace`, plus `get`/`gets`,
//! `delete`, `flush_all`, `stats`, `version` and `quit`.

use bytes::{Buf, BytesMut};

use crate::command::{Command, StoreMode};
use crate::error::ProtocolError;

/// Longest key accepted, as in memcached
pub const MAX_KEY_BYTES: usize = 250;

/// Largest data block accepted (1 MiB)
pub const MAX_VALUE_BYTES: usize = 1024 * 1024;

/// Longest command line before giving up on finding CRLF
const MAX_LINE_BYTES: usize = 2048;

/// Parse one complete request from the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched until the command line and,
/// for storage verbs, the whole data block have arrived. On success exactly
/// one request is consumed.
pub fn parse(buf: &mut BytesMut) -> Result<Option<Command>, ProtocolError> {
    let Some(line_end) = find_crlf(buf) else {
        if buf.len() > MAX_LINE_BYTES {
            return Err(ProtocolError::LineTooLong);
        }
        return Ok(None);
    };

    let line = &buf[..line_end];
    let mut fields = line
        .split(|b| *b == b' ' || *b == b'\t')
        .filter(|f| !f.is_empty());

    let Some(verb) = fields.next() else {
        return Err(ProtocolError::BadCommandLine);
    };
    let args: Vec<&[u8]> = fields.collect();

    let (command, consumed) = match verb {
        b"set" | b"add" | b"replace" => {
            let mode = match verb {
                b"set" => StoreMode::Set,
                b"add" => StoreMode::Add,
                _ => StoreMode::Replace,
            };
            match parse_storage(mode, &args, buf, line_end)? {
                Some(found) => found,
                None => return Ok(None),
            }
        }
        b"get" | b"gets" => {
            if args.is_empty() {
                return Err(ProtocolError::BadCommandLine);
            }
            let keys = args
                .iter()
                .map(|k| validate_key(k).map(<[u8]>::to_vec))
                .collect::<Result<Vec<_>, _>>()?;
            (Command::Get { keys }, line_end + 2)
        }
        b"delete" => {
            let (key, rest) = args.split_first().ok_or(ProtocolError::BadCommandLine)?;
            let noreply = match rest {
                [] => false,
                [b"noreply"] => true,
                // legacy "delete <key> 0" form
                [b"0"] => false,
                [b"0", b"noreply"] => true,
                _ => return Err(ProtocolError::BadCommandLine),
            };
            let key = validate_key(key)?.to_vec();
            (Command::Delete { key, noreply }, line_end + 2)
        }
        b"flush_all" => {
            let noreply = matches!(args.last(), Some(&b"noreply"));
            (Command::FlushAll { noreply }, line_end + 2)
        }
        // stats groups (`stats items`, `stats slabs`, ...) are not kept
        b"stats" if !args.is_empty() => return Err(ProtocolError::BadCommandLine),
        b"stats" => (Command::Stats, line_end + 2),
        b"version" => (Command::Version, line_end + 2),
        b"quit" => (Command::Quit, line_end + 2),
        other => {
            return Err(ProtocolError::UnknownCommand(
                String::from_utf8_lossy(other).into_owned(),
            ))
        }
    };

    buf.advance(consumed);
    Ok(Some(command))
}

/// `<verb> <key> <flags> <exptime> <bytes> [noreply]\r\n<data>\r\n`
fn parse_storage(
    mode: StoreMode,
    args: &[&[u8]],
    buf: &BytesMut,
    line_end: usize,
) -> Result<Option<(Command, usize)>, ProtocolError> {
    let (key, flags, exptime, bytes, noreply) = match args {
        [key, flags, exptime, bytes] => (key, flags, exptime, bytes, false),
        [key, flags, exptime, bytes, b"noreply"] => (key, flags, exptime, bytes, true),
        _ => return Err(ProtocolError::BadCommandLine),
    };

    let key = validate_key(key)?;
    // flags and exptime must be well formed even though they are not stored
    parse_number::<u32>(flags)?;
    parse_number::<i64>(exptime)?;
    let len = parse_number::<usize>(bytes)?;
    if len > MAX_VALUE_BYTES {
        return Err(ProtocolError::ValueTooLarge(len));
    }

    let data_start = line_end + 2;
    let data_end = data_start + len;
    if buf.len() < data_end + 2 {
        return Ok(None);
    }
    if &buf[data_end..data_end + 2] != b"\r\n" {
        return Err(ProtocolError::BadDataChunk);
    }

    let command = Command::Store {
        mode,
        key: key.to_vec(),
        data: buf[data_start..data_end].to_vec(),
        noreply,
    };
    Ok(Some((command, data_end + 2)))
}

fn validate_key(key: &[u8]) -> Result<&[u8], ProtocolError> {
    if key.is_empty() || key.len() > MAX_KEY_BYTES || key.iter().any(|b| b.is_ascii_control()) {
        return Err(ProtocolError::InvalidKey);
    }
    Ok(key)
}

fn parse_number<T: std::str::FromStr>(field: &[u8]) -> Result<T, ProtocolError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ProtocolError::BadCommandLine)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(data: &[u8]) -> BytesMut {
        BytesMut::from(data)
    }

    #[test]
    fn test_parse_set() {
        let mut buf = buffer(b"set foo 0 0 3\r\nbar\r\n");
        let cmd = parse(&mut buf).unwrap().unwrap();

        assert_eq!(
            cmd,
            Command::Store {
                mode: StoreMode::Set,
                key: b"foo".to_vec(),
                data: b"bar".to_vec(),
                noreply: false,
            }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_input_waits() {
        let mut buf = buffer(b"set foo 0 0 10\r\nabc");
        assert_eq!(parse(&mut buf), Ok(None));
        assert_eq!(buf.len(), 19);

        let mut buf = buffer(b"get fo");
        assert_eq!(parse(&mut buf), Ok(None));
        assert_eq!(&buf[..], b"get fo");
    }

    #[test]
    fn test_consumes_one_request() {
        let mut buf = buffer(b"add k 1 0 1 noreply\r\nv\r\nget k\r\n");

        let first = parse(&mut buf).unwrap().unwrap();
        assert!(matches!(
            first,
            Command::Store {
                mode: StoreMode::Add,
                noreply: true,
                ..
            }
        ));
        assert_eq!(&buf[..], b"get k\r\n");

        let second = parse(&mut buf).unwrap().unwrap();
        assert_eq!(
            second,
            Command::Get {
                keys: vec![b"k".to_vec()]
            }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_data_may_contain_crlf() {
        let mut buf = buffer(b"set k 0 0 4\r\na\r\nb\r\n");
        let cmd = parse(&mut buf).unwrap().unwrap();
        assert!(matches!(cmd, Command::Store { ref data, .. } if data == b"a\r\nb"));
    }

    #[test]
    fn test_multi_get() {
        let mut buf = buffer(b"gets a b  c\r\n");
        let cmd = parse(&mut buf).unwrap().unwrap();
        assert_eq!(
            cmd,
            Command::Get {
                keys: vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
            }
        );
    }

    #[test]
    fn test_delete_forms() {
        let mut buf = buffer(b"delete k\r\ndelete k noreply\r\ndelete k 0\r\n");
        assert_eq!(
            parse(&mut buf).unwrap(),
            Some(Command::Delete {
                key: b"k".to_vec(),
                noreply: false
            })
        );
        assert_eq!(
            parse(&mut buf).unwrap(),
            Some(Command::Delete {
                key: b"k".to_vec(),
                noreply: true
            })
        );
        assert!(parse(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            parse(&mut buffer(b"bogus\r\n")),
            Err(ProtocolError::UnknownCommand("bogus".into()))
        );
        assert_eq!(
            parse(&mut buffer(b"set k 0 0\r\n")),
            Err(ProtocolError::BadCommandLine)
        );
        assert_eq!(
            parse(&mut buffer(b"set k x 0 1\r\nv\r\n")),
            Err(ProtocolError::BadCommandLine)
        );
        assert_eq!(
            parse(&mut buffer(b"set k 0 0 1\r\nvv\r\n")),
            Err(ProtocolError::BadDataChunk)
        );
        assert_eq!(parse(&mut buffer(b"get\r\n")), Err(ProtocolError::BadCommandLine));
        assert_eq!(parse(&mut buffer(b"\r\n")), Err(ProtocolError::BadCommandLine));
        assert_eq!(
            parse(&mut buffer(b"stats items\r\n")),
            Err(ProtocolError::BadCommandLine)
        );

        let long_key = format!("get {}\r\n", "k".repeat(MAX_KEY_BYTES + 1));
        assert_eq!(
            parse(&mut buffer(long_key.as_bytes())),
            Err(ProtocolError::InvalidKey)
        );

        let huge = format!("set k 0 0 {}\r\n", MAX_VALUE_BYTES + 1);
        assert_eq!(
            parse(&mut buffer(huge.as_bytes())),
            Err(ProtocolError::ValueTooLarge(MAX_VALUE_BYTES + 1))
        );
        assert_eq!(
            parse(&mut buffer(&vec![b'a'; MAX_LINE_BYTES + 1])),
            Err(ProtocolError::LineTooLong)
        );
    }

    #[test]
    fn test_simple_verbs() {
        let mut buf = buffer(b"stats\r\nversion\r\nflush_all noreply\r\nquit\r\n");
        assert_eq!(parse(&mut buf).unwrap(), Some(Command::Stats));
        assert_eq!(parse(&mut buf).unwrap(), Some(Command::Version));
        assert_eq!(
            parse(&mut buf).unwrap(),
            Some(Command::FlushAll { noreply: true })
        );
        assert_eq!(parse(&mut buf).unwrap(), Some(Command::Quit));
    }
}
