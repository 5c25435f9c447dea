//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and incrementally parse server replies out
//! of the connection's read buffer.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: A partial frame leaves the buffer untouched and
//!    returns `Ok(None)` until more bytes arrive.
//! 2. **Buffer Reuse**: Callers own the buffers; the parser only advances them.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use bytes::{Buf, BytesMut};

use crate::client::{ClientError, ClientResult};

/// Largest bulk string accepted from the server (the store's own default).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Largest array header accepted from the server.
const MAX_ARRAY_LEN: i64 = 1024 * 1024;
/// Upper bound on slots reserved up front for an array.
const ARRAY_PREALLOC: usize = 64;

/// RESP response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays (pub/sub confirmations and pushes).
    Array(Vec<RespValue>),
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Parses one complete RESP value from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer holds only part of a frame.
pub fn parse_value(buf: &mut BytesMut) -> ClientResult<Option<RespValue>> {
    match parse_at(&buf[..], 0)? {
        Some((value, consumed)) => {
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn parse_at(data: &[u8], pos: usize) -> ClientResult<Option<(RespValue, usize)>> {
    let (line, next) = match read_line(data, pos)? {
        Some(found) => found,
        None => return Ok(None),
    };
    if line.is_empty() {
        return Err(ClientError::Protocol);
    }

    match line[0] {
        b'+' => Ok(Some((RespValue::Simple(line[1..].to_vec()), next))),
        b'-' => Ok(Some((RespValue::Error(line[1..].to_vec()), next))),
        b':' => Ok(Some((RespValue::Integer(parse_i64(&line[1..])?), next))),
        b'$' => {
            let len = parse_i64(&line[1..])?;
            parse_bulk(data, next, len)
        }
        b'*' => {
            let len = parse_i64(&line[1..])?;
            parse_array(data, next, len)
        }
        _ => Err(ClientError::Protocol),
    }
}

fn parse_bulk(data: &[u8], start: usize, len: i64) -> ClientResult<Option<(RespValue, usize)>> {
    if len == -1 {
        return Ok(Some((RespValue::Bulk(None), start)));
    }
    if !(0..=MAX_BULK_LEN).contains(&len) {
        return Err(ClientError::Protocol);
    }
    let end = start + len as usize;
    if data.len() < end + 2 {
        return Ok(None);
    }
    if &data[end..end + 2] != b"\r\n" {
        return Err(ClientError::Protocol);
    }
    Ok(Some((RespValue::Bulk(Some(data[start..end].to_vec())), end + 2)))
}

fn parse_array(data: &[u8], start: usize, len: i64) -> ClientResult<Option<(RespValue, usize)>> {
    if len == -1 || len == 0 {
        return Ok(Some((RespValue::Array(Vec::new()), start)));
    }
    if !(1..=MAX_ARRAY_LEN).contains(&len) {
        return Err(ClientError::Protocol);
    }

    // The header is untrusted; grow as items actually arrive.
    let mut items = Vec::with_capacity((len as usize).min(ARRAY_PREALLOC));
    let mut cursor = start;
    for _ in 0..len {
        match parse_at(data, cursor)? {
            Some((item, after)) => {
                items.push(item);
                cursor = after;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((RespValue::Array(items), cursor)))
}

/// Returns the line starting at `pos` (without CRLF) and the offset after it.
fn read_line(data: &[u8], pos: usize) -> ClientResult<Option<(&[u8], usize)>> {
    let rest = &data[pos..];
    let idx = match rest.iter().position(|&b| b == b'\n') {
        Some(idx) => idx,
        None => return Ok(None),
    };
    if idx == 0 || rest[idx - 1] != b'\r' {
        return Err(ClientError::Protocol);
    }
    Ok(Some((&rest[..idx - 1], pos + idx + 1)))
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    if data.is_empty() {
        return Err(ClientError::Protocol);
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(bytes: &[u8]) -> Option<RespValue> {
        let mut buf = BytesMut::from(bytes);
        parse_value(&mut buf).unwrap()
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[b"GET", b"key"], &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn parses_simple_string() {
        assert_eq!(parse_all(b"+OK\r\n"), Some(RespValue::Simple(b"OK".to_vec())));
    }

    #[test]
    fn parses_bulk_string() {
        assert_eq!(
            parse_all(b"$5\r\nhello\r\n"),
            Some(RespValue::Bulk(Some(b"hello".to_vec())))
        );
    }

    #[test]
    fn parses_null_bulk_string() {
        assert_eq!(parse_all(b"$-1\r\n"), Some(RespValue::Bulk(None)));
    }

    #[test]
    fn parses_integer() {
        assert_eq!(parse_all(b":42\r\n"), Some(RespValue::Integer(42)));
        assert_eq!(parse_all(b":-2\r\n"), Some(RespValue::Integer(-2)));
    }

    #[test]
    fn parses_error() {
        assert_eq!(
            parse_all(b"-ERR bad\r\n"),
            Some(RespValue::Error(b"ERR bad".to_vec()))
        );
    }

    #[test]
    fn parses_push_message() {
        let frame = b"*3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$7\r\n{\"x\":1}\r\n";
        assert_eq!(
            parse_all(frame),
            Some(RespValue::Array(vec![
                RespValue::Bulk(Some(b"message".to_vec())),
                RespValue::Bulk(Some(b"ch".to_vec())),
                RespValue::Bulk(Some(b"{\"x\":1}".to_vec())),
            ]))
        );
    }

    #[test]
    fn partial_frame_leaves_buffer_intact() {
        let mut buf = BytesMut::from(&b"*3\r\n$9\r\nsubscribe\r\n$2\r\nch"[..]);
        assert_eq!(parse_value(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 25);

        buf.extend_from_slice(b"\r\n:1\r\n");
        let value = parse_value(&mut buf).unwrap();
        assert!(matches!(value, Some(RespValue::Array(ref items)) if items.len() == 3));
        assert!(buf.is_empty());
    }

    #[test]
    fn parses_back_to_back_frames() {
        let mut buf = BytesMut::from(&b"+OK\r\n:1\r\n$-1\r\n"[..]);
        assert_eq!(parse_value(&mut buf).unwrap(), Some(RespValue::Simple(b"OK".to_vec())));
        assert_eq!(parse_value(&mut buf).unwrap(), Some(RespValue::Integer(1)));
        assert_eq!(parse_value(&mut buf).unwrap(), Some(RespValue::Bulk(None)));
        assert_eq!(parse_value(&mut buf).unwrap(), None);
    }

    #[test]
    fn rejects_bad_framing() {
        let mut buf = BytesMut::from(&b"?what\r\n"[..]);
        assert!(matches!(parse_value(&mut buf), Err(ClientError::Protocol)));

        let mut buf = BytesMut::from(&b"+OK\n"[..]);
        assert!(matches!(parse_value(&mut buf), Err(ClientError::Protocol)));

        let mut buf = BytesMut::from(&b"$3\r\nabcXY"[..]);
        assert!(matches!(parse_value(&mut buf), Err(ClientError::Protocol)));
    }

    #[test]
    fn rejects_out_of_range_lengths() {
        for frame in [
            &b"*4611686018427387903\r\n"[..],
            b"*-2\r\n",
            b"$9223372036854775807\r\n",
            b"$-5\r\n",
        ] {
            let mut buf = BytesMut::from(frame);
            assert!(
                matches!(parse_value(&mut buf), Err(ClientError::Protocol)),
                "accepted {:?}",
                String::from_utf8_lossy(frame)
            );
        }
    }

    #[test]
    fn large_array_header_waits_for_items() {
        let mut buf = BytesMut::from(&b"*1000\r\n:1\r\n"[..]);
        assert_eq!(parse_value(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 11);
    }
}
