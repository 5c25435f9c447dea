//! Per-connection command loop and RESP2 reply encoding.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::{Outbox, ServerState};

/// Commands still allowed once a session has subscriptions.
const SUBSCRIBER_COMMANDS: [&[u8]; 5] = [b"SUBSCRIBE", b"UNSUBSCRIBE", b"PING", b"QUIT", b"RESET"];

struct Session {
    id: u64,
    state: Arc<ServerState>,
    outbox: Outbox,
    subscribed: HashSet<Vec<u8>>,
    authed: bool,
}

/// Serves one client until it disconnects or sends QUIT.
pub(crate) async fn run(stream: TcpStream, state: Arc<ServerState>, id: u64) {
    let (mut reader, mut writer) = stream.into_split();
    let (outbox, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });
    state.track(id, write_task.abort_handle());

    let mut session = Session {
        id,
        authed: state.password.is_none(),
        state: Arc::clone(&state),
        outbox,
        subscribed: HashSet::new(),
    };

    let mut buffer = BytesMut::with_capacity(8 * 1024);
    'read: loop {
        match reader.read_buf(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        loop {
            match parse_command(&mut buffer) {
                Ok(Some(args)) => {
                    if !session.handle(args) {
                        break 'read;
                    }
                }
                Ok(None) => break,
                Err(()) => {
                    session.reply(resp_error("ERR protocol error"));
                    break 'read;
                }
            }
        }
    }

    state.forget(id);
    // Dropping the outbox lets the writer drain and close the socket.
    drop(session);
    let _ = write_task.await;
}

impl Session {
    fn reply(&self, frame: Vec<u8>) {
        let _ = self.outbox.send(frame);
    }

    /// Executes one command. Returns false when the session should end.
    fn handle(&mut self, args: Vec<Vec<u8>>) -> bool {
        if args.is_empty() {
            self.reply(resp_error("ERR empty command"));
            return true;
        }

        let name = args[0].to_ascii_uppercase();
        self.log(&name, &args[1..]);

        if name.as_slice() == b"AUTH" {
            let reply = self.auth(&args);
            self.reply(reply);
            return true;
        }
        if !self.authed {
            self.reply(resp_error("NOAUTH Authentication required."));
            return true;
        }
        if !self.subscribed.is_empty() && !SUBSCRIBER_COMMANDS.contains(&name.as_slice()) {
            let lower = String::from_utf8_lossy(&name).to_lowercase();
            self.reply(resp_error(&format!(
                "ERR Can't execute '{}': only (P|S)SUBSCRIBE / (P|S)UNSUBSCRIBE / PING / QUIT / RESET are allowed in this context",
                lower
            )));
            return true;
        }

        match name.as_slice() {
            b"PING" => self.reply(resp_simple("PONG")),
            b"QUIT" => {
                self.reply(resp_simple("OK"));
                return false;
            }
            b"SELECT" => self.reply(self.select(&args)),
            b"GET" => self.reply(self.get(&args)),
            b"SET" => self.reply(self.set(&args)),
            b"DEL" => self.reply(self.del(&args)),
            b"FLUSHDB" => {
                self.state.data.lock().clear();
                self.reply(resp_simple("OK"));
            }
            b"PUBLISH" => self.reply(self.publish(&args)),
            b"SUBSCRIBE" => self.subscribe(&args[1..]),
            b"UNSUBSCRIBE" => self.unsubscribe(&args[1..]),
            _ => self.reply(resp_error("ERR unknown command")),
        }
        true
    }

    fn log(&self, name: &[u8], rest: &[Vec<u8>]) {
        let mut entry = Vec::with_capacity(rest.len() + 1);
        entry.push(String::from_utf8_lossy(name).into_owned());
        entry.extend(rest.iter().map(|arg| String::from_utf8_lossy(arg).into_owned()));
        self.state.commands.lock().push(entry);
    }

    fn auth(&mut self, args: &[Vec<u8>]) -> Vec<u8> {
        let expected = match self.state.password.as_deref() {
            Some(expected) => expected,
            None => return resp_error("ERR AUTH called without any password configured"),
        };
        let given = match args.len() {
            2 => &args[1],
            3 => &args[2],
            _ => return resp_error("ERR wrong number of arguments for AUTH"),
        };
        if given.as_slice() == expected.as_bytes() {
            self.authed = true;
            resp_simple("OK")
        } else {
            resp_error("WRONGPASS invalid username-password pair")
        }
    }

    fn select(&self, args: &[Vec<u8>]) -> Vec<u8> {
        if args.len() != 2 {
            return resp_error("ERR wrong number of arguments for SELECT");
        }
        if args[1].is_empty() || !args[1].iter().all(u8::is_ascii_digit) {
            return resp_error("ERR invalid DB index");
        }
        resp_simple("OK")
    }

    fn get(&self, args: &[Vec<u8>]) -> Vec<u8> {
        if args.len() != 2 {
            return resp_error("ERR wrong number of arguments for GET");
        }
        match self.state.data.lock().get(&args[1]) {
            Some(value) => resp_bulk(value),
            None => resp_null(),
        }
    }

    fn set(&self, args: &[Vec<u8>]) -> Vec<u8> {
        if args.len() != 3 {
            return resp_error("ERR wrong number of arguments for SET");
        }
        self.state
            .data
            .lock()
            .insert(args[1].clone(), args[2].clone());
        resp_simple("OK")
    }

    fn del(&self, args: &[Vec<u8>]) -> Vec<u8> {
        if args.len() < 2 {
            return resp_error("ERR wrong number of arguments for DEL");
        }
        let mut data = self.state.data.lock();
        let removed = args[1..]
            .iter()
            .filter(|key| data.remove(key.as_slice()).is_some())
            .count();
        resp_integer(removed as i64)
    }

    fn publish(&self, args: &[Vec<u8>]) -> Vec<u8> {
        if args.len() != 3 {
            return resp_error("ERR wrong number of arguments for PUBLISH");
        }
        let frame = resp_message(&args[1], &args[2]);
        let channels = self.state.channels.lock();
        let delivered = channels
            .get(&args[1])
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|(_, outbox)| outbox.send(frame.clone()).is_ok())
                    .count()
            })
            .unwrap_or(0);
        resp_integer(delivered as i64)
    }

    fn subscribe(&mut self, channels: &[Vec<u8>]) {
        if channels.is_empty() {
            self.reply(resp_error("ERR wrong number of arguments for SUBSCRIBE"));
            return;
        }
        for channel in channels {
            if self.subscribed.insert(channel.clone()) {
                self.state
                    .channels
                    .lock()
                    .entry(channel.clone())
                    .or_default()
                    .push((self.id, self.outbox.clone()));
            }
            self.reply(resp_confirm(b"subscribe", Some(channel), self.subscribed.len()));
        }
    }

    fn unsubscribe(&mut self, channels: &[Vec<u8>]) {
        let targets: Vec<Vec<u8>> = if channels.is_empty() {
            self.subscribed.iter().cloned().collect()
        } else {
            channels.to_vec()
        };
        if targets.is_empty() {
            self.reply(resp_confirm(b"unsubscribe", None, 0));
            return;
        }

        for channel in targets {
            if self.subscribed.remove(&channel) {
                let mut registry = self.state.channels.lock();
                if let Some(subscribers) = registry.get_mut(&channel) {
                    subscribers.retain(|(id, _)| *id != self.id);
                    if subscribers.is_empty() {
                        registry.remove(&channel);
                    }
                }
            }
            self.reply(resp_confirm(b"unsubscribe", Some(&channel), self.subscribed.len()));
        }
    }
}

/// Parses one `*N\r\n$len\r\narg\r\n...` command from the front of `buf`.
fn parse_command(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, ()> {
    let (count, mut pos) = match read_header(buf, 0, b'*')? {
        Some(found) => found,
        None => return Ok(None),
    };

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let (len, start) = match read_header(buf, pos, b'$')? {
            Some(found) => found,
            None => return Ok(None),
        };
        let end = start + len;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(());
        }
        args.push(buf[start..end].to_vec());
        pos = end + 2;
    }

    buf.advance(pos);
    Ok(Some(args))
}

/// Reads a `<prefix><digits>\r\n` header at `pos`.
fn read_header(buf: &[u8], pos: usize, prefix: u8) -> Result<Option<(usize, usize)>, ()> {
    let rest = &buf[pos..];
    let idx = match rest.iter().position(|&b| b == b'\n') {
        Some(idx) => idx,
        None => return Ok(None),
    };
    if idx < 2 || rest[0] != prefix || rest[idx - 1] != b'\r' {
        return Err(());
    }
    let digits = &rest[1..idx - 1];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(());
    }
    let value = digits
        .iter()
        .fold(0usize, |acc, b| acc.saturating_mul(10).saturating_add((b - b'0') as usize));
    Ok(Some((value, pos + idx + 1)))
}

fn resp_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"+");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.extend_from_slice(b"-");
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_integer(value: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b":");
    buf.extend_from_slice(value.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// `["subscribe"|"unsubscribe", channel, count]` confirmation.
fn resp_confirm(kind: &[u8], channel: Option<&[u8]>, count: usize) -> Vec<u8> {
    let mut buf = b"*3\r\n".to_vec();
    buf.extend(resp_bulk(kind));
    match channel {
        Some(channel) => buf.extend(resp_bulk(channel)),
        None => buf.extend(resp_null()),
    }
    buf.extend(resp_integer(count as i64));
    buf
}

/// `["message", channel, payload]` push.
fn resp_message(channel: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut buf = b"*3\r\n".to_vec();
    buf.extend(resp_bulk(b"message"));
    buf.extend(resp_bulk(channel));
    buf.extend(resp_bulk(payload));
    buf
}
