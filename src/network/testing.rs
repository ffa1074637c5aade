//! In-process stand-in for a Redis server, speaking just enough RESP2 for the
//! store: PING, GET, SET, DEL and KEYS.
//!
//! Built for this crate's tests, and for downstream tests with the `testing`
//! feature.

use std::{collections::HashMap, fmt::Write, io, sync::Arc};

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::{JoinHandle, JoinSet},
};

use crate::encoding::resp2::{self, Reply};

#[derive(Debug, Default)]
struct State {
    data: HashMap<String, String>,
    ping_reply: Option<String>,
    fail_next: Option<String>,
    hang_up_next: bool,
    raw_next: Option<Vec<u8>>,
    vanish_on_get: Option<String>,
}

pub struct FakeRedis {
    addr: String,
    state: Arc<Mutex<State>>,
    handle: JoinHandle<()>,
}

impl FakeRedis {
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let state = Arc::new(Mutex::new(State::default()));

        let handle = tokio::spawn(serve_connections(listener, state.clone()));

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().data.get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.state
            .lock()
            .data
            .insert(key.to_owned(), value.to_owned());
    }

    pub fn exists(&self, key: &str) -> bool {
        self.state.lock().data.contains_key(key)
    }

    /// Answers PING with this simple string instead of PONG.
    pub fn set_ping_reply(&self, reply: &str) {
        self.state.lock().ping_reply = Some(reply.to_owned());
    }

    /// Answers the next command with an error reply.
    pub fn fail_next(&self, message: &str) {
        self.state.lock().fail_next = Some(message.to_owned());
    }

    /// Closes the connection instead of answering the next command.
    pub fn hang_up_next(&self) {
        self.state.lock().hang_up_next = true;
    }

    /// Answers the next command with these bytes verbatim.
    pub fn reply_raw_next(&self, bytes: &[u8]) {
        self.state.lock().raw_next = Some(bytes.to_vec());
    }

    /// Deletes `key` right before the next GET for it is answered.
    pub fn vanish_on_get(&self, key: &str) {
        self.state.lock().vanish_on_get = Some(key.to_owned());
    }
}

impl Drop for FakeRedis {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// An address nothing listens on.
pub async fn unused_addr() -> io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.to_string())
}

async fn serve_connections(listener: TcpListener, state: Arc<Mutex<State>>) {
    // Dropped together with this task, which aborts every connection.
    let mut connections = JoinSet::new();
    loop {
        let Ok((incoming, _)) = listener.accept().await else {
            continue;
        };
        connections.spawn(serve(incoming, state.clone()));
    }
}

async fn serve(mut connection: TcpStream, state: Arc<Mutex<State>>) {
    let mut buf = BytesMut::new();
    loop {
        let Ok(read) = connection.read_buf(&mut buf).await else {
            return;
        };
        if read == 0 {
            return;
        }

        while let Ok(Some((request, count))) = resp2::from_bytes(&buf) {
            buf.advance(count);

            let raw = state.lock().raw_next.take();
            let out = match raw {
                Some(raw) => BytesMut::from(raw.as_slice()),
                None => {
                    let Some(reply) = execute(request, &state) else {
                        return;
                    };
                    let mut out = BytesMut::new();
                    encode(&reply, &mut out);
                    out
                }
            };
            if connection.write_all(&out).await.is_err() {
                return;
            }
        }
    }
}

fn execute(request: Reply, state: &Mutex<State>) -> Option<Reply> {
    let mut state = state.lock();
    if std::mem::take(&mut state.hang_up_next) {
        return None;
    }
    if let Some(message) = state.fail_next.take() {
        return Some(Reply::Error(message));
    }

    let Reply::Array(Some(items)) = request else {
        return Some(Reply::Error("ERR expected array".into()));
    };
    let args = items
        .into_iter()
        .filter_map(|it| it.into_text().ok().flatten())
        .collect::<Vec<_>>();

    let reply = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [cmd] if cmd.eq_ignore_ascii_case("ping") => {
            Reply::Simple(state.ping_reply.clone().unwrap_or_else(|| "PONG".into()))
        }
        [cmd, key] if cmd.eq_ignore_ascii_case("get") => {
            if state.vanish_on_get.as_deref() == Some(*key) {
                state.vanish_on_get = None;
                state.data.remove(*key);
            }
            Reply::Bulk(state.data.get(*key).map(|it| it.clone().into()))
        }
        [cmd, key, value] if cmd.eq_ignore_ascii_case("set") => {
            state.data.insert(key.to_string(), value.to_string());
            Reply::Simple("OK".into())
        }
        [cmd, keys @ ..] if cmd.eq_ignore_ascii_case("del") => {
            let removed = keys
                .iter()
                .filter(|key| state.data.remove(**key).is_some())
                .count();
            Reply::Integer(removed as i64)
        }
        [cmd, pattern] if cmd.eq_ignore_ascii_case("keys") => Reply::Array(Some(
            state
                .data
                .keys()
                .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
                .map(|key| Reply::Bulk(Some(key.clone().into())))
                .collect(),
        )),
        _ => Reply::Error("ERR unknown command".into()),
    };

    Some(reply)
}

fn encode(reply: &Reply, out: &mut BytesMut) {
    let _ = match reply {
        Reply::Simple(s) => write!(out, "+{s}\r\n"),
        Reply::Error(s) => write!(out, "-{s}\r\n"),
        Reply::Integer(n) => write!(out, ":{n}\r\n"),
        Reply::Bulk(None) => write!(out, "$-1\r\n"),
        Reply::Bulk(Some(b)) => {
            let _ = write!(out, "${}\r\n", b.len());
            out.extend_from_slice(b);
            write!(out, "\r\n")
        }
        Reply::Array(None) => write!(out, "*-1\r\n"),
        Reply::Array(Some(items)) => {
            let _ = write!(out, "*{}\r\n", items.len());
            items.iter().for_each(|it| encode(it, out));
            Ok(())
        }
    };
}

/// Redis KEYS glob subset: `*`, `?` and backslash escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((b'\\', [escaped, rest @ ..])) => {
            text.first() == Some(escaped) && glob_match(rest, &text[1..])
        }
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn glob_subset() {
        assert!(glob_match(b"app--*", b"app--user:1"));
        assert!(!glob_match(b"app--*", b"other--user:1"));
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"a?c", b"abc"));
        assert!(glob_match(br"a\*--*", b"a*--x"));
        assert!(!glob_match(br"a\*--*", b"ab--x"));
    }
}
