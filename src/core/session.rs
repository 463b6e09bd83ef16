//! TCP client sessions
//!
//! Each accepted connection owns its socket, a bounded receive buffer and
//! a direction flag: inbound until a complete frame has been dispatched,
//! outbound until the response has been written. The table holds at most
//! `MAX_NR_CLIENTS` sessions; past that, the least-recently-active one is
//! evicted. Only the event loop touches any of this.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Instant;

use bytes::BytesMut;
use mio::net::TcpStream;
use mio::Token;

use crate::core::dispatcher::MAX_PACKET_SIZE;

/// Upper bound on simultaneously connected TCP clients.
pub const MAX_NR_CLIENTS: usize = 16;

/// State of one accepted TCP conversation.
#[derive(Debug)]
pub struct Session {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub token: Token,
    pub last_activity: Instant,
    pub rx: BytesMut,
    pub tx: BytesMut,
    /// False while reading a request, true while a response is pending.
    pub outgoing: bool,
    pub closed: bool,
}

impl Session {
    pub fn new(stream: TcpStream, peer: SocketAddr, token: Token) -> Self {
        Self {
            stream,
            peer,
            token,
            last_activity: Instant::now(),
            rx: BytesMut::with_capacity(MAX_PACKET_SIZE),
            tx: BytesMut::new(),
            outgoing: false,
            closed: false,
        }
    }

    /// Drains whatever the socket has into the receive buffer.
    ///
    /// Returns `false` when the session must be closed: peer disconnect,
    /// hard I/O error, or a frame that cannot fit the buffer.
    pub fn fill(&mut self) -> bool {
        let mut scratch = [0u8; 1024];
        loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => return false,
                Ok(n) => {
                    if self.rx.len() + n > MAX_PACKET_SIZE {
                        return false;
                    }
                    self.rx.extend_from_slice(&scratch[..n]);
                    self.last_activity = Instant::now();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return false,
            }
        }
    }

    /// Stores the response and flips the session to outbound. The request
    /// buffer is consumed wholesale: one frame, one answer.
    pub fn queue_response(&mut self, response: &[u8]) {
        self.tx.clear();
        self.tx.extend_from_slice(response);
        self.rx.clear();
        self.outgoing = true;
    }

    /// Writes the pending response in a single attempt.
    ///
    /// `Ok(true)` means fully sent and back to inbound; `Ok(false)` means
    /// the socket was not actually writable yet. A short write is an
    /// error: the peer gets a closed connection, not half a message.
    pub fn flush(&mut self) -> io::Result<bool> {
        match self.stream.write(&self.tx) {
            Ok(n) if n == self.tx.len() => {
                self.tx.clear();
                self.outgoing = false;
                Ok(true)
            }
            Ok(n) => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("only {} of {} bytes written", n, self.tx.len()),
            )),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Insertion-ordered container of live sessions.
#[derive(Debug)]
pub struct SessionTable {
    sessions: Vec<Session>,
    capacity: usize,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::with_capacity(MAX_NR_CLIENTS)
    }
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.token == token)
    }

    /// Installs a new session, evicting and returning the session with the
    /// oldest activity timestamp when the table is full.
    pub fn insert(&mut self, session: Session) -> Option<Session> {
        let mut evicted = None;
        if self.sessions.len() >= self.capacity {
            if let Some(oldest) = self
                .sessions
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.last_activity)
                .map(|(i, _)| i)
            {
                evicted = Some(self.sessions.remove(oldest));
            }
        }
        self.sessions.push(session);
        evicted
    }

    /// Removes closed sessions, preserving the order of survivors, and
    /// hands them back for socket teardown.
    pub fn take_closed(&mut self) -> Vec<Session> {
        let (closed, open): (Vec<_>, Vec<_>) =
            self.sessions.drain(..).partition(|s| s.closed);
        self.sessions = open;
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdListener;
    use std::time::Duration;

    /// A connected nonblocking stream against a throwaway listener.
    fn connected_stream(listener: &StdListener) -> TcpStream {
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let _server = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        TcpStream::from_std(client)
    }

    /// `recency` orders activity: larger values are more recently active.
    fn session(listener: &StdListener, token: usize, recency: u64) -> Session {
        let peer = listener.local_addr().unwrap();
        let mut s = Session::new(connected_stream(listener), peer, Token(token));
        s.last_activity += Duration::from_secs(recency);
        s
    }

    #[test]
    fn insert_below_capacity_keeps_everyone() {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let mut table = SessionTable::with_capacity(2);
        assert!(table.insert(session(&listener, 10, 0)).is_none());
        assert!(table.insert(session(&listener, 11, 0)).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn overflow_evicts_least_recently_active() {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let mut table = SessionTable::with_capacity(3);
        table.insert(session(&listener, 10, 60));
        table.insert(session(&listener, 11, 10));
        table.insert(session(&listener, 12, 30));

        let evicted = table
            .insert(session(&listener, 13, 90))
            .expect("table at capacity must evict");
        assert_eq!(evicted.token, Token(11));
        assert_eq!(table.len(), 3);
        assert!(table.get_mut(Token(11)).is_none());
        assert!(table.get_mut(Token(13)).is_some());
    }

    #[test]
    fn take_closed_preserves_survivor_order() {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let mut table = SessionTable::with_capacity(4);
        for token in 10..14 {
            table.insert(session(&listener, token, 0));
        }
        table.get_mut(Token(10)).unwrap().closed = true;
        table.get_mut(Token(12)).unwrap().closed = true;

        let closed = table.take_closed();
        assert_eq!(closed.len(), 2);
        assert_eq!(table.len(), 2);
        let order: Vec<_> = table.sessions.iter().map(|s| s.token).collect();
        assert_eq!(order, vec![Token(11), Token(13)]);
    }

    #[test]
    fn queue_response_flips_direction_and_clears_request() {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let mut s = session(&listener, 10, 0);
        s.rx.extend_from_slice(&[0x30, 0x00]);
        s.queue_response(b"response");
        assert!(s.outgoing);
        assert!(s.rx.is_empty());
        assert_eq!(&s.tx[..], b"response");
    }
}
