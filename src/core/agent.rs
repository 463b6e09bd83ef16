//! Agent event loop
//!
//! One thread, one `mio::Poll`. The UDP socket and the TCP listener are
//! watched for reads; each session is watched for read or write according
//! to its direction. The poll timeout is whatever remains of the current
//! MIB refresh interval, so a quiet agent still ticks.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, UdpSocket};
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, IpFamily};
use crate::core::dispatcher::{Dispatcher, MAX_PACKET_SIZE};
use crate::core::session::{Session, SessionTable};
use crate::mib::{HostMib, Refresh};
use crate::protocols::ber;
use crate::{Error, Result};

const UDP_TOKEN: Token = Token(0);
const LISTEN_TOKEN: Token = Token(1);
const WAKER_TOKEN: Token = Token(2);
const FIRST_CLIENT_TOKEN: usize = 3;

/// Flags the agent down and wakes its poll. Safe to invoke from a signal
/// handler thread, any number of times.
pub struct ShutdownHandle {
    quit: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        self.quit.store(true, Ordering::SeqCst);
        let _ = self.waker.wake();
    }
}

/// The running agent: sockets, session table, MIB and dispatcher.
pub struct SnmpAgent {
    config: AgentConfig,
    dispatcher: Dispatcher,
    host: HostMib,
    poll: Poll,
    waker: Arc<Waker>,
    udp: UdpSocket,
    listener: TcpListener,
    sessions: SessionTable,
    next_token: usize,
    quit: Arc<AtomicBool>,
}

fn wildcard(family: IpFamily) -> (Domain, IpAddr) {
    match family {
        IpFamily::V4 => (Domain::IPV4, Ipv4Addr::UNSPECIFIED.into()),
        IpFamily::V6 => (Domain::IPV6, Ipv6Addr::UNSPECIFIED.into()),
    }
}

fn bind_to_device(socket: &Socket, config: &AgentConfig) -> Result<()> {
    if let Some(device) = &config.listen_device {
        #[cfg(target_os = "linux")]
        socket
            .bind_device(Some(device.as_bytes()))
            .map_err(|e| Error::network(format!("could not bind to device {}: {}", device, e)))?;
        #[cfg(not(target_os = "linux"))]
        {
            let _ = socket;
            warn!("binding to device {} is not supported on this platform", device);
        }
    }
    Ok(())
}

fn bind_udp(config: &AgentConfig) -> Result<UdpSocket> {
    let (domain, ip) = wildcard(config.family);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| Error::network(format!("could not create UDP socket: {}", e)))?;
    socket.set_nonblocking(true)?;
    bind_to_device(&socket, config)?;
    let addr = SocketAddr::new(ip, config.udp_port);
    socket.bind(&addr.into()).map_err(|e| {
        Error::network(format!(
            "could not bind UDP socket to port {}: {}",
            config.udp_port, e
        ))
    })?;
    Ok(UdpSocket::from_std(socket.into()))
}

fn bind_tcp(config: &AgentConfig) -> Result<TcpListener> {
    let (domain, ip) = wildcard(config.family);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| Error::network(format!("could not create TCP socket: {}", e)))?;
    socket.set_nonblocking(true)?;
    socket
        .set_reuse_address(true)
        .map_err(|e| Error::network(format!("could not set SO_REUSEADDR: {}", e)))?;
    bind_to_device(&socket, config)?;
    let addr = SocketAddr::new(ip, config.tcp_port);
    socket.bind(&addr.into()).map_err(|e| {
        Error::network(format!(
            "could not bind TCP socket to port {}: {}",
            config.tcp_port, e
        ))
    })?;
    socket
        .listen(128)
        .map_err(|e| Error::network(format!("could not listen on TCP socket: {}", e)))?;
    Ok(TcpListener::from_std(socket.into()))
}

impl SnmpAgent {
    pub fn new(config: AgentConfig, host: HostMib) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let mut udp = bind_udp(&config)?;
        let mut listener = bind_tcp(&config)?;
        poll.registry()
            .register(&mut udp, UDP_TOKEN, Interest::READABLE)?;
        poll.registry()
            .register(&mut listener, LISTEN_TOKEN, Interest::READABLE)?;

        let dispatcher = Dispatcher::new(&config);
        Ok(Self {
            config,
            dispatcher,
            host,
            poll,
            waker,
            udp,
            listener,
            sessions: SessionTable::new(),
            next_token: FIRST_CLIENT_TOKEN,
            quit: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            quit: Arc::clone(&self.quit),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn udp_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs until the quit flag is raised. All socket I/O and every MIB
    /// refresh happens on this thread, between readiness waits.
    pub fn run(&mut self) -> Result<()> {
        match &self.config.listen_device {
            Some(device) => info!(
                "Listening on port {}/udp and {}/tcp on interface {}",
                self.config.udp_port, self.config.tcp_port, device
            ),
            None => info!(
                "Listening on port {}/udp and {}/tcp",
                self.config.udp_port, self.config.tcp_port
            ),
        }

        let tick = Duration::from_millis(u64::from(self.config.timeout_ticks()) * 10);
        let mut last_full = Instant::now();
        let mut events = Events::with_capacity(64);

        while !self.quit.load(Ordering::SeqCst) {
            let timeout = tick.saturating_sub(last_full.elapsed());
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    // A signal wakeup is a normal wakeup.
                    events.clear();
                } else {
                    return Err(e.into());
                }
            }
            if self.quit.load(Ordering::SeqCst) {
                break;
            }

            if last_full.elapsed() >= tick {
                debug!("updating the MIB (full)");
                self.host.refresh(Refresh::Full)?;
                last_full = Instant::now();
            } else {
                debug!("updating the MIB (partial)");
                self.host.refresh(Refresh::Partial)?;
            }

            let ready: Vec<(Token, bool, bool)> = events
                .iter()
                .map(|e| (e.token(), e.is_readable(), e.is_writable()))
                .collect();
            for (token, readable, writable) in ready {
                match token {
                    UDP_TOKEN => self.handle_udp(),
                    LISTEN_TOKEN => self.handle_accept(),
                    WAKER_TOKEN => {}
                    token => self.handle_session(token, readable, writable),
                }
            }

            self.reap_sessions();
        }

        info!("stopped");
        Ok(())
    }

    /// Each datagram is one complete transaction: read, dispatch, answer
    /// best-effort. The socket is drained because readiness is reported
    /// edge-style: a second queued datagram would not trigger again.
    fn handle_udp(&mut self) {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            match self.udp.recv_from(&mut buf) {
                Ok((len, peer)) => {
                    debug!("UDP request of {} bytes from {}", len, peer);
                    match self.dispatcher.handle(self.host.mib(), &buf[..len]) {
                        Some(response) => match self.udp.send_to(&response, peer) {
                            Ok(sent) if sent == response.len() => {}
                            Ok(sent) => warn!(
                                "short UDP response to {}: only {} of {} bytes sent",
                                peer,
                                sent,
                                response.len()
                            ),
                            Err(e) => warn!("failed UDP response to {}: {}", peer, e),
                        },
                        None => debug!("ignored UDP request from {}", peer),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("failed receiving UDP request: {}", e);
                    return;
                }
            }
        }
    }

    fn handle_accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    let mut session = Session::new(stream, peer, token);
                    if let Err(e) = self.poll.registry().register(
                        &mut session.stream,
                        token,
                        Interest::READABLE,
                    ) {
                        warn!("could not watch TCP client {}: {}", peer, e);
                        continue;
                    }
                    debug!("connected TCP client {}", peer);

                    if let Some(mut evicted) = self.sessions.insert(session) {
                        warn!(
                            "maximum number of {} clients reached, kicking out {}",
                            self.sessions.capacity(),
                            evicted.peer
                        );
                        let _ = self.poll.registry().deregister(&mut evicted.stream);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("could not accept TCP connection: {}", e);
                    return;
                }
            }
        }
    }

    fn handle_session(&mut self, token: Token, readable: bool, writable: bool) {
        let Self {
            sessions,
            dispatcher,
            host,
            poll,
            ..
        } = self;
        let registry = poll.registry();
        let Some(session) = sessions.get_mut(token) else {
            return;
        };

        if !session.outgoing && readable {
            if !session.fill() {
                debug!("TCP client {} disconnected", session.peer);
                session.closed = true;
                return;
            }
            match ber::frame_length(&session.rx) {
                Ok(None) => {}
                Ok(Some(len)) => {
                    let frame = session.rx[..len].to_vec();
                    match dispatcher.handle(host.mib(), &frame) {
                        Some(response) => {
                            session.queue_response(&response);
                            if let Err(e) = registry.reregister(
                                &mut session.stream,
                                token,
                                Interest::WRITABLE,
                            ) {
                                warn!("could not watch TCP client {}: {}", session.peer, e);
                                session.closed = true;
                            }
                        }
                        None => {
                            warn!("ignored TCP request from {}", session.peer);
                            session.closed = true;
                        }
                    }
                }
                Err(e) => {
                    warn!("failed TCP request from {}: {}", session.peer, e);
                    session.closed = true;
                }
            }
        } else if session.outgoing && writable {
            match session.flush() {
                Ok(true) => {
                    if let Err(e) =
                        registry.reregister(&mut session.stream, token, Interest::READABLE)
                    {
                        warn!("could not watch TCP client {}: {}", session.peer, e);
                        session.closed = true;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("failed TCP response to {}: {}", session.peer, e);
                    session.closed = true;
                }
            }
        }
    }

    /// Closes and forgets sessions flagged during this iteration.
    fn reap_sessions(&mut self) {
        for mut session in self.sessions.take_closed() {
            let _ = self.poll.registry().deregister(&mut session.stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::snmp::{self, Message, PduType, VarBind, Version};
    use crate::protocols::{Oid, Value};
    use crate::services::collectors::test_support::FixedHost;
    use std::io::{Read, Write};
    use std::net::{TcpStream as StdTcpStream, UdpSocket as StdUdpSocket};
    use std::thread;

    fn test_config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.udp_port = 0;
        config.tcp_port = 0;
        config.timeout = 1;
        config.interfaces = vec!["eth0".into()];
        config
    }

    fn sys_name_request() -> Vec<u8> {
        let msg = Message {
            version: Version::V2c,
            community: b"public".to_vec(),
            pdu_type: PduType::GetRequest,
            request_id: 7,
            error_status: 0,
            error_index: 0,
            bindings: vec![VarBind::unbound("1.3.6.1.2.1.1.5.0".parse::<Oid>().unwrap())],
        };
        snmp::encode(&msg).unwrap().to_vec()
    }

    fn assert_sys_name_response(packet: &[u8]) {
        let resp = snmp::decode(packet).unwrap();
        assert_eq!(resp.pdu_type, PduType::GetResponse);
        assert_eq!(resp.request_id, 7);
        assert_eq!(
            resp.bindings[0].value,
            Value::OctetString(b"testhost".to_vec())
        );
    }

    #[test]
    fn serves_udp_and_chunked_tcp() {
        let config = test_config();
        let host = HostMib::build(&config, Box::new(FixedHost::new())).unwrap();
        let mut agent = SnmpAgent::new(config, host).unwrap();
        let udp_port = agent.udp_addr().unwrap().port();
        let tcp_port = agent.tcp_addr().unwrap().port();
        let shutdown = agent.shutdown_handle();

        let worker = thread::spawn(move || agent.run());

        // UDP: a complete datagram transaction.
        let request = sys_name_request();
        let client = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client
            .send_to(&request, ("127.0.0.1", udp_port))
            .unwrap();
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let (n, _) = client.recv_from(&mut buf).unwrap();
        assert_sys_name_response(&buf[..n]);

        // TCP: the same request split across arbitrary write chunks must
        // reassemble into the same answer.
        let mut stream = StdTcpStream::connect(("127.0.0.1", tcp_port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(&request[..7]).unwrap();
        stream.flush().unwrap();
        thread::sleep(Duration::from_millis(50));
        stream.write_all(&request[7..]).unwrap();

        let mut collected = Vec::new();
        let mut chunk = [0u8; 512];
        let total = loop {
            let n = stream.read(&mut chunk).unwrap();
            assert!(n > 0, "connection closed before a full response");
            collected.extend_from_slice(&chunk[..n]);
            if let Some(total) = ber::frame_length(&collected).unwrap() {
                break total;
            }
        };
        assert_sys_name_response(&collected[..total]);

        shutdown.request();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn malformed_tcp_frame_closes_the_session() {
        let config = test_config();
        let host = HostMib::build(&config, Box::new(FixedHost::new())).unwrap();
        let mut agent = SnmpAgent::new(config, host).unwrap();
        let tcp_port = agent.tcp_addr().unwrap().port();
        let shutdown = agent.shutdown_handle();
        let worker = thread::spawn(move || agent.run());

        let mut stream = StdTcpStream::connect(("127.0.0.1", tcp_port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        // Not a SEQUENCE: the agent must close without answering.
        stream.write_all(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(n, 0, "expected EOF, got {} bytes", n);

        shutdown.request();
        worker.join().unwrap().unwrap();
    }
}
