// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Server connection multiplexer.
//!
//! Owns a listening TCP socket and every accepted client. Each accepted
//! client gets a unique, never-reused cookie; the multiplexer maintains
//! mutually-inverse `cookie -> handle` and `handle -> cookie` maps plus the
//! master list of watched sockets. One dedicated thread blocks in
//! [`ServerConnection::wait_for_connection_event`]; all state lives behind a
//! single internal lock that is released across the blocking poll.
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                     ServerConnection                          |
//! |  +--------------------------------------------------------+  |
//! |  |                     mio::Poll                           |  |
//! |  |  - TCP listener   (accept new clients)                 |  |
//! |  |  - client streams (read / closure detection)           |  |
//! |  |  - waker          (close_socket wake-up)               |  |
//! |  +--------------------------------------------------------+  |
//! |        cookie<->handle maps | master list | cookie counter   |
//! +--------------------------------------------------------------+
//! ```

use super::frame::{FrameBuffer, FrameError, MessageFrame, DEFAULT_MAX_FRAME_SIZE};
use super::ItemId;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};

/// Cookie of a connection the router has not identified yet.
pub const COOKIE_UNKNOWN: ItemId = 0;

/// Cookie reserved for the local (in-process) connection.
pub const COOKIE_LOCAL: ItemId = 1;

/// Cookie reserved for the routing service itself.
pub const COOKIE_ROUTER: ItemId = 2;

/// Soft bound of concurrently watched client sockets.
pub const MASTER_LIST_SIZE: usize = 64;

/// Default listen backlog.
pub const MAX_LISTEN_QUEUE: i32 = 128;

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const CONNECTION_TOKEN_START: usize = 2;
const MAX_EVENTS: usize = 128;
const READ_CHUNK: usize = 4096;
const SEND_STALL_LIMIT: u32 = 10_000;

/// Opaque handle of one accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(usize);

impl ConnectionHandle {
    /// Returned when the wait fails or the multiplexer is closed.
    pub const INVALID: ConnectionHandle = ConnectionHandle(usize::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "conn#{}", self.0)
        } else {
            f.write_str("conn#invalid")
        }
    }
}

/// Connection-layer errors.
#[derive(Debug)]
pub enum ConnectionError {
    /// No client with this handle (already evicted or never accepted).
    UnknownClient(ConnectionHandle),

    /// The peer closed its side of the connection.
    Closed,

    /// Malformed or oversized frame from the peer.
    Frame(FrameError),

    /// Socket failure; the client should be evicted.
    Io(io::Error),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownClient(handle) => write!(f, "unknown client {}", handle),
            Self::Closed => f.write_str("connection closed by peer"),
            Self::Frame(e) => write!(f, "frame error: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Frame(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FrameError> for ConnectionError {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

struct AcceptedClient {
    stream: TcpStream,
    peer: SocketAddr,
    cookie: ItemId,
    accepted: bool,
    rx: FrameBuffer,
}

enum Ready {
    /// A freshly accepted client; the peer address goes to the caller.
    Accepted(usize),
    /// An already-known client became readable (data or closure).
    Client(usize),
}

struct MuxState {
    clients: HashMap<usize, AcceptedClient>,
    cookie_to_handle: HashMap<ItemId, usize>,
    handle_to_cookie: HashMap<usize, ItemId>,
    master_list: Vec<usize>,
    /// Never reused within the lifetime of the multiplexer.
    cookie_generator: ItemId,
    next_token: usize,
    pending: VecDeque<Ready>,
    closed: bool,
}

impl MuxState {
    fn new() -> Self {
        Self {
            clients: HashMap::new(),
            cookie_to_handle: HashMap::new(),
            handle_to_cookie: HashMap::new(),
            master_list: Vec::new(),
            cookie_generator: COOKIE_ROUTER,
            next_token: CONNECTION_TOKEN_START,
            pending: VecDeque::new(),
            closed: true,
        }
    }
}

struct Poller {
    poll: Poll,
    events: Events,
}

/// TCP accept loop with cookie-addressed clients.
pub struct ServerConnection {
    address: Mutex<Option<SocketAddr>>,
    /// Bound but not yet listening socket, between `create_socket` and
    /// `server_listen`.
    bound: Mutex<Option<Socket>>,
    listener: Mutex<Option<TcpListener>>,
    poller: Mutex<Option<Poller>>,
    registry: Mutex<Option<Registry>>,
    waker: Mutex<Option<Waker>>,
    state: Mutex<MuxState>,
    max_clients: usize,
    max_frame_size: usize,
}

impl ServerConnection {
    /// A multiplexer with no address; call `create_socket(host, port)`.
    pub fn new() -> Self {
        Self::with_capacity(MASTER_LIST_SIZE)
    }

    /// A multiplexer with a custom master-list bound.
    pub fn with_capacity(max_clients: usize) -> Self {
        Self {
            address: Mutex::new(None),
            bound: Mutex::new(None),
            listener: Mutex::new(None),
            poller: Mutex::new(None),
            registry: Mutex::new(None),
            waker: Mutex::new(None),
            state: Mutex::new(MuxState::new()),
            max_clients,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the address used by [`Self::create_socket_bound`].
    pub fn set_address(&self, address: SocketAddr) {
        *self.address.lock() = Some(address);
    }

    /// The bound address; after `server_listen` this reflects the actual
    /// listening socket (relevant when binding to port 0).
    pub fn local_address(&self) -> Option<SocketAddr> {
        *self.address.lock()
    }

    /// Create and bind the listening socket. Returns `true` on success.
    pub fn create_socket(&self, host: &str, port: u16) -> bool {
        let resolved = match (host, port).to_socket_addrs() {
            Ok(mut addrs) => addrs.next(),
            Err(e) => {
                log::error!("server connection: cannot resolve {}:{}: {}", host, port, e);
                return false;
            }
        };
        let address = match resolved {
            Some(addr) => addr,
            None => {
                log::error!("server connection: {}:{} resolved to nothing", host, port);
                return false;
            }
        };
        *self.address.lock() = Some(address);
        self.create_socket_bound()
    }

    /// Create and bind the listening socket to the previously set address.
    pub fn create_socket_bound(&self) -> bool {
        let address = match *self.address.lock() {
            Some(addr) => addr,
            None => {
                log::error!("server connection: no address to bind");
                return false;
            }
        };
        let domain = Domain::for_address(address);
        let socket = match Socket::new(domain, Type::STREAM, Some(Protocol::TCP)) {
            Ok(s) => s,
            Err(e) => {
                log::error!("server connection: socket creation failed: {}", e);
                return false;
            }
        };
        if let Err(e) = socket.set_reuse_address(true) {
            log::warn!("server connection: SO_REUSEADDR failed: {}", e);
        }
        if let Err(e) = socket.bind(&address.into()) {
            log::error!("server connection: bind to {} failed: {}", address, e);
            return false;
        }
        *self.bound.lock() = Some(socket);
        log::debug!("server connection: bound to {}", address);
        true
    }

    /// Place the bound socket in listening state and arm the poller.
    pub fn server_listen(&self, backlog: i32) -> bool {
        let socket = match self.bound.lock().take() {
            Some(s) => s,
            None => {
                log::error!("server connection: server_listen without a bound socket");
                return false;
            }
        };
        if let Err(e) = socket.listen(backlog) {
            log::error!("server connection: listen failed: {}", e);
            return false;
        }
        if let Err(e) = socket.set_nonblocking(true) {
            log::error!("server connection: set_nonblocking failed: {}", e);
            return false;
        }
        let mut listener = TcpListener::from_std(socket.into());

        let poll = match Poll::new() {
            Ok(p) => p,
            Err(e) => {
                log::error!("server connection: poll creation failed: {}", e);
                return false;
            }
        };
        let registry = match poll.registry().try_clone() {
            Ok(r) => r,
            Err(e) => {
                log::error!("server connection: registry clone failed: {}", e);
                return false;
            }
        };
        let waker = match Waker::new(poll.registry(), WAKER_TOKEN) {
            Ok(w) => w,
            Err(e) => {
                log::error!("server connection: waker creation failed: {}", e);
                return false;
            }
        };
        if let Err(e) = registry.register(&mut listener, LISTENER_TOKEN, Interest::READABLE) {
            log::error!("server connection: listener registration failed: {}", e);
            return false;
        }
        if let Ok(actual) = listener.local_addr() {
            *self.address.lock() = Some(actual);
        }

        *self.listener.lock() = Some(listener);
        *self.poller.lock() = Some(Poller {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
        });
        *self.registry.lock() = Some(registry);
        *self.waker.lock() = Some(waker);

        let mut state = self.state.lock();
        state.closed = false;
        log::info!(
            "server connection: listening on {}",
            self.local_address()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "<unknown>".to_string())
        );
        true
    }

    /// True while a listening socket exists.
    pub fn is_valid(&self) -> bool {
        self.listener.lock().is_some() || self.bound.lock().is_some()
    }

    // ========================================================================
    // Blocking wait
    // ========================================================================

    /// Block until any watched socket signals.
    ///
    /// Exactly one handle is returned per call. When the listener signaled,
    /// the new client is registered, assigned the next cookie, and its peer
    /// address stored in `out_new_peer`; otherwise `out_new_peer` stays
    /// untouched and the returned handle's owner must read from it or
    /// detect the closure. Returns [`ConnectionHandle::INVALID`] after
    /// [`Self::close_socket`] or on a poll failure.
    pub fn wait_for_connection_event(
        &self,
        out_new_peer: &mut Option<SocketAddr>,
    ) -> ConnectionHandle {
        loop {
            // Serve queued readiness first: one handle per call.
            {
                let mut state = self.state.lock();
                if state.closed {
                    return ConnectionHandle::INVALID;
                }
                while let Some(ready) = state.pending.pop_front() {
                    match ready {
                        Ready::Accepted(token) => {
                            if let Some(client) = state.clients.get(&token) {
                                *out_new_peer = Some(client.peer);
                                return ConnectionHandle(token);
                            }
                        }
                        Ready::Client(token) => {
                            if state.clients.contains_key(&token) {
                                return ConnectionHandle(token);
                            }
                        }
                    }
                }
            }

            // Block without holding the state lock.
            let mut poller_guard = self.poller.lock();
            let poller = match poller_guard.as_mut() {
                Some(p) => p,
                None => return ConnectionHandle::INVALID,
            };
            if let Err(e) = poller.poll.poll(&mut poller.events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("server connection: poll failed: {}", e);
                return ConnectionHandle::INVALID;
            }
            let tokens: Vec<Token> = poller.events.iter().map(|ev| ev.token()).collect();
            drop(poller_guard);

            let mut state = self.state.lock();
            for token in tokens {
                match token {
                    WAKER_TOKEN => {
                        if state.closed {
                            return ConnectionHandle::INVALID;
                        }
                    }
                    LISTENER_TOKEN => self.accept_pending(&mut state),
                    Token(value) => {
                        if state.clients.contains_key(&value) {
                            state.pending.push_back(Ready::Client(value));
                        }
                    }
                }
            }
        }
    }

    /// Accept every queued connection; called with the state lock held.
    fn accept_pending(&self, state: &mut MuxState) {
        let listener_guard = self.listener.lock();
        let listener = match listener_guard.as_ref() {
            Some(l) => l,
            None => return,
        };
        loop {
            let (mut stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("server connection: accept failed: {}", e);
                    return;
                }
            };
            if state.master_list.len() >= self.max_clients {
                // Queue full: the accept is refused and the socket closed.
                log::warn!(
                    "server connection: master list full ({}), refusing {}",
                    self.max_clients,
                    peer
                );
                drop(stream);
                continue;
            }
            let registry_guard = self.registry.lock();
            let registry = match registry_guard.as_ref() {
                Some(r) => r,
                None => return,
            };
            let token = state.next_token;
            if let Err(e) = registry.register(&mut stream, Token(token), Interest::READABLE) {
                log::error!("server connection: client registration failed: {}", e);
                continue;
            }
            drop(registry_guard);
            state.next_token += 1;

            state.cookie_generator += 1;
            let cookie = state.cookie_generator;

            state.clients.insert(
                token,
                AcceptedClient {
                    stream,
                    peer,
                    cookie,
                    accepted: false,
                    rx: FrameBuffer::new(self.max_frame_size),
                },
            );
            state.cookie_to_handle.insert(cookie, token);
            state.handle_to_cookie.insert(token, cookie);
            state.master_list.push(token);
            state.pending.push_back(Ready::Accepted(token));
            log::debug!(
                "server connection: accepted {} as cookie {} ({})",
                peer,
                cookie,
                ConnectionHandle(token)
            );
        }
    }

    // ========================================================================
    // Client state
    // ========================================================================

    /// Idempotent transition of a client into the accepted state.
    pub fn accept_connection(&self, client: ConnectionHandle) -> bool {
        let mut state = self.state.lock();
        match state.clients.get_mut(&client.0) {
            Some(entry) => {
                entry.accepted = true;
                true
            }
            None => false,
        }
    }

    /// Whether the client exists and was accepted.
    pub fn is_connection_accepted(&self, client: ConnectionHandle) -> bool {
        self.state
            .lock()
            .clients
            .get(&client.0)
            .is_some_and(|c| c.accepted)
    }

    /// The client's cookie, or [`COOKIE_UNKNOWN`].
    pub fn get_cookie(&self, client: ConnectionHandle) -> ItemId {
        self.state
            .lock()
            .handle_to_cookie
            .get(&client.0)
            .copied()
            .unwrap_or(COOKIE_UNKNOWN)
    }

    /// The handle owning `cookie`, or [`ConnectionHandle::INVALID`].
    pub fn get_client_by_cookie(&self, cookie: ItemId) -> ConnectionHandle {
        self.state
            .lock()
            .cookie_to_handle
            .get(&cookie)
            .map(|&token| ConnectionHandle(token))
            .unwrap_or(ConnectionHandle::INVALID)
    }

    /// The peer address of an accepted client.
    pub fn peer_address(&self, client: ConnectionHandle) -> Option<SocketAddr> {
        self.state.lock().clients.get(&client.0).map(|c| c.peer)
    }

    /// Number of live accepted clients.
    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Close one client connection; a second call with the same handle or
    /// cookie is a no-op.
    pub fn close_connection(&self, client: ConnectionHandle) {
        let mut state = self.state.lock();
        self.evict(&mut state, client.0);
    }

    /// Close one client connection by its cookie.
    pub fn close_connection_by_cookie(&self, cookie: ItemId) {
        let mut state = self.state.lock();
        if let Some(&token) = state.cookie_to_handle.get(&cookie) {
            self.evict(&mut state, token);
        }
    }

    fn evict(&self, state: &mut MuxState, token: usize) {
        let mut client = match state.clients.remove(&token) {
            Some(c) => c,
            None => return,
        };
        if let Some(cookie) = state.handle_to_cookie.remove(&token) {
            state.cookie_to_handle.remove(&cookie);
        }
        state.master_list.retain(|&t| t != token);
        if let Some(registry) = self.registry.lock().as_ref() {
            let _ = registry.deregister(&mut client.stream);
        }
        let _ = client.stream.shutdown(Shutdown::Both);
        log::debug!(
            "server connection: closed cookie {} ({})",
            client.cookie,
            ConnectionHandle(token)
        );
    }

    /// Close the listener and every accepted client, and release any thread
    /// blocked in [`Self::wait_for_connection_event`].
    pub fn close_socket(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.clear();
            let tokens: Vec<usize> = state.clients.keys().copied().collect();
            for token in tokens {
                self.evict(&mut state, token);
            }
        }
        if let Some(mut listener) = self.listener.lock().take() {
            if let Some(registry) = self.registry.lock().as_ref() {
                let _ = registry.deregister(&mut listener);
            }
        }
        *self.bound.lock() = None;
        if let Some(waker) = self.waker.lock().as_ref() {
            let _ = waker.wake();
        }
        log::info!("server connection: closed");
    }

    /// Half-close: stop sending to this client.
    pub fn disable_send(&self, client: ConnectionHandle) -> bool {
        let state = self.state.lock();
        state
            .clients
            .get(&client.0)
            .is_some_and(|c| c.stream.shutdown(Shutdown::Write).is_ok())
    }

    /// Half-close: stop receiving from this client.
    pub fn disable_receive(&self, client: ConnectionHandle) -> bool {
        let state = self.state.lock();
        state
            .clients
            .get(&client.0)
            .is_some_and(|c| c.stream.shutdown(Shutdown::Read).is_ok())
    }

    // ========================================================================
    // Frame I/O
    // ========================================================================

    /// Write one frame to a client. On error the caller evicts the client
    /// via [`Self::close_connection`].
    pub fn send_frame(
        &self,
        client: ConnectionHandle,
        frame: &MessageFrame,
    ) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        let entry = state
            .clients
            .get_mut(&client.0)
            .ok_or(ConnectionError::UnknownClient(client))?;
        let bytes = frame.encode();
        let mut written = 0;
        let mut stalls = 0;
        while written < bytes.len() {
            match entry.stream.write(&bytes[written..]) {
                Ok(0) => return Err(ConnectionError::Closed),
                Ok(n) => {
                    written += n;
                    stalls = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    // A peer that never drains its socket must not stall the
                    // whole multiplexer; give up and let the caller evict it.
                    stalls += 1;
                    if stalls > SEND_STALL_LIMIT {
                        return Err(ConnectionError::Io(io::Error::new(
                            io::ErrorKind::WouldBlock,
                            "send buffer stayed full",
                        )));
                    }
                    std::thread::yield_now();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ConnectionError::Io(e)),
            }
        }
        Ok(())
    }

    /// Drain everything currently readable from a client and return the
    /// complete frames. [`ConnectionError::Closed`] reports that the peer
    /// closed the connection and no further frames remain.
    pub fn receive_frames(
        &self,
        client: ConnectionHandle,
    ) -> Result<Vec<MessageFrame>, ConnectionError> {
        let mut state = self.state.lock();
        let entry = state
            .clients
            .get_mut(&client.0)
            .ok_or(ConnectionError::UnknownClient(client))?;

        let mut chunk = [0u8; READ_CHUNK];
        let mut closed = false;
        loop {
            match entry.stream.read(&mut chunk) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => entry.rx.extend(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ConnectionError::Io(e)),
            }
        }

        let mut frames = Vec::new();
        while let Some(frame) = entry.rx.next_frame()? {
            frames.push(frame);
        }
        if frames.is_empty() && closed {
            return Err(ConnectionError::Closed);
        }
        Ok(frames)
    }
}

impl Default for ServerConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.close_socket();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{channel, Receiver};
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Duration;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    /// Listening multiplexer on an ephemeral loopback port plus a waiter
    /// thread reporting every returned handle.
    fn listening(
        max_clients: usize,
    ) -> (
        Arc<ServerConnection>,
        SocketAddr,
        Receiver<(ConnectionHandle, Option<SocketAddr>)>,
        JoinHandle<()>,
    ) {
        let server = Arc::new(ServerConnection::with_capacity(max_clients));
        assert!(server.create_socket("127.0.0.1", 0));
        assert!(server.server_listen(MAX_LISTEN_QUEUE));
        let address = server.local_address().unwrap();

        let (tx, rx) = channel();
        let waiter_server = Arc::clone(&server);
        let waiter = std::thread::spawn(move || loop {
            let mut peer = None;
            let handle = waiter_server.wait_for_connection_event(&mut peer);
            if !handle.is_valid() {
                break;
            }
            if tx.send((handle, peer)).is_err() {
                break;
            }
        });
        (server, address, rx, waiter)
    }

    fn connect(address: SocketAddr) -> std::net::TcpStream {
        let stream = std::net::TcpStream::connect(address).unwrap();
        stream.set_read_timeout(Some(RECV_TIMEOUT)).unwrap();
        stream
    }

    #[test]
    fn cookies_count_up_from_the_reserved_range() {
        let (server, address, events, waiter) = listening(MASTER_LIST_SIZE);

        let mut clients = Vec::new();
        let mut handles = Vec::new();
        for _ in 0..3 {
            clients.push(connect(address));
            let (handle, peer) = events.recv_timeout(RECV_TIMEOUT).unwrap();
            assert!(peer.is_some());
            handles.push(handle);
        }

        let cookies: Vec<ItemId> = handles.iter().map(|&h| server.get_cookie(h)).collect();
        assert_eq!(cookies, vec![COOKIE_ROUTER + 1, COOKIE_ROUTER + 2, COOKIE_ROUTER + 3]);

        // Both maps resolve each other.
        for (&handle, &cookie) in handles.iter().zip(cookies.iter()) {
            assert_eq!(server.get_client_by_cookie(cookie), handle);
        }

        // Closing the middle client removes it from both maps; the other
        // two stay reachable by their original cookies.
        server.close_connection(handles[1]);
        assert!(!server.get_client_by_cookie(cookies[1]).is_valid());
        assert_eq!(server.get_cookie(handles[1]), COOKIE_UNKNOWN);
        assert_eq!(server.get_client_by_cookie(cookies[0]), handles[0]);
        assert_eq!(server.get_client_by_cookie(cookies[2]), handles[2]);
        assert_eq!(server.client_count(), 2);

        // A second close with the same handle is a no-op.
        server.close_connection(handles[1]);
        server.close_connection_by_cookie(cookies[1]);
        assert_eq!(server.client_count(), 2);

        server.close_socket();
        waiter.join().unwrap();
    }

    #[test]
    fn frames_flow_from_an_accepted_client() {
        let (server, address, events, waiter) = listening(MASTER_LIST_SIZE);

        let mut client = connect(address);
        let (handle, peer) = events.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(peer.unwrap(), client.local_addr().unwrap());

        assert!(server.accept_connection(handle));
        assert!(server.is_connection_accepted(handle));

        let frame = MessageFrame::new(COOKIE_ROUTER, server.get_cookie(handle), 0xfeed, b"hi".to_vec());
        client.write_all(&frame.encode()).unwrap();
        client.flush().unwrap();

        // The client socket signals; the caller reads from the handle.
        let (readable, peer) = events.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(readable, handle);
        assert!(peer.is_none());

        let frames = server.receive_frames(handle).unwrap();
        assert_eq!(frames, vec![frame]);

        server.close_socket();
        waiter.join().unwrap();
    }

    #[test]
    fn server_can_answer_through_send_frame() {
        let (server, address, events, waiter) = listening(MASTER_LIST_SIZE);

        let mut client = connect(address);
        let (handle, _) = events.recv_timeout(RECV_TIMEOUT).unwrap();

        let cookie = server.get_cookie(handle);
        let reply = MessageFrame::new(cookie, COOKIE_ROUTER, 0xbeef, cookie.to_be_bytes().to_vec());
        server.send_frame(handle, &reply).unwrap();

        let received = MessageFrame::read_from(&mut client, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(received, reply);

        // Unknown handles are rejected without touching any socket.
        assert!(matches!(
            server.send_frame(ConnectionHandle::INVALID, &reply),
            Err(ConnectionError::UnknownClient(_))
        ));

        server.close_socket();
        waiter.join().unwrap();
    }

    #[test]
    fn peer_closure_surfaces_through_receive() {
        let (server, address, events, waiter) = listening(MASTER_LIST_SIZE);

        let client = connect(address);
        let (handle, _) = events.recv_timeout(RECV_TIMEOUT).unwrap();
        drop(client);

        let (readable, _) = events.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(readable, handle);
        assert!(matches!(
            server.receive_frames(handle),
            Err(ConnectionError::Closed)
        ));

        server.close_connection(handle);
        assert_eq!(server.client_count(), 0);
        assert!(matches!(
            server.receive_frames(handle),
            Err(ConnectionError::UnknownClient(_))
        ));

        server.close_socket();
        waiter.join().unwrap();
    }

    #[test]
    fn full_master_list_refuses_further_accepts() {
        let (server, address, events, waiter) = listening(1);

        let _kept = connect(address);
        let (first, _) = events.recv_timeout(RECV_TIMEOUT).unwrap();
        assert!(first.is_valid());

        // The second accept is refused and its socket closed immediately,
        // which the refused client observes as EOF.
        let mut refused = connect(address);
        let mut buf = [0u8; 1];
        assert_eq!(refused.read(&mut buf).unwrap(), 0);
        assert_eq!(server.client_count(), 1);

        server.close_socket();
        waiter.join().unwrap();
    }

    #[test]
    fn close_socket_releases_the_waiting_thread() {
        let (server, _address, _events, waiter) = listening(MASTER_LIST_SIZE);
        std::thread::sleep(Duration::from_millis(50));
        server.close_socket();
        waiter.join().unwrap();
        assert_eq!(server.client_count(), 0);
    }

    #[test]
    fn disable_send_half_closes_the_stream() {
        let (server, address, events, waiter) = listening(MASTER_LIST_SIZE);

        let mut client = connect(address);
        let (handle, _) = events.recv_timeout(RECV_TIMEOUT).unwrap();

        assert!(server.disable_send(handle));
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);

        assert!(!server.disable_send(ConnectionHandle::INVALID));

        server.close_socket();
        waiter.join().unwrap();
    }
}
