// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 svcbus contributors

//! Frame-forwarding core of the routing service.
//!
//! One thread blocks on the server connection's wait primitive. New clients
//! are accepted and assigned cookies; frames read from a client are
//! forwarded to the client whose cookie matches the frame's target. Frames
//! addressed to the router itself answer with the sender's assigned cookie,
//! which is how a freshly connected process learns its own address. Clients
//! whose sockets fail are evicted.

use crate::config::RouterConfig;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use svcbus::ipc::{
    ConnectionError, ConnectionHandle, MessageFrame, ServerConnection, COOKIE_ROUTER,
    MAX_LISTEN_QUEUE,
};
use tracing::{debug, info, warn};

/// Routing service errors.
#[derive(Debug)]
pub enum RouterError {
    /// Could not create or bind the listening socket.
    Bind(SocketAddr),
    /// Could not place the socket in listening state.
    Listen(SocketAddr),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(addr) => write!(f, "cannot bind routing socket to {}", addr),
            Self::Listen(addr) => write!(f, "cannot listen on {}", addr),
        }
    }
}

impl std::error::Error for RouterError {}

/// The routing service.
pub struct Router {
    server: Arc<ServerConnection>,
}

impl Router {
    /// Bind and listen according to `config`.
    pub fn new(config: &RouterConfig) -> Result<Self, RouterError> {
        let address = SocketAddr::new(config.bind_address, config.port);
        let server = Arc::new(ServerConnection::with_capacity(config.max_clients));
        server.set_address(address);
        if !server.create_socket_bound() {
            return Err(RouterError::Bind(address));
        }
        if !server.server_listen(MAX_LISTEN_QUEUE) {
            return Err(RouterError::Listen(address));
        }
        Ok(Self { server })
    }

    /// The actual listening address (relevant when binding to port 0).
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.server.local_address()
    }

    /// Accept-and-forward loop; returns after [`Self::stop`].
    pub fn run(&self) {
        info!(
            address = %self
                .local_address()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "<unknown>".to_string()),
            "routing service started"
        );
        loop {
            let mut new_peer = None;
            let handle = self.server.wait_for_connection_event(&mut new_peer);
            if !handle.is_valid() {
                break;
            }
            if let Some(peer) = new_peer {
                self.server.accept_connection(handle);
                info!(
                    peer = %peer,
                    cookie = self.server.get_cookie(handle),
                    "client connected"
                );
                continue;
            }
            match self.server.receive_frames(handle) {
                Ok(frames) => {
                    for frame in frames {
                        self.route(handle, frame);
                    }
                }
                Err(ConnectionError::Closed) => {
                    info!(cookie = self.server.get_cookie(handle), "client disconnected");
                    self.server.close_connection(handle);
                }
                Err(e) => {
                    warn!(
                        cookie = self.server.get_cookie(handle),
                        error = %e,
                        "client failed, evicting"
                    );
                    self.server.close_connection(handle);
                }
            }
        }
        info!("routing service stopped");
    }

    /// Close the listening socket and every client; unblocks [`Self::run`].
    pub fn stop(&self) {
        self.server.close_socket();
    }

    fn route(&self, from: ConnectionHandle, frame: MessageFrame) {
        let source_cookie = self.server.get_cookie(from);

        // Frames addressed to the router itself: answer with the sender's
        // assigned cookie so the peer learns its own address.
        if frame.target_cookie == COOKIE_ROUTER {
            let reply = MessageFrame::new(
                source_cookie,
                COOKIE_ROUTER,
                frame.class_magic,
                source_cookie.to_be_bytes().to_vec(),
            );
            if let Err(e) = self.server.send_frame(from, &reply) {
                warn!(cookie = source_cookie, error = %e, "cookie reply failed, evicting");
                self.server.close_connection(from);
            }
            return;
        }

        let target = self.server.get_client_by_cookie(frame.target_cookie);
        if !target.is_valid() {
            debug!(
                target = frame.target_cookie,
                source = source_cookie,
                "dropping frame for unknown target"
            );
            return;
        }

        // The router stamps the authoritative source cookie; peers cannot
        // impersonate each other.
        let mut routed = frame;
        routed.source_cookie = source_cookie;
        if let Err(e) = self.server.send_frame(target, &routed) {
            warn!(
                cookie = routed.target_cookie,
                error = %e,
                "forward failed, evicting target"
            );
            self.server.close_connection(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{IpAddr, TcpStream};
    use std::time::Duration;
    use svcbus::ipc::{ItemId, DEFAULT_MAX_FRAME_SIZE};

    fn test_router() -> (Arc<Router>, SocketAddr, std::thread::JoinHandle<()>) {
        let config = RouterConfig {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            max_clients: 8,
        };
        let router = Arc::new(Router::new(&config).unwrap());
        let address = router.local_address().unwrap();
        let runner = Arc::clone(&router);
        let worker = std::thread::spawn(move || runner.run());
        (router, address, worker)
    }

    /// Connect and learn the assigned cookie through the router handshake.
    fn join_router(address: SocketAddr) -> (TcpStream, ItemId) {
        let mut stream = TcpStream::connect(address).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let hello = MessageFrame::new(COOKIE_ROUTER, 0, 0, Vec::new());
        stream.write_all(&hello.encode()).unwrap();
        let reply = MessageFrame::read_from(&mut stream, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(reply.source_cookie, COOKIE_ROUTER);
        let cookie = ItemId::from_be_bytes(reply.payload.as_slice().try_into().unwrap());
        assert_eq!(reply.target_cookie, cookie);
        (stream, cookie)
    }

    #[test]
    fn clients_learn_their_cookies() {
        let (router, address, worker) = test_router();

        let (_a, cookie_a) = join_router(address);
        let (_b, cookie_b) = join_router(address);
        assert_ne!(cookie_a, cookie_b);
        assert!(cookie_a > COOKIE_ROUTER);
        assert!(cookie_b > COOKIE_ROUTER);

        router.stop();
        worker.join().unwrap();
    }

    #[test]
    fn frames_are_forwarded_by_target_cookie() {
        let (router, address, worker) = test_router();

        let (mut a, cookie_a) = join_router(address);
        let (mut b, cookie_b) = join_router(address);

        let frame = MessageFrame::new(cookie_b, cookie_a, 0xabcd, b"hello b".to_vec());
        a.write_all(&frame.encode()).unwrap();

        let delivered = MessageFrame::read_from(&mut b, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(delivered.target_cookie, cookie_b);
        assert_eq!(delivered.source_cookie, cookie_a);
        assert_eq!(delivered.class_magic, 0xabcd);
        assert_eq!(delivered.payload, b"hello b");

        router.stop();
        worker.join().unwrap();
    }

    #[test]
    fn source_cookie_is_stamped_by_the_router() {
        let (router, address, worker) = test_router();

        let (mut a, cookie_a) = join_router(address);
        let (mut b, cookie_b) = join_router(address);

        // The sender lies about its source; the router overwrites it.
        let forged = MessageFrame::new(cookie_b, 0xdead, 1, Vec::new());
        a.write_all(&forged.encode()).unwrap();

        let delivered = MessageFrame::read_from(&mut b, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(delivered.source_cookie, cookie_a);

        router.stop();
        worker.join().unwrap();
    }

    #[test]
    fn frames_for_unknown_targets_are_dropped() {
        let (router, address, worker) = test_router();

        let (mut a, cookie_a) = join_router(address);
        let stray = MessageFrame::new(0xffff, cookie_a, 1, Vec::new());
        a.write_all(&stray.encode()).unwrap();

        // The router keeps running and still answers the sender.
        let hello = MessageFrame::new(COOKIE_ROUTER, 0, 0, Vec::new());
        a.write_all(&hello.encode()).unwrap();
        let reply = MessageFrame::read_from(&mut a, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(reply.source_cookie, COOKIE_ROUTER);

        router.stop();
        worker.join().unwrap();
    }

    #[test]
    fn disconnected_clients_are_evicted() {
        let (router, address, worker) = test_router();

        let (a, cookie_a) = join_router(address);
        drop(a);

        // Give the router a moment to observe the closure, then confirm a
        // frame to the gone cookie is simply dropped.
        std::thread::sleep(Duration::from_millis(100));
        let (mut b, _cookie_b) = join_router(address);
        let frame = MessageFrame::new(cookie_a, 0, 1, Vec::new());
        b.write_all(&frame.encode()).unwrap();

        let hello = MessageFrame::new(COOKIE_ROUTER, 0, 0, Vec::new());
        b.write_all(&hello.encode()).unwrap();
        let reply = MessageFrame::read_from(&mut b, DEFAULT_MAX_FRAME_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(reply.source_cookie, COOKIE_ROUTER);

        router.stop();
        worker.join().unwrap();
    }
}
