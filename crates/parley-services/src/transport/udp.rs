//! Datagram transport — one frame per UDP datagram.
//!
//! A single receive loop serves every peer; the node demultiplexes by the
//! sender named inside each frame, not by socket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use super::{PeerHandle, Transport, TransportError, TransportKind};
use crate::node::Node;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the relay socket. Must be called inside a tokio runtime.
    pub fn bind(addr: SocketAddr) -> Result<Arc<Self>> {
        let socket = make_socket(addr).context("failed to create udp relay socket")?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;
        Ok(Arc::new(Self {
            socket: Arc::new(socket),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive datagrams until shutdown.
    pub async fn serve(
        self: Arc<Self>,
        node: Arc<Node>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM + 1];
        tracing::info!(addr = %self.local_addr()?, "udp relay listening");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("udp relay shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, addr) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            // ICMP port-unreachable from a vanished peer surfaces here.
                            tracing::debug!(error = %e, "recv_from failed");
                            continue;
                        }
                    };

                    let raw = match std::str::from_utf8(&buf[..len]) {
                        Ok(raw) => raw,
                        Err(_) => {
                            tracing::warn!(%addr, len, "dropping non-UTF-8 datagram");
                            continue;
                        }
                    };

                    node.handle_inbound(PeerHandle::Datagram(addr), raw).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }

    async fn send(&self, to: &PeerHandle, frame: &str) -> Result<(), TransportError> {
        let PeerHandle::Datagram(addr) = to else {
            return Err(TransportError::WrongTransport(*to));
        };
        if frame.len() > MAX_DATAGRAM {
            return Err(TransportError::TooLarge {
                len: frame.len(),
                max: MAX_DATAGRAM,
            });
        }
        self.socket
            .send_to(frame.as_bytes(), *addr)
            .await
            .map(|_| ())
            .map_err(|source| TransportError::Io { peer: *to, source })
    }

    async fn close(&self, _peer: &PeerHandle) {}

    async fn close_all(&self) {}
}

fn make_socket(addr: SocketAddr) -> Result<std::net::UdpSocket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket.bind(&addr.into()).context("bind()")?;

    Ok(socket.into())
}
