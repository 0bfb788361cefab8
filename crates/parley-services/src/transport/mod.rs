//! Transport contract — how a node reaches one specific peer.
//!
//! The node never touches sockets. It holds a `PeerHandle` per user and asks
//! its `Transport` to deliver a frame to that handle. Adapters feed inbound
//! frames back through `Node::handle_inbound`.

pub mod tcp;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;

pub use tcp::TcpTransport;
pub use udp::UdpTransport;

/// Which family of transport a node runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Connection-oriented, newline-framed.
    Stream,
    /// Connectionless, one frame per datagram.
    Datagram,
}

impl TransportKind {
    pub fn name(self) -> &'static str {
        match self {
            TransportKind::Stream => "tcp",
            TransportKind::Datagram => "udp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reachability handle: enough to deliver a frame to one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerHandle {
    /// A live stream connection, identified by the adapter's connection id.
    Stream { conn_id: u64, addr: SocketAddr },
    /// A datagram peer's address and port.
    Datagram(SocketAddr),
}

impl PeerHandle {
    pub fn addr(&self) -> SocketAddr {
        match self {
            PeerHandle::Stream { addr, .. } => *addr,
            PeerHandle::Datagram(addr) => *addr,
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            PeerHandle::Stream { .. } => TransportKind::Stream,
            PeerHandle::Datagram(_) => TransportKind::Datagram,
        }
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerHandle::Stream { conn_id, addr } => write!(f, "tcp#{conn_id}@{addr}"),
            PeerHandle::Datagram(addr) => write!(f, "udp@{addr}"),
        }
    }
}

/// A failed send to one peer. Never affects delivery to other peers.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is not connected")]
    NotConnected(PeerHandle),
    #[error("handle {0} does not belong to this transport")]
    WrongTransport(PeerHandle),
    #[error("frame of {len} bytes exceeds the {max} byte datagram limit")]
    TooLarge { len: usize, max: usize },
    #[error("send to {peer} failed: {source}")]
    Io {
        peer: PeerHandle,
        #[source]
        source: std::io::Error,
    },
}

/// Outbound side of a transport adapter.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Deliver one encoded frame (no line terminator) to a single peer.
    async fn send(&self, to: &PeerHandle, frame: &str) -> Result<(), TransportError>;

    /// Drop one peer. A no-op for connectionless transports.
    async fn close(&self, peer: &PeerHandle);

    /// Drop every peer. Called on node shutdown.
    async fn close_all(&self);
}
