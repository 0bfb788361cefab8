//! Client connection to a relay, over TCP or UDP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;

use parley_core::Frame;

use crate::transfer::OutgoingTransfer;
use crate::transport::udp::MAX_DATAGRAM;

/// Gap between chunk datagrams, so a burst fits the relay's receive buffer.
const DATAGRAM_PACING: Duration = Duration::from_millis(2);

/// Outbound half of a relay connection.
pub enum RelayLink {
    Tcp {
        writer: Mutex<OwnedWriteHalf>,
    },
    Udp {
        socket: Arc<UdpSocket>,
        server: SocketAddr,
    },
}

/// Inbound half of a relay connection.
pub enum LinkReader {
    Tcp(Lines<BufReader<OwnedReadHalf>>),
    Udp {
        socket: Arc<UdpSocket>,
        server: SocketAddr,
        buf: Vec<u8>,
    },
}

impl RelayLink {
    pub async fn connect_tcp(server: &str) -> Result<(Self, LinkReader)> {
        let stream = TcpStream::connect(server)
            .await
            .with_context(|| format!("failed to connect to relay at {server}"))?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();

        tracing::debug!(%server, "tcp link established");
        Ok((
            RelayLink::Tcp {
                writer: Mutex::new(write_half),
            },
            LinkReader::Tcp(BufReader::new(read_half).lines()),
        ))
    }

    pub async fn connect_udp(server: &str) -> Result<(Self, LinkReader)> {
        let server = tokio::net::lookup_host(server)
            .await
            .with_context(|| format!("failed to resolve {server}"))?
            .next()
            .with_context(|| format!("{server} resolved to no addresses"))?;
        let local: SocketAddr = if server.is_ipv6() {
            "[::]:0".parse()?
        } else {
            "0.0.0.0:0".parse()?
        };
        let socket = Arc::new(
            UdpSocket::bind(local)
                .await
                .context("failed to bind local udp socket")?,
        );

        tracing::debug!(%server, local = %socket.local_addr()?, "udp link ready");
        Ok((
            RelayLink::Udp {
                socket: socket.clone(),
                server,
            },
            LinkReader::Udp {
                socket,
                server,
                buf: vec![0u8; MAX_DATAGRAM + 1],
            },
        ))
    }

    pub async fn send(&self, frame: &Frame) -> Result<()> {
        self.send_raw(&frame.encode()).await
    }

    pub async fn send_raw(&self, raw: &str) -> Result<()> {
        match self {
            RelayLink::Tcp { writer } => {
                let mut line = String::with_capacity(raw.len() + 1);
                line.push_str(raw);
                line.push('\n');
                writer
                    .lock()
                    .await
                    .write_all(line.as_bytes())
                    .await
                    .context("failed to write to relay")?;
            }
            RelayLink::Udp { socket, server } => {
                socket
                    .send_to(raw.as_bytes(), *server)
                    .await
                    .with_context(|| format!("failed to send datagram to {server}"))?;
            }
        }
        Ok(())
    }

    /// Send every chunk of a transfer in index order.
    pub async fn send_transfer(&self, transfer: &OutgoingTransfer) -> Result<()> {
        for chunk in &transfer.chunks {
            self.send_raw(&chunk.to_string()).await?;
            if self.is_datagram() {
                tokio::time::sleep(DATAGRAM_PACING).await;
            }
        }
        tracing::debug!(
            session = %transfer.session_id,
            kind = %transfer.kind,
            chunks = transfer.chunks.len(),
            "transfer sent"
        );
        Ok(())
    }

    pub fn is_datagram(&self) -> bool {
        matches!(self, RelayLink::Udp { .. })
    }
}

impl LinkReader {
    /// Next frame from the relay. `None` once a TCP relay closes the
    /// connection; a UDP reader never ends on its own.
    pub async fn next_frame(&mut self) -> Result<Option<String>> {
        match self {
            LinkReader::Tcp(lines) => lines.next_line().await.context("failed to read from relay"),
            LinkReader::Udp {
                socket,
                server,
                buf,
            } => loop {
                let (len, from) = socket
                    .recv_from(buf)
                    .await
                    .context("failed to receive datagram")?;
                if from != *server {
                    tracing::debug!(%from, "ignoring datagram from non-relay address");
                    continue;
                }
                return Ok(Some(String::from_utf8_lossy(&buf[..len]).into_owned()));
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_link_frames_are_newline_terminated() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (link, _reader) = RelayLink::connect_tcp(&addr.to_string()).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(server_side).lines();

        link.send(&Frame::Connect {
            username: "alice".into(),
        })
        .await
        .unwrap();
        link.send_raw("FROM:alice|MSG:hi").await.unwrap();

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("CONNECT:alice"));
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("FROM:alice|MSG:hi")
        );
        assert!(!link.is_datagram());
    }

    #[tokio::test]
    async fn udp_reader_only_accepts_the_relay() {
        let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay_addr = relay.local_addr().unwrap();

        let (link, mut reader) = RelayLink::connect_udp(&relay_addr.to_string()).await.unwrap();
        link.send_raw("HEARTBEAT:alice").await.unwrap();

        let mut buf = [0u8; 128];
        let (len, client_addr) = relay.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"HEARTBEAT:alice");

        stranger.send_to(b"NOTICE:spoofed", client_addr).await.unwrap();
        relay.send_to(b"NOTICE:real", client_addr).await.unwrap();

        assert_eq!(reader.next_frame().await.unwrap().as_deref(), Some("NOTICE:real"));
    }
}
