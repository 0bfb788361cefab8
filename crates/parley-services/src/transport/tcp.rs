//! Stream transport — newline-framed frames over TCP.
//!
//! One reader task per accepted connection feeds the node; one writer task
//! per connection drains that connection's outbound queue, so a slow peer
//! never blocks the fan-out to the others.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Notify};

use super::udp::MAX_DATAGRAM;
use super::{PeerHandle, Transport, TransportError, TransportKind};
use crate::node::Node;

/// Longest accepted line, excluding the terminator. Same bound as a datagram.
pub const MAX_LINE: usize = MAX_DATAGRAM;

struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<Notify>,
}

/// Connection table for one TCP listener.
#[derive(Default)]
pub struct TcpTransport {
    connections: DashMap<u64, Connection>,
    next_id: AtomicU64,
}

impl TcpTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of open connections, registered or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Accept connections until shutdown, then drop every connection.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        node: Arc<Node>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "tcp relay listening");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("tcp relay shutting down");
                    self.close_all().await;
                    return Ok(());
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr, node.clone()),
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr, node: Arc<Node>) {
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = PeerHandle::Stream { conn_id, addr };
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(Notify::new());

        self.connections.insert(
            conn_id,
            Connection {
                outbound,
                closed: closed.clone(),
            },
        );
        tracing::info!(%peer, "client connected");

        tokio::spawn(write_loop(write_half, outbound_rx, peer));

        let this = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut buf = Vec::new();
            loop {
                tokio::select! {
                    _ = closed.notified() => break,
                    line = read_line(&mut reader, &mut buf) => match line {
                        Ok(Line::Frame(line)) => {
                            node.handle_inbound(peer, &line).await;
                        }
                        Ok(Line::NotUtf8) => {
                            tracing::warn!(%peer, "dropping non-UTF-8 line");
                        }
                        Ok(Line::TooLong) => {
                            tracing::warn!(%peer, max = MAX_LINE, "line too long, closing connection");
                            break;
                        }
                        Ok(Line::Eof) => break,
                        Err(e) => {
                            tracing::debug!(%peer, error = %e, "read failed");
                            break;
                        }
                    },
                }
            }

            this.connections.remove(&conn_id);
            tracing::info!(%peer, "client connection closed");
            node.handle_closed(peer).await;
        });
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Frame(String),
    NotUtf8,
    TooLong,
    Eof,
}

/// Read one `\n`-terminated line of at most `MAX_LINE` bytes. A final line
/// without a terminator still counts.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Line> {
    buf.clear();
    let limit = MAX_LINE as u64 + 1;
    let n = reader.take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(Line::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_LINE {
        return Ok(Line::TooLong);
    }
    match std::str::from_utf8(buf) {
        Ok(line) => Ok(Line::Frame(line.to_string())),
        Err(_) => Ok(Line::NotUtf8),
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<String>,
    peer: PeerHandle,
) {
    while let Some(frame) = outbound.recv().await {
        let mut line = frame.into_bytes();
        line.push(b'\n');
        if let Err(e) = writer.write_all(&line).await {
            tracing::debug!(%peer, error = %e, "write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    async fn send(&self, to: &PeerHandle, frame: &str) -> Result<(), TransportError> {
        let PeerHandle::Stream { conn_id, .. } = to else {
            return Err(TransportError::WrongTransport(*to));
        };
        let conn = self
            .connections
            .get(conn_id)
            .ok_or(TransportError::NotConnected(*to))?;
        conn.outbound
            .send(frame.to_string())
            .map_err(|_| TransportError::NotConnected(*to))
    }

    async fn close(&self, peer: &PeerHandle) {
        if let PeerHandle::Stream { conn_id, .. } = peer {
            // Dropping the sender ends the writer; the notify ends the reader.
            if let Some((_, conn)) = self.connections.remove(conn_id) {
                conn.closed.notify_one();
            }
        }
    }

    async fn close_all(&self) {
        let ids: Vec<u64> = self.connections.iter().map(|c| *c.key()).collect();
        for id in ids {
            if let Some((_, conn)) = self.connections.remove(&id) {
                conn.closed.notify_one();
            }
        }
    }
}
