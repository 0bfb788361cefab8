//! Parley integration test harness.
//!
//! Every test starts its own relay on 127.0.0.1 with an OS-assigned port and
//! talks to it through `RelayLink`, the same connector the chat client uses.
//! No external processes or privileges are needed:
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use parley_core::config::LivenessConfig;
use parley_core::Frame;
use parley_services::liveness::liveness_loop;
use parley_services::transport::{TcpTransport, UdpTransport};
use parley_services::{LinkReader, Node, RelayLink};

mod api;
mod tcp;
mod udp;

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long a test waits for an expected frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// A relay running in this process. Dropping it stops every task.
pub struct Relay {
    pub addr: SocketAddr,
    pub node: Arc<Node>,
    shutdown: broadcast::Sender<()>,
}

impl Drop for Relay {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

impl Relay {
    pub async fn tcp() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let transport = TcpTransport::new();
        let node = Node::new(transport.clone());
        let (shutdown, _) = broadcast::channel(1);

        tokio::spawn(transport.serve(listener, node.clone(), shutdown.subscribe()));
        Ok(Self {
            addr,
            node,
            shutdown,
        })
    }

    pub async fn udp() -> Result<Self> {
        let transport = UdpTransport::bind("127.0.0.1:0".parse()?)?;
        let addr = transport.local_addr()?;
        let node = Node::new(transport.clone());
        let (shutdown, _) = broadcast::channel(1);

        tokio::spawn(transport.serve(node.clone(), shutdown.subscribe()));
        Ok(Self {
            addr,
            node,
            shutdown,
        })
    }

    /// Run the liveness monitor with a short timeout.
    pub fn with_liveness(self, timeout_secs: u64) -> Self {
        let config = LivenessConfig {
            timeout_secs,
            sweep_interval_secs: 1,
        };
        tokio::spawn(liveness_loop(
            self.node.clone(),
            config,
            self.shutdown.subscribe(),
        ));
        self
    }

    /// Wait until the registry holds exactly `names`.
    pub async fn wait_for_users(&self, names: &[&str]) -> Result<()> {
        let expected: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        tokio::time::timeout(RECV_TIMEOUT, async {
            while self.node.registry().all() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .with_context(|| {
            format!(
                "registry never became {:?}, still {:?}",
                expected,
                self.node.registry().all()
            )
        })
    }
}

/// One chat participant.
pub struct Client {
    pub name: String,
    pub link: RelayLink,
    reader: LinkReader,
}

impl Client {
    /// Connect and register, waiting until the relay has seen us.
    pub async fn join(relay: &Relay, name: &str, udp: bool) -> Result<Self> {
        let server = relay.addr.to_string();
        let (link, reader) = if udp {
            RelayLink::connect_udp(&server).await?
        } else {
            RelayLink::connect_tcp(&server).await?
        };
        let mut client = Self {
            name: name.to_string(),
            link,
            reader,
        };
        client
            .link
            .send(&Frame::Connect {
                username: name.to_string(),
            })
            .await?;
        // Our own membership update proves the relay registered us.
        client.expect(|f| f.starts_with("USERLIST:") && f.contains(name)).await?;
        Ok(client)
    }

    pub async fn say(&self, body: &str) -> Result<()> {
        self.link
            .send(&Frame::Text {
                sender: self.name.clone(),
                recipient: None,
                body: body.to_string(),
            })
            .await
    }

    pub async fn whisper(&self, to: &str, body: &str) -> Result<()> {
        self.link
            .send(&Frame::Text {
                sender: self.name.clone(),
                recipient: Some(to.to_string()),
                body: body.to_string(),
            })
            .await
    }

    pub async fn recv(&mut self) -> Result<String> {
        match tokio::time::timeout(RECV_TIMEOUT, self.reader.next_frame()).await {
            Ok(Ok(Some(frame))) => Ok(frame),
            Ok(Ok(None)) => bail!("{}: relay closed the connection", self.name),
            Ok(Err(e)) => Err(e),
            Err(_) => bail!("{}: timed out waiting for a frame", self.name),
        }
    }

    /// Read frames until one matches, discarding the rest.
    pub async fn expect(&mut self, matches: impl Fn(&str) -> bool) -> Result<String> {
        loop {
            let frame = self.recv().await?;
            if matches(&frame) {
                return Ok(frame);
            }
        }
    }

    /// Assert that nothing matching arrives within `window`.
    pub async fn expect_none(&mut self, window: Duration, matches: impl Fn(&str) -> bool) -> Result<()> {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.reader.next_frame()).await {
                Err(_) => return Ok(()),
                Ok(Ok(Some(frame))) if matches(&frame) => {
                    bail!("{}: unexpected frame {frame:?}", self.name)
                }
                Ok(Ok(Some(_))) => continue,
                Ok(Ok(None)) => return Ok(()),
                Ok(Err(e)) => return Err(e),
            }
        }
    }
}
