//! Multicast announcements — one-to-many text with no relay in between.
//!
//! An announcer sends `[name] text` datagrams to an IPv4 group; every
//! listener joined to that group on the link receives them. There is no
//! registry, no routing and no delivery guarantee.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::{bail, Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use parley_core::config::MulticastConfig;

/// Largest announcement datagram. Listeners never read past this.
pub const MAX_ANNOUNCEMENT: usize = 1024;

/// One announcement as heard on the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// `None` when the datagram did not carry a `[name]` prefix.
    pub sender: Option<String>,
    pub text: String,
}

impl Announcement {
    /// Split a `[name] text` datagram. Anything else is kept whole as
    /// anonymous text.
    pub fn parse(raw: &str) -> Self {
        let named = raw
            .strip_prefix('[')
            .and_then(|rest| rest.split_once("] "))
            .filter(|(name, _)| !name.is_empty());
        match named {
            Some((name, text)) => Self {
                sender: Some(name.to_string()),
                text: text.to_string(),
            },
            None => Self {
                sender: None,
                text: raw.to_string(),
            },
        }
    }
}

impl fmt::Display for Announcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sender {
            Some(sender) => write!(f, "[{sender}] {}", self.text),
            None => f.write_str(&self.text),
        }
    }
}

/// Wire text for an announcement from `name`, checked against the limits.
pub fn encode_announcement(name: &str, text: &str) -> Result<String> {
    if name.trim().is_empty() {
        bail!("announcer name cannot be empty");
    }
    if name.contains(']') {
        bail!("announcer name cannot contain ']'");
    }
    let text = text.trim();
    if text.is_empty() {
        bail!("nothing to announce");
    }
    let wire = Announcement {
        sender: Some(name.to_string()),
        text: text.to_string(),
    }
    .to_string();
    if wire.len() > MAX_ANNOUNCEMENT {
        bail!(
            "announcement of {} bytes exceeds the {MAX_ANNOUNCEMENT} byte limit",
            wire.len()
        );
    }
    Ok(wire)
}

/// Group and interface addresses from config.
fn addresses(config: &MulticastConfig) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let group: Ipv4Addr = config
        .group
        .parse()
        .with_context(|| format!("invalid multicast group {:?}", config.group))?;
    if !group.is_multicast() {
        bail!("{group} is not a multicast address");
    }
    let interface: Ipv4Addr = config
        .interface
        .parse()
        .with_context(|| format!("invalid multicast interface {:?}", config.interface))?;
    Ok((group, interface))
}

// ── Sending ───────────────────────────────────────────────────────────────────

pub struct Announcer {
    socket: UdpSocket,
    dest: SocketAddrV4,
    name: String,
}

impl Announcer {
    /// Must be called inside a tokio runtime.
    pub fn new(config: &MulticastConfig, name: &str) -> Result<Self> {
        encode_announcement(name, "-")?;
        let (group, interface) = addresses(config)?;
        let socket = make_sender_socket(interface, config.ttl, config.loopback)
            .context("failed to create multicast sender socket")?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

        tracing::info!(%group, port = config.port, name, "multicast announcer ready");
        Ok(Self {
            socket,
            dest: SocketAddrV4::new(group, config.port),
            name: name.to_string(),
        })
    }

    /// Send one announcement to the group. Returns the bytes sent.
    pub async fn announce(&self, text: &str) -> Result<usize> {
        let wire = encode_announcement(&self.name, text)?;
        let sent = self
            .socket
            .send_to(wire.as_bytes(), self.dest)
            .await
            .with_context(|| format!("failed to send to {}", self.dest))?;
        tracing::trace!(bytes = sent, dest = %self.dest, "announcement sent");
        Ok(sent)
    }
}

fn make_sender_socket(interface: Ipv4Addr, ttl: u32, loopback: bool) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_multicast_if_v4(&interface).context("IP_MULTICAST_IF")?;
    socket.set_multicast_ttl_v4(ttl).context("IP_MULTICAST_TTL")?;
    socket.set_multicast_loop_v4(loopback).context("IP_MULTICAST_LOOP")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())
        .context("bind()")?;

    Ok(socket.into())
}

// ── Listening ─────────────────────────────────────────────────────────────────

pub struct MulticastListener {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl MulticastListener {
    /// Bind the group port and join the group. Must be called inside a
    /// tokio runtime.
    pub fn join(config: &MulticastConfig) -> Result<Self> {
        let (group, interface) = addresses(config)?;
        let socket = make_listener_socket(group, config.port, interface)
            .context("failed to create multicast listener socket")?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

        tracing::info!(%group, port = config.port, "joined multicast group");
        Ok(Self {
            socket,
            buf: vec![0u8; MAX_ANNOUNCEMENT],
        })
    }

    /// Wait for the next announcement.
    pub async fn next(&mut self) -> Result<(SocketAddr, Announcement)> {
        let (len, from) = self
            .socket
            .recv_from(&mut self.buf)
            .await
            .context("failed to receive announcement")?;
        let raw = String::from_utf8_lossy(&self.buf[..len]);
        Ok((from, Announcement::parse(raw.trim_end())))
    }
}

fn make_listener_socket(group: Ipv4Addr, port: u16, interface: Ipv4Addr) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    // Several listeners on one host share the group port.
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())
        .context("bind()")?;
    socket
        .join_multicast_v4(&group, &interface)
        .context("IP_ADD_MEMBERSHIP")?;

    Ok(socket.into())
}
