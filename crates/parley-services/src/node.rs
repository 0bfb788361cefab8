//! Node — one relay instance: a registry, a router and a transport.
//!
//! Transport adapters hand every inbound line or datagram to
//! `handle_inbound`. The node decodes it, updates presence, and routes.
//! Nothing a single peer sends can stop the node.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use parley_core::wire::{BROADCAST_PLACEHOLDER, FIELD_SEP, KEY_SEP, LIST_SEP};
use parley_core::{decode, DecodeError, Frame};

use crate::router::{DeliveryOutcome, MessageRouter};
use crate::session::{Registration, SessionRegistry};
use crate::transport::{PeerHandle, Transport, TransportKind};

pub struct Node {
    kind: TransportKind,
    registry: SessionRegistry,
    router: MessageRouter,
    transport: Arc<dyn Transport>,
    started_at: Instant,
}

impl Node {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        let registry = SessionRegistry::new();
        Arc::new(Self {
            kind: transport.kind(),
            router: MessageRouter::new(registry.clone(), transport.clone()),
            registry,
            transport,
            started_at: Instant::now(),
        })
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Process one raw frame from `peer`. Returns the routing outcome for
    /// content frames, `None` for everything else.
    pub async fn handle_inbound(&self, peer: PeerHandle, raw: &str) -> Option<DeliveryOutcome> {
        let raw = raw.trim_end_matches(['\r', '\n']);
        let frame = match decode(raw) {
            Ok(frame) => frame,
            Err(DecodeError::Empty) => {
                tracing::trace!(%peer, "ignoring empty frame");
                return None;
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "dropping malformed frame");
                return None;
            }
        };

        match frame {
            Frame::Connect { username } => {
                self.on_connect(peer, &username).await;
                None
            }
            Frame::Disconnect { username } => {
                self.on_disconnect(peer, &username).await;
                None
            }
            Frame::Heartbeat { username } => {
                self.on_heartbeat(peer, &username).await;
                None
            }
            Frame::Text { .. } | Frame::Chunk(_) => self.on_content(peer, &frame, raw).await,
            other => {
                tracing::debug!(%peer, tag = other.tag(), "ignoring relay-only frame from client");
                None
            }
        }
    }

    async fn on_connect(&self, peer: PeerHandle, username: &str) {
        if let Some(reason) = username_problem(username) {
            tracing::info!(%peer, user = %username, reason, "rejecting connect");
            let notice = Frame::Notice {
                text: format!("Username {username} is not allowed: {reason}"),
            };
            self.router.send_to(&peer, &notice).await;
            return;
        }

        let registration = self.registry.register(username, peer);
        tracing::info!(%peer, user = %username, ?registration, "user connected");
        if registration == Registration::New {
            self.announce_join(username).await;
        }
        self.router.broadcast_user_list().await;
    }

    async fn on_disconnect(&self, peer: PeerHandle, username: &str) {
        if self.registry.remove_if_handle(username, &peer).is_some() {
            tracing::info!(%peer, user = %username, "user disconnected");
            self.announce_leave(username, None).await;
            self.router.broadcast_user_list().await;
        } else {
            tracing::debug!(%peer, user = %username, "disconnect for a user not on this handle");
        }
        if self.kind == TransportKind::Stream {
            self.transport.close(&peer).await;
        }
    }

    async fn on_heartbeat(&self, peer: PeerHandle, username: &str) {
        if username_problem(username).is_some() {
            tracing::debug!(%peer, user = %username, "ignoring heartbeat for invalid username");
            return;
        }
        if self.registry.register(username, peer) == Registration::New {
            tracing::info!(%peer, user = %username, "user registered by heartbeat");
            self.announce_join(username).await;
            self.router.broadcast_user_list().await;
        }
    }

    async fn on_content(&self, peer: PeerHandle, frame: &Frame, raw: &str) -> Option<DeliveryOutcome> {
        let sender = frame.sender()?;

        match self.kind {
            TransportKind::Datagram => {
                if let Some(reason) = username_problem(sender) {
                    tracing::debug!(%peer, user = %sender, reason, "dropping frame from invalid sender");
                    return None;
                }
                // Any well-formed datagram registers its sender.
                if self.registry.register(sender, peer) == Registration::New {
                    tracing::info!(%peer, user = %sender, "user registered implicitly");
                    self.announce_join(sender).await;
                    self.router.broadcast_user_list().await;
                }
            }
            TransportKind::Stream => {
                if self.registry.refresh(sender, peer).is_none() {
                    tracing::debug!(%peer, user = %sender, "content from unregistered sender");
                }
            }
        }

        let outcome = self.router.route(frame, raw).await;
        if let DeliveryOutcome::UnknownRecipient { recipient } = &outcome {
            let notice = Frame::Notice {
                text: format!("User {recipient} is not online"),
            };
            self.router.send_to(&peer, &notice).await;
        }
        Some(outcome)
    }

    /// A stream connection ended without a DISCONNECT.
    pub async fn handle_closed(&self, peer: PeerHandle) {
        if let Some(username) = self.registry.remove_handle(&peer) {
            tracing::info!(%peer, user = %username, "user dropped with connection");
            self.announce_leave(&username, None).await;
            self.router.broadcast_user_list().await;
        }
    }

    // ── Membership changes ────────────────────────────────────────────────────

    /// Remove every user silent for longer than `timeout`. Returns their names.
    pub async fn expire_idle(&self, timeout: Duration) -> Vec<String> {
        let expired = self.registry.expire(timeout);
        if expired.is_empty() {
            return Vec::new();
        }

        let mut names = Vec::with_capacity(expired.len());
        for (username, session) in expired {
            tracing::info!(
                user = %username,
                peer = %session.handle,
                silent_secs = session.last_seen.elapsed().as_secs(),
                "user timed out"
            );
            self.announce_leave(&username, Some("timeout")).await;
            self.transport.close(&session.handle).await;
            names.push(username);
        }
        self.router.broadcast_user_list().await;
        names
    }

    /// Operator removal of a user. Returns false if no such user.
    pub async fn kick(&self, username: &str) -> bool {
        let Some(session) = self.registry.remove(username) else {
            return false;
        };
        tracing::info!(user = %username, peer = %session.handle, "user kicked");

        let notice = Frame::Notice {
            text: "You were removed from the chat".to_string(),
        };
        self.router.send_to(&session.handle, &notice).await;
        self.transport.close(&session.handle).await;

        self.announce_leave(username, Some("removed")).await;
        self.router.broadcast_user_list().await;
        true
    }

    /// Drop every peer. In-flight chunk transfers are abandoned.
    pub async fn shutdown(&self) {
        tracing::info!(transport = %self.kind, users = self.registry.len(), "node shutting down");
        self.transport.close_all().await;
    }

    async fn announce_join(&self, username: &str) {
        self.router
            .broadcast_notice(&format!("{username} has joined the chat"), Some(username))
            .await;
    }

    async fn announce_leave(&self, username: &str, reason: Option<&str>) {
        let text = match reason {
            Some(reason) => format!("{username} has left the chat ({reason})"),
            None => format!("{username} has left the chat"),
        };
        self.router.broadcast_notice(&text, Some(username)).await;
    }
}

/// Why `name` cannot be registered, if it cannot.
fn username_problem(name: &str) -> Option<&'static str> {
    if name.trim().is_empty() {
        Some("empty")
    } else if name == BROADCAST_PLACEHOLDER {
        Some("reserved")
    } else if name.contains([FIELD_SEP, KEY_SEP, LIST_SEP]) {
        Some("contains a delimiter")
    } else {
        None
    }
}
