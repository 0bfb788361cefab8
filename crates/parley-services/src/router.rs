//! Message router — decides which peers receive an inbound frame.
//!
//! Routing never reassembles chunks: chunk frames are forwarded as received.
//! Each peer send is independent; one failing peer is logged and counted but
//! never stops the rest of a fan-out.

use std::sync::Arc;

use parley_core::wire::BROADCAST_PLACEHOLDER;
use parley_core::Frame;

use crate::session::{SessionRegistry, UnknownRecipient};
use crate::transport::{PeerHandle, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Sent to `delivered` peers; `failed` sends were dropped.
    Delivered { delivered: usize, failed: usize },
    /// Private frame for a user who is not registered. Nothing was sent.
    UnknownRecipient { recipient: String },
    /// The frame is not something the router forwards.
    NotRoutable,
}

impl DeliveryOutcome {
    fn single(result: Result<(), TransportError>) -> Self {
        match result {
            Ok(()) => DeliveryOutcome::Delivered {
                delivered: 1,
                failed: 0,
            },
            Err(_) => DeliveryOutcome::Delivered {
                delivered: 0,
                failed: 1,
            },
        }
    }
}

#[derive(Clone)]
pub struct MessageRouter {
    registry: SessionRegistry,
    transport: Arc<dyn Transport>,
}

impl MessageRouter {
    pub fn new(registry: SessionRegistry, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Forward one inbound frame. `raw` is the frame as received, used for
    /// verbatim forwarding.
    pub async fn route(&self, frame: &Frame, raw: &str) -> DeliveryOutcome {
        match frame {
            Frame::Text {
                sender,
                recipient: Some(recipient),
                body,
            } => {
                let private = Frame::Private {
                    sender: sender.clone(),
                    body: body.clone(),
                };
                self.deliver_private(sender, recipient, &private.encode())
                    .await
            }
            Frame::Text {
                sender,
                recipient: None,
                ..
            } => self.broadcast(raw, Some(sender)).await,
            Frame::Chunk(chunk) => match &chunk.recipient {
                Some(recipient) => self.deliver_private(&chunk.sender, recipient, raw).await,
                None => self.broadcast(raw, Some(&chunk.sender)).await,
            },
            _ => DeliveryOutcome::NotRoutable,
        }
    }

    async fn deliver_private(&self, sender: &str, recipient: &str, frame: &str) -> DeliveryOutcome {
        let handle = match self.registry.resolve(recipient) {
            Ok(handle) => handle,
            Err(UnknownRecipient(name)) => {
                tracing::debug!(%sender, recipient = %name, "private frame for unknown user");
                return DeliveryOutcome::UnknownRecipient { recipient: name };
            }
        };
        let result = self.transport.send(&handle, frame).await;
        if let Err(e) = &result {
            tracing::warn!(%sender, %recipient, error = %e, "private delivery failed");
        }
        DeliveryOutcome::single(result)
    }

    /// Send `frame` to every registered user except `exclude`.
    pub async fn broadcast(&self, frame: &str, exclude: Option<&str>) -> DeliveryOutcome {
        // Snapshot first: no registry guard may be held across a send.
        let targets = self.registry.handles();

        let mut delivered = 0;
        let mut failed = 0;
        for (username, handle) in targets {
            if exclude == Some(username.as_str()) {
                continue;
            }
            match self.transport.send(&handle, frame).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(user = %username, error = %e, "broadcast delivery failed");
                }
            }
        }
        DeliveryOutcome::Delivered { delivered, failed }
    }

    /// Push the current membership to every registered user.
    pub async fn broadcast_user_list(&self) -> DeliveryOutcome {
        let usernames = self
            .registry
            .all()
            .into_iter()
            .filter(|name| name != BROADCAST_PLACEHOLDER)
            .collect();
        let frame = Frame::UserList { usernames };
        self.broadcast(&frame.encode(), None).await
    }

    pub async fn broadcast_notice(&self, text: &str, exclude: Option<&str>) -> DeliveryOutcome {
        let frame = Frame::Notice {
            text: text.to_string(),
        };
        self.broadcast(&frame.encode(), exclude).await
    }

    /// Send one frame to one handle, registered or not.
    pub async fn send_to(&self, handle: &PeerHandle, frame: &Frame) -> DeliveryOutcome {
        let result = self.transport.send(handle, &frame.encode()).await;
        if let Err(e) = &result {
            tracing::warn!(peer = %handle, tag = frame.tag(), error = %e, "send failed");
        }
        DeliveryOutcome::single(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{udp, RecordingTransport};
    use parley_core::decode;

    fn setup(users: &[(&str, u16)]) -> (MessageRouter, Arc<RecordingTransport>) {
        let registry = SessionRegistry::new();
        for (name, port) in users {
            registry.register(name, udp(*port));
        }
        let transport = RecordingTransport::new();
        (MessageRouter::new(registry, transport.clone()), transport)
    }

    async fn route_raw(router: &MessageRouter, raw: &str) -> DeliveryOutcome {
        let frame = decode(raw).unwrap();
        router.route(&frame, raw).await
    }

    #[tokio::test]
    async fn broadcast_text_reaches_everyone_but_the_sender() {
        let (router, transport) = setup(&[("alice", 1), ("bob", 2), ("carol", 3)]);
        let raw = "FROM:alice|MSG:hello";

        let outcome = route_raw(&router, raw).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                delivered: 2,
                failed: 0
            }
        );
        assert!(transport.sent_to(&udp(1)).is_empty());
        assert_eq!(transport.sent_to(&udp(2)), vec![raw.to_string()]);
        assert_eq!(transport.sent_to(&udp(3)), vec![raw.to_string()]);
    }

    #[tokio::test]
    async fn private_text_is_rewritten_for_the_recipient() {
        let (router, transport) = setup(&[("bob", 2), ("carol", 3)]);
        let outcome = route_raw(&router, "TO:carol|FROM:bob|MSG:hi").await;

        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                delivered: 1,
                failed: 0
            }
        );
        assert_eq!(transport.sent_to(&udp(3)), vec!["PRIVATE:bob|MSG:hi".to_string()]);
        assert!(transport.sent_to(&udp(2)).is_empty());
    }

    #[tokio::test]
    async fn private_text_to_unknown_user_sends_nothing() {
        let (router, transport) = setup(&[("bob", 2)]);
        let outcome = route_raw(&router, "TO:carol|FROM:bob|MSG:hi").await;

        assert_eq!(
            outcome,
            DeliveryOutcome::UnknownRecipient {
                recipient: "carol".into()
            }
        );
        assert_eq!(transport.total_sent(), 0);
    }

    #[tokio::test]
    async fn chunks_are_forwarded_verbatim() {
        let (router, transport) = setup(&[("alice", 1), ("bob", 2), ("carol", 3)]);
        let private = "FILECHUNK|SESSION:ab|CHUNK:0|TOTAL:2|FILENAME:a.txt|TO:bob|FROM:alice|DATA:aGk=";
        let public = "IMGCHUNK|SESSION:cd|CHUNK:1|TOTAL:2|FROM:alice|DATA:AAAA";

        route_raw(&router, private).await;
        route_raw(&router, public).await;

        assert_eq!(
            transport.sent_to(&udp(2)),
            vec![private.to_string(), public.to_string()]
        );
        assert_eq!(transport.sent_to(&udp(3)), vec![public.to_string()]);
        assert!(transport.sent_to(&udp(1)).is_empty());
    }

    #[tokio::test]
    async fn one_failing_peer_does_not_abort_fan_out() {
        let (router, transport) = setup(&[("alice", 1), ("bob", 2), ("carol", 3), ("dave", 4)]);
        transport.fail_for(udp(3));

        let outcome = route_raw(&router, "FROM:alice|MSG:still here").await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                delivered: 2,
                failed: 1
            }
        );
        assert_eq!(transport.sent_to(&udp(2)).len(), 1);
        assert_eq!(transport.sent_to(&udp(4)).len(), 1);
    }

    #[tokio::test]
    async fn user_list_omits_placeholder_and_reaches_everyone() {
        let (router, transport) = setup(&[("bob", 2), ("All", 9), ("alice", 1)]);
        router.broadcast_user_list().await;

        let expected = vec!["USERLIST:alice,bob".to_string()];
        assert_eq!(transport.sent_to(&udp(1)), expected);
        assert_eq!(transport.sent_to(&udp(2)), expected);
    }

    #[tokio::test]
    async fn control_frames_are_not_routable() {
        let (router, transport) = setup(&[("alice", 1)]);
        assert_eq!(
            route_raw(&router, "HEARTBEAT:alice").await,
            DeliveryOutcome::NotRoutable
        );
        assert_eq!(transport.total_sent(), 0);
    }
}
