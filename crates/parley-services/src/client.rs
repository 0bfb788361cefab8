//! Client-side inbound processing.
//!
//! Frames from the relay are turned into `ClientEvent`s and posted to a
//! channel; whatever renders them (a terminal, a GUI) only ever reads events.

use bytes::Bytes;
use tokio::sync::mpsc;

use parley_core::config::TransferConfig;
use parley_core::{decode, ChunkKind, Frame};

use crate::reassembly::{ChunkReassembler, Ingest};

/// A reassembled image, file or voice clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPayload {
    pub kind: ChunkKind,
    pub from: String,
    pub filename: Option<String>,
    pub private: bool,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message {
        from: String,
        body: String,
        private: bool,
    },
    /// Full membership, replacing whatever was shown before.
    Membership(Vec<String>),
    Notice(String),
    Payload(ReceivedPayload),
}

pub struct ClientInbox {
    username: String,
    reassembler: ChunkReassembler,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientInbox {
    pub fn new(
        username: impl Into<String>,
        transfers: TransferConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inbox = Self {
            username: username.into(),
            reassembler: ChunkReassembler::new(transfers),
            events,
        };
        (inbox, rx)
    }

    pub fn reassembler(&self) -> &ChunkReassembler {
        &self.reassembler
    }

    /// Process one frame from the relay.
    pub fn handle_inbound(&self, raw: &str) {
        let frame = match decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame from relay");
                return;
            }
        };

        let event = match frame {
            Frame::Text {
                sender,
                recipient,
                body,
            } => ClientEvent::Message {
                from: sender,
                body,
                private: recipient.is_some(),
            },
            Frame::Private { sender, body } => ClientEvent::Message {
                from: sender,
                body,
                private: true,
            },
            Frame::UserList { usernames } => ClientEvent::Membership(usernames),
            Frame::Notice { text } => ClientEvent::Notice(text),
            Frame::Chunk(chunk) => {
                if chunk.sender == self.username {
                    return;
                }
                match self.reassembler.ingest(chunk) {
                    Ok(Ingest::Complete(done)) => match done.decode_payload() {
                        Ok(bytes) => ClientEvent::Payload(ReceivedPayload {
                            kind: done.kind,
                            from: done.sender,
                            filename: done.filename,
                            private: done.recipient.is_some(),
                            bytes,
                        }),
                        Err(e) => {
                            tracing::warn!(
                                sender = %done.sender,
                                session = %done.session_id,
                                error = %e,
                                "reassembled payload is not valid base64"
                            );
                            return;
                        }
                    },
                    Ok(Ingest::Incomplete { .. }) => return,
                    Err(e) => {
                        tracing::warn!(error = %e, "rejected chunk");
                        return;
                    }
                }
            }
            other => {
                tracing::debug!(tag = other.tag(), "ignoring client-bound control frame");
                return;
            }
        };

        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}
