//! parley-services — presence registry, chunk reassembly, routing and the
//! transport adapters that connect them to sockets.

pub mod client;
pub mod link;
pub mod liveness;
pub mod multicast;
pub mod node;
pub mod reassembly;
pub mod router;
pub mod session;
pub mod transfer;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{ClientEvent, ClientInbox, ReceivedPayload};
pub use link::{LinkReader, RelayLink};
pub use node::Node;
pub use reassembly::{
    ChunkReassembler, CompletedTransfer, Ingest, ReassemblyError, TransferKey,
    TransferProgress,
};
pub use router::{DeliveryOutcome, MessageRouter};
pub use session::{Registration, SessionRegistry, UnknownRecipient, UserSession};
pub use transfer::{new_session_id, split_payload, OutgoingTransfer, TransferError};
pub use transport::{PeerHandle, Transport, TransportError, TransportKind};
