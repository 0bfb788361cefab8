//! Chunk reassembly — collects chunk frames until a transfer is whole.
//!
//! Transfers are keyed on `(sender, session id)`. Slots are filled by index
//! and concatenated in index order, regardless of arrival order. Records that
//! never complete are dropped after their kind's expiry window, silently.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use parley_core::config::TransferConfig;
use parley_core::{ChunkFrame, ChunkKind};

use crate::transfer::MAX_CHUNKS;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub sender: String,
    pub session_id: String,
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.sender, self.session_id)
    }
}

struct ChunkTransfer {
    kind: ChunkKind,
    recipient: Option<String>,
    filename: Option<String>,
    /// Declared by the first chunk.
    total: u32,
    /// Fragments received so far, by index. Only indices below `total`.
    slots: BTreeMap<u32, String>,
    created_at: Instant,
}

impl ChunkTransfer {
    fn new(chunk: &ChunkFrame) -> Self {
        Self {
            kind: chunk.kind,
            recipient: chunk.recipient.clone(),
            filename: chunk.filename.clone(),
            total: chunk.total,
            slots: BTreeMap::new(),
            created_at: Instant::now(),
        }
    }

    fn total(&self) -> usize {
        self.total as usize
    }

    fn received(&self) -> usize {
        self.slots.len()
    }

    /// Store one fragment. Out-of-range indices are ignored and duplicates
    /// overwrite without being counted twice.
    fn store(&mut self, index: u32, data: String) {
        if index < self.total {
            self.slots.insert(index, data);
        }
    }

    fn is_complete(&self) -> bool {
        self.received() == self.total()
    }
}

/// A fully reassembled payload, still base64 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub kind: ChunkKind,
    pub sender: String,
    pub recipient: Option<String>,
    pub filename: Option<String>,
    pub session_id: String,
    pub payload: String,
}

impl CompletedTransfer {
    /// Decode the base64 payload into raw bytes.
    pub fn decode_payload(&self) -> Result<Bytes, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD
            .decode(self.payload.as_bytes())
            .map(Bytes::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    Complete(CompletedTransfer),
    Incomplete { received: usize, total: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    #[error("chunk {sender}_{session_id} declares zero total chunks")]
    ZeroTotal { sender: String, session_id: String },
    #[error("chunk {sender}_{session_id} declares {total} chunks, more than the {max} allowed")]
    TooManyChunks {
        sender: String,
        session_id: String,
        total: u32,
        max: u32,
    },
}

/// Progress of one in-flight transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub key: TransferKey,
    pub kind: ChunkKind,
    pub received: usize,
    pub total: usize,
}

/// In-flight transfer table for one receiver.
#[derive(Clone)]
pub struct ChunkReassembler {
    active: Arc<DashMap<TransferKey, ChunkTransfer>>,
    expiry: TransferConfig,
}

impl ChunkReassembler {
    pub fn new(expiry: TransferConfig) -> Self {
        Self {
            active: Arc::new(DashMap::new()),
            expiry,
        }
    }

    /// Add one chunk. Returns `Complete` exactly once per transfer, on the
    /// chunk that fills the last empty slot.
    pub fn ingest(&self, chunk: ChunkFrame) -> Result<Ingest, ReassemblyError> {
        if chunk.total == 0 {
            return Err(ReassemblyError::ZeroTotal {
                sender: chunk.sender,
                session_id: chunk.session_id,
            });
        }
        if chunk.total > MAX_CHUNKS {
            return Err(ReassemblyError::TooManyChunks {
                sender: chunk.sender,
                session_id: chunk.session_id,
                total: chunk.total,
                max: MAX_CHUNKS,
            });
        }
        self.sweep();

        let key = TransferKey {
            sender: chunk.sender.clone(),
            session_id: chunk.session_id.clone(),
        };

        // The entry guard holds the shard lock until completion is decided.
        match self.active.entry(key) {
            Entry::Vacant(entry) => {
                let mut transfer = ChunkTransfer::new(&chunk);
                transfer.store(chunk.index, chunk.data);
                if transfer.is_complete() {
                    let key = entry.into_key();
                    return Ok(Ingest::Complete(finish(key, transfer)));
                }
                let progress = Ingest::Incomplete {
                    received: transfer.received(),
                    total: transfer.total(),
                };
                tracing::debug!(
                    sender = %chunk.sender,
                    session = %chunk.session_id,
                    kind = %chunk.kind,
                    total = chunk.total,
                    "new chunk transfer"
                );
                entry.insert(transfer);
                Ok(progress)
            }
            Entry::Occupied(mut entry) => {
                let expected = entry.get().total();
                if chunk.total as usize != expected {
                    tracing::warn!(
                        transfer = %entry.key(),
                        expected,
                        got = chunk.total,
                        "chunk total disagrees with first chunk; keeping original"
                    );
                }
                let transfer = entry.get_mut();
                transfer.store(chunk.index, chunk.data);
                if transfer.is_complete() {
                    let (key, transfer) = entry.remove_entry();
                    return Ok(Ingest::Complete(finish(key, transfer)));
                }
                Ok(Ingest::Incomplete {
                    received: transfer.received(),
                    total: transfer.total(),
                })
            }
        }
    }

    /// Drop every record older than its kind's expiry window.
    pub fn sweep(&self) -> usize {
        let before = self.active.len();
        self.active.retain(|key, transfer| {
            let stale = transfer.created_at.elapsed() > self.expiry.expiry(transfer.kind);
            if stale {
                tracing::debug!(
                    transfer = %key,
                    kind = %transfer.kind,
                    received = transfer.received(),
                    total = transfer.total(),
                    "dropping expired chunk transfer"
                );
            }
            !stale
        });
        before.saturating_sub(self.active.len())
    }

    /// Transfers currently being received, sorted by key.
    pub fn in_progress(&self) -> Vec<TransferProgress> {
        let mut transfers: Vec<TransferProgress> = self
            .active
            .iter()
            .map(|e| TransferProgress {
                key: e.key().clone(),
                kind: e.value().kind,
                received: e.value().received(),
                total: e.value().total(),
            })
            .collect();
        transfers.sort_by_key(|t| t.key.to_string());
        transfers
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

fn finish(key: TransferKey, transfer: ChunkTransfer) -> CompletedTransfer {
    tracing::debug!(
        transfer = %key,
        kind = %transfer.kind,
        chunks = transfer.total(),
        "chunk transfer complete"
    );
    let ChunkTransfer {
        kind,
        recipient,
        filename,
        slots,
        ..
    } = transfer;
    CompletedTransfer {
        kind,
        sender: key.sender,
        recipient,
        filename,
        session_id: key.session_id,
        payload: slots.into_values().collect(),
    }
}
