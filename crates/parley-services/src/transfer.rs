//! Outgoing transfers — split a payload into chunk frames.

use base64::Engine;

use parley_core::wire::FIELD_SEP;
use parley_core::{ChunkFrame, ChunkKind};

/// Largest payload of any kind.
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Images are kept small enough to preview inline.
pub const MAX_IMAGE_BYTES: usize = 50_000;

/// Most chunks a transfer can need: one base64 character per chunk of the
/// largest payload.
pub const MAX_CHUNKS: u32 = (MAX_PAYLOAD_BYTES.div_ceil(3) * 4) as u32;

/// Largest payload a client will send for `kind`.
pub fn max_payload_bytes(kind: ChunkKind) -> usize {
    match kind {
        ChunkKind::Image => MAX_IMAGE_BYTES,
        ChunkKind::File | ChunkKind::Voice => MAX_PAYLOAD_BYTES,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("payload is empty")]
    Empty,
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    #[error("chunk size must be at least 1")]
    ZeroChunkSize,
}

/// Every chunk frame of one transfer, in index order.
#[derive(Debug, Clone)]
pub struct OutgoingTransfer {
    pub session_id: String,
    pub kind: ChunkKind,
    pub chunks: Vec<ChunkFrame>,
}

/// Random 64-bit session token, as 16 hex characters.
pub fn new_session_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

pub fn split_payload(
    kind: ChunkKind,
    payload: &[u8],
    sender: &str,
    recipient: Option<&str>,
    filename: Option<&str>,
    chunk_size: usize,
) -> Result<OutgoingTransfer, TransferError> {
    if payload.is_empty() {
        return Err(TransferError::Empty);
    }
    let max = max_payload_bytes(kind);
    if payload.len() > max {
        return Err(TransferError::TooLarge {
            len: payload.len(),
            max,
        });
    }
    if chunk_size == 0 {
        return Err(TransferError::ZeroChunkSize);
    }

    let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
    let session_id = new_session_id();
    let filename = filename.map(sanitize_filename);

    // Base64 output is ASCII, so byte chunks are valid strings.
    let fragments: Vec<&[u8]> = encoded.as_bytes().chunks(chunk_size).collect();
    let total = fragments.len() as u32;

    let chunks = fragments
        .into_iter()
        .enumerate()
        .map(|(index, fragment)| ChunkFrame {
            kind,
            session_id: session_id.clone(),
            index: index as u32,
            total,
            sender: sender.to_string(),
            recipient: recipient.map(str::to_string),
            filename: filename.clone(),
            data: String::from_utf8_lossy(fragment).into_owned(),
        })
        .collect();

    tracing::debug!(%kind, session = %session_id, bytes = payload.len(), chunks = total, "split payload");

    Ok(OutgoingTransfer {
        session_id,
        kind,
        chunks,
    })
}

/// Keep only the final path component and strip wire delimiters.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c == FIELD_SEP || c.is_control() { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
