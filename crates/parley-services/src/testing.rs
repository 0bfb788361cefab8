//! In-memory transport for router and node tests.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::transport::{PeerHandle, Transport, TransportError, TransportKind};

pub fn udp(port: u16) -> PeerHandle {
    PeerHandle::Datagram(SocketAddr::from(([127, 0, 0, 1], port)))
}

pub fn tcp(conn_id: u64) -> PeerHandle {
    PeerHandle::Stream {
        conn_id,
        addr: SocketAddr::from(([127, 0, 0, 1], 40_000 + conn_id as u16)),
    }
}

/// Records every frame sent, per handle, in send order.
pub struct RecordingTransport {
    kind: TransportKind,
    sent: Mutex<Vec<(PeerHandle, String)>>,
    failing: Mutex<HashSet<PeerHandle>>,
    closed: Mutex<Vec<PeerHandle>>,
    closed_all: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Self::with_kind(TransportKind::Datagram)
    }

    pub fn with_kind(kind: TransportKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            closed: Mutex::new(Vec::new()),
            closed_all: AtomicBool::new(false),
        })
    }

    /// Make every send to `handle` fail.
    pub fn fail_for(&self, handle: PeerHandle) {
        self.failing.lock().unwrap().insert(handle);
    }

    pub fn sent_to(&self, handle: &PeerHandle) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == handle)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn total_sent(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn closed(&self) -> Vec<PeerHandle> {
        self.closed.lock().unwrap().clone()
    }

    pub fn was_shut_down(&self) -> bool {
        self.closed_all.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&self, to: &PeerHandle, frame: &str) -> Result<(), TransportError> {
        if self.failing.lock().unwrap().contains(to) {
            return Err(TransportError::NotConnected(*to));
        }
        self.sent.lock().unwrap().push((*to, frame.to_string()));
        Ok(())
    }

    async fn close(&self, peer: &PeerHandle) {
        self.closed.lock().unwrap().push(*peer);
    }

    async fn close_all(&self) {
        self.closed_all.store(true, Ordering::SeqCst);
    }
}
