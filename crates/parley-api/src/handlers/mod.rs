//! HTTP API handlers — exposes relay state as JSON.

pub mod status;
pub mod users;

use std::sync::Arc;
use std::time::Instant;

use parley_services::Node;

#[derive(Clone)]
pub struct ApiState {
    /// Stream relay, if enabled.
    pub tcp: Option<Arc<Node>>,
    /// Datagram relay, if enabled.
    pub udp: Option<Arc<Node>>,
    pub started_at: Instant,
    /// Sending on this stops the daemon.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl ApiState {
    /// Every running relay node.
    fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.tcp.iter().chain(self.udp.iter())
    }
}

// Re-export handler functions for use in router setup.
pub use status::{handle_shutdown, handle_status};
pub use users::{handle_kick, handle_users};
