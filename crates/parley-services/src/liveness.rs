//! Periodic sweeps — idle users on the relay, stale transfers on the client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;

use parley_core::config::LivenessConfig;

use crate::node::Node;
use crate::reassembly::ChunkReassembler;

/// Expire silent users every `sweep_interval` until shutdown.
///
/// This is the only way a vanished datagram peer is ever noticed.
pub async fn liveness_loop(
    node: Arc<Node>,
    config: LivenessConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let timeout = config.timeout();
    let mut interval = tokio::time::interval(config.sweep_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::debug!(
        transport = %node.kind(),
        timeout_secs = timeout.as_secs(),
        "liveness monitor started"
    );

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(transport = %node.kind(), "liveness monitor stopping");
                return Ok(());
            }
            _ = interval.tick() => {
                let expired = node.expire_idle(timeout).await;
                if !expired.is_empty() {
                    tracing::info!(
                        transport = %node.kind(),
                        count = expired.len(),
                        users = ?expired,
                        "expired idle users"
                    );
                }
            }
        }
    }
}

/// Drop incomplete transfers past their expiry window until shutdown.
pub async fn transfer_expiry_loop(
    reassembler: ChunkReassembler,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            _ = interval.tick() => {
                let removed = reassembler.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "expired incomplete transfers");
                }
            }
        }
    }
}
