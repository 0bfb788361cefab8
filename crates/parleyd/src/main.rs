//! parleyd — Parley chat relay daemon.
//!
//! Runs a TCP relay, a UDP relay, or both, each with its own user registry,
//! plus the local status API.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use parley_core::config::ParleyConfig;
use parley_services::liveness::liveness_loop;
use parley_services::transport::{TcpTransport, UdpTransport};
use parley_services::Node;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config(config_arg()?);
    let net = &config.network;
    if !net.enable_tcp && !net.enable_udp {
        bail!("both relays are disabled in config; nothing to do");
    }
    let bind_ip: IpAddr = net
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind_addr {:?}", net.bind_addr))?;
    tracing::info!(
        bind = %bind_ip,
        tcp = net.enable_tcp,
        udp = net.enable_udp,
        timeout_secs = config.liveness.timeout_secs,
        "parleyd starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let mut shutdown_rx = shutdown_tx.subscribe();

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Relays ───────────────────────────────────────────────────────────────

    let mut tasks = JoinSet::new();

    let tcp_node = if net.enable_tcp {
        let addr = SocketAddr::new(bind_ip, net.tcp_port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind tcp relay on {addr}"))?;
        let transport = TcpTransport::new();
        let node = Node::new(transport.clone());

        tasks.spawn(named(
            "tcp relay",
            transport.serve(listener, node.clone(), shutdown_tx.subscribe()),
        ));
        tasks.spawn(named(
            "tcp liveness",
            liveness_loop(node.clone(), config.liveness.clone(), shutdown_tx.subscribe()),
        ));
        Some(node)
    } else {
        None
    };

    let udp_node = if net.enable_udp {
        let addr = SocketAddr::new(bind_ip, net.udp_port);
        let transport = UdpTransport::bind(addr)
            .with_context(|| format!("failed to bind udp relay on {addr}"))?;
        let node = Node::new(transport.clone());

        tasks.spawn(named(
            "udp relay",
            transport.serve(node.clone(), shutdown_tx.subscribe()),
        ));
        tasks.spawn(named(
            "udp liveness",
            liveness_loop(node.clone(), config.liveness.clone(), shutdown_tx.subscribe()),
        ));
        Some(node)
    } else {
        None
    };

    // ── Status API ───────────────────────────────────────────────────────────
    {
        let state = parley_api::ApiState {
            tcp: tcp_node.clone(),
            udp: udp_node.clone(),
            started_at: Instant::now(),
            shutdown_tx: shutdown_tx.clone(),
        };
        let api_port = net.api_port;
        tokio::spawn(async move {
            if let Err(e) = parley_api::serve(state, api_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        Some(joined) = tasks.join_next() => match joined {
            Ok((name, Ok(()))) => tracing::error!(task = name, "task exited"),
            Ok((name, Err(e))) => tracing::error!(task = name, error = %e, "task failed"),
            Err(e) => tracing::error!(error = %e, "task panicked"),
        },
    }

    let _ = shutdown_tx.send(());
    for node in [tcp_node, udp_node].into_iter().flatten() {
        node.shutdown().await;
    }
    while tasks.join_next().await.is_some() {}

    Ok(())
}

async fn named(
    name: &'static str,
    task: impl Future<Output = Result<()>>,
) -> (&'static str, Result<()>) {
    (name, task.await)
}

/// `--config <path>`, if given.
fn config_arg() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = args.next().context("--config requires a path")?;
                path = Some(PathBuf::from(value));
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(path)
}

fn load_config(path: Option<PathBuf>) -> ParleyConfig {
    let loaded = match &path {
        Some(path) => ParleyConfig::load_from(path),
        None => {
            if let Err(e) = ParleyConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            ParleyConfig::load()
        }
    };
    loaded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ParleyConfig::default()
    })
}
