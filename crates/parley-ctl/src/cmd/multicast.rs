//! Relay-less group announcements over IPv4 multicast.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use parley_core::config::{MulticastConfig, ParleyConfig};
use parley_services::multicast::{Announcer, MulticastListener};

fn multicast_config() -> MulticastConfig {
    ParleyConfig::load()
        .unwrap_or_else(|e| {
            eprintln!("warning: {e}; using default settings");
            ParleyConfig::default()
        })
        .multicast
}

/// Send every stdin line to the group until EOF or Ctrl-C.
pub async fn cmd_announce(name: &str) -> Result<()> {
    let config = multicast_config();
    let announcer = Announcer::new(&config, name)?;
    println!(
        "Announcing to {}:{} as {name}. Ctrl-D to stop.",
        config.group, config.port
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = announcer.announce(&line).await {
                    eprintln!("error: {e:#}");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// Print announcements heard on the group until Ctrl-C.
pub async fn cmd_listen() -> Result<()> {
    let config = multicast_config();
    let mut listener = MulticastListener::join(&config)?;
    println!("Listening on {}:{}. Ctrl-C to stop.", config.group, config.port);

    loop {
        tokio::select! {
            heard = listener.next() => {
                let (from, announcement) = heard?;
                println!("{announcement}  ({from})");
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
