//! Interactive chat client.
//!
//! Lines typed at the prompt are sent to the current target (everyone, or
//! one user after `/to`). Frames from the relay go through a `ClientInbox`
//! and are printed by a separate task; received payloads are saved to the
//! configured download directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use parley_core::config::ParleyConfig;
use parley_core::wire::FIELD_SEP;
use parley_core::{ChunkKind, Frame};
use parley_services::liveness::transfer_expiry_loop;
use parley_services::transfer::sanitize_filename;
use parley_services::{split_payload, ClientEvent, ClientInbox, ReceivedPayload, RelayLink};

/// How often the client drops incomplete incoming transfers.
const TRANSFER_SWEEP: Duration = Duration::from_secs(5);

pub struct ChatOptions {
    pub username: String,
    pub server: String,
    pub port: u16,
    pub udp: bool,
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Text(String),
    To(String),
    All,
    Send(ChunkKind, PathBuf),
    Users,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Text(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("to", "") => Input::Invalid("usage: /to <user>".into()),
        ("to", user) => Input::To(user.to_string()),
        ("all", _) => Input::All,
        ("image" | "file" | "voice", "") => Input::Invalid(format!("usage: /{name} <path>")),
        ("image", path) => Input::Send(ChunkKind::Image, PathBuf::from(path)),
        ("file", path) => Input::Send(ChunkKind::File, PathBuf::from(path)),
        ("voice", path) => Input::Send(ChunkKind::Voice, PathBuf::from(path)),
        ("users", _) => Input::Users,
        ("help" | "?", _) => Input::Help,
        ("quit" | "exit", _) => Input::Quit,
        (other, _) => Input::Invalid(format!("unknown command /{other}, try /help")),
    }
}

pub async fn cmd_chat(opts: ChatOptions) -> Result<()> {
    let config = ParleyConfig::load().unwrap_or_else(|e| {
        eprintln!("warning: {e}; using default settings");
        ParleyConfig::default()
    });

    let server = format!("{}:{}", opts.server, opts.port);
    let (link, mut reader) = if opts.udp {
        RelayLink::connect_udp(&server).await?
    } else {
        RelayLink::connect_tcp(&server).await?
    };
    let link = Arc::new(link);
    let username = opts.username;

    link.send(&Frame::Connect {
        username: username.clone(),
    })
    .await?;
    println!(
        "Connected to {} over {} as {}. Type /help for commands.",
        server,
        if opts.udp { "udp" } else { "tcp" },
        username
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (inbox, events) = ClientInbox::new(username.clone(), config.transfers.clone());
    let members = Arc::new(Mutex::new(Vec::<String>::new()));

    tokio::spawn(transfer_expiry_loop(
        inbox.reassembler().clone(),
        TRANSFER_SWEEP,
        shutdown_tx.subscribe(),
    ));
    tokio::spawn(heartbeat_loop(
        link.clone(),
        username.clone(),
        config.client.heartbeat_interval(),
        shutdown_tx.subscribe(),
    ));
    tokio::spawn(print_events(
        events,
        members.clone(),
        config.client.download_dir.clone(),
    ));

    let mut relay_closed = shutdown_tx.subscribe();
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            loop {
                match reader.next_frame().await {
                    Ok(Some(raw)) => inbox.handle_inbound(&raw),
                    Ok(None) => {
                        println!("*** relay closed the connection");
                        break;
                    }
                    Err(e) => {
                        println!("*** connection lost: {e:#}");
                        break;
                    }
                }
            }
            let _ = shutdown.send(());
        });
    }

    let mut target: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = relay_closed.recv() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Text(body) => {
                if body.contains(FIELD_SEP) {
                    println!("*** messages cannot contain '{FIELD_SEP}'");
                    continue;
                }
                link.send(&Frame::Text {
                    sender: username.clone(),
                    recipient: target.clone(),
                    body,
                })
                .await?;
            }
            Input::To(user) => {
                println!("*** now talking privately to {user}");
                target = Some(user);
            }
            Input::All => {
                println!("*** now talking to everyone");
                target = None;
            }
            Input::Send(kind, path) => {
                if let Err(e) =
                    send_payload(&link, &username, target.as_deref(), kind, &path, &config).await
                {
                    println!("*** {e:#}");
                }
            }
            Input::Users => {
                let members = members.lock().map(|m| m.join(", ")).unwrap_or_default();
                println!("*** online: {members}");
            }
            Input::Help => print_help(),
            Input::Quit => break,
            Input::Invalid(msg) => println!("*** {msg}"),
        }
    }

    let _ = link
        .send(&Frame::Disconnect {
            username: username.clone(),
        })
        .await;
    let _ = shutdown_tx.send(());
    println!("Bye.");
    Ok(())
}

async fn send_payload(
    link: &RelayLink,
    username: &str,
    target: Option<&str>,
    kind: ChunkKind,
    path: &Path,
    config: &ParleyConfig,
) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let filename = match kind {
        ChunkKind::File => path.file_name().and_then(|n| n.to_str()),
        _ => None,
    };
    let transfer = split_payload(
        kind,
        &bytes,
        username,
        target,
        filename,
        config.transfers.chunk_size,
    )?;
    link.send_transfer(&transfer).await?;
    println!(
        "*** sent {} {} ({} bytes, {} chunks)",
        kind,
        path.display(),
        bytes.len(),
        transfer.chunks.len()
    );
    Ok(())
}

async fn heartbeat_loop(
    link: Arc<RelayLink>,
    username: String,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = interval.tick() => {
                let frame = Frame::Heartbeat { username: username.clone() };
                if link.send(&frame).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn print_events(
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    members: Arc<Mutex<Vec<String>>>,
    download_dir: PathBuf,
) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Message {
                from,
                body,
                private: true,
            } => println!("[{from} → you] {body}"),
            ClientEvent::Message { from, body, .. } => println!("[{from}] {body}"),
            ClientEvent::Membership(list) => {
                println!("*** online: {}", list.join(", "));
                if let Ok(mut m) = members.lock() {
                    *m = list;
                }
            }
            ClientEvent::Notice(text) => println!("*** {text}"),
            ClientEvent::Payload(payload) => match save_payload(&download_dir, &payload).await {
                Ok(path) => println!(
                    "*** {} from {}{} saved to {}",
                    payload.kind,
                    payload.from,
                    if payload.private { " (private)" } else { "" },
                    path.display()
                ),
                Err(e) => println!("*** failed to save {} from {}: {e:#}", payload.kind, payload.from),
            },
        }
    }
}

async fn save_payload(dir: &Path, payload: &ReceivedPayload) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let name = payload_filename(payload);
    let path = unique_path(dir, &name).await;
    tokio::fs::write(&path, &payload.bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn payload_filename(payload: &ReceivedPayload) -> String {
    if let Some(name) = &payload.filename {
        return sanitize_filename(name);
    }
    let ext = match payload.kind {
        ChunkKind::Image => "jpg",
        ChunkKind::Voice => "wav",
        ChunkKind::File => "bin",
    };
    format!("{}_{}.{}", sanitize_filename(&payload.from), payload.kind, ext)
}

/// `dir/name`, or `dir/name-N` for the first N that is free.
async fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (name, String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{stem}-{n}{ext}"));
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

fn print_help() {
    println!("  <text>          send to the current target");
    println!("  /to <user>      talk privately to <user>");
    println!("  /all            talk to everyone");
    println!("  /image <path>   send an image");
    println!("  /file <path>    send a file");
    println!("  /voice <path>   send a voice clip");
    println!("  /users          show who is online");
    println!("  /quit           leave");
}
