//! parley-ctl — status queries against parleyd, and an interactive chat client.

use anyhow::{Context, Result};

mod cmd;

use cmd::chat::{ChatOptions, cmd_chat};
use cmd::multicast::{cmd_announce, cmd_listen};
use cmd::status::{cmd_shutdown, cmd_status};
use cmd::users::{cmd_kick, cmd_users};

const DEFAULT_API_PORT: u16 = 9878;
const DEFAULT_TCP_PORT: u16 = 9876;
const DEFAULT_UDP_PORT: u16 = 9877;

fn print_usage() {
    println!("Usage: parley-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status            Show relay status");
    println!("  users             List users online");
    println!("  kick <name>       Remove a user from the chat");
    println!("  shutdown          Stop the daemon");
    println!("  chat <username>   Join the chat interactively");
    println!("  announce <name>   Send stdin lines to the multicast group");
    println!("  listen            Print multicast group announcements");
    println!();
    println!("Options:");
    println!("  --port <port>     API port, or relay port for chat (default: {DEFAULT_API_PORT})");
    println!();
    println!("Chat options:");
    println!("  --server <host>   Relay host (default: 127.0.0.1)");
    println!("  --udp             Use the UDP relay (default port {DEFAULT_UDP_PORT}, tcp {DEFAULT_TCP_PORT})");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port: Option<u16> = None;
    let mut server = "127.0.0.1".to_string();
    let mut udp = false;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                port = Some(
                    args.get(i)
                        .context("--port requires a value")?
                        .parse()
                        .context("--port must be a number")?,
                );
            }
            "--server" => {
                i += 1;
                server = args.get(i).context("--server requires a host")?.clone();
            }
            "--udp" => udp = true,
            other => remaining.push(other),
        }
        i += 1;
    }

    let api_port = port.unwrap_or(DEFAULT_API_PORT);

    match remaining.as_slice() {
        ["status"] | [] => cmd_status(api_port).await,
        ["users"] => cmd_users(api_port).await,
        ["kick", name] => cmd_kick(api_port, name).await,
        ["shutdown"] => cmd_shutdown(api_port).await,
        ["chat", username] => {
            let relay_port = port.unwrap_or(if udp { DEFAULT_UDP_PORT } else { DEFAULT_TCP_PORT });
            cmd_chat(ChatOptions {
                username: username.to_string(),
                server,
                port: relay_port,
                udp,
            })
            .await
        }
        ["announce", name] => cmd_announce(name).await,
        ["listen"] => cmd_listen().await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
