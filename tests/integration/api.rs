use crate::*;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use parley_api::ApiState;

/// Start the HTTP API over `relay` and return its address.
async fn start_api(relay: &Relay) -> Result<(SocketAddr, broadcast::Receiver<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let state = ApiState {
        tcp: Some(relay.node.clone()),
        udp: None,
        started_at: std::time::Instant::now(),
        shutdown_tx,
    };
    tokio::spawn(parley_api::serve_on(state, listener));
    Ok((addr, shutdown_rx))
}

/// Minimal HTTP/1.1 exchange. Returns the status code and parsed JSON body.
async fn request(addr: SocketAddr, method: &str, path: &str) -> Result<(u16, Value)> {
    let mut stream = TcpStream::connect(addr).await?;
    let req = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(req.as_bytes()).await?;

    let mut raw = String::new();
    tokio::time::timeout(RECV_TIMEOUT, stream.read_to_string(&mut raw))
        .await
        .context("API response timed out")??;

    let (head, body) = raw
        .split_once("\r\n\r\n")
        .context("response has no header terminator")?;
    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .context("missing status code")?
        .parse()?;
    let json = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(body).with_context(|| format!("body is not JSON: {body:?}"))?
    };
    Ok((status, json))
}

#[tokio::test]
async fn test_status_and_users_reflect_registry() -> Result<()> {
    let relay = Relay::tcp().await?;
    let (api, _shutdown) = start_api(&relay).await?;
    let _alice = Client::join(&relay, "alice", false).await?;
    let _bob = Client::join(&relay, "bob", false).await?;

    let (code, status) = request(api, "GET", "/api/status").await?;
    assert_eq!(code, 200);
    assert_eq!(status["total_users"], 2);
    assert_eq!(status["relays"][0]["transport"], "tcp");

    let (code, users) = request(api, "GET", "/api/users").await?;
    assert_eq!(code, 200);
    let names: Vec<&str> = users["users"]
        .as_array()
        .context("users is not an array")?
        .iter()
        .filter_map(|u| u["username"].as_str())
        .collect();
    assert_eq!(names, vec!["alice", "bob"]);
    Ok(())
}

#[tokio::test]
async fn test_kick_removes_user_and_tells_everyone() -> Result<()> {
    let relay = Relay::tcp().await?;
    let (api, _shutdown) = start_api(&relay).await?;
    let mut alice = Client::join(&relay, "alice", false).await?;
    let mut bob = Client::join(&relay, "bob", false).await?;

    let (code, body) = request(api, "DELETE", "/api/users/alice").await?;
    assert_eq!(code, 200);
    assert_eq!(body["removed"], true);

    alice
        .expect(|f| f == "NOTICE:You were removed from the chat")
        .await?;
    bob.expect(|f| f == "NOTICE:alice has left the chat (removed)")
        .await?;
    relay.wait_for_users(&["bob"]).await?;

    let (_, body) = request(api, "DELETE", "/api/users/nobody").await?;
    assert_eq!(body["removed"], false);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_endpoint_signals_daemon() -> Result<()> {
    let relay = Relay::tcp().await?;
    let (api, mut shutdown) = start_api(&relay).await?;

    let (code, body) = request(api, "POST", "/api/daemon/shutdown").await?;
    assert_eq!(code, 200);
    assert_eq!(body["shutting_down"], true);

    tokio::time::timeout(RECV_TIMEOUT, shutdown.recv())
        .await
        .context("shutdown was never broadcast")??;
    Ok(())
}
