use crate::*;

use parley_core::config::TransferConfig;
use parley_core::ChunkKind;
use parley_services::{split_payload, ClientEvent, ClientInbox};

#[tokio::test]
async fn test_udp_broadcast_and_private() -> Result<()> {
    let relay = Relay::udp().await?;
    let alice = Client::join(&relay, "alice", true).await?;
    let mut bob = Client::join(&relay, "bob", true).await?;
    let mut carol = Client::join(&relay, "carol", true).await?;

    alice.say("over udp").await?;
    assert_eq!(
        bob.expect(|f| f.contains("MSG:")).await?,
        "FROM:alice|MSG:over udp"
    );
    assert_eq!(
        carol.expect(|f| f.contains("MSG:")).await?,
        "FROM:alice|MSG:over udp"
    );

    alice.whisper("carol", "just you").await?;
    assert_eq!(
        carol.expect(|f| f.contains("MSG:")).await?,
        "PRIVATE:alice|MSG:just you"
    );
    bob.expect_none(Duration::from_millis(300), |f| f.contains("MSG:"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_any_datagram_registers_its_sender() -> Result<()> {
    let relay = Relay::udp().await?;
    let mut bob = Client::join(&relay, "bob", true).await?;

    // No CONNECT: the first text frame is enough.
    let (zed, _reader) = RelayLink::connect_udp(&relay.addr.to_string()).await?;
    zed.send_raw("FROM:zed|MSG:anyone there?").await?;

    bob.expect(|f| f == "NOTICE:zed has joined the chat").await?;
    bob.expect(|f| f == "USERLIST:bob,zed").await?;
    assert_eq!(
        bob.expect(|f| f.contains("MSG:")).await?,
        "FROM:zed|MSG:anyone there?"
    );
    relay.wait_for_users(&["bob", "zed"]).await
}

#[tokio::test]
async fn test_silent_user_expires_and_membership_is_rebroadcast() -> Result<()> {
    let relay = Relay::udp().await?.with_liveness(1);
    let _alice = Client::join(&relay, "alice", true).await?;
    let mut bob = Client::join(&relay, "bob", true).await?;

    // Bob keeps heartbeating; alice goes quiet.
    let heartbeat = Frame::Heartbeat {
        username: "bob".into(),
    };
    let notice = tokio::time::timeout(Duration::from_secs(6), async {
        loop {
            if let Err(e) = bob.link.send(&heartbeat).await {
                return Err(e);
            }
            match tokio::time::timeout(Duration::from_millis(300), bob.reader.next_frame()).await {
                Ok(Ok(Some(frame))) if frame.contains("(timeout)") => return Ok(frame),
                Ok(Err(e)) => return Err(e),
                _ => continue,
            }
        }
    })
    .await
    .context("alice never timed out")??;

    assert_eq!(notice, "NOTICE:alice has left the chat (timeout)");
    bob.expect(|f| f == "USERLIST:bob").await?;
    assert_eq!(relay.node.registry().all(), vec!["bob"]);
    Ok(())
}

#[tokio::test]
async fn test_private_file_transfer_over_udp() -> Result<()> {
    let relay = Relay::udp().await?;
    let alice = Client::join(&relay, "alice", true).await?;
    let mut bob = Client::join(&relay, "bob", true).await?;
    let mut carol = Client::join(&relay, "carol", true).await?;

    let contents = b"quarterly numbers\n".repeat(200);
    let transfer = split_payload(
        ChunkKind::File,
        &contents,
        "alice",
        Some("bob"),
        Some("report.txt"),
        400,
    )?;
    alice.link.send_transfer(&transfer).await?;

    let (inbox, mut events) = ClientInbox::new("bob", TransferConfig::default());
    let payload = loop {
        let frame = bob.recv().await?;
        inbox.handle_inbound(&frame);
        if let Ok(ClientEvent::Payload(p)) = events.try_recv() {
            break p;
        }
    };

    assert_eq!(payload.filename.as_deref(), Some("report.txt"));
    assert!(payload.private);
    assert_eq!(payload.bytes.as_ref(), contents.as_slice());
    carol
        .expect_none(Duration::from_millis(300), |f| f.starts_with("FILECHUNK"))
        .await?;
    Ok(())
}
